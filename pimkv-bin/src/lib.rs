//! # pimkv-bin
//!
//! Command line front end for the pimkv KV-cache placement model.
//!
//! ## Quickstart guide
//!
//! ```sh
//! cargo run --release --bin=kv_sim -- --config config/pim-config.json \
//!     --heads 32 --prompt-len 128 --decode-steps 64 --output report.json
//! ```
//!
//! `kv_sim` places one KEY and one VALUE tensor per attention head, writes
//! the prompt into them, then appends tokens one decode step at a time and
//! issues a PIM command per head after each step. The timing comes from the
//! fixed-latency engine configured in the `engine` section of the config.
//!
//! ## Modules
//!
//! - `workload`: The prefill/decode request generator.
pub mod workload;

#[macro_use]
extern crate log;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Installs `env_logger` behind a progress-bar aware bridge.
///
/// The default filter is `info`; override it with `RUST_LOG`.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}
