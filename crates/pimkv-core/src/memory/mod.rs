//! The `memory` module models the physical side of the PIM DRAM.
//!
//! - [`AddressMapping`]: bit layout of channel/rank/bankgroup/bank/row/column fields,
//!   with encode, decode and in-place bank patching.
//! - [`DRAMAddr`]: structured DRAM coordinates of an address.
//! - [`PimHeader`]: in-memory compute instruction descriptors packed into a command word.
//! - [`BankUtilization`]: per-channel, per-bank access counters and open-row flags.
mod address_mapping;
mod bank_stats;
mod dram_addr;
mod pim_header;

pub use self::address_mapping::{AddressMapping, Field, MAX_ADDRESS_BITS, MappingError};
pub use self::bank_stats::{BankStat, BankUtilization};
pub use self::dram_addr::DRAMAddr;
pub use self::pim_header::PimHeader;
