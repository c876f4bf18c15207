//! Utility functions and types used throughout pimkv.
//!
//! - Constants for the DRAM geometry ([`CL_SHIFT`], [`MAX_BANKS`], ...)
//! - Progress reporting utilities ([`NamedProgress`])
//! - Random number generation ([`Rng`])

mod constants;
mod named_progress;
mod rng;

pub use self::constants::*;
pub use self::named_progress::NamedProgress;
pub use self::rng::Rng;

/// Integer division rounding towards positive infinity.
///
/// # Examples
///
/// ```
/// use pimkv_core::util::ceil_div;
///
/// assert_eq!(ceil_div(1, 4), 1);
/// assert_eq!(ceil_div(8, 4), 2);
/// assert_eq!(ceil_div(0, 4), 0);
/// ```
pub const fn ceil_div(n: u32, d: u32) -> u32 {
    n.div_ceil(d)
}

/// Creates a vector by applying a function to each index.
///
/// # Examples
///
/// ```
/// use pimkv_core::util::make_vec;
///
/// let squares = make_vec(5, |i| i * i);
/// assert_eq!(squares, vec![0, 1, 4, 9, 16]);
/// ```
pub fn make_vec<T>(n: usize, f: impl Fn(usize) -> T) -> Vec<T> {
    let mut v = Vec::with_capacity(n);
    for i in 0..n {
        let val = f(i);
        v.push(val);
    }
    v
}
