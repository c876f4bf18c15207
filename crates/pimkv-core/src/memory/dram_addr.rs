use crate::memory::AddressMapping;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// DRAM coordinates of a physical address.
///
/// Represents the physical organization of an address in a PIM DRAM
/// channel, decoded from a linear address using an [`AddressMapping`].
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DRAMAddr {
    /// Channel number
    pub channel: usize,
    /// Rank number
    pub rank: usize,
    /// Bankgroup number
    pub bankgroup: usize,
    /// Bank number within the bankgroup
    pub bank: usize,
    /// Row number
    pub row: usize,
    /// Column number
    pub col: usize,
}

impl Display for DRAMAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(
            fmt,
            "(ch {}, ra {}, bg {}, ba {}, row {}, col {})",
            self.channel, self.rank, self.bankgroup, self.bank, self.row, self.col
        )
    }
}

impl DRAMAddr {
    /// Creates a new DRAM address.
    pub fn new(
        channel: usize,
        rank: usize,
        bankgroup: usize,
        bank: usize,
        row: usize,
        col: usize,
    ) -> Self {
        DRAMAddr {
            channel,
            rank,
            bankgroup,
            bank,
            row,
            col,
        }
    }

    /// Decodes a physical address into DRAM components.
    pub fn from_phys(addr: u64, mapping: &AddressMapping) -> DRAMAddr {
        mapping.decode(addr)
    }

    /// Linearizes the DRAM coordinates into a physical address.
    pub fn linearize(&self, mapping: &AddressMapping) -> u64 {
        mapping.compose(self)
    }

    /// Linear bank index within the channel.
    pub fn bank_index(&self, mapping: &AddressMapping) -> usize {
        self.bankgroup * mapping.banks_per_group() + self.bank
    }
}

#[cfg(test)]
mod tests {
    use super::DRAMAddr;
    use crate::memory::AddressMapping;

    #[test]
    fn test_display() {
        let a = DRAMAddr::new(1, 0, 2, 3, 42, 7);
        assert_eq!(a.to_string(), "(ch 1, ra 0, bg 2, ba 3, row 42, col 7)");
    }

    #[test]
    fn test_bank_index() {
        let m = AddressMapping::newton();
        let a = DRAMAddr::new(0, 0, 3, 1, 0, 0);
        assert_eq!(a.bank_index(&m), 13);
        assert_eq!(DRAMAddr::from_phys(a.linearize(&m), &m), a);
    }
}
