use crate::memory::DRAMAddr;
use crate::util::CL_SHIFT;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A contiguous bit field inside the DRAM part of a physical address.
///
/// `pos` is counted after the cache-line offset has been shifted out.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Field {
    /// Lowest bit of the field
    pub pos: u32,
    /// Number of bits
    pub width: u32,
}

impl Field {
    /// Creates a field spanning `width` bits starting at `pos`.
    pub const fn new(pos: u32, width: u32) -> Self {
        Field { pos, width }
    }

    /// Right-aligned mask of the field's width.
    pub const fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// One past the highest bit of the field.
    pub const fn end(&self) -> u32 {
        self.pos + self.width
    }

    /// Number of distinct values the field can hold.
    pub const fn count(&self) -> u64 {
        1 << self.width
    }

    fn extract(&self, value: u64) -> u64 {
        (value >> self.pos) & self.mask()
    }

    fn insert(&self, value: u64) -> u64 {
        (value & self.mask()) << self.pos
    }

    fn overlaps(&self, other: &Field) -> bool {
        self.width > 0 && other.width > 0 && self.pos < other.end() && other.pos < self.end()
    }
}

/// Errors reported when an [`AddressMapping`] is not usable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// Two fields share address bits.
    #[error("address fields {0} and {1} overlap")]
    Overlap(&'static str, &'static str),
    /// The mapping does not leave room for the PIM header flags.
    #[error("address mapping uses {bits} bits, at most {max} are allowed")]
    TooWide {
        /// Bits used by the mapping
        bits: u32,
        /// Upper bound
        max: u32,
    },
    /// Bank and bankgroup must both be present for bank decoding.
    #[error("address mapping has no {0} bits")]
    MissingField(&'static str),
}

/// Physical address layout of the PIM DRAM.
///
/// A linear address is `fields << shift_bits`, where each field
/// (channel, rank, bankgroup, bank, row, column) occupies the bit range
/// given by its [`Field`]. The bank field sits at a fixed offset below the
/// row field so that tensor placement can patch bank bits of an allocated
/// row address in place.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AddressMapping {
    /// Low-order bits below the DRAM fields (cache-line offset)
    pub shift_bits: u32,
    /// Channel field
    pub channel: Field,
    /// Rank field
    pub rank: Field,
    /// Bankgroup field
    pub bankgroup: Field,
    /// Bank field (within a bankgroup)
    pub bank: Field,
    /// Row field
    pub row: Field,
    /// Column field
    pub col: Field,
}

/// Highest address bit a mapping may use; the rest is reserved for PIM header flags.
pub const MAX_ADDRESS_BITS: u32 = 46;

impl Default for AddressMapping {
    fn default() -> Self {
        AddressMapping::newton()
    }
}

impl AddressMapping {
    /// Layout used by the Newton-style PIM device: bankgroup at 11, bank at 9.
    ///
    /// `col | ch | ba | bg | ra | row` from low to high, 2 KB rows.
    pub const fn newton() -> Self {
        AddressMapping {
            shift_bits: CL_SHIFT,
            col: Field::new(0, 5),
            channel: Field::new(5, 4),
            bank: Field::new(9, 2),
            bankgroup: Field::new(11, 2),
            rank: Field::new(13, 0),
            row: Field::new(13, 14),
        }
    }

    /// Alternate layout with the bank bits above a narrow row field: bankgroup at 21, bank at 19.
    pub const fn wide_row() -> Self {
        AddressMapping {
            shift_bits: CL_SHIFT,
            col: Field::new(0, 5),
            channel: Field::new(5, 4),
            row: Field::new(9, 10),
            bank: Field::new(19, 2),
            bankgroup: Field::new(21, 2),
            rank: Field::new(23, 1),
        }
    }

    fn named_fields(&self) -> [(&'static str, Field); 6] {
        [
            ("channel", self.channel),
            ("rank", self.rank),
            ("bankgroup", self.bankgroup),
            ("bank", self.bank),
            ("row", self.row),
            ("col", self.col),
        ]
    }

    /// Checks that fields are disjoint and leave room for PIM header flags.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), MappingError> {
        if self.bank.width == 0 {
            return Err(MappingError::MissingField("bank"));
        }
        for ((a, fa), (b, fb)) in self.named_fields().into_iter().tuple_combinations() {
            if fa.overlaps(&fb) {
                return Err(MappingError::Overlap(a, b));
            }
        }
        let bits = self.address_bits();
        if bits > MAX_ADDRESS_BITS {
            return Err(MappingError::TooWide {
                bits,
                max: MAX_ADDRESS_BITS,
            });
        }
        Ok(())
    }

    /// Number of address bits covered by the mapping, including the shifted-out offset.
    pub fn address_bits(&self) -> u32 {
        self.shift_bits
            + self
                .named_fields()
                .iter()
                .map(|(_, f)| if f.width == 0 { 0 } else { f.end() })
                .max()
                .unwrap_or(0)
    }

    /// Number of low address bits that stay inside one row: the offset bits plus
    /// everything below the lowest non-column field.
    pub fn in_row_bits(&self) -> u32 {
        let lowest_other = self
            .named_fields()
            .iter()
            .filter(|(name, f)| *name != "col" && f.width > 0)
            .map(|(_, f)| f.pos)
            .min()
            .unwrap_or(0);
        self.shift_bits + lowest_other
    }

    /// Banks inside one bankgroup.
    pub const fn banks_per_group(&self) -> usize {
        self.bank.count() as usize
    }

    /// Banks per channel (bankgroups x banks).
    pub const fn bank_count(&self) -> usize {
        (self.bankgroup.count() * self.bank.count()) as usize
    }

    /// Channels addressable by the channel field.
    pub const fn channel_count(&self) -> usize {
        self.channel.count() as usize
    }

    /// Rows addressable by the row field.
    pub const fn row_count(&self) -> usize {
        self.row.count() as usize
    }

    /// Absolute bit offset of the bank field in a linear address.
    pub const fn bank_shift(&self) -> u32 {
        self.shift_bits + self.bank.pos
    }

    /// Composes a linear address from fully specified DRAM coordinates.
    ///
    /// Out-of-range coordinates are truncated to the field width.
    pub fn encode_address(
        &self,
        channel: usize,
        rank: usize,
        bankgroup: usize,
        bank: usize,
        row: usize,
        col: usize,
    ) -> u64 {
        DRAMAddr::new(channel, rank, bankgroup, bank, row, col).linearize(self)
    }

    pub(crate) fn compose(&self, addr: &DRAMAddr) -> u64 {
        let mut res = 0;
        res |= self.channel.insert(addr.channel as u64);
        res |= self.rank.insert(addr.rank as u64);
        res |= self.bankgroup.insert(addr.bankgroup as u64);
        res |= self.bank.insert(addr.bank as u64);
        res |= self.row.insert(addr.row as u64);
        res |= self.col.insert(addr.col as u64);
        res << self.shift_bits
    }

    /// Decodes a linear address into its DRAM coordinates.
    pub fn decode(&self, address: u64) -> DRAMAddr {
        let a = address >> self.shift_bits;
        DRAMAddr {
            channel: self.channel.extract(a) as usize,
            rank: self.rank.extract(a) as usize,
            bankgroup: self.bankgroup.extract(a) as usize,
            bank: self.bank.extract(a) as usize,
            row: self.row.extract(a) as usize,
            col: self.col.extract(a) as usize,
        }
    }

    /// Returns the linear bank index (`bankgroup * banks_per_group + bank`) an address resolves to.
    pub fn decode_bank(&self, address: u64) -> usize {
        let a = address >> self.shift_bits;
        let bankgroup = self.bankgroup.extract(a) as usize;
        let bank = self.bank.extract(a) as usize;
        bankgroup * self.banks_per_group() + bank
    }

    /// Returns `address` with its bank field replaced by `bank`, all other bits untouched.
    pub fn with_bank(&self, address: u64, bank: u64) -> u64 {
        let shift = self.bank_shift();
        let cleared = address & !(self.bank.mask() << shift);
        cleared | ((bank & self.bank.mask()) << shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Rng;
    use rand::Rng as _;

    #[test]
    fn presets_are_valid() {
        assert_eq!(AddressMapping::newton().validate(), Ok(()));
        assert_eq!(AddressMapping::wide_row().validate(), Ok(()));
    }

    #[test]
    fn newton_bank_bits_match_fixed_offsets() {
        let m = AddressMapping::newton();
        // bankgroup 2, bank 1 -> bits (11, 9) after the 6-bit shift
        let addr = (2u64 << (11 + 6)) | (1u64 << (9 + 6));
        assert_eq!(m.decode_bank(addr), 2 * 4 + 1);
    }

    #[test]
    fn wide_row_bank_bits_match_fixed_offsets() {
        let m = AddressMapping::wide_row();
        let addr = (3u64 << (21 + 6)) | (2u64 << (19 + 6));
        assert_eq!(m.decode_bank(addr), 3 * 4 + 2);
    }

    #[test]
    fn decode_bank_inverts_encode_for_all_banks() {
        for m in [AddressMapping::newton(), AddressMapping::wide_row()] {
            for bg in 0..4 {
                for ba in 0..4 {
                    for (ch, row, col) in [(0, 0, 0), (3, 1023, 31), (15, 517, 7)] {
                        let addr = m.encode_address(ch, 0, bg, ba, row, col);
                        assert_eq!(m.decode_bank(addr), bg * 4 + ba);
                    }
                }
            }
        }
    }

    #[test]
    fn decode_inverts_encode_random() {
        let mut rng = Rng::from_seed(0xD1A);
        for m in [AddressMapping::newton(), AddressMapping::wide_row()] {
            for _ in 0..10_000 {
                let a = DRAMAddr::new(
                    rng.random_range(0..m.channel_count()),
                    rng.random_range(0..m.rank.count() as usize),
                    rng.random_range(0..m.bankgroup.count() as usize),
                    rng.random_range(0..m.banks_per_group()),
                    rng.random_range(0..m.row_count()),
                    rng.random_range(0..m.col.count() as usize),
                );
                assert_eq!(m.decode(a.linearize(&m)), a);
            }
        }
    }

    #[test]
    fn with_bank_only_touches_bank_field() {
        let m = AddressMapping::newton();
        let base = m.encode_address(5, 0, 3, 2, 4000, 0);
        let patched = m.with_bank(base, 1);
        let d = m.decode(patched);
        assert_eq!(d, DRAMAddr::new(5, 0, 3, 1, 4000, 0));
        assert_eq!(m.with_bank(patched, 2), base);
    }

    #[test]
    fn overlapping_fields_are_rejected() {
        let mut m = AddressMapping::newton();
        m.bank = Field::new(10, 2);
        assert_eq!(m.validate(), Err(MappingError::Overlap("bankgroup", "bank")));
    }

    #[test]
    fn geometry_counts() {
        let m = AddressMapping::newton();
        assert_eq!(m.bank_count(), 16);
        assert_eq!(m.banks_per_group(), 4);
        assert_eq!(m.channel_count(), 16);
        assert_eq!(m.in_row_bits(), 11);
        assert_eq!(m.address_bits(), 33);
    }
}
