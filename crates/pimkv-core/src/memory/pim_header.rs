use crate::memory::AddressMapping;
use crate::util::PIM_COUNT_BITS;
use serde::Serialize;

/// Descriptor of an in-memory compute instruction.
///
/// The encoded word keeps `channel` and `row` in the mapping's own channel
/// and row fields, so a header routes through the queues exactly like a
/// plain address. The remaining fields sit above the mapping's highest bit:
///
/// ```text
/// | readres (8) | comps (8) | gwrite (1) | address bits of (channel, row) |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PimHeader {
    /// Destination channel
    pub channel: usize,
    /// Row the command operates on
    pub row: usize,
    /// Whether this header starts a gather-write of operands into the global buffer
    pub gather_write: bool,
    /// Number of compute commands that follow
    pub num_comps: u32,
    /// Number of read-result commands that follow
    pub num_readres: u32,
}

impl PimHeader {
    /// Packs the header into a command word.
    ///
    /// # Panics
    ///
    /// Panics if `channel` or `row` lie outside the mapping, or if `num_comps`
    /// or `num_readres` do not fit into their 8-bit fields.
    pub fn encode(&self, mapping: &AddressMapping) -> u64 {
        assert!(
            self.channel < mapping.channel_count() && self.row < mapping.row_count(),
            "PIM header target out of range: channel {} of {}, row {} of {}",
            self.channel,
            mapping.channel_count(),
            self.row,
            mapping.row_count()
        );
        let limit = 1u32 << PIM_COUNT_BITS;
        assert!(
            self.num_comps < limit && self.num_readres < limit,
            "PIM header counts out of range: comps {}, readres {}",
            self.num_comps,
            self.num_readres
        );
        let top = mapping.address_bits();
        let base = mapping.encode_address(self.channel, 0, 0, 0, self.row, 0);
        base | (u64::from(self.gather_write) << top)
            | (u64::from(self.num_comps) << (top + 1))
            | (u64::from(self.num_readres) << (top + 1 + PIM_COUNT_BITS))
    }

    /// Unpacks a command word produced by [`PimHeader::encode`].
    pub fn decode(word: u64, mapping: &AddressMapping) -> Self {
        let top = mapping.address_bits();
        let count_mask = (1u64 << PIM_COUNT_BITS) - 1;
        let addr = mapping.decode(word & ((1u64 << top) - 1));
        PimHeader {
            channel: addr.channel,
            row: addr.row,
            gather_write: (word >> top) & 1 == 1,
            num_comps: ((word >> (top + 1)) & count_mask) as u32,
            num_readres: ((word >> (top + 1 + PIM_COUNT_BITS)) & count_mask) as u32,
        }
    }
}

impl AddressMapping {
    /// Packs an in-memory compute header for the command decoder of the timing engine.
    pub fn encode_pim_header(
        &self,
        channel: usize,
        row: usize,
        gather_write: bool,
        num_comps: u32,
        num_readres: u32,
    ) -> u64 {
        PimHeader {
            channel,
            row,
            gather_write,
            num_comps,
            num_readres,
        }
        .encode(self)
    }
}
