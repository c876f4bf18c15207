//! KV-cache tensor placement and growth.
//!
//! A [`PimTensor`] is one half (KEY or VALUE) of one attention head's cache,
//! bound to a single channel. It owns an append-only list of row base
//! addresses obtained from a [`RowAllocator`] and maps a logical
//! `(sequence index, embedding index)` pair to a physical address inside
//! those rows, patching the bank bits of the row address to spread the
//! tensor over `bank_per_channel` banks.
//!
//! The two kinds use transposed layouts:
//!
//! - KEY spreads the embedding dimension across banks. One allocation chunk
//!   holds `ceil(E / elements_per_row)` rows and covers `bank_per_channel`
//!   tokens.
//! - VALUE spreads the sequence dimension across banks. One chunk holds
//!   `ceil(E / bank_per_channel)` rows and covers `elements_per_row` tokens.

use crate::allocator::{RowAllocator, alloc_rows};
use crate::memory::AddressMapping;
use crate::util::ceil_div;
use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the attention cache a tensor holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KvKind {
    /// Keys: embedding dimension spread across banks
    Key,
    /// Values: sequence dimension spread across banks
    Value,
}

impl fmt::Display for KvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvKind::Key => write!(f, "K"),
            KvKind::Value => write!(f, "V"),
        }
    }
}

/// DRAM geometry constants a tensor is laid out against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorGeometry {
    /// Bytes per element
    pub precision: u64,
    /// Embedding width `E`
    pub embedding_width: u32,
    /// Banks the tensor spreads over
    pub bank_per_channel: u32,
    /// Elements per DRAM row
    pub elements_per_row: u32,
}

/// One KEY or VALUE cache tensor of one head, placed on one channel.
///
/// Shape is `[heads, seq_len, embedding]`; only the sequence dimension grows.
#[derive(Clone, Debug)]
pub struct PimTensor {
    name: String,
    channel: usize,
    kind: KvKind,
    dims: [u32; 3],
    seq_len: u32,
    geometry: TensorGeometry,
    mapping: AddressMapping,
    rows_per_alloc: u32,
    rows: Vec<u64>,
}

impl PimTensor {
    /// Creates a tensor and allocates enough rows for its initial sequence length.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in logs
    /// * `channel` - Channel every row of the tensor lives on
    /// * `dims` - `[heads, seq_len, embedding]`
    /// * `kind` - KEY or VALUE layout
    /// * `geometry` - Precision and DRAM geometry
    /// * `mapping` - Address layout used to patch bank bits
    /// * `allocator` - Shared row allocator of the channel
    ///
    /// # Errors
    ///
    /// Propagates allocator failures (e.g. an exhausted channel).
    pub fn new<A: RowAllocator + ?Sized>(
        name: impl Into<String>,
        channel: usize,
        dims: [u32; 3],
        kind: KvKind,
        geometry: TensorGeometry,
        mapping: AddressMapping,
        allocator: &mut A,
    ) -> Result<Self, A::Error> {
        assert!(
            geometry.bank_per_channel > 0
                && geometry.elements_per_row > 0
                && geometry.embedding_width >= geometry.bank_per_channel,
            "degenerate tensor geometry {geometry:?}"
        );
        let e = geometry.embedding_width;
        let seq_len = dims[1];
        let (rows_per_alloc, num_alloc_iter) = match kind {
            KvKind::Key => (
                ceil_div(e, geometry.elements_per_row),
                ceil_div(seq_len, geometry.bank_per_channel),
            ),
            KvKind::Value => (
                ceil_div(e, geometry.bank_per_channel),
                ceil_div(seq_len, geometry.elements_per_row),
            ),
        };
        let rows = alloc_rows(
            allocator,
            channel,
            (num_alloc_iter * rows_per_alloc) as usize,
        )?;
        let tensor = PimTensor {
            name: name.into(),
            channel,
            kind,
            dims,
            seq_len,
            geometry,
            mapping,
            rows_per_alloc,
            rows,
        };
        debug!(
            "{}: created {} on ch {} with {} rows ({} per chunk), seq_len {}",
            tensor.name,
            kind,
            channel,
            tensor.rows.len(),
            rows_per_alloc,
            seq_len
        );
        Ok(tensor)
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel the tensor lives on.
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// KEY or VALUE.
    pub fn kind(&self) -> KvKind {
        self.kind
    }

    /// Current `[heads, seq_len, embedding]`.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Current sequence length.
    pub fn seq_len(&self) -> u32 {
        self.seq_len
    }

    /// Geometry the tensor was laid out with.
    pub fn geometry(&self) -> TensorGeometry {
        self.geometry
    }

    /// Rows added per growth event.
    pub fn rows_per_alloc(&self) -> u32 {
        self.rows_per_alloc
    }

    /// Number of owned rows; always a multiple of [`rows_per_alloc`](Self::rows_per_alloc).
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Owned row base addresses in allocation order.
    pub fn rows(&self) -> &[u64] {
        &self.rows
    }

    /// New tokens one allocation chunk covers.
    pub fn allocation_step(&self) -> u32 {
        match self.kind {
            KvKind::Key => self.geometry.bank_per_channel,
            KvKind::Value => self.geometry.elements_per_row,
        }
    }

    /// Sequence length up to which no further allocation is needed.
    pub fn allocated_capacity(&self) -> u32 {
        let step = self.allocation_step();
        ceil_div(self.seq_len, step) * step
    }

    /// Appends one token, allocating one more chunk of rows when it crosses the capacity.
    ///
    /// Existing rows are never moved, so addresses handed out earlier stay valid.
    /// Returns whether rows were allocated.
    ///
    /// # Errors
    ///
    /// Propagates allocator failures. On error the sequence length is left unchanged.
    pub fn add_token<A: RowAllocator + ?Sized>(
        &mut self,
        allocator: &mut A,
    ) -> Result<bool, A::Error> {
        let capacity = self.allocated_capacity();
        let seq_len = self.seq_len + 1;
        let grew = seq_len > capacity;
        if grew {
            let rows = alloc_rows(allocator, self.channel, self.rows_per_alloc as usize)?;
            self.rows.extend(rows);
            debug!(
                "{}: grew to {} rows at seq_len {}",
                self.name,
                self.rows.len(),
                seq_len
            );
        }
        self.seq_len = seq_len;
        self.dims[1] += 1;
        Ok(grew)
    }

    /// Row index, bank value and intra-row offset of an element.
    ///
    /// `None` for an embedding index outside `E` or a sequence index at or
    /// past the allocated capacity.
    fn placement(&self, seq_idx: u32, embd_idx: u32) -> Option<(usize, u64, u32)> {
        let g = &self.geometry;
        if embd_idx >= g.embedding_width || seq_idx >= self.allocated_capacity() {
            return None;
        }
        let rows_per_alloc = u64::from(self.rows_per_alloc);
        let (row_idx, bank, offset) = match self.kind {
            KvKind::Key => {
                let bank_idx = embd_idx / g.elements_per_row;
                let row_idx = u64::from(seq_idx) * rows_per_alloc
                    + u64::from(bank_idx / g.bank_per_channel);
                (
                    row_idx,
                    bank_idx % g.bank_per_channel,
                    embd_idx % g.elements_per_row,
                )
            }
            KvKind::Value => {
                let embd_per_bank = g.embedding_width / g.bank_per_channel;
                let row_idx = u64::from(embd_idx % embd_per_bank) * rows_per_alloc
                    + u64::from(seq_idx / g.elements_per_row);
                (
                    row_idx,
                    embd_idx / embd_per_bank,
                    seq_idx % g.elements_per_row,
                )
            }
        };
        Some((usize::try_from(row_idx).ok()?, u64::from(bank), offset))
    }

    /// Bank field value the element is placed in.
    ///
    /// Returns `None` for coordinates outside the tensor's capacity.
    pub fn bank_of(&self, seq_idx: u32, embd_idx: u32) -> Option<u64> {
        self.placement(seq_idx, embd_idx).map(|(_, bank, _)| bank)
    }

    /// Physical address of element `(seq_idx, embd_idx)`.
    ///
    /// Returns `None` if the coordinates lie outside the tensor or the row the
    /// element maps to has not been allocated.
    pub fn address_of(&self, seq_idx: u32, embd_idx: u32) -> Option<u64> {
        let (row_idx, bank, offset) = self.placement(seq_idx, embd_idx)?;
        let base = *self.rows.get(row_idx)?;
        let patched = self.mapping.with_bank(base, bank);
        Some(patched | (u64::from(offset) * self.geometry.precision))
    }

    /// Number of elements of token `seq_idx` that have no address.
    ///
    /// The placement formulas only reach part of each allocation chunk, so this
    /// is nonzero for most tokens even inside the allocated capacity.
    pub fn unresolved_in_token(&self, seq_idx: u32) -> usize {
        (0..self.geometry.embedding_width)
            .filter(|&e| self.address_of(seq_idx, e).is_none())
            .count()
    }

    /// Address lookup by coordinate slice `[seq_idx, embd_idx]`.
    ///
    /// Returns `0` for a malformed coordinate count or an unallocated row.
    pub fn get_addr(&self, indexes: &[u32]) -> u64 {
        match indexes {
            [seq_idx, embd_idx] => self.address_of(*seq_idx, *embd_idx).unwrap_or(0),
            _ => 0,
        }
    }

    /// Every resolvable element address of the current sequence, sequence-major.
    pub fn all_addrs(&self) -> Vec<u64> {
        (0..self.seq_len)
            .cartesian_product(0..self.geometry.embedding_width)
            .filter_map(|(s, e)| self.address_of(s, e))
            .collect()
    }

    /// Distinct `align`-aligned addresses touched when writing token `seq_idx`.
    pub fn token_access_addrs(&self, seq_idx: u32, align: u64) -> Vec<u64> {
        let mask = !(align.max(1) - 1);
        (0..self.geometry.embedding_width)
            .filter_map(|e| self.address_of(seq_idx, e))
            .map(|addr| addr & mask)
            .unique()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{KvKind, PimTensor, TensorGeometry};
    use crate::allocator::RowAllocator;
    use crate::memory::AddressMapping;
    use std::collections::HashSet;
    use std::convert::Infallible;

    /// Hands out rows 1, 2, 3, ... on the requested channel, bank bits clear.
    struct Bump {
        mapping: AddressMapping,
        next: usize,
    }

    impl RowAllocator for Bump {
        type Error = Infallible;

        fn allocate(&mut self, channel: usize) -> Result<u64, Self::Error> {
            self.next += 1;
            Ok(self.mapping.encode_address(channel, 0, 0, 0, self.next, 0))
        }

        fn allocated(&self, _channel: usize) -> usize {
            self.next
        }
    }

    fn geometry() -> TensorGeometry {
        TensorGeometry {
            precision: 2,
            embedding_width: 64,
            bank_per_channel: 4,
            elements_per_row: 8,
        }
    }

    fn setup(kind: KvKind, seq_len: u32) -> (PimTensor, Bump) {
        let mapping = AddressMapping::newton();
        let mut alloc = Bump { mapping, next: 0 };
        let t = PimTensor::new("t", 1, [1, seq_len, 64], kind, geometry(), mapping, &mut alloc)
            .unwrap();
        (t, alloc)
    }

    #[test]
    fn key_chunk_sizing() {
        let (t, alloc) = setup(KvKind::Key, 1);
        assert_eq!(t.rows_per_alloc(), 8);
        assert_eq!(t.num_rows(), 8);
        assert_eq!(alloc.allocated(1), 8);
        assert_eq!(t.allocated_capacity(), 4);
    }

    #[test]
    fn value_chunk_sizing() {
        let (t, _) = setup(KvKind::Value, 9);
        assert_eq!(t.rows_per_alloc(), 16);
        assert_eq!(t.num_rows(), 32);
        assert_eq!(t.allocated_capacity(), 16);
    }

    #[test]
    fn key_first_token_lands_in_first_row() {
        let (t, _) = setup(KvKind::Key, 1);
        let m = AddressMapping::newton();
        let base = t.rows()[0];
        for e in 0..8 {
            let addr = t.address_of(0, e).unwrap();
            assert_eq!(addr & !0x7ff, base, "row bits of embedding {e}");
            assert_eq!(addr & 0x7ff, u64::from(e) * 2);
            assert_eq!(m.decode_bank(addr), 0);
        }
        // the next row segment goes to the next bank of the same row
        let addr = t.address_of(0, 8).unwrap();
        assert_eq!(m.decode_bank(addr), 1);
        assert_eq!(m.decode(addr).row, m.decode(base).row);
    }

    #[test]
    fn key_banks_follow_embedding() {
        let (t, _) = setup(KvKind::Key, 1);
        let m = AddressMapping::newton();
        for e in 0..64 {
            let addr = t.address_of(0, e).unwrap();
            assert_ne!(addr, 0);
            assert_eq!(Some(m.decode_bank(addr) as u64), t.bank_of(0, e));
            assert_eq!(t.bank_of(0, e), Some(u64::from((e / 8) % 4)));
        }
    }

    #[test]
    fn value_banks_follow_embedding_blocks() {
        let (t, _) = setup(KvKind::Value, 8);
        let m = AddressMapping::newton();
        for s in 0..8 {
            for e in [0, 16, 32, 48] {
                let addr = t.address_of(s, e).unwrap();
                assert_eq!(m.decode_bank(addr) as u64, u64::from(e / 16));
                assert_eq!(addr & 0x7ff, u64::from(s) * 2);
            }
        }
    }

    #[test]
    fn unallocated_rows_resolve_to_sentinel() {
        let (t, _) = setup(KvKind::Key, 1);
        assert_eq!(t.address_of(1, 0), None);
        assert_eq!(t.get_addr(&[1, 0]), 0);
    }

    #[test]
    fn huge_sequence_index_is_unallocated() {
        for kind in [KvKind::Key, KvKind::Value] {
            let (t, _) = setup(kind, 1);
            for s in [1 << 29, u32::MAX / 2, u32::MAX] {
                assert_eq!(t.address_of(s, 0), None, "{kind} seq {s}");
                assert_eq!(t.bank_of(s, 0), None);
                assert_eq!(t.get_addr(&[s, 0]), 0);
            }
        }
    }

    #[test]
    fn embedding_past_width_does_not_alias() {
        for kind in [KvKind::Key, KvKind::Value] {
            let (t, _) = setup(kind, 8);
            for e in [64, 65, 127, u32::MAX] {
                assert_eq!(t.address_of(0, e), None, "{kind} embd {e}");
                assert_eq!(t.bank_of(0, e), None);
            }
        }
        // 64 / 16 = 4 would wrap to bank 0 and hit element (0, 0)
        let (t, _) = setup(KvKind::Value, 8);
        assert!(t.address_of(0, 0).is_some());
        assert_eq!(t.get_addr(&[0, 64]), 0);
    }

    #[test]
    fn key_resolves_first_token_of_each_chunk() {
        // 8 rows per chunk, one chunk per 4 tokens: token s lands in rows 8s and 8s+1
        let (t, _) = setup(KvKind::Key, 12);
        assert_eq!(t.num_rows(), 24);
        for s in 0..t.allocated_capacity() {
            for e in 0..64 {
                assert_eq!(t.address_of(s, e).is_some(), s < 3, "({s}, {e})");
            }
            assert_eq!(t.unresolved_in_token(s), if s < 3 { 0 } else { 64 });
        }
    }

    #[test]
    fn value_resolves_low_embedding_rows_of_each_chunk() {
        // 16 rows per chunk; embedding e uses row (e % 16) * 16 + s / 8
        let (t, _) = setup(KvKind::Value, 16);
        assert_eq!(t.num_rows(), 32);
        for s in 0..16 {
            for e in 0..64 {
                assert_eq!(t.address_of(s, e).is_some(), e % 16 < 2, "({s}, {e})");
            }
            assert_eq!(t.unresolved_in_token(s), 56);
        }
    }

    #[test]
    fn resolved_addresses_are_distinct() {
        for (kind, seq_len) in [(KvKind::Key, 12), (KvKind::Value, 16)] {
            let (t, _) = setup(kind, seq_len);
            let addrs = t.all_addrs();
            let unique: HashSet<u64> = addrs.iter().copied().collect();
            assert_eq!(unique.len(), addrs.len(), "{kind}");
        }
    }

    #[test]
    fn all_addrs_lists_resolvable_elements_sequence_major() {
        for (kind, seq_len) in [(KvKind::Key, 6), (KvKind::Value, 9)] {
            let (t, _) = setup(kind, seq_len);
            let expected: Vec<u64> = (0..seq_len)
                .flat_map(|s| (0..64).map(move |e| (s, e)))
                .filter_map(|(s, e)| t.address_of(s, e))
                .collect();
            let all = t.all_addrs();
            assert!(!all.is_empty());
            assert!(all.iter().all(|&a| a != 0));
            assert_eq!(all, expected, "{kind}");
        }
        // tokens past seq_len are not listed even if their rows exist
        let (t, _) = setup(KvKind::Key, 1);
        let first_row: Vec<u64> = (0..8).map(|e| t.get_addr(&[0, e])).collect();
        assert_eq!(t.all_addrs().len(), 64);
        assert_eq!(&t.all_addrs()[..8], &first_row[..]);
    }

    #[test]
    fn malformed_coordinates_resolve_to_zero() {
        let (t, _) = setup(KvKind::Key, 1);
        assert_ne!(t.get_addr(&[0, 0]), 0);
        assert_eq!(t.get_addr(&[0]), 0);
        assert_eq!(t.get_addr(&[0, 0, 0]), 0);
        assert_eq!(t.get_addr(&[]), 0);
    }

    #[test]
    fn growth_at_boundary_adds_one_chunk() {
        let (mut t, mut alloc) = setup(KvKind::Key, 4);
        assert_eq!(t.seq_len(), t.allocated_capacity());
        let before = t.num_rows();
        assert!(t.add_token(&mut alloc).unwrap());
        assert_eq!(t.num_rows(), before + 8);
        assert_eq!(t.seq_len(), 5);
        assert_eq!(t.dims(), [1, 5, 64]);
    }

    #[test]
    fn growth_below_boundary_allocates_nothing() {
        let (mut t, mut alloc) = setup(KvKind::Key, 3);
        let before = t.num_rows();
        assert!(!t.add_token(&mut alloc).unwrap());
        assert_eq!(t.num_rows(), before);
        assert_eq!(t.seq_len(), 4);
    }

    #[test]
    fn growth_from_empty() {
        let (mut t, mut alloc) = setup(KvKind::Value, 0);
        assert_eq!(t.num_rows(), 0);
        assert!(t.add_token(&mut alloc).unwrap());
        assert_eq!(t.num_rows(), 16);
        for _ in 1..8 {
            assert!(!t.add_token(&mut alloc).unwrap());
        }
        assert!(t.add_token(&mut alloc).unwrap());
        assert_eq!(t.num_rows(), 32);
    }

    #[test]
    fn growth_is_amortized_and_stable() {
        for kind in [KvKind::Key, KvKind::Value] {
            let (mut t, mut alloc) = setup(kind, 1);
            let step = t.allocation_step();
            let initial_chunks = t.num_rows() / t.rows_per_alloc() as usize;
            let before: Vec<_> = (0..t.seq_len())
                .flat_map(|s| (0..64).map(move |e| (s, e)))
                .filter_map(|(s, e)| t.address_of(s, e).map(|a| ((s, e), a)))
                .collect();
            let rows_before = t.rows().to_vec();
            let k: usize = 37;
            let mut grew = 0;
            for _ in 0..k {
                grew += usize::from(t.add_token(&mut alloc).unwrap());
            }
            assert!(grew <= k.div_ceil(step as usize));
            assert_eq!(t.num_rows() % t.rows_per_alloc() as usize, 0);
            assert_eq!(t.num_rows() / t.rows_per_alloc() as usize, initial_chunks + grew);
            assert!(t.allocated_capacity() >= t.seq_len());
            assert_eq!(&t.rows()[..rows_before.len()], &rows_before[..]);
            for ((s, e), addr) in before {
                assert_eq!(t.address_of(s, e), Some(addr));
            }
        }
    }

    #[test]
    fn token_access_addrs_are_aligned_and_unique() {
        let (t, _) = setup(KvKind::Key, 1);
        let addrs = t.token_access_addrs(0, 64);
        // 8 row segments of 16 bytes each, one cache line per segment
        assert_eq!(addrs.len(), 8);
        assert!(addrs.iter().all(|a| a % 64 == 0));
    }
}
