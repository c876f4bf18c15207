use serde::Serialize;
use std::fmt;

/// Handle by which the issuer identifies one of its requests.
///
/// The queues never own requests; they hold this handle from `push` until
/// the completion is popped. The issuer keeps the request alive at least
/// that long and must not reuse the handle while it is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AccessKind {
    /// Plain read of one burst
    Read,
    /// Plain write of one burst
    Write,
    /// In-memory compute command; the address is a packed [`PimHeader`](crate::memory::PimHeader)
    PimHeader,
}

impl AccessKind {
    /// Whether the access carries data towards the DRAM.
    pub fn is_write(&self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::PimHeader)
    }
}

/// One memory access offered to a [`Dram`](crate::dram::Dram).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MemoryAccess {
    /// Issuer-side handle
    pub id: RequestId,
    /// Physical address, or the command word for [`AccessKind::PimHeader`]
    pub address: u64,
    /// Read, write or PIM command
    pub kind: AccessKind,
    /// Requester tag, opaque to the memory system
    pub tag: u32,
}

impl MemoryAccess {
    /// Creates a read access.
    pub fn read(id: u64, address: u64) -> Self {
        MemoryAccess {
            id: RequestId(id),
            address,
            kind: AccessKind::Read,
            tag: 0,
        }
    }

    /// Creates a write access.
    pub fn write(id: u64, address: u64) -> Self {
        MemoryAccess {
            id: RequestId(id),
            address,
            kind: AccessKind::Write,
            tag: 0,
        }
    }

    /// Creates a PIM command access from an encoded header word.
    pub fn pim_header(id: u64, header: u64) -> Self {
        MemoryAccess {
            id: RequestId(id),
            address: header,
            kind: AccessKind::PimHeader,
            tag: 0,
        }
    }

    /// Returns the access with its requester tag set.
    pub fn with_tag(mut self, tag: u32) -> Self {
        self.tag = tag;
        self
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?} {:#x})", self.id, self.kind, self.address)
    }
}
