/// Cache-line offset bits stripped before the DRAM fields are read
pub const CL_SHIFT: u32 = 6;
/// Cache line size (64 bytes)
pub const CL_SIZE: u64 = 1 << CL_SHIFT;

/// Upper bound on banks per channel (4 bankgroups x 4 banks)
pub const MAX_BANKS: usize = 16;

/// Width of the PIM header's compute-operand and read-result counters
pub const PIM_COUNT_BITS: u32 = 8;
