//! This module contains constants that are needed throughout the codebase.

/// The maximum length of an input packet in bits.
///
/// The solver-visible packet size variable is bounded above by this value,
/// so no synthesized test ever requires a longer packet.
pub const MAX_PACKET_LENGTH_BITS: u32 = 16384;

/// The width in bits of a port number on the target.
pub const PORT_NUMBER_WIDTH_BITS: u32 = 9;

/// The port value that the target interprets as "drop this packet".
pub const DROP_PORT: u64 = 511;

/// The width in bits of the instance-type metadata field.
pub const INSTANCE_TYPE_WIDTH_BITS: u32 = 32;

/// The instance-type tag for a packet that arrived from the wire.
pub const PKT_INSTANCE_TYPE_NORMAL: u64 = 0;

/// The instance-type tag for an ingress-to-egress clone.
pub const PKT_INSTANCE_TYPE_INGRESS_CLONE: u64 = 1;

/// The instance-type tag for an egress-to-egress clone.
pub const PKT_INSTANCE_TYPE_EGRESS_CLONE: u64 = 2;

/// The instance-type tag for a recirculated packet.
pub const PKT_INSTANCE_TYPE_RECIRC: u64 = 4;

/// The instance-type tag for a resubmitted packet.
pub const PKT_INSTANCE_TYPE_RESUBMIT: u64 = 6;

/// The width in bits of the parser error variable.
pub const PARSER_ERROR_WIDTH_BITS: u32 = 32;

/// The parser error code signalling successful parsing.
pub const PARSER_ERROR_NONE: u64 = 0;

/// The parser error code set when the packet ends before an extract or
/// advance can be satisfied.
pub const PARSER_ERROR_PACKET_TOO_SHORT: u64 = 1;

/// The parser error code set when a select expression matches no case.
pub const PARSER_ERROR_NO_MATCH: u64 = 2;

/// The parser error code set when a variable-size extract exceeds the
/// declared maximum width of the target field.
pub const PARSER_ERROR_HEADER_TOO_SHORT: u64 = 4;

/// The maximum number of recirculation passes a single path may take before
/// the packet is dropped.
pub const MAX_RECIRCULATION_COUNT: u64 = 1;

/// The default maximum number of tests produced by an exploration strategy.
pub const DEFAULT_MAX_TESTS: usize = 16;

/// The default bound on the number of terminal branches the linear
/// enumeration strategy collects before producing tests.
pub const DEFAULT_MAX_BOUND: usize = 64;

/// Whether unimplemented features abort the run or merely drop the affected
/// path by default.
pub const DEFAULT_PERMISSIVE: bool = false;

/// The control-plane priority assigned to synthesized table entries.
pub const LOW_PRIORITY: u32 = 1;

/// The time-to-live assigned to synthesized table entries, in seconds.
pub const ENTRY_TTL_SECONDS: u32 = 0;
