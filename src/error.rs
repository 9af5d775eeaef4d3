// Fatal, non-recoverable conditions and the narrow "parsing seam" errors
// that exist only because real `.class` parsing is out of scope (see
// SPEC_FULL.md §6 additions). Recoverable Java-level exceptions (NPE,
// AIOOBE, ClassCastException, ...) are *not* represented here -- they are
// heap objects installed in a thread's exception register, per spec §7.

use thiserror::Error;

/// Tier-3 (fatal) and plumbing errors. Every variant that denotes an
/// internal invariant violation is routed to a single `System::abort()`
/// call site; nothing here is meant to be recovered from by ordinary
/// control flow.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to construct a monitor")]
    MonitorCreationFailed,

    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("unsupported switch case: {0}")]
    UnsupportedSwitchCase(&'static str),

    #[error("allocation of {requested} bytes exceeds arena size {arena}")]
    AllocationExceedsArena { requested: usize, arena: usize },

    #[error("class finder produced no bytes for `{0}`")]
    ClassNotFoundBytes(String),

    #[error("failed to parse class `{0}`: {1}")]
    ParseFailure(String, String),
}
