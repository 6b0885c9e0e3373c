//! Stable exit codes for taskflow CLI commands.

/// Command succeeded or a ready task was selected.
pub const OK: i32 = 0;
/// Command failed due to invalid documents/config or other errors.
pub const INVALID: i32 = 1;
/// `taskflow select` found nothing pending.
pub const NOTHING_SELECTABLE: i32 = 2;
/// `taskflow select` found pending tasks, but all of them are blocked.
pub const BLOCKED: i32 = 3;
