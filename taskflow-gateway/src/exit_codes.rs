//! Stable exit codes for the `taskflow-gateway` binary.

/// Command executed successfully.
pub const OK: i32 = 0;
/// Command was allowed but failed while touching the filesystem.
pub const RUNTIME_FAILURE: i32 = 1;
/// Invalid invocation or gateway configuration (bad root, bad flags).
pub const USAGE: i32 = 2;
/// Command rejected by the security layer (whitelist, containment, identity).
pub const SECURITY: i32 = 3;
