//! Stable exit codes for trainer CLI commands.

/// Command succeeded, or the checked exercise passed.
pub const OK: i32 = 0;
/// Invalid workspace, catalog, config or progress, or any other error.
pub const INVALID: i32 = 1;
/// `trainer list` found every exercise done or skipped.
pub const COMPLETE: i32 = 2;
/// `trainer run` checked an exercise and it did not pass.
pub const FAILED: i32 = 3;
