//! Stable exit codes for repoagent CLI commands.

/// Command succeeded (all changes applied, tests passed or not run).
pub const OK: i32 = 0;
/// Invalid config or arguments, or another error that aborted the command.
pub const INVALID: i32 = 1;
/// Tests failed, timed out, or could not be launched.
pub const TESTS_FAILED: i32 = 2;
/// Some replacement blocks could not be applied.
pub const PARTIAL_APPLY: i32 = 3;
