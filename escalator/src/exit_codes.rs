//! Stable exit codes for escalator CLI commands.

/// Command succeeded; for `check`, every validator passed.
pub const OK: i32 = 0;
/// Config, params, or input could not be loaded or were invalid.
pub const INVALID: i32 = 1;
/// `escalator check` ran and a validator rejected the response.
pub const FAILED: i32 = 2;
