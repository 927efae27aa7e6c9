// crates/trellis-testkit/src/timeouts.rs
// ============================================================================
// Module: Test Timeouts
// Description: Centralized timeout configuration with env overrides.
// Purpose: Keep browser timeouts consistent and configurable across suites.
// ============================================================================

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Environment variable raising every test timeout to at least this many seconds.
pub const TIMEOUT_ENV_VAR: &str = "TRELLIS_TEST_TIMEOUT_SEC";
/// Request timeout used by [`crate::TestBrowser::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns the effective timeout, honoring `TRELLIS_TEST_TIMEOUT_SEC` when set.
/// The override acts as a minimum to avoid shortening explicitly longer test timeouts.
///
/// # Errors
///
/// Returns [`TimeoutError`] when the environment value is not a positive integer.
pub fn resolve_timeout(requested: Duration) -> Result<Duration, TimeoutError> {
    resolve_with(requested, env::var(TIMEOUT_ENV_VAR).ok().as_deref())
}

/// Applies an optional raw override to `requested`.
fn resolve_with(requested: Duration, raw: Option<&str>) -> Result<Duration, TimeoutError> {
    match raw {
        Some(raw) => Ok(requested.max(parse_timeout_secs(raw)?)),
        None => Ok(requested),
    }
}

/// Parses a positive number of seconds.
fn parse_timeout_secs(raw: &str) -> Result<Duration, TimeoutError> {
    let secs: u64 = raw.trim().parse().map_err(|_| TimeoutError::NotANumber)?;
    if secs == 0 {
        return Err(TimeoutError::Zero);
    }
    Ok(Duration::from_secs(secs))
}

/// Invalid timeout override.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// Value is not an integer number of seconds.
    #[error("{TIMEOUT_ENV_VAR} must be a positive integer number of seconds")]
    NotANumber,
    /// Value is zero.
    #[error("{TIMEOUT_ENV_VAR} must be greater than zero")]
    Zero,
}
