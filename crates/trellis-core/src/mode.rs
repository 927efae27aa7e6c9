// crates/trellis-core/src/mode.rs
// ============================================================================
// Module: Runtime Mode
// Description: Production, development, and test runtime modes.
// Purpose: Select the configuration profile a process runs with.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Mode`] is chosen once per process and names the configuration profile
//! that gets layered on top of the base properties. Its string form is the
//! profile token used in file names such as `application.test.toml`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Environment variable that selects the process mode.
pub const MODE_ENV_VAR: &str = "TRELLIS_MODE";

/// Runtime mode of an application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Production profile.
    #[default]
    Prod,
    /// Development profile.
    Dev,
    /// Test profile.
    Test,
}

impl Mode {
    /// Returns the profile token for this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Test => "test",
        }
    }

    /// Reads the mode from `TRELLIS_MODE`, falling back to [`Mode::Prod`].
    ///
    /// # Errors
    ///
    /// Returns [`ModeParseError`] when the variable holds an unknown token.
    pub fn from_env() -> Result<Self, ModeParseError> {
        Self::from_env_value(std::env::var(MODE_ENV_VAR).ok().as_deref())
    }

    /// Resolves an optional raw `TRELLIS_MODE` value.
    fn from_env_value(raw: Option<&str>) -> Result<Self, ModeParseError> {
        raw.map_or(Ok(Self::default()), str::parse)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "prod" => Ok(Self::Prod),
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            other => Err(ModeParseError(other.to_string())),
        }
    }
}

/// Unknown mode token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mode `{0}` (expected prod, dev, or test)")]
pub struct ModeParseError(pub String);

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test-only assertions.")]

    use super::MODE_ENV_VAR;
    use super::Mode;
    use super::ModeParseError;
    use crate::test_env::EnvGuard;
    use crate::test_env::env_lock;
    use crate::test_env::env_mut;

    #[test]
    fn from_env_reads_mode_variable() {
        let _lock = env_lock();
        let _guard = EnvGuard::new(&[MODE_ENV_VAR]);

        env_mut::remove_var(MODE_ENV_VAR);
        assert_eq!(Mode::from_env(), Ok(Mode::Prod));

        env_mut::set_var(MODE_ENV_VAR, "test");
        assert_eq!(Mode::from_env(), Ok(Mode::Test));

        env_mut::set_var(MODE_ENV_VAR, "staging");
        assert_eq!(Mode::from_env(), Err(ModeParseError("staging".to_string())));
    }

    #[test]
    fn env_value_defaults_to_prod() {
        assert_eq!(Mode::from_env_value(None), Ok(Mode::Prod));
        assert_eq!(Mode::from_env_value(Some(" dev")), Ok(Mode::Dev));
        assert!(Mode::from_env_value(Some("")).is_err());
    }

    #[test]
    fn display_yields_profile_tokens() {
        assert_eq!(Mode::Prod.to_string(), "prod");
        assert_eq!(Mode::Dev.to_string(), "dev");
        assert_eq!(Mode::Test.to_string(), "test");
    }

    #[test]
    fn parse_accepts_profile_tokens_only() {
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert_eq!(" dev ".parse::<Mode>().unwrap(), Mode::Dev);
        assert!("production".parse::<Mode>().is_err());
        assert!("TEST".parse::<Mode>().is_err());
    }

    #[test]
    fn serde_uses_profile_tokens() {
        let encoded = serde_json::to_string(&Mode::Dev).unwrap();
        assert_eq!(encoded, "\"dev\"");
        let decoded: Mode = serde_json::from_str("\"prod\"").unwrap();
        assert_eq!(decoded, Mode::Prod);
    }
}
