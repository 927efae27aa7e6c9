// crates/trellis-core/src/config.rs
// ============================================================================
// Module: Trellis Properties
// Description: Layered, dot-keyed configuration for Trellis applications.
// Purpose: Load base and mode-profile TOML files and apply caller overrides.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Properties are loaded from `application.toml` and the profile file
//! `application.<mode>.toml` in the configuration directory, flattened into
//! dot-separated keys, and finally overlaid with caller overrides which always
//! win. Files over the size limit or with invalid UTF-8 fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::net::Ipv6Addr;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::mode::Mode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration directory when none is specified.
const DEFAULT_CONF_DIR: &str = "conf";
/// Environment variable used to override the configuration directory.
pub const CONF_DIR_ENV_VAR: &str = "TRELLIS_CONF_DIR";
/// Base configuration file name.
const BASE_FILE_STEM: &str = "application";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a property key.
pub(crate) const MAX_PROPERTY_KEY_LENGTH: usize = 256;
/// Default session cookie prefix.
pub(crate) const DEFAULT_COOKIE_PREFIX: &str = "TRELLIS";
/// Host advertised in server URLs when none is configured.
pub(crate) const DEFAULT_ADVERTISED_HOST: &str = "localhost";

/// Property key for the listen host.
pub const SERVER_HOST_KEY: &str = "server.host";
/// Property key for the listen port.
pub const SERVER_PORT_KEY: &str = "server.port";
/// Property key for the application context path.
pub const SERVER_CONTEXT_PATH_KEY: &str = "server.context_path";
/// Property key for the session cookie prefix.
pub const COOKIE_PREFIX_KEY: &str = "application.cookie_prefix";

// ============================================================================
// SECTION: Properties
// ============================================================================

/// Flat map of dot-separated property keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// Resolved values keyed by dotted path.
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Creates an empty property set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads properties for `mode` from the resolved configuration directory.
    ///
    /// The directory is `dir` when given, else `TRELLIS_CONF_DIR`, else `conf`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a present file cannot be read or parsed.
    pub fn load(dir: Option<&Path>, mode: Mode) -> Result<Self, ConfigError> {
        let resolved = resolve_dir(dir);
        Self::load_from_dir(&resolved, mode)
    }

    /// Loads properties for `mode` from a specific directory.
    ///
    /// Missing files contribute nothing; the profile file overrides the base.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a present file cannot be read or parsed.
    pub fn load_from_dir(dir: &Path, mode: Mode) -> Result<Self, ConfigError> {
        let mut properties = Self::new();
        let base = dir.join(format!("{BASE_FILE_STEM}.toml"));
        let profile = dir.join(format!("{BASE_FILE_STEM}.{mode}.toml"));
        for path in [base, profile] {
            if let Some(content) = read_optional(&path)? {
                properties.merge_toml(&content)?;
            }
        }
        Ok(properties)
    }

    /// Parses a TOML document and merges its flattened keys over this set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the document is invalid or holds arrays.
    pub fn merge_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let table: toml::Table =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        flatten_table(&table, "", &mut self.values)
    }

    /// Applies overrides on top of every loaded value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an override key is malformed.
    pub fn apply_overrides<'a, I>(&mut self, overrides: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in overrides {
            validate_key(key)?;
            self.values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Sets a single property.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the key is malformed.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), ConfigError> {
        validate_key(key)?;
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Returns the value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the value for `key` or `default` when unset.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Returns the value for `key` or an error naming the missing key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the key is unset.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::Invalid(format!("{key} is required")))
    }

    /// Parses `key` as a boolean (`true`/`false`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the value is not a boolean.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|raw| match raw.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ConfigError::Invalid(format!("{key} must be true or false"))),
            })
            .transpose()
    }

    /// Parses `key` as a TCP port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the value is not in `1..=65535`.
    pub fn get_u16(&self, key: &str) -> Result<Option<u16>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("{key} must be an integer port")))
            })
            .transpose()
    }

    /// Iterates over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns the number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no properties are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// SECTION: Server Settings
// ============================================================================

/// Server-facing settings resolved from [`Properties`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Configured listen host, if any.
    pub host: Option<String>,
    /// Configured listen port, if any.
    pub port: Option<u16>,
    /// Context path prefix (`""` for root, otherwise `/segment...`).
    pub context_path: String,
    /// Session cookie prefix.
    pub cookie_prefix: String,
}

impl ServerSettings {
    /// Resolves server settings from properties.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is malformed.
    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let host = properties
            .get(SERVER_HOST_KEY)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(normalize_host)
            .transpose()?;
        let port = properties.get_u16(SERVER_PORT_KEY)?;
        let context_path =
            normalize_context_path(properties.get_or(SERVER_CONTEXT_PATH_KEY, ""))?;
        let cookie_prefix = properties.get_or(COOKIE_PREFIX_KEY, DEFAULT_COOKIE_PREFIX).trim();
        validate_cookie_prefix(cookie_prefix)?;
        Ok(Self {
            host,
            port,
            context_path,
            cookie_prefix: cookie_prefix.to_string(),
        })
    }

    /// Returns the host used in advertised URLs.
    #[must_use]
    pub fn advertised_host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_ADVERTISED_HOST)
    }

    /// Returns `host:port` for advertised URLs, bracketing IPv6 literals.
    #[must_use]
    pub fn advertised_authority(&self, port: u16) -> String {
        authority(self.advertised_host(), port)
    }

    /// Returns `host:port` to bind, using `default_host` when no host is set.
    #[must_use]
    pub fn bind_address(&self, default_host: &str, port: u16) -> String {
        authority(self.host.as_deref().unwrap_or(default_host), port)
    }

    /// Returns the session cookie name.
    #[must_use]
    pub fn session_cookie_name(&self) -> String {
        format!("{}_SESSION", self.cookie_prefix)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the configuration directory from caller or environment defaults.
fn resolve_dir(dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = dir {
        return dir.to_path_buf();
    }
    match env::var(CONF_DIR_ENV_VAR) {
        Ok(env_dir) if !env_dir.trim().is_empty() => PathBuf::from(env_dir),
        _ => PathBuf::from(DEFAULT_CONF_DIR),
    }
}

/// Reads a configuration file, returning `None` when it does not exist.
fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ConfigError::Io(format!("{}: {err}", path.display()))),
    };
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid(format!(
            "{} exceeds size limit",
            path.display()
        )));
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| ConfigError::Invalid(format!("{} must be utf-8", path.display())))
}

/// Strips brackets from an IPv6 literal; other hosts pass through unchanged.
fn normalize_host(raw: &str) -> Result<String, ConfigError> {
    match raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        Some(inner) if inner.parse::<Ipv6Addr>().is_ok() => Ok(inner.to_string()),
        Some(_) => {
            Err(ConfigError::Invalid(format!("{SERVER_HOST_KEY} `{raw}` is not an ipv6 literal")))
        }
        None if raw.contains(['[', ']', '/']) => {
            Err(ConfigError::Invalid(format!("{SERVER_HOST_KEY} `{raw}` is not a host name")))
        }
        None => Ok(raw.to_string()),
    }
}

/// Joins a host and port, bracketing IPv6 literals.
fn authority(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Flattens a TOML table into dot-separated keys.
fn flatten_table(
    table: &toml::Table,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in table {
        let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            toml::Value::Table(inner) => flatten_table(inner, &path, out)?,
            toml::Value::Array(_) => {
                return Err(ConfigError::Invalid(format!("{path}: arrays are not supported")));
            }
            toml::Value::String(text) => {
                out.insert(path, text.clone());
            }
            toml::Value::Integer(number) => {
                out.insert(path, number.to_string());
            }
            toml::Value::Float(number) => {
                out.insert(path, number.to_string());
            }
            toml::Value::Boolean(flag) => {
                out.insert(path, flag.to_string());
            }
            toml::Value::Datetime(stamp) => {
                out.insert(path, stamp.to_string());
            }
        }
    }
    Ok(())
}

/// Validates a dot-separated property key.
fn validate_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty() || key.len() > MAX_PROPERTY_KEY_LENGTH {
        return Err(ConfigError::Invalid("property key length out of range".to_string()));
    }
    if key.split('.').any(|segment| segment.is_empty() || segment.chars().any(char::is_whitespace))
    {
        return Err(ConfigError::Invalid(format!("property key `{key}` is malformed")));
    }
    Ok(())
}

/// Normalizes a context path to `""` or `/segment...` without trailing slash.
fn normalize_context_path(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "{SERVER_CONTEXT_PATH_KEY} must start with '/'"
        )));
    }
    if trimmed.ends_with('/') {
        return Err(ConfigError::Invalid(format!(
            "{SERVER_CONTEXT_PATH_KEY} must not end with '/'"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validates a cookie prefix as a cookie-name-safe token.
fn validate_cookie_prefix(prefix: &str) -> Result<(), ConfigError> {
    let valid = !prefix.is_empty()
        && prefix.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{COOKIE_PREFIX_KEY} must be an alphanumeric token")))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
