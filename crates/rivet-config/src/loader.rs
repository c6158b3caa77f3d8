//! Layered configuration loading.
//!
//! Layers apply in order, later ones overriding earlier ones:
//! 1. built-in defaults
//! 2. a TOML or JSON file (or string)
//! 3. environment variables `PREFIX__SECTION__KEY`
//!
//! A `.env` file, if requested, is loaded into the process environment
//! before the overrides are read.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{ConfigError, LogFormat, RivetConfig};

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "RIVET";

/// Configuration loader.
///
/// # Example
///
/// ```no_run
/// use rivet_config::ConfigLoader;
///
/// # fn main() -> Result<(), rivet_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("rivet.toml")?
///     .with_env_prefix("RIVET")
///     .load()?;
/// println!("listening on {}:{}", config.server.host, config.server.port);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: RivetConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from [`RivetConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RivetConfig::default(),
            env_prefix: None,
        }
    }

    /// Starts from [`RivetConfig::development`].
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = RivetConfig::development();
        self
    }

    /// Starts from [`RivetConfig::production`].
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = RivetConfig::production();
        self
    }

    /// Loads a `.toml` or `.json` file. The extension picks the format.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed or names an
    /// unknown field.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        self.config = Self::parse(&content, &format)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from a string in `"toml"` or `"json"` format.
    ///
    /// ```
    /// use rivet_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[pools]\nrequest = 32", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.pools.request, 32);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on malformed content or an unsupported format.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = Self::parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Reads overrides from variables named `PREFIX__SECTION__KEY`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Loads `.env` from the working directory, if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails if an override cannot be parsed or validation fails.
    pub fn load(mut self) -> Result<RivetConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: HashMap<String, String> = env::vars()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();
            self.apply_env_overrides(&prefix, &vars)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> RivetConfig {
        self.config
    }

    fn parse(content: &str, format: &str) -> Result<RivetConfig, ConfigError> {
        match format {
            "toml" => Ok(toml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn apply_env_overrides(
        &mut self,
        prefix: &str,
        vars: &HashMap<String, String>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            self.apply_env_var(key, value, prefix)?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            return Ok(());
        };
        let parts: Vec<&str> = path.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVER", "HOST"] => config.server.host = value.to_string(),
            ["SERVER", "PORT"] => config.server.port = parse_num(key, value)?,
            ["SERVER", "IDLE_POLL_INTERVAL_MS"] => {
                config.server.idle_poll_interval_ms = parse_num(key, value)?;
            }

            ["POOLS", "REQUEST"] => config.pools.request = parse_num(key, value)?,
            ["POOLS", "RESPONSE"] => config.pools.response = parse_num(key, value)?,
            ["POOLS", "WEBSOCKET"] => config.pools.websocket = parse_num(key, value)?,

            ["WEBSOCKET", "COMPRESSION"] => config.websocket.compression = flag(key, value)?,
            ["WEBSOCKET", "MAX_PAYLOAD_LENGTH"] => {
                config.websocket.max_payload_length = parse_num(key, value)?;
            }
            ["WEBSOCKET", "IDLE_TIMEOUT_SECS"] => {
                config.websocket.idle_timeout_secs = parse_num(key, value)?;
            }
            ["WEBSOCKET", "MAX_BACKPRESSURE"] => {
                config.websocket.max_backpressure = parse_num(key, value)?;
            }
            ["WEBSOCKET", "CLOSE_ON_BACKPRESSURE_LIMIT"] => {
                config.websocket.close_on_backpressure_limit = flag(key, value)?;
            }
            ["WEBSOCKET", "RESET_IDLE_TIMEOUT_ON_SEND"] => {
                config.websocket.reset_idle_timeout_on_send = flag(key, value)?;
            }
            ["WEBSOCKET", "SEND_PINGS_AUTOMATICALLY"] => {
                config.websocket.send_pings_automatically = flag(key, value)?;
            }
            ["WEBSOCKET", "MAX_LIFETIME_MINUTES"] => {
                config.websocket.max_lifetime_minutes = parse_num(key, value)?;
            }

            ["LOGGING", "ENABLED"] => config.logging.enabled = flag(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'json' or 'pretty'")),
                };
            }

            _ => {}
        }
        Ok(())
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, RivetConfig::default());
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"server": {"port": 9001}, "websocket": {"idle_timeout_secs": 30}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.websocket.idle_timeout_secs, 30);
        assert_eq!(config.websocket.max_backpressure, 64 * 1024);
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        let result = ConfigLoader::new().with_string("port: 1", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_loader_rejects_unknown_section() {
        let result = ConfigLoader::new().with_string("[authorization]\nenabled = true", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_loader_with_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[pools]\nresponse = 8").unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pools.response, 8);
        assert_eq!(config.pools.request, 0);
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/rivet.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/rivet.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_env_overrides() {
        let mut loader = ConfigLoader::new();
        let vars = overrides(&[
            ("TEST__SERVER__PORT", "4000"),
            ("TEST__POOLS__WEBSOCKET", "16"),
            ("TEST__WEBSOCKET__COMPRESSION", "on"),
            ("TEST__LOGGING__FORMAT", "pretty"),
            ("TEST__UNKNOWN__KEY", "ignored"),
        ]);
        loader.apply_env_overrides("TEST", &vars).unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.pools.websocket, 16);
        assert!(config.websocket.compression);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__SERVER__PORT", "eighty", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));

        let result = loader.apply_env_var("TEST__SERVER__PORT", "70000", "TEST");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_invalid_bool() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__LOGGING__ENABLED", "maybe", "TEST");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
    }
}
