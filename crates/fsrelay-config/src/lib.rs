#![deny(unsafe_code)]

//! Configuration loading, validation, and path policy for fsrelay.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure,
//! and the [`policy`] module that decides which paths a request may touch.

/// Path security policy — the validator every request passes through.
pub mod policy;
/// Human-readable byte sizes (`512M`, `1G`).
pub mod size;

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

pub use policy::{DeniedReason, PathPolicy, check_path};

/// Upper bound for the connection timeouts, one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// File server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults for the command-line client.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Configuration for the file server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the server listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Shared secret clients must present. Empty disables authentication.
    #[serde(default)]
    pub password: String,

    /// Largest accepted request body, e.g. `"64M"`.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: String,

    /// Directories requests are allowed to operate under.
    ///
    /// Accepts a TOML array or a comma-separated string.
    #[serde(default, deserialize_with = "string_list")]
    pub root_dirs: Vec<String>,

    /// File extensions writes are restricted to. Empty allows any extension.
    #[serde(default, deserialize_with = "string_list")]
    pub allowed_extensions: Vec<String>,

    /// Directory prefixes no request may touch.
    #[serde(default = "default_denied_dirs", deserialize_with = "string_list")]
    pub denied_dirs: Vec<String>,

    /// File extensions no request may touch.
    #[serde(default = "default_denied_extensions", deserialize_with = "string_list")]
    pub denied_extensions: Vec<String>,

    /// Seconds of inactivity after which a connection is closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds a single frame may take to arrive once it has started.
    #[serde(default = "default_frame_timeout_secs")]
    pub frame_timeout_secs: u64,

    /// How often the drain loop re-checks the active connection count.
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            password: String::new(),
            max_body_size: default_max_body_size(),
            root_dirs: Vec::new(),
            allowed_extensions: Vec::new(),
            denied_dirs: default_denied_dirs(),
            denied_extensions: default_denied_extensions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            frame_timeout_secs: default_frame_timeout_secs(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9468
}

fn default_max_body_size() -> String {
    "1G".to_string()
}

fn default_denied_dirs() -> Vec<String> {
    vec!["/etc/".to_string(), "/boot/".to_string()]
}

fn default_denied_extensions() -> Vec<String> {
    ["php", "cgi", "pl", "py"].map(String::from).to_vec()
}

fn default_idle_timeout_secs() -> u64 {
    10
}

fn default_frame_timeout_secs() -> u64 {
    30
}

fn default_drain_poll_interval_ms() -> u64 {
    100
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log output to this file instead of stderr.
    #[serde(default)]
    pub file: Option<String>,

    /// Emit per-connection and per-request debug events.
    #[serde(default)]
    pub debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            debug: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Connection defaults for the command-line client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host to connect to.
    #[serde(default = "default_client_host")]
    pub host: String,

    /// Server port to connect to.
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Shared secret sent with every request.
    #[serde(default)]
    pub password: String,

    /// Connections dialed eagerly when the pool is created.
    #[serde(default = "default_client_min_idle")]
    pub min_idle: usize,

    /// Upper bound on open connections.
    #[serde(default = "default_client_max_open")]
    pub max_open: usize,

    /// Idle pooled connections older than this are discarded instead of reused.
    #[serde(default = "default_client_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_listen_port(),
            password: String::new(),
            min_idle: default_client_min_idle(),
            max_open: default_client_max_open(),
            idle_ttl_secs: default_client_idle_ttl_secs(),
        }
    }
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_client_min_idle() -> usize {
    2
}

fn default_client_max_open() -> usize {
    100
}

fn default_client_idle_ttl_secs() -> u64 {
    5
}

/// Accept either `["a", "b"]` or `"a,b"`, trimming entries and dropping blanks.
fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Joined(String),
        List(Vec<String>),
    }

    let items = match Raw::deserialize(deserializer)? {
        Raw::Joined(s) => s.split(',').map(str::to_string).collect(),
        Raw::List(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            roots = config.server.root_dirs.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.listen_port == 0 {
            return Err(ConfigError::Validation(
                "server.listen_port must be non-zero".to_string(),
            ));
        }
        if server.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "server.listen_addr must not be empty".to_string(),
            ));
        }
        size::parse_size(&server.max_body_size).map_err(|e| {
            ConfigError::Validation(format!("server.max_body_size: {e}"))
        })?;
        for (i, dir) in server.root_dirs.iter().enumerate() {
            if !Path::new(dir).is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "server.root_dirs[{i}] must be an absolute path, got {dir:?}"
                )));
            }
        }
        for (i, dir) in server.denied_dirs.iter().enumerate() {
            if !Path::new(dir).is_absolute() {
                return Err(ConfigError::Validation(format!(
                    "server.denied_dirs[{i}] must be an absolute path, got {dir:?}"
                )));
            }
        }
        for (name, secs) in [
            ("idle_timeout_secs", server.idle_timeout_secs),
            ("frame_timeout_secs", server.frame_timeout_secs),
        ] {
            if !(1..=MAX_TIMEOUT_SECS).contains(&secs) {
                return Err(ConfigError::Validation(format!(
                    "server.{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"
                )));
            }
        }
        if server.drain_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "server.drain_poll_interval_ms must be non-zero".to_string(),
            ));
        }

        if self.client.max_open == 0 {
            return Err(ConfigError::Validation(
                "client.max_open must be at least 1".to_string(),
            ));
        }
        if self.client.min_idle > self.client.max_open {
            return Err(ConfigError::Validation(format!(
                "client.min_idle ({}) must not exceed client.max_open ({})",
                self.client.min_idle, self.client.max_open
            )));
        }

        Ok(())
    }

    /// Validation that only applies when running the server.
    ///
    /// The client subcommands share the config file, so an empty root list is
    /// accepted by [`validate`](Self::validate) and rejected here.
    pub fn validate_for_server(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.server.root_dirs.is_empty() {
            return Err(ConfigError::Validation(
                "server.root_dirs must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a [`PathPolicy`] from the loaded server config.
    pub fn build_path_policy(&self) -> PathPolicy {
        PathPolicy::new(
            self.server.root_dirs.iter().map(String::as_str),
            self.server.denied_dirs.iter().map(String::as_str),
            self.server.denied_extensions.iter().map(String::as_str),
        )
    }

    /// Resolved maximum body size in bytes.
    pub fn max_body_bytes(&self) -> Result<u64, ConfigError> {
        size::parse_size(&self.server.max_body_size)
            .map_err(|e| ConfigError::Validation(format!("server.max_body_size: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0");
        assert_eq!(config.server.listen_port, 9468);
        assert_eq!(config.server.idle_timeout_secs, 10);
        assert_eq!(config.server.denied_dirs, vec!["/etc/", "/boot/"]);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.client.max_open, 100);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.server.listen_port, 9468);
        assert!(config.server.root_dirs.is_empty());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1"
            listen_port = 9500
            password = "1234567890"
            max_body_size = "64M"
            root_dirs = ["/data", "/srv/www"]
            allowed_extensions = ["html", "css"]
            idle_timeout_secs = 3

            [logging]
            level = "debug"
            file = "/var/log/fsrelay.log"
            debug = true

            [client]
            host = "10.0.0.2"
            max_open = 8
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1");
        assert_eq!(config.server.listen_port, 9500);
        assert_eq!(config.server.password, "1234567890");
        assert_eq!(config.server.root_dirs, vec!["/data", "/srv/www"]);
        assert_eq!(config.server.allowed_extensions, vec!["html", "css"]);
        assert_eq!(config.max_body_bytes().unwrap(), 64 << 20);
        assert_eq!(config.logging.file.as_deref(), Some("/var/log/fsrelay.log"));
        assert!(config.logging.debug);
        assert_eq!(config.client.host, "10.0.0.2");
        assert_eq!(config.client.max_open, 8);
    }

    #[test]
    fn test_comma_separated_lists() {
        let toml = r#"
            [server]
            root_dirs = "/data, /srv/www,"
            allowed_extensions = "html,js"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.server.root_dirs, vec!["/data", "/srv/www"]);
        assert_eq!(config.server.allowed_extensions, vec!["html", "js"]);
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let toml = r#"
            [server]
            listen_port = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_addr() {
        let toml = r#"
            [server]
            listen_addr = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_relative_root() {
        let toml = r#"
            [server]
            root_dirs = ["data"]
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("root_dirs[0]"));
    }

    #[test]
    fn test_validation_bounds_timeouts() {
        let err = AppConfig::parse("[server]\nidle_timeout_secs = 9223372036854775807\n").unwrap_err();
        assert!(err.to_string().contains("server.idle_timeout_secs"), "{err}");

        let err = AppConfig::parse("[server]\nframe_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("server.frame_timeout_secs"), "{err}");

        let config = AppConfig::parse(&format!("[server]\nidle_timeout_secs = {MAX_TIMEOUT_SECS}\n")).unwrap();
        assert_eq!(config.server.idle_timeout_secs, MAX_TIMEOUT_SECS);
    }

    #[test]
    fn test_validation_rejects_bad_size() {
        let toml = r#"
            [server]
            max_body_size = "lots"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_min_idle_above_max() {
        let toml = r#"
            [client]
            min_idle = 5
            max_open = 2
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_server_validation_requires_roots() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.validate_for_server().is_err());

        let config = AppConfig::parse("[server]\nroot_dirs = [\"/data\"]").unwrap();
        assert!(config.validate_for_server().is_ok());
    }

    #[test]
    fn test_build_path_policy() {
        let config = AppConfig::parse("[server]\nroot_dirs = [\"/data\"]").unwrap();
        let policy = config.build_path_policy();
        assert!(policy.check(Path::new("/data/index.html")).is_ok());
        assert_eq!(
            policy.check(Path::new("/data/app.php")),
            Err(DeniedReason::DeniedExtension("php".to_string()))
        );
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fsrelay.toml");
        tokio::fs::write(&path, "[server]\nlisten_port = 9999\n")
            .await
            .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.server.listen_port, 9999);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = AppConfig::load(Path::new("/nonexistent/fsrelay.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = AppConfig::parse("[server]\nroot_dirs = [\"/data\"]").unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed = AppConfig::parse(&rendered).unwrap();
        assert_eq!(reparsed.server.root_dirs, config.server.root_dirs);
        assert_eq!(reparsed.server.denied_extensions, config.server.denied_extensions);
    }
}
