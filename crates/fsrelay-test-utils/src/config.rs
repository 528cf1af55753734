//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use fsrelay_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from the defaults, bound to loopback.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .root_dir(dir.path())
///     .password("secret")
///     .idle_timeout_secs(1)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.server.listen_addr = "127.0.0.1".to_string();
        Self { config }
    }

    /// Add an allowed root directory.
    pub fn root_dir(mut self, dir: &Path) -> Self {
        self.config.server.root_dirs.push(dir.display().to_string());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.config.server.password = password.to_string();
        self.config.client.password = password.to_string();
        self
    }

    pub fn max_body_size(mut self, size: &str) -> Self {
        self.config.server.max_body_size = size.to_string();
        self
    }

    pub fn allowed_extensions(mut self, exts: &[&str]) -> Self {
        self.config.server.allowed_extensions = exts.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn denied_extensions(mut self, exts: &[&str]) -> Self {
        self.config.server.denied_extensions = exts.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn denied_dir(mut self, dir: &Path) -> Self {
        self.config.server.denied_dirs.push(dir.display().to_string());
        self
    }

    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.server.idle_timeout_secs = secs;
        self
    }

    pub fn frame_timeout_secs(mut self, secs: u64) -> Self {
        self.config.server.frame_timeout_secs = secs;
        self
    }

    pub fn drain_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.server.drain_poll_interval_ms = ms;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
