//! Configuration for an Elves context.

use elf_core::merge::OVERLAY;

/// Environment variable naming the realtime server.
pub const REALTIME_ENV: &str = "ELVES_REALTIME";

/// Port used when talking to a local realtime server.
pub const DEFAULT_PORT: u16 = 9208;

/// Port used when a realtime server URL is configured.
pub const SECURE_PORT: u16 = 443;

/// Configuration for the Elves context.
#[derive(Clone, Debug)]
pub struct ElvesConfig {
    /// Realtime server URL; `None` means a local server.
    pub realtime_url: Option<String>,
    /// Realtime server port.
    pub port: u16,
    /// Global switch for peer synchronization.
    pub sync_enabled: bool,
    /// Fixed node id. Generated at startup when unset.
    pub node_id: Option<String>,
    /// Strategy used by `teach` when the caller names none.
    pub default_merge: String,
}

impl Default for ElvesConfig {
    fn default() -> Self {
        Self {
            realtime_url: None,
            port: DEFAULT_PORT,
            sync_enabled: true,
            node_id: None,
            default_merge: OVERLAY.to_string(),
        }
    }
}

impl ElvesConfig {
    /// Defaults, with the realtime server taken from `ELVES_REALTIME`.
    pub fn from_env() -> Self {
        Self::from_realtime(std::env::var(REALTIME_ENV).ok())
    }

    fn from_realtime(url: Option<String>) -> Self {
        match url.filter(|url| !url.trim().is_empty()) {
            Some(url) => Self {
                realtime_url: Some(url),
                port: SECURE_PORT,
                ..Default::default()
            },
            None => Self::default(),
        }
    }

    /// `host:port` of the realtime server.
    pub fn endpoint(&self) -> String {
        match &self.realtime_url {
            Some(url) => format!("{}:{}", url, self.port),
            None => format!("localhost:{}", self.port),
        }
    }
}

/// Builder for the Elves configuration.
pub struct ElvesConfigBuilder {
    config: ElvesConfig,
}

impl ElvesConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ElvesConfig::default(),
        }
    }

    pub fn realtime_url(mut self, url: impl Into<String>) -> Self {
        self.config.realtime_url = Some(url.into());
        self.config.port = SECURE_PORT;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn sync_enabled(mut self, enabled: bool) -> Self {
        self.config.sync_enabled = enabled;
        self
    }

    pub fn node_id(mut self, id: impl Into<String>) -> Self {
        self.config.node_id = Some(id.into());
        self
    }

    pub fn default_merge(mut self, strategy: impl Into<String>) -> Self {
        self.config.default_merge = strategy.into();
        self
    }

    pub fn build(self) -> ElvesConfig {
        self.config
    }
}

impl Default for ElvesConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_local_server() {
        let config = ElvesConfig::from_realtime(None);
        assert_eq!(config.endpoint(), "localhost:9208");
        assert!(config.sync_enabled);
        assert_eq!(config.default_merge, "overlay");
    }

    #[test]
    fn test_realtime_url_switches_port() {
        let config = ElvesConfig::from_realtime(Some("realtime.example.org".to_string()));
        assert_eq!(config.port, 443);
        assert_eq!(config.endpoint(), "realtime.example.org:443");

        let blank = ElvesConfig::from_realtime(Some("  ".to_string()));
        assert_eq!(blank.port, DEFAULT_PORT);
    }

    #[test]
    fn test_config_builder() {
        let config = ElvesConfigBuilder::new()
            .realtime_url("rt.local")
            .port(8443)
            .sync_enabled(false)
            .node_id("node-a")
            .default_merge("deep")
            .build();

        assert_eq!(config.endpoint(), "rt.local:8443");
        assert!(!config.sync_enabled);
        assert_eq!(config.node_id.as_deref(), Some("node-a"));
        assert_eq!(config.default_merge, "deep");
    }
}
