use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::RuleAccept;
use crate::domain::{ProxyError, Result, RewriteRule};
use crate::server::ProxyServerBuilder;
use crate::tunnel::{TunnelSettings, DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_TIMEOUT};

pub const APP_NAME: &str = "tunnelproxy";

/// Settings read from the configuration file, before command line overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub bind: String,
    /// Relay buffer size in bytes
    pub buffer_size: usize,
    /// Idle timeout in seconds
    pub idle_timeout: u64,
    pub socket_buffer_size: Option<usize>,
    pub tunnel_only: bool,
    /// Target prefixes allowed through; empty allows everything
    pub allow: Vec<String>,
    pub raise_nofile_limit: bool,
    pub rewrites: Vec<RewriteRule>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8889".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT.as_secs(),
            socket_buffer_size: None,
            tunnel_only: false,
            allow: vec![],
            raise_nofile_limit: true,
            rewrites: vec![],
        }
    }
}

impl ProxyConfig {
    /// Loads the configuration from `path`, or from the per-user default
    /// location. A missing file is created with the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let loaded = match path {
            Some(path) => confy::load_path(path),
            None => confy::load(APP_NAME, None),
        };
        loaded.map_err(|e| ProxyError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(ProxyError::Config("buffer_size must be greater than zero".to_string()));
        }
        if self.idle_timeout == 0 {
            return Err(ProxyError::Config("idle_timeout must be greater than zero".to_string()));
        }
        if self.socket_buffer_size == Some(0) {
            return Err(ProxyError::Config("socket_buffer_size must be greater than zero".to_string()));
        }
        for rule in &self.rewrites {
            if !rule.replacement.contains(':') {
                return Err(ProxyError::Config(format!(
                    "rewrite replacement {} must be host:port",
                    rule.replacement
                )));
            }
        }
        Ok(())
    }

    pub fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            buffer_size: self.buffer_size,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            socket_buffer_size: self.socket_buffer_size,
        }
    }

    /// Server builder with the configured Accept policy and the default dialer.
    pub fn server_builder(&self) -> Result<ProxyServerBuilder> {
        self.validate()?;
        let accept = RuleAccept::new(self.allow.clone(), self.rewrites.clone());
        Ok(ProxyServerBuilder::new()
            .settings(self.tunnel_settings())
            .tunnel_only(self.tunnel_only)
            .accept(Arc::new(accept)))
    }
}
