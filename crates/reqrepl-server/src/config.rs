//! Listener configuration.
//!
//! The port comes from the `PORT` environment variable and falls back to
//! [`DEFAULT_PORT`]. Command-line options override both through the
//! `with_*` builders.
//!
//! # Example
//!
//! ```
//! use reqrepl_server::Config;
//!
//! let config = Config::new().with_port(8080);
//! assert_eq!(config.port, 8080);
//! assert_eq!(config.host, "0.0.0.0");
//! ```

use std::net::{SocketAddr, ToSocketAddrs};

use reqrepl_common::{ReqreplError, Result};

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Environment variable holding the listen port.
pub const PORT_VAR: &str = "PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ReqreplError::Config` if `PORT` is set but is not a port number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(PORT_VAR) {
            let raw = raw.trim();
            if !raw.is_empty() {
                config.port = raw.parse().map_err(|_| {
                    ReqreplError::Config(format!("{} must be a port number, got '{}'", PORT_VAR, raw))
                })?;
            }
        }
        Ok(config)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Resolves `host:port` to the address the listener binds.
    ///
    /// # Errors
    ///
    /// Returns `ReqreplError::Config` if the host does not resolve.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        target
            .to_socket_addrs()
            .map_err(|e| ReqreplError::Config(format!("Cannot resolve '{}': {}", target, e)))?
            .next()
            .ok_or_else(|| ReqreplError::Config(format!("'{}' resolved to no addresses", target)))
    }
}
