//! Session configuration

use super::error::{Error, Result};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// Server-side session configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent streams announced to and enforced against the
    /// client (default: 100)
    pub max_concurrent_streams: u32,

    /// Initial per-stream receive window announced on SPDY/3
    /// (default: 65536, range 1 to 2^31 - 1)
    pub initial_recv_window_size: u32,

    /// Whether workers may start server push streams (default: true)
    pub enable_server_push: bool,

    /// Whether a clean drain ends with GOAWAY(OK) (default: true)
    pub send_goaway_on_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_concurrent_streams: 100,
            initial_recv_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            enable_server_push: true,
            send_goaway_on_shutdown: true,
        }
    }
}

impl ServerConfig {
    /// Start building a configuration
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_streams == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_streams must be positive".to_string(),
            ));
        }
        if self.initial_recv_window_size == 0 || self.initial_recv_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidConfig(format!(
                "initial_recv_window_size {} outside valid range (1 to 2^31-1)",
                self.initial_recv_window_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`ServerConfig`]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        ServerConfigBuilder {
            config: ServerConfig::default(),
        }
    }

    /// Set the maximum number of concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    /// Set the initial receive window (SPDY/3)
    pub fn initial_recv_window_size(mut self, size: u32) -> Self {
        self.config.initial_recv_window_size = size;
        self
    }

    /// Enable or disable server push
    pub fn enable_server_push(mut self, enable: bool) -> Self {
        self.config.enable_server_push = enable;
        self
    }

    /// Control GOAWAY(OK) emission on clean shutdown
    pub fn send_goaway_on_shutdown(mut self, send: bool) -> Self {
        self.config.send_goaway_on_shutdown = send;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
