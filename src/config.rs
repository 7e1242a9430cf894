//! Server configuration.
//!
//! Options come from command-line arguments, falling back to `RESPLITE_*`
//! environment variables and then to built-in defaults.

use crate::connection::ConnectionOptions;
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

/// Default cap on buffered, not yet parsed request bytes per connection (64 KB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Command-line arguments for the server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "resplite", version, about = "A minimal RESP server", long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, env = "RESPLITE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "RESPLITE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum bytes buffered for a single request before the client is dropped
    #[arg(long, env = "RESPLITE_MAX_BUFFER_SIZE", default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_buffer_size: usize,

    /// Close connections that send nothing for this many seconds
    #[arg(long, env = "RESPLITE_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[arg(long, env = "RESPLITE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            idle_timeout: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.map(Duration::from_secs)
    }

    /// Per-connection limits derived from this configuration.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_buffer_size: self.max_buffer_size,
            idle_timeout: self.idle_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["resplite"]).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
    }

    #[test]
    fn test_parse_arguments() {
        let config = Config::try_parse_from([
            "resplite",
            "--host",
            "0.0.0.0",
            "-p",
            "6380",
            "--max-buffer-size",
            "1024",
            "--idle-timeout",
            "30",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.connection_options(),
            ConnectionOptions {
                max_buffer_size: 1024,
                idle_timeout: Some(Duration::from_secs(30)),
            }
        );
    }

    #[test]
    fn test_invalid_port() {
        assert!(Config::try_parse_from(["resplite", "--port", "not-a-port"]).is_err());
        assert!(Config::try_parse_from(["resplite", "--port", "70000"]).is_err());
    }
}
