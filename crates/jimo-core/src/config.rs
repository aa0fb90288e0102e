//! Application configuration
//!
//! Read from `APP_*` environment variables, optionally seeded from a `.env`
//! file. Variables already present in the process environment win over the
//! file.

use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub workers: usize,
    /// How long to wait for open connections after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Deadline for a client to finish sending request headers
    pub header_read_timeout: Duration,
    /// Largest request body read into memory, in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 3000,
            workers: num_cpus::get(),
            shutdown_timeout: Duration::from_secs(10),
            header_read_timeout: Duration::from_secs(5),
            max_body_size: 8 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults: `0.0.0.0:3000`, one worker per CPU
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind hostname
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the bind port; 0 picks a free one
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set runtime worker threads (at least 1)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the shutdown drain timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the header read deadline
    pub fn header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Set the request body limit
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// `host:port` for binding
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Framework configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `APP_ENV`, default `local`
    pub env: String,
    /// `APP_DEBUG`, default `true`
    pub debug: bool,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "local".to_string(),
            debug: true,
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load `.env` from the working directory (if any), then read the
    /// process environment
    pub fn load() -> Result<Self> {
        load_env_file(".env")?;
        Self::from_env()
    }

    /// Read the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = var("APP_PORT", "3000");
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("APP_PORT={:?}: {}", port, e)))?;

        let workers = match lookup("APP_WORKERS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::Config(format!("APP_WORKERS={:?}: expected a positive integer", raw)))?,
            None => defaults.server.workers,
        };

        Ok(Self {
            env: var("APP_ENV", "local"),
            debug: parse_bool(&var("APP_DEBUG", "true")),
            server: ServerConfig {
                hostname: var("APP_HOST", "0.0.0.0"),
                port,
                workers,
                ..defaults.server
            },
        })
    }

    /// `APP_ENV=production`
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }
}

/// Load a dotenv file without overriding existing variables
///
/// A missing file is not an error.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<()> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Config(format!("{}: {}", path.as_ref().display(), e))),
    }
}

/// `1 t T TRUE true True` are true; everything else is false
fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "t" | "T" | "TRUE" | "true" | "True")
}
