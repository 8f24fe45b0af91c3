//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Command line flags override individual
//! values after loading.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use edubase_core::config::{EdubaseConfig, DEFAULT_BASE_URL};
use edubase_core::ports::LaunchOptions;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub base_url: String,
    /// Parent of every job's staging directory.
    pub download_dir: PathBuf,
    pub browser_headless: bool,
    pub chrome_executable: Option<PathBuf>,
    /// Viewport of browsers launched for single-shot downloads.
    pub browser_width: u32,
    pub browser_height: u32,
    pub page_delay: Duration,
    pub browser_timeout: Duration,
    /// Sessions idle for longer than this (and without running jobs) are evicted.
    pub session_idle_ttl: Duration,
    /// Upper bound for one `POST /download` request.
    pub single_shot_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: Level::INFO,
            base_url: DEFAULT_BASE_URL.to_string(),
            download_dir: std::env::temp_dir().join("edubase-downloads"),
            browser_headless: true,
            chrome_executable: None,
            browser_width: 2560,
            browser_height: 1440,
            page_delay: Duration::from_millis(500),
            browser_timeout: Duration::from_secs(300),
            session_idle_ttl: Duration::from_secs(3600),
            single_shot_timeout: Duration::from_secs(1800),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source; unset
    /// variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        // --- Server Settings ---
        let bind_address = parse_var(&lookup, "BIND_ADDRESS", defaults.bind_address)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Platform and Browser Settings ---
        let base_url = lookup("EDUBASE_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);
        let download_dir = lookup("DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.download_dir);
        let browser_headless = parse_var(&lookup, "BROWSER_HEADLESS", defaults.browser_headless)?;
        let chrome_executable = lookup("CHROME_EXECUTABLE")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        let browser_width = parse_var(&lookup, "BROWSER_WIDTH", defaults.browser_width)?;
        let browser_height = parse_var(&lookup, "BROWSER_HEIGHT", defaults.browser_height)?;

        // --- Timings ---
        let page_delay = Duration::from_millis(parse_var(&lookup, "PAGE_DELAY_MS", 500u64)?);
        let browser_timeout =
            Duration::from_secs(parse_var(&lookup, "BROWSER_TIMEOUT_SECS", 300u64)?);
        let session_idle_ttl =
            Duration::from_secs(parse_var(&lookup, "SESSION_IDLE_TTL_SECS", 3600u64)?);
        let single_shot_timeout =
            Duration::from_secs(parse_var(&lookup, "SINGLE_SHOT_TIMEOUT_SECS", 1800u64)?);

        if browser_width == 0 || browser_height == 0 {
            return Err(ConfigError::InvalidValue(
                "BROWSER_WIDTH/BROWSER_HEIGHT".to_string(),
                "dimensions must be positive".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            log_level,
            base_url,
            download_dir,
            browser_headless,
            chrome_executable,
            browser_width,
            browser_height,
            page_delay,
            browser_timeout,
            session_idle_ttl,
            single_shot_timeout,
        })
    }

    /// The protocol configuration shared by every component.
    pub fn edubase(&self) -> Arc<EdubaseConfig> {
        Arc::new(
            EdubaseConfig::default()
                .with_base_url(self.base_url.clone())
                .with_page_delay(self.page_delay),
        )
    }

    /// Launch options for a browser with the given viewport.
    pub fn launch_options(&self, width: u32, height: u32) -> LaunchOptions {
        LaunchOptions {
            headless: self.browser_headless,
            width,
            height,
            timeout: self.browser_timeout,
            executable: self.chrome_executable.clone(),
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        _ => Ok(default),
    }
}
