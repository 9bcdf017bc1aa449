use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for the console proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub tickets: TicketsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file is missing.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {:?}: {}. Using defaults.",
                    path.as_ref(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Get the default configuration as a TOML string.
    pub fn default_toml() -> Result<String> {
        let config = Self::default();
        toml::to_string_pretty(&config).context("Failed to serialize default config")
    }

    /// Apply `NORTUS_API_BASE_URL`, `NORTUS_COOKIE` and `NORTUS_ENV` on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NORTUS_API_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.upstream.base_url = url.trim().to_string();
        }

        if let Some(name) = lookup("NORTUS_COOKIE").filter(|v| !v.trim().is_empty()) {
            self.session.cookie_name = name.trim().to_string();
        }

        if let Some(env) = lookup("NORTUS_ENV") {
            match env.parse() {
                Ok(environment) => self.server.environment = environment,
                Err(e) => tracing::warn!("Ignoring NORTUS_ENV: {}", e),
            }
        }
    }

    /// Validate the configuration for obvious misconfiguration.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        let url = reqwest::Url::parse(&self.upstream.base_url)
            .with_context(|| format!("Invalid upstream base_url: {}", self.upstream.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Upstream base_url must be http or https: {}", url);
        }

        if self.session.cookie_name.trim().is_empty() {
            anyhow::bail!("session.cookie_name cannot be empty");
        }

        if self.session.max_age_seconds == 0 {
            anyhow::bail!("session.max_age_seconds must be greater than 0");
        }

        if self.tickets.default_page_size == 0 {
            anyhow::bail!("tickets.default_page_size must be greater than 0");
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Deployment environment. Production turns on `Secure` session cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown environment: {}", other),
        }
    }
}

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: Environment::default(),
            verbose: false,
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Upstream API location and endpoint paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout. Unset means the transport default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default)]
    pub paths: UpstreamPaths,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: None,
            paths: UpstreamPaths::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamPaths {
    #[serde(default = "default_login_path")]
    pub login: String,

    #[serde(default = "default_refresh_path")]
    pub refresh: String,

    #[serde(default = "default_tickets_path")]
    pub tickets: String,

    #[serde(default = "default_dashboard_path")]
    pub dashboard: String,

    #[serde(default = "default_chat_path")]
    pub chat: String,

    #[serde(default = "default_map_path")]
    pub map: String,

    #[serde(default = "default_simulator_path")]
    pub simulator_plans: String,
}

impl Default for UpstreamPaths {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            refresh: default_refresh_path(),
            tickets: default_tickets_path(),
            dashboard: default_dashboard_path(),
            chat: default_chat_path(),
            map: default_map_path(),
            simulator_plans: default_simulator_path(),
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,

    /// Forces the `Secure` attribute on or off. Unset follows the environment.
    #[serde(default)]
    pub secure: Option<bool>,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn is_secure(&self, environment: Environment) -> bool {
        self.secure
            .unwrap_or(environment == Environment::Production)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            max_age_seconds: default_max_age(),
            secure: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TicketsConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub include_modules: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_modules: false,
        }
    }
}

// Default providers ---------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh-token".to_string()
}

fn default_tickets_path() -> String {
    "/tickets".to_string()
}

fn default_dashboard_path() -> String {
    "/nortus-v1/dashboard".to_string()
}

fn default_chat_path() -> String {
    "/nortus-v1/chat".to_string()
}

fn default_map_path() -> String {
    "/map/locations".to_string()
}

fn default_simulator_path() -> String {
    "/nortus-v1/simulador-planos".to_string()
}

fn default_cookie_name() -> String {
    "nortus_token".to_string()
}

fn default_max_age() -> u64 {
    60 * 60 * 24
}

fn default_page_size() -> usize {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

// Tests ---------------------------------------------------------------------
