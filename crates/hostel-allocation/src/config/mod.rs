use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the allocation service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub allocation: AllocationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("APP_LOG_FORMAT") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let allocation = AllocationConfig {
            default_hold_ttl_secs: numeric_var("APP_HOLD_TTL_SECS", 300)?,
            max_hold_ttl_secs: numeric_var("APP_MAX_HOLD_TTL_SECS", 3600)?,
            sweep_interval_secs: numeric_var("APP_SWEEP_INTERVAL_SECS", 30)?,
            waitlist_days_per_position: numeric_var("APP_WAITLIST_DAYS_PER_POSITION", 7)?,
        };
        allocation.validate()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            allocation,
        })
    }
}

fn numeric_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Hold timeouts, the reaper cadence and waitlist estimates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationConfig {
    pub default_hold_ttl_secs: u64,
    pub max_hold_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub waitlist_days_per_position: u32,
}

impl AllocationConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_hold_ttl_secs == 0 || self.default_hold_ttl_secs > self.max_hold_ttl_secs
        {
            return Err(ConfigError::HoldTtlOutOfRange {
                default: self.default_hold_ttl_secs,
                max: self.max_hold_ttl_secs,
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "APP_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_hold_ttl_secs: 300,
            max_hold_ttl_secs: 3600,
            sweep_interval_secs: 30,
            waitlist_days_per_position: 7,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    HoldTtlOutOfRange { default: u64, max: u64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive integer (found '{value}')")
            }
            ConfigError::HoldTtlOutOfRange { default, max } => write!(
                f,
                "APP_HOLD_TTL_SECS ({default}) must be between 1 and APP_MAX_HOLD_TTL_SECS ({max})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::HoldTtlOutOfRange { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "APP_LOG_FORMAT",
            "APP_HOLD_TTL_SECS",
            "APP_MAX_HOLD_TTL_SECS",
            "APP_SWEEP_INTERVAL_SECS",
            "APP_WAITLIST_DAYS_PER_POSITION",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.telemetry.log_format, LogFormat::Compact);
        assert_eq!(config.allocation, AllocationConfig::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_hold_and_sweep_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOLD_TTL_SECS", "120");
        env::set_var("APP_SWEEP_INTERVAL_SECS", "45");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.allocation.default_hold_ttl_secs, 120);
        assert_eq!(config.allocation.sweep_interval(), Duration::from_secs(45));
        reset_env();
    }

    #[test]
    fn rejects_hold_ttl_above_maximum() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOLD_TTL_SECS", "7200");
        let err = AppConfig::load().expect_err("ttl above max is rejected");
        assert!(matches!(err, ConfigError::HoldTtlOutOfRange { .. }));
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_SWEEP_INTERVAL_SECS", "soon");
        let err = AppConfig::load().expect_err("garbage interval is rejected");
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "APP_SWEEP_INTERVAL_SECS",
                ..
            }
        ));
        reset_env();
    }
}
