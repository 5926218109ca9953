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

/// Top-level configuration for the application.
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

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            allocation: AllocationConfig::from_env()?,
        })
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
}

/// Concurrency, timeout, and retry knobs for intake and reallocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationConfig {
    /// Maximum in-flight evaluator calls for a single candidate.
    pub evaluation_fanout: usize,
    /// Maximum candidates processed concurrently during one reallocation run.
    pub reallocation_concurrency: usize,
    pub evaluation_timeout: Duration,
    pub intent_timeout: Duration,
    /// Read-decide-commit cycles attempted before a candidate is reported as conflicted.
    pub max_commit_attempts: u32,
    /// Intent matches reported below this confidence are treated as misses.
    pub intent_confidence_threshold: f32,
    /// Rubric pass mark. Only feeds `ScoreRecord::qualified`, never gates assignment.
    pub baseline_score: u8,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            evaluation_fanout: 8,
            reallocation_concurrency: 8,
            evaluation_timeout: Duration::from_millis(30_000),
            intent_timeout: Duration::from_millis(15_000),
            max_commit_attempts: 5,
            intent_confidence_threshold: 0.8,
            baseline_score: 60,
        }
    }
}

impl AllocationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let evaluation_fanout =
            read_env("ALLOCATION_EVALUATION_FANOUT", defaults.evaluation_fanout)?;
        let reallocation_concurrency = read_env(
            "ALLOCATION_REALLOCATION_CONCURRENCY",
            defaults.reallocation_concurrency,
        )?;
        if evaluation_fanout == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALLOCATION_EVALUATION_FANOUT",
                value: "0".to_string(),
            });
        }
        if reallocation_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ALLOCATION_REALLOCATION_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        let evaluation_timeout_ms: u64 = read_env(
            "ALLOCATION_EVALUATION_TIMEOUT_MS",
            defaults.evaluation_timeout.as_millis() as u64,
        )?;
        let intent_timeout_ms: u64 = read_env(
            "ALLOCATION_INTENT_TIMEOUT_MS",
            defaults.intent_timeout.as_millis() as u64,
        )?;
        let max_commit_attempts =
            read_env("ALLOCATION_MAX_COMMIT_ATTEMPTS", defaults.max_commit_attempts)?.max(1);

        let intent_confidence_threshold: f32 = read_env(
            "ALLOCATION_INTENT_CONFIDENCE",
            defaults.intent_confidence_threshold,
        )?;
        if !(0.0..=1.0).contains(&intent_confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "ALLOCATION_INTENT_CONFIDENCE",
                value: intent_confidence_threshold.to_string(),
            });
        }

        let baseline_score: u8 = read_env("ALLOCATION_BASELINE_SCORE", defaults.baseline_score)?;
        if baseline_score > 100 {
            return Err(ConfigError::InvalidValue {
                key: "ALLOCATION_BASELINE_SCORE",
                value: baseline_score.to_string(),
            });
        }

        Ok(Self {
            evaluation_fanout,
            reallocation_concurrency,
            evaluation_timeout: Duration::from_millis(evaluation_timeout_ms),
            intent_timeout: Duration::from_millis(intent_timeout_ms),
            max_commit_attempts,
            intent_confidence_threshold,
            baseline_score,
        })
    }
}

fn read_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
