use crate::error::{PoolError, Result};
use crate::models::ProtocolClass;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Admin API configuration
    pub api: ApiServerConfig,
    /// Proxy store configuration
    pub database: DatabaseConfig,
    /// Selection rules
    pub selection: SelectionConfig,
    /// Health monitor settings
    pub health: HealthConfig,
    /// Rotation scheduler settings
    pub rotation: RotationConfig,
    /// External proxy-list sources
    pub sources: SourcesConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8001)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Which store implementation to run against
    pub backend: StoreBackend,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
    /// How long a store call may wait for a connection
    pub acquire_timeout: Duration,
    /// Server-side limit on a single statement
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Only hand out proxies from trusted providers
    pub provider_restriction: bool,
    /// Provider tags considered trusted
    pub trusted_providers: Vec<String>,
    /// Reputation floor used when the policy floor leaves nothing
    pub relaxed_min_reputation: u8,
    /// Optional JSON file with per-operation policy overrides
    pub policy_file: Option<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            provider_restriction: false,
            trusted_providers: Vec::new(),
            relaxed_min_reputation: 30,
            policy_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between health sweeps
    pub check_interval: Duration,
    /// Timeout for each reachability probe
    pub probe_timeout: Duration,
    /// Maximum probes in flight at once
    pub max_concurrent_probes: usize,
    /// Probe outcomes kept per record for the success rate
    pub window_size: usize,
    /// Failure streak that deactivates a record
    pub max_consecutive_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(5),
            max_concurrent_probes: 10,
            window_size: 10,
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Staleness window for the routine cleanup pass
    pub cleanup_after_days: u32,
    /// Staleness window for the nightly deep purge
    pub deep_purge_after_days: u32,
    /// UTC hour at which the deep purge runs
    pub deep_purge_hour_utc: u32,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            cleanup_after_days: 7,
            deep_purge_after_days: 30,
            deep_purge_hour_utc: 3,
        }
    }
}

/// One external proxy-list source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Source name, also used as the provider tag of its records
    pub name: String,
    /// Protocol class assumed for entries that do not state one
    pub protocol: ProtocolClass,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub sources: Vec<SourceConfig>,
    /// Per-source fetch timeout
    pub fetch_timeout: Duration,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            api: ApiServerConfig {
                port: parse_env("API_PORT", "8001")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: split_list(&get_env_or("CORS_ORIGINS", "")),
            },
            database: DatabaseConfig {
                backend: match get_env_or("STORE_BACKEND", "postgres").to_lowercase().as_str() {
                    "postgres" | "postgresql" => StoreBackend::Postgres,
                    "memory" => StoreBackend::Memory,
                    other => {
                        return Err(PoolError::Configuration(format!(
                            "STORE_BACKEND must be postgres or memory, got {}",
                            other
                        )))
                    }
                },
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", "5432")?,
                user: get_env_or("DB_USER", "relaypool"),
                password: get_env_or("DB_PASSWORD", "relaypool"),
                name: get_env_or("DB_NAME", "relaypool"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "20")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "2")?,
                acquire_timeout: Duration::from_secs(parse_env("DB_ACQUIRE_TIMEOUT_SECS", "5")?),
                statement_timeout: Duration::from_secs(parse_env("DB_STATEMENT_TIMEOUT_SECS", "10")?),
            },
            selection: SelectionConfig {
                provider_restriction: parse_env("PROVIDER_RESTRICTION", "false")?,
                trusted_providers: split_list(&get_env_or("TRUSTED_PROVIDERS", "")),
                relaxed_min_reputation: parse_env::<u8>("RELAXED_MIN_REPUTATION", "30")?.min(100),
                policy_file: env::var("POLICY_FILE").ok().filter(|s| !s.trim().is_empty()),
            },
            health: HealthConfig {
                check_interval: Duration::from_secs(
                    parse_env::<u64>("HEALTH_CHECK_INTERVAL_SECS", "300")?.max(1),
                ),
                probe_timeout: Duration::from_secs(
                    parse_env::<u64>("HEALTH_CHECK_TIMEOUT_SECS", "5")?.max(1),
                ),
                max_concurrent_probes: parse_env::<usize>("HEALTH_CHECK_CONCURRENCY", "10")?.max(1),
                window_size: parse_env::<usize>("HEALTH_WINDOW_SIZE", "10")?.max(1),
                max_consecutive_failures: parse_env::<u32>("HEALTH_MAX_CONSECUTIVE_FAILURES", "3")?
                    .max(1),
            },
            rotation: RotationConfig {
                cleanup_after_days: parse_env("ROTATION_CLEANUP_DAYS", "7")?,
                deep_purge_after_days: parse_env("ROTATION_DEEP_PURGE_DAYS", "30")?,
                deep_purge_hour_utc: parse_env("ROTATION_DEEP_PURGE_HOUR_UTC", "3")?,
            },
            sources: SourcesConfig {
                sources: parse_sources(&get_env_or("PROXY_SOURCES", ""))?,
                fetch_timeout: Duration::from_secs(
                    parse_env::<u64>("SOURCE_FETCH_TIMEOUT_SECS", "15")?.max(1),
                ),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.selection.provider_restriction && self.selection.trusted_providers.is_empty() {
            return Err(PoolError::Configuration(
                "PROVIDER_RESTRICTION is enabled but TRUSTED_PROVIDERS is empty".into(),
            ));
        }
        if self.rotation.deep_purge_hour_utc > 23 {
            return Err(PoolError::Configuration(
                "ROTATION_DEEP_PURGE_HOUR_UTC must be between 0 and 23".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(PoolError::Configuration(
                "DB_MIN_CONNECTIONS must not exceed DB_MAX_CONNECTIONS".into(),
            ));
        }
        Ok(())
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse `name|protocol|url` entries separated by commas
fn parse_sources(raw: &str) -> Result<Vec<SourceConfig>> {
    let mut sources = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.splitn(3, '|').map(str::trim).collect();
        let [name, protocol, url] = parts.as_slice() else {
            return Err(PoolError::Configuration(format!(
                "PROXY_SOURCES entry must be name|protocol|url: {}",
                entry
            )));
        };

        if name.is_empty() {
            return Err(PoolError::Configuration(format!(
                "PROXY_SOURCES entry has an empty name: {}",
                entry
            )));
        }

        let protocol = ProtocolClass::from_str(protocol).ok_or_else(|| {
            PoolError::Configuration(format!(
                "PROXY_SOURCES entry {} has unsupported protocol: {}",
                name, protocol
            ))
        })?;

        let parsed = Url::parse(url).map_err(|e| {
            PoolError::Configuration(format!("PROXY_SOURCES entry {} has invalid URL: {}", name, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PoolError::Configuration(format!(
                "PROXY_SOURCES entry {} must use http or https",
                name
            )));
        }

        if sources.iter().any(|s: &SourceConfig| s.name == *name) {
            return Err(PoolError::Configuration(format!(
                "PROXY_SOURCES has duplicate source name: {}",
                name
            )));
        }

        sources.push(SourceConfig {
            name: name.to_string(),
            protocol,
            url: url.to_string(),
        });
    }

    Ok(sources)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim()
        .parse()
        .map_err(|_| PoolError::Configuration(format!("{} has an invalid value: {}", key, raw)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
