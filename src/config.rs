//! Environment-supplied configuration

use std::time::Duration;

/// Development fallback; the issuer must be configured with the same value
pub const DEFAULT_JWT_SECRET: &str = "your-secure-secret";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:5001", "http://localhost:3000"];
pub const DEFAULT_DATABASE_PATH: &str = "chatrelay.db";
/// `DATABASE_PATH` value that selects the volatile in-memory store
pub const IN_MEMORY_DATABASE: &str = ":memory:";
/// How often the server pings each socket
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
/// Silence after which a socket is considered dead
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(60);
/// Matches any origin. Unusable here since CORS allows credentials.
pub const WILDCARD_ORIGIN: &str = "*";

/// Server-side keepalive for established sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PING_INTERVAL,
            timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared secret for credential verification
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    /// Origins accepted for CORS and the socket handshake
    pub allowed_origins: Vec<String>,
    pub database_path: String,
    pub heartbeat: Heartbeat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            heartbeat: Heartbeat::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Millisecond duration from the environment, falling back on bad values
fn millis_var(key: &str, default: Duration) -> Duration {
    let Some(raw) = non_empty_var(key) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            tracing::warn!(var = key, value = %raw, "Invalid duration, using {:?}", default);
            default
        }
    }
}

impl RelayConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let jwt_secret = match non_empty_var("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set, using the insecure development secret");
                defaults.jwt_secret
            }
        };

        let host = non_empty_var("HOST").unwrap_or(defaults.host);

        let port = match non_empty_var("PORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(port = %raw, "Invalid PORT, falling back to {}", DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => defaults.port,
        };

        let allowed_origins = match non_empty_var("ALLOWED_ORIGINS") {
            Some(raw) => {
                let origins = parse_origins(&raw);
                if origins.is_empty() {
                    tracing::warn!(
                        value = %raw,
                        "ALLOWED_ORIGINS has no usable origin, using the defaults"
                    );
                    defaults.allowed_origins
                } else {
                    origins
                }
            }
            None => defaults.allowed_origins,
        };

        let database_path = non_empty_var("DATABASE_PATH").unwrap_or(defaults.database_path);

        let heartbeat = Heartbeat {
            interval: millis_var("PING_INTERVAL_MS", DEFAULT_PING_INTERVAL),
            timeout: millis_var("PING_TIMEOUT_MS", DEFAULT_PING_TIMEOUT),
        };

        tracing::info!(
            host = %host,
            port,
            origins = ?allowed_origins,
            database_path = %database_path,
            heartbeat = ?heartbeat,
            "Relay config loaded"
        );

        Self {
            jwt_secret,
            host,
            port,
            allowed_origins,
            database_path,
            heartbeat,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_in_memory_store(&self) -> bool {
        self.database_path == IN_MEMORY_DATABASE
    }
}

/// Split a comma-separated origin list, dropping blanks, trailing slashes
/// and the wildcard
fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .filter(|s| {
            if *s == WILDCARD_ORIGIN {
                tracing::warn!("Ignoring wildcard origin, list origins explicitly");
                return false;
            }
            true
        })
        .map(str::to_string)
        .collect()
}
