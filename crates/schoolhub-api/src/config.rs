use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is required")]
    MissingDatabaseUrl,

    #[error("JWT_SECRET is required")]
    MissingSecret,

    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
}

/// Optional collaborators. `None` means the feature is switched off and its
/// routes answer with a "feature disabled" error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub google: Option<GoogleOAuthConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_hits: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_hits: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Process configuration, resolved once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    /// `None` only in development; production refuses to start without it.
    pub jwt_secret: Option<String>,
    pub bind_addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub features: Features,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("database_url", &"<redacted>")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("bind_addr", &self.bind_addr)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit", &self.rate_limit)
            .field("features", &self.features)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_origins(raw: Option<String>) -> Vec<String> {
    let raw = raw.unwrap_or_else(|| "http://localhost:3000".to_string());
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = non_empty(get("APP_ENV"))
            .or_else(|| non_empty(get("NODE_ENV")))
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let database_url = non_empty(get("DATABASE_URL")).ok_or(ConfigError::MissingDatabaseUrl)?;

        let jwt_secret = non_empty(get("JWT_SECRET"));
        if jwt_secret.is_none() {
            if environment.is_production() {
                return Err(ConfigError::MissingSecret);
            }
            tracing::warn!("JWT_SECRET is not set; authentication routes are disabled");
        }

        let port = parse_number::<u16>("PORT", get("PORT"))?.unwrap_or(5000);
        let ip = match non_empty(get("BIND_ADDR")) {
            Some(v) => v
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::Invalid { key: "BIND_ADDR", value: v })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let defaults = RateLimitConfig::default();
        let max_hits = parse_number::<usize>("RATE_LIMIT_MAX_HITS", get("RATE_LIMIT_MAX_HITS"))?
            .unwrap_or(defaults.max_hits)
            .clamp(1, 100_000);
        let window_ms = parse_number::<u64>("RATE_LIMIT_WINDOW_MS", get("RATE_LIMIT_WINDOW_MS"))?
            .map(|ms| ms.clamp(1_000, 3_600_000))
            .map(Duration::from_millis)
            .unwrap_or(defaults.window);

        let google = non_empty(get("GOOGLE_CLIENT_ID")).map(|client_id| GoogleOAuthConfig { client_id });

        Ok(Self {
            environment,
            database_url,
            jwt_secret,
            bind_addr: SocketAddr::new(ip, port),
            allowed_origins: parse_origins(non_empty(get("FRONTEND_URL"))),
            rate_limit: RateLimitConfig {
                max_hits,
                window: window_ms,
            },
            features: Features { google },
        })
    }

    pub fn log_disabled_features(&self) {
        if self.features.google.is_none() {
            tracing::info!(feature = "google_oauth", "feature disabled (GOOGLE_CLIENT_ID not set)");
        }
    }
}
