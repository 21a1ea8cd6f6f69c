use crate::{env_parse_or, ConfigError, FromEnv};

/// Redis connection settings shared by the store and the pub/sub transport.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`
    pub url: String,

    /// Optional logical database number
    pub database: Option<u8>,

    /// How many times to retry the initial connection before giving up
    pub connect_retries: u32,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: None,
            connect_retries: 3,
        }
    }

    pub fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// URL with the database number appended when one is configured.
    pub fn connection_url(&self) -> String {
        match self.database {
            Some(db) => format!("{}/{}", self.url.trim_end_matches('/'), db),
            None => self.url.clone(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}

impl FromEnv for RedisConfig {
    /// Environment variables:
    /// - `REDIS_URL` or `REDIS_HOST` (required)
    /// - `REDIS_DATABASE` (optional)
    /// - `REDIS_CONNECT_RETRIES` (optional, default 3)
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("REDIS_HOST"))
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        let database = match std::env::var("REDIS_DATABASE") {
            Ok(raw) => Some(raw.parse().map_err(|e| ConfigError::ParseError {
                key: "REDIS_DATABASE".to_string(),
                details: format!("{}", e),
            })?),
            Err(_) => None,
        };

        Ok(Self {
            url,
            database,
            connect_retries: env_parse_or("REDIS_CONNECT_RETRIES", 3)?,
        })
    }
}
