use std::time::Duration;

use crawlguard_core::AppError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the Redis connection.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `REDIS_URL` (required)
    /// - `REDIS_CONNECT_TIMEOUT_MS` (optional, defaults to 5000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let url = lookup("REDIS_URL").ok_or_else(|| {
            AppError::ConfigError("REDIS_URL not set. Required for the Redis store.".into())
        })?;

        let connect_timeout = match lookup("REDIS_CONNECT_TIMEOUT_MS") {
            None => DEFAULT_CONNECT_TIMEOUT,
            Some(raw) => {
                let millis: u64 = raw.trim().parse().map_err(|_| {
                    AppError::ConfigError(format!(
                        "Invalid REDIS_CONNECT_TIMEOUT_MS '{raw}': must be a positive integer"
                    ))
                })?;
                if millis == 0 {
                    return Err(AppError::ConfigError(
                        "REDIS_CONNECT_TIMEOUT_MS must be at least 1".into(),
                    ));
                }
                Duration::from_millis(millis)
            }
        };

        Ok(Self {
            url,
            connect_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_required() {
        let err = RedisConfig::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("REDIS_URL not set"));
    }

    #[test]
    fn reads_url_and_timeout() {
        let config = RedisConfig::from_lookup(|key| match key {
            "REDIS_URL" => Some("redis://localhost:6379".into()),
            "REDIS_CONNECT_TIMEOUT_MS" => Some("750".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
    }

    #[test]
    fn timeout_defaults_and_rejects_zero() {
        let config = RedisConfig::from_lookup(|key| {
            (key == "REDIS_URL").then(|| "redis://localhost".to_string())
        })
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));

        let err = RedisConfig::from_lookup(|key| match key {
            "REDIS_URL" => Some("redis://localhost".into()),
            "REDIS_CONNECT_TIMEOUT_MS" => Some("0".into()),
            _ => None,
        })
        .unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
