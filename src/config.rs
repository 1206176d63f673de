use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the in-memory store
    pub database_url: Option<String>,
    /// Absent disables the cross-instance relay
    pub redis_url: Option<String>,
    pub port: u16,
    pub jwt_secret: String,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub sync_page_limit: usize,
    pub instance_id: String,
    pub db_max_connections: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str, default: u64| -> Result<u64, AppError> {
            match non_empty(key) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| AppError::Config(format!("{key} must be a positive integer"))),
                None => Ok(default),
            }
        };

        let jwt_secret = non_empty("JWT_SECRET")
            .ok_or_else(|| AppError::Config("JWT_SECRET missing".into()))?;

        let port = u16::try_from(parsed("PORT", 3000)?)
            .map_err(|_| AppError::Config("PORT out of range".into()))?;
        let heartbeat_interval = Duration::from_secs(parsed("HEARTBEAT_INTERVAL_SECS", 5)?.max(1));
        let client_timeout = Duration::from_secs(parsed("CLIENT_TIMEOUT_SECS", 30)?.max(1));
        if client_timeout <= heartbeat_interval {
            return Err(AppError::Config(
                "CLIENT_TIMEOUT_SECS must exceed HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            port,
            jwt_secret,
            heartbeat_interval,
            client_timeout,
            sync_page_limit: parsed("SYNC_PAGE_LIMIT", 100)?.max(1) as usize,
            instance_id: non_empty("INSTANCE_ID").unwrap_or_else(|| Uuid::new_v4().to_string()),
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 20)?.max(1) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_apply() {
        let cfg = Config::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.client_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sync_page_limit, 100);
        assert!(cfg.database_url.is_none());
        assert!(cfg.redis_url.is_none());
        assert!(!cfg.instance_id.is_empty());
    }

    #[test]
    fn test_jwt_secret_is_required() {
        let err = Config::from_lookup(lookup(&[("PORT", "8080")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("JWT_SECRET", "s"), ("PORT", "http")])).is_err());
        assert!(Config::from_lookup(lookup(&[("JWT_SECRET", "s"), ("PORT", "70000")])).is_err());
        assert!(Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("HEARTBEAT_INTERVAL_SECS", "30"),
            ("CLIENT_TIMEOUT_SECS", "10"),
        ]))
        .is_err());
    }

    #[test]
    fn test_blank_urls_mean_disabled() {
        let cfg = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("DATABASE_URL", "  "),
            ("REDIS_URL", "redis://localhost:6379"),
        ]))
        .unwrap();
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379"));
    }
}
