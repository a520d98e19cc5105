//! Layered configuration: optional TOML file, overridden by environment
//! variables. Only the database URL and the mailer credentials are required;
//! everything else has a working default.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::queue::RetryPolicy;

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub check_concurrency: usize,
    pub notification_concurrency: usize,
    pub scheduler_tick_ms: u64,
    pub queue_poll_ms: u64,
    pub check_max_attempts: i32,
    pub check_backoff_ms: u64,
    pub notification_max_attempts: i32,
    pub notification_backoff_ms: u64,
    pub log_dir: String,
    pub mailer: MailerConfig,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialAppConfig {
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    check_concurrency: Option<usize>,
    notification_concurrency: Option<usize>,
    scheduler_tick_ms: Option<u64>,
    queue_poll_ms: Option<u64>,
    check_max_attempts: Option<i32>,
    check_backoff_ms: Option<u64>,
    notification_max_attempts: Option<i32>,
    notification_backoff_ms: Option<u64>,
    log_dir: Option<String>,
    #[serde(default)]
    mailer: PartialMailerConfig,
}

#[derive(Deserialize, Default, Debug)]
struct PartialMailerConfig {
    endpoint: Option<String>,
    api_key: Option<String>,
    from: Option<String>,
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        // 1. Load from file (optional)
        let file_config: PartialAppConfig = if let Some(path_str) = config_path {
            let path = Path::new(path_str);
            if path.exists() {
                let contents = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
                toml::from_str(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))?
            } else {
                PartialAppConfig::default()
            }
        } else {
            PartialAppConfig::default()
        };

        // 2. Environment overrides for the deploy-specific values
        let env_config = PartialAppConfig {
            database_url: env::var("DATABASE_URL").ok(),
            log_dir: env::var("LOG_DIR").ok(),
            mailer: PartialMailerConfig {
                endpoint: env::var("MAILER_ENDPOINT").ok(),
                api_key: env::var("MAILER_API_KEY").ok(),
                from: env::var("MAILER_FROM").ok(),
            },
            ..PartialAppConfig::default()
        };

        resolve(file_config, env_config)
    }

    pub fn check_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.check_max_attempts,
            backoff_base: Duration::from_millis(self.check_backoff_ms),
        }
    }

    pub fn notification_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.notification_max_attempts,
            backoff_base: Duration::from_millis(self.notification_backoff_ms),
        }
    }
}

// Merge: environment overrides file, defaults fill the rest.
fn resolve(file: PartialAppConfig, env: PartialAppConfig) -> Result<AppConfig, String> {
    Ok(AppConfig {
        database_url: env
            .database_url
            .or(file.database_url)
            .ok_or("DATABASE_URL is required")?,
        database_max_connections: file.database_max_connections.unwrap_or(10),
        check_concurrency: file.check_concurrency.unwrap_or(5),
        notification_concurrency: file.notification_concurrency.unwrap_or(2),
        scheduler_tick_ms: file.scheduler_tick_ms.unwrap_or(1000),
        queue_poll_ms: file.queue_poll_ms.unwrap_or(500),
        check_max_attempts: file.check_max_attempts.unwrap_or(3),
        check_backoff_ms: file.check_backoff_ms.unwrap_or(5000),
        notification_max_attempts: file.notification_max_attempts.unwrap_or(3),
        notification_backoff_ms: file.notification_backoff_ms.unwrap_or(3000),
        log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(|| "logs".to_string()),
        mailer: MailerConfig {
            endpoint: env
                .mailer
                .endpoint
                .or(file.mailer.endpoint)
                .ok_or("MAILER_ENDPOINT is required")?,
            api_key: env
                .mailer
                .api_key
                .or(file.mailer.api_key)
                .ok_or("MAILER_API_KEY is required")?,
            from: env
                .mailer
                .from
                .or(file.mailer.from)
                .ok_or("MAILER_FROM is required")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"
        database_url = "postgres://localhost/upwatch"
        check_concurrency = 8
        notification_backoff_ms = 1500

        [mailer]
        endpoint = "https://mail.example.com/send"
        api_key = "file-key"
        from = "alerts@example.com"
    "#;

    #[test]
    fn file_values_and_defaults_combine() {
        let file: PartialAppConfig = toml::from_str(FILE).unwrap();
        let config = resolve(file, PartialAppConfig::default()).unwrap();

        assert_eq!(config.database_url, "postgres://localhost/upwatch");
        assert_eq!(config.check_concurrency, 8);
        assert_eq!(config.notification_concurrency, 2);
        assert_eq!(config.notification_backoff_ms, 1500);
        assert_eq!(config.check_backoff_ms, 5000);
        assert_eq!(config.mailer.from, "alerts@example.com");
    }

    #[test]
    fn environment_beats_file() {
        let file: PartialAppConfig = toml::from_str(FILE).unwrap();
        let env = PartialAppConfig {
            database_url: Some("postgres://prod/upwatch".to_string()),
            mailer: PartialMailerConfig {
                api_key: Some("env-key".to_string()),
                ..PartialMailerConfig::default()
            },
            ..PartialAppConfig::default()
        };
        let config = resolve(file, env).unwrap();

        assert_eq!(config.database_url, "postgres://prod/upwatch");
        assert_eq!(config.mailer.api_key, "env-key");
        assert_eq!(config.mailer.endpoint, "https://mail.example.com/send");
    }

    #[test]
    fn missing_required_values_are_reported() {
        let err = resolve(PartialAppConfig::default(), PartialAppConfig::default()).unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn retry_policies_reflect_settings() {
        let file: PartialAppConfig = toml::from_str(FILE).unwrap();
        let config = resolve(file, PartialAppConfig::default()).unwrap();
        assert_eq!(config.check_policy().max_attempts, 3);
        assert_eq!(
            config.notification_policy().backoff_base,
            Duration::from_millis(1500)
        );
    }
}
