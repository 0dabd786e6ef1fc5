//! Process configuration from the environment

use std::net::SocketAddr;

use coursepay_billing::{EmailConfig, SiteConfig};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Read `LOG_FORMAT` before the rest of the config, so tracing is up first
    pub fn from_env() -> Self {
        optional("LOG_FORMAT")
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Direct connection for migrations (bypasses a pooler)
    pub database_direct_url: Option<String>,
    pub bind_address: SocketAddr,
    /// Site root used for course and home links
    pub public_url: String,
    /// Externally reachable base of this API; defaults to `public_url`
    pub api_public_url: Option<String>,
    pub site_name: String,
    pub noreply_email: String,
    pub resend_api_key: Option<String>,
    pub allowed_origins: Vec<String>,
    pub run_migrations: bool,
    pub log_format: LogFormat,
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

/// `scheme://host[:port]` of a URL, for the CORS allowlist
fn origin_of(name: &'static str, raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })?;
    Ok(parsed.origin().ascii_serialization())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let public_url = required("PUBLIC_URL")?
            .trim_end_matches('/')
            .to_string();

        let bind_raw = optional("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDRESS",
            value: bind_raw.clone(),
        })?;

        let site_name = optional("SITE_NAME").unwrap_or_else(|| "Course Site".to_string());
        let noreply_email = match optional("NOREPLY_EMAIL") {
            Some(address) => address,
            None => {
                let host = url::Url::parse(&public_url)
                    .ok()
                    .and_then(|u| u.host_str().map(String::from))
                    .unwrap_or_else(|| "localhost".to_string());
                format!("noreply@{}", host)
            }
        };

        let allowed_origins = match optional("ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec![origin_of("PUBLIC_URL", &public_url)?],
        };

        let run_migrations = match optional("RUN_MIGRATIONS") {
            Some(v) => parse_bool("RUN_MIGRATIONS", &v)?,
            None => true,
        };

        Ok(Self {
            database_url,
            database_direct_url: optional("DATABASE_DIRECT_URL"),
            bind_address,
            public_url,
            api_public_url: optional("API_PUBLIC_URL"),
            site_name,
            noreply_email,
            resend_api_key: optional("RESEND_API_KEY"),
            allowed_origins,
            run_migrations,
            log_format: LogFormat::from_env(),
        })
    }

    pub fn site_config(&self) -> SiteConfig {
        let site = SiteConfig::new(&self.public_url, &self.site_name);
        match &self.api_public_url {
            Some(api_url) => site.with_api_url(api_url),
            None => site,
        }
    }

    pub fn email_config(&self) -> EmailConfig {
        EmailConfig {
            api_key: self.resend_api_key.clone(),
            noreply_address: self.noreply_email.clone(),
            site_name: self.site_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "DATABASE_DIRECT_URL",
        "BIND_ADDRESS",
        "PUBLIC_URL",
        "API_PUBLIC_URL",
        "SITE_NAME",
        "NOREPLY_EMAIL",
        "RESEND_API_KEY",
        "ALLOWED_ORIGINS",
        "RUN_MIGRATIONS",
        "LOG_FORMAT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    fn set_minimal() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/coursepay");
        std::env::set_var("PUBLIC_URL", "https://learn.example.com/");
    }

    #[test]
    #[serial]
    fn test_defaults() {
        set_minimal();

        let config = Config::from_env().unwrap();
        assert_eq!(config.public_url, "https://learn.example.com");
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.site_name, "Course Site");
        assert_eq!(config.noreply_email, "noreply@learn.example.com");
        assert_eq!(config.allowed_origins, vec!["https://learn.example.com"]);
        assert!(config.run_migrations);
        assert!(config.resend_api_key.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);

        let site = config.site_config();
        assert_eq!(site.api_url, "https://learn.example.com");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        clear_env();
        std::env::set_var("PUBLIC_URL", "https://learn.example.com");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        set_minimal();
        std::env::set_var("API_PUBLIC_URL", "https://api.example.com/");
        std::env::set_var("RUN_MIGRATIONS", "false");
        std::env::set_var("LOG_FORMAT", "JSON");
        std::env::set_var("RESEND_API_KEY", "re_123");
        std::env::set_var("BIND_ADDRESS", "127.0.0.1:8080");

        let config = Config::from_env().unwrap();
        assert!(!config.run_migrations);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.bind_address.port(), 8080);
        assert_eq!(config.site_config().api_url, "https://api.example.com");
        assert_eq!(config.email_config().api_key.as_deref(), Some("re_123"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        set_minimal();
        std::env::set_var("RUN_MIGRATIONS", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { name: "RUN_MIGRATIONS", .. })
        ));

        set_minimal();
        std::env::set_var("BIND_ADDRESS", "not-an-address");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid { name: "BIND_ADDRESS", .. })
        ));
        clear_env();
    }
}
