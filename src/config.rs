use serde::Serialize;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite:ballot_count.db";
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 8080);
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// System name and logo printed on every report. Read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branding {
    pub system_name: String,
    pub logo: Option<String>,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            system_name: "School Election".to_string(),
            logo: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub refresh_interval: Duration,
    pub branding: Branding,
}

impl Config {
    /// Reads configuration from the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_addr: SocketAddr = parse_var(&lookup, "BIND_ADDR", SocketAddr::from(DEFAULT_BIND_ADDR))?;
        let max_connections: u32 = parse_var(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(invalid("DB_MAX_CONNECTIONS", "0", "must be at least 1"));
        }

        let refresh_secs: u64 = parse_var(
            &lookup,
            "REFRESH_INTERVAL_SECS",
            DEFAULT_REFRESH_INTERVAL.as_secs(),
        )?;
        if refresh_secs == 0 {
            return Err(invalid("REFRESH_INTERVAL_SECS", "0", "must be at least 1"));
        }

        let defaults = Branding::default();
        let branding = Branding {
            system_name: lookup("SYSTEM_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.system_name),
            logo: lookup("SYSTEM_LOGO").filter(|s| !s.trim().is_empty()),
        };

        Ok(Self {
            database_url,
            bind_addr,
            max_connections,
            refresh_interval: Duration::from_secs(refresh_secs),
            branding,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(name, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
