//! Portal session configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

pub const DEFAULT_SESSION_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ROLE_LOOKUP_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_TOKEN_REFRESH_MARGIN_SECS: u64 = 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Project URL without trailing slash, e.g. `https://abc.supabase.co`.
    pub supabase_url: String,
    pub anon_key: String,
    pub session_fetch_timeout: Duration,
    pub role_lookup_timeout: Duration,
    pub refresh_margin: Duration,
    pub http: HttpTimeouts,
}

impl PortalConfig {
    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `SESSION_FETCH_TIMEOUT_MS`: default 10000
    /// - `ROLE_LOOKUP_TIMEOUT_MS`: default 5000
    /// - `TOKEN_REFRESH_MARGIN_SECS`: default 60
    /// - `SUPABASE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SUPABASE_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or the URL
    /// is not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var_os(key).map(|v| v.to_string_lossy().into_owned()))
    }

    /// Same as [`PortalConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`PortalConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("SUPABASE_URL").ok_or(ConfigError::Missing { var: "SUPABASE_URL" })?;
        let supabase_url = parse_base_url(&raw_url)?;
        let anon_key = lookup("SUPABASE_ANON_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing { var: "SUPABASE_ANON_KEY" })?;

        let parse = |key: &str, default: u64| lookup(key).and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default);

        Ok(Self {
            supabase_url,
            anon_key,
            session_fetch_timeout: Duration::from_millis(parse(
                "SESSION_FETCH_TIMEOUT_MS",
                DEFAULT_SESSION_FETCH_TIMEOUT_MS,
            )),
            role_lookup_timeout: Duration::from_millis(parse("ROLE_LOOKUP_TIMEOUT_MS", DEFAULT_ROLE_LOOKUP_TIMEOUT_MS)),
            refresh_margin: Duration::from_secs(parse("TOKEN_REFRESH_MARGIN_SECS", DEFAULT_TOKEN_REFRESH_MARGIN_SECS)),
            http: HttpTimeouts {
                request_secs: parse("SUPABASE_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: parse("SUPABASE_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            },
        })
    }
}

fn parse_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ConfigError::Invalid { var: "SUPABASE_URL", value: raw.to_owned() });
    }
    Ok(trimmed.to_owned())
}
