use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_STATE_PATH: &str = "taskdeck.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Url,
    /// SQLite file holding the persisted session.
    pub state_path: PathBuf,
    /// Applied to every request; `None` leaves it to the transport.
    pub request_timeout: Option<Duration>,
    /// Upper bound for the best-effort server logout call.
    pub logout_timeout: Duration,
    pub cookie_max_age: time::Duration,
}

impl Config {
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        Ok(Config {
            api_url: parse_api_url(api_url)?,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            request_timeout: None,
            logout_timeout: Duration::from_secs(5),
            cookie_max_age: time::Duration::days(1),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url =
            std::env::var("TASKDECK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Config::new(&api_url)?;

        if let Ok(path) = std::env::var("TASKDECK_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        if let Some(secs) = env_secs("TASKDECK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = env_secs("TASKDECK_LOGOUT_TIMEOUT_SECS")? {
            config.logout_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_secs("TASKDECK_COOKIE_MAX_AGE_SECS")? {
            config.cookie_max_age = time::Duration::seconds(secs as i64);
        }

        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: &str) -> Result<Self, ConfigError> {
        self.api_url = parse_api_url(api_url)?;
        Ok(self)
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }
}

fn env_secs(key: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(None),
    }
}

fn parse_api_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            value: value.to_string(),
            reason: "scheme must be http or https".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::new(DEFAULT_API_URL).unwrap();
        assert_eq!(config.api_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.logout_timeout, Duration::from_secs(5));
        assert_eq!(config.cookie_max_age, time::Duration::seconds(86400));
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            Config::new("ftp://example.com"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Config::new("not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
