use std::time::Duration;

use thiserror::Error;

use dechat_types::models::WebId;

const DEFAULT_POLL_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DECHAT_WEB_ID must be set")]
    MissingWebId,

    #[error("{name} must be a whole number of seconds, got {value:?}")]
    BadSeconds { name: &'static str, value: String },
}

/// Connection settings for the signed-in user's pod.
#[derive(Debug, Clone)]
pub struct PodConfig {
    pub web_id: WebId,
    /// Bearer token sent with every request, if the pod needs one.
    pub access_token: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl PodConfig {
    /// Read `DECHAT_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let web_id = get("DECHAT_WEB_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingWebId)?;
        let access_token = get("DECHAT_ACCESS_TOKEN").filter(|v| !v.is_empty());

        Ok(Self {
            web_id: WebId::new(web_id.trim()),
            access_token,
            poll_interval: seconds(&get, "DECHAT_POLL_SECS", DEFAULT_POLL_SECS)?,
            timeout: seconds(&get, "DECHAT_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
        })
    }
}

fn seconds(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match get(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .trim()
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::BadSeconds { name, value }),
    }
}
