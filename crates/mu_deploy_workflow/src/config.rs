use std::time::Duration;

use thiserror::Error;

use crate::runtime::naming::{validate_segment, NamingError, DEFAULT_NAMESPACE};
use crate::workflows::waiter::WaitPolicy;

pub const ENV_NAMESPACE: &str = "MU_NAMESPACE";
pub const ENV_POLL_INTERVAL_SECS: &str = "MU_POLL_INTERVAL_SECS";
pub const ENV_MAX_POLL_ATTEMPTS: &str = "MU_MAX_POLL_ATTEMPTS";
pub const ENV_MAX_BACKOFF_SECS: &str = "MU_MAX_BACKOFF_SECS";
pub const ENV_TEMPLATE_BASE_URL: &str = "MU_TEMPLATE_BASE_URL";
pub const ENV_CODE_REVISION: &str = "MU_CODE_REVISION";
pub const ENV_REPO_NAME: &str = "MU_REPO_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error(transparent)]
    Namespace(#[from] NamingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub namespace: String,
    pub wait: WaitPolicy,
    pub template_base_url: Option<String>,
    pub code_revision: Option<String>,
    pub repo_name: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            wait: WaitPolicy::default(),
            template_base_url: None,
            code_revision: None,
            repo_name: None,
        }
    }
}

impl DeployConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = WaitPolicy::default();

        let namespace = match read(ENV_NAMESPACE) {
            Some(namespace) => validate_segment("namespace", &namespace)?.to_string(),
            None => DEFAULT_NAMESPACE.to_string(),
        };

        let wait = WaitPolicy {
            poll_interval: read_secs(&read, ENV_POLL_INTERVAL_SECS)?
                .unwrap_or(defaults.poll_interval),
            max_attempts: read_positive(&read, ENV_MAX_POLL_ATTEMPTS)?
                .map(|attempts| u32::try_from(attempts).unwrap_or(u32::MAX))
                .unwrap_or(defaults.max_attempts),
            max_backoff: read_secs(&read, ENV_MAX_BACKOFF_SECS)?.unwrap_or(defaults.max_backoff),
        };

        Ok(Self {
            namespace,
            wait,
            template_base_url: read(ENV_TEMPLATE_BASE_URL)
                .map(|url| url.trim_end_matches('/').to_string()),
            code_revision: read(ENV_CODE_REVISION),
            repo_name: read(ENV_REPO_NAME),
        })
    }

    pub fn require_template_base_url(&self) -> Result<&str, ConfigError> {
        self.template_base_url
            .as_deref()
            .ok_or(ConfigError::Missing(ENV_TEMPLATE_BASE_URL))
    }
}

fn read_positive<R>(read: &R, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    R: Fn(&str) -> Option<String>,
{
    let Some(value) = read(name) else {
        return Ok(None);
    };
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

fn read_secs<R>(read: &R, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    R: Fn(&str) -> Option<String>,
{
    Ok(read_positive(read, name)?.map(Duration::from_secs))
}
