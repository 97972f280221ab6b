use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::{validate_segment, NamingError};

pub const DEFAULT_SERVICE_PORT: u16 = 8080;
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";
pub const DEFAULT_DESIRED_COUNT: u32 = 2;
pub const DEFAULT_CPU: u32 = 10;
pub const DEFAULT_MEMORY: u32 = 300;
pub const DEFAULT_PATH_PATTERN: &str = "/*";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("service port must be a positive integer")]
    ZeroPort,
    #[error("health check path must start with '/'")]
    RelativeHealthCheckPath,
    #[error("path_patterns cannot be empty")]
    NoPathPatterns,
    #[error("invalid service descriptor: {0}")]
    Malformed(String),
}

/// Service settings read from the project's service file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_path_patterns")]
    pub path_patterns: Vec<String>,
    /// Pinned listener-rule priority; 0 leaves allocation to the workflow.
    #[serde(default)]
    pub priority: u32,
    /// Stack parameter name to parameter-store key.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            image_url: String::new(),
            port: default_port(),
            health_check_path: default_health_check_path(),
            desired_count: default_desired_count(),
            cpu: default_cpu(),
            memory: default_memory(),
            path_patterns: default_path_patterns(),
            priority: 0,
            secrets: BTreeMap::new(),
        }
    }
}

impl ServiceDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, DescriptorError> {
        let descriptor: Self = serde_json::from_str(raw)
            .map_err(|error| DescriptorError::Malformed(error.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        validate_segment("service", &self.name)?;
        if self.port == 0 {
            return Err(DescriptorError::ZeroPort);
        }
        if !self.health_check_path.starts_with('/') {
            return Err(DescriptorError::RelativeHealthCheckPath);
        }
        if self.path_patterns.iter().all(|pattern| pattern.trim().is_empty()) {
            return Err(DescriptorError::NoPathPatterns);
        }
        Ok(())
    }

    pub fn path_pattern_parameter(&self) -> String {
        self.path_patterns
            .iter()
            .map(|pattern| pattern.trim())
            .filter(|pattern| !pattern.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn default_port() -> u16 {
    DEFAULT_SERVICE_PORT
}

fn default_health_check_path() -> String {
    DEFAULT_HEALTH_CHECK_PATH.to_string()
}

fn default_desired_count() -> u32 {
    DEFAULT_DESIRED_COUNT
}

fn default_cpu() -> u32 {
    DEFAULT_CPU
}

fn default_memory() -> u32 {
    DEFAULT_MEMORY
}

fn default_path_patterns() -> Vec<String> {
    vec![DEFAULT_PATH_PATTERN.to_string()]
}
