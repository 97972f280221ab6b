use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "mu";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
    #[error("{field} '{value}' may only contain ASCII letters, digits and hyphens")]
    InvalidCharacters { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    Environment,
    LoadBalancer,
    Service,
    Database,
}

impl StackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::LoadBalancer => "loadbalancer",
            Self::Service => "service",
            Self::Database => "database",
        }
    }

    fn is_service_scoped(self) -> bool {
        matches!(self, Self::Service | Self::Database)
    }
}

/// Typed handle on a stack name.
///
/// Every producer and consumer of a stack name goes through [`stack_name`], so
/// the `<namespace>-<kind>[-<service>]-<environment>` layout cannot drift
/// between the step that creates a stack and the step that reads it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackRef {
    kind: StackKind,
    name: String,
}

impl StackRef {
    pub fn environment(namespace: &str, environment: &str) -> Result<Self, NamingError> {
        Self::build(namespace, StackKind::Environment, None, environment)
    }

    pub fn load_balancer(namespace: &str, environment: &str) -> Result<Self, NamingError> {
        Self::build(namespace, StackKind::LoadBalancer, None, environment)
    }

    pub fn service(namespace: &str, service: &str, environment: &str) -> Result<Self, NamingError> {
        Self::build(namespace, StackKind::Service, Some(service), environment)
    }

    pub fn database(
        namespace: &str,
        service: &str,
        environment: &str,
    ) -> Result<Self, NamingError> {
        Self::build(namespace, StackKind::Database, Some(service), environment)
    }

    fn build(
        namespace: &str,
        kind: StackKind,
        service: Option<&str>,
        environment: &str,
    ) -> Result<Self, NamingError> {
        Ok(Self {
            kind,
            name: stack_name(namespace, kind, service, environment)?,
        })
    }

    pub fn kind(&self) -> StackKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name under which this stack exports `output_key`.
    pub fn export_name(&self, output_key: &str) -> String {
        export_name(&self.name, output_key)
    }
}

impl fmt::Display for StackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub fn stack_name(
    namespace: &str,
    kind: StackKind,
    service: Option<&str>,
    environment: &str,
) -> Result<String, NamingError> {
    let namespace = validate_segment("namespace", namespace)?;
    let environment = validate_segment("environment", environment)?;

    if kind.is_service_scoped() {
        let service = validate_segment("service", service.unwrap_or_default())?;
        Ok(format!(
            "{namespace}-{}-{service}-{environment}",
            kind.as_str()
        ))
    } else {
        Ok(format!("{namespace}-{}-{environment}", kind.as_str()))
    }
}

pub fn export_name(stack_name: &str, output_key: &str) -> String {
    format!("{stack_name}-{output_key}")
}

pub fn validate_segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, NamingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NamingError::Empty { field });
    }
    if !trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    {
        return Err(NamingError::InvalidCharacters {
            field,
            value: trimmed.to_string(),
        });
    }
    Ok(trimmed)
}
