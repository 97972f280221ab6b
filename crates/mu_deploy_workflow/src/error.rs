use thiserror::Error;

use crate::runtime::naming::NamingError;
use crate::runtime::service::DescriptorError;

/// Failure reported by a read-only collaborator (stack describe, rule
/// listing, parameter lookup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

impl QueryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpsertError {
    pub message: String,
}

impl UpsertError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("stack '{stack}' is not ready: {reason}")]
    DependencyNotReady { stack: String, reason: String },

    #[error("stack '{stack}' did not reach a final status after {attempts} polls")]
    PollTimeout { stack: String, attempts: u32 },

    #[error("waiting on stack '{stack}' was cancelled")]
    Cancelled { stack: String },

    #[error("{operation} failed for '{target}': {source}")]
    UpstreamQuery {
        operation: &'static str,
        target: String,
        #[source]
        source: QueryError,
    },

    #[error("stack service rejected upsert of '{stack}': {source}")]
    UpsertRejected {
        stack: String,
        #[source]
        source: UpsertError,
    },

    #[error("environment '{environment}' uses unsupported provider '{provider}'")]
    UnsupportedProvider {
        environment: String,
        provider: String,
    },

    #[error(transparent)]
    InvalidInput(#[from] DescriptorError),
}

impl From<NamingError> for DeployError {
    fn from(error: NamingError) -> Self {
        Self::InvalidInput(DescriptorError::Naming(error))
    }
}

impl DeployError {
    pub(crate) fn not_initialized(stack: impl Into<String>) -> Self {
        Self::DependencyNotReady {
            stack: stack.into(),
            reason: "environment not initialized".to_string(),
        }
    }
}
