use async_trait::async_trait;

use crate::error::{DeployError, QueryError, UpsertError};
use crate::runtime::contract::{Stack, UpsertRequest};

#[async_trait]
pub trait StackDescriber: Send + Sync {
    /// `Ok(None)` when the stack service reports no such stack.
    async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, QueryError>;
}

#[async_trait]
pub trait StackWaiter: Send + Sync {
    async fn await_final_status(&self, name: &str) -> Result<Option<Stack>, DeployError>;
}

#[async_trait]
pub trait StackUpserter: Send + Sync {
    async fn upsert_stack(&self, request: &UpsertRequest) -> Result<(), UpsertError>;
}
