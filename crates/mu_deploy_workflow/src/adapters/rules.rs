use async_trait::async_trait;

use crate::error::QueryError;
use crate::runtime::contract::RoutingRule;

#[async_trait]
pub trait RuleLister: Send + Sync {
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<RoutingRule>, QueryError>;
}
