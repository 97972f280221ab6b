use async_trait::async_trait;

use crate::error::QueryError;

#[async_trait]
pub trait ParamStore: Send + Sync {
    async fn get_param(&self, name: &str) -> Result<String, QueryError>;
}
