use async_trait::async_trait;

use crate::adapters::aws::query_error;
use crate::adapters::params::ParamStore;
use crate::error::QueryError;

#[derive(Debug, Clone)]
pub struct SsmParamStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParamStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParamStore for SsmParamStore {
    async fn get_param(&self, name: &str) -> Result<String, QueryError> {
        let output = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|error| query_error("failed to read parameter", &error))?;

        output
            .parameter()
            .and_then(|parameter| parameter.value())
            .map(str::to_string)
            .ok_or_else(|| QueryError::Fatal(format!("parameter '{name}' has no value")))
    }
}
