use async_trait::async_trait;

use crate::adapters::aws::query_error;
use crate::adapters::rules::RuleLister;
use crate::error::QueryError;
use crate::runtime::contract::RoutingRule;

#[derive(Debug, Clone)]
pub struct ElbRuleLister {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl ElbRuleLister {
    pub fn new(client: aws_sdk_elasticloadbalancingv2::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RuleLister for ElbRuleLister {
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<RoutingRule>, QueryError> {
        let mut rules = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_rules()
                .listener_arn(listener_arn)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|error| query_error("failed to describe listener rules", &error))?;

            rules.extend(output.rules().iter().map(|rule| RoutingRule {
                priority: rule.priority().map(str::to_string),
            }));

            match output.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(rules)
    }
}
