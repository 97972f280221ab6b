use tracing::debug;

use crate::adapters::rules::RuleLister;
use crate::error::DeployError;
use crate::runtime::priority::max_rule_priority;

/// Highest rule priority on the listener, 0 when it has no numbered rules.
///
/// Two deployments allocating against the same listener at the same time can
/// both observe the same maximum. Nothing here serializes them.
pub async fn get_max_priority(
    lister: &dyn RuleLister,
    listener_arn: &str,
) -> Result<u32, DeployError> {
    let rules = lister
        .list_rules(listener_arn)
        .await
        .map_err(|source| DeployError::UpstreamQuery {
            operation: "list_rules",
            target: listener_arn.to_string(),
            source,
        })?;

    let max = max_rule_priority(&rules);
    debug!(
        component = "priority_allocator",
        event = "listener_scanned",
        listener_arn,
        rules = rules.len(),
        max_priority = max,
    );
    Ok(max)
}
