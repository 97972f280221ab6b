use tracing::{debug, info};

use crate::adapters::params::ParamStore;
use crate::adapters::rules::RuleLister;
use crate::adapters::stack::StackWaiter;
use crate::error::DeployError;
use crate::runtime::contract::{
    OUTPUT_ELB_HTTPS_LISTENER_ARN, OUTPUT_ELB_HTTP_LISTENER_ARN, OUTPUT_VPC_ID,
    PARAM_ELB_HTTPS_LISTENER_ARN, PARAM_ELB_HTTP_LISTENER_ARN, PARAM_LISTENER_RULE_PRIORITY,
    PARAM_VPC_ID,
};
use crate::runtime::naming::export_name;
use crate::runtime::priority::{next_priority, PriorityDecision};
use crate::runtime::service::ServiceDescriptor;
use crate::workflows::priority::get_max_priority;
use crate::workflows::state::WorkflowState;

/// Fills in the parameters every service stack shares: network and listener
/// imports from the environment and load-balancer stacks, the listener-rule
/// priority, and parameter-store backed secrets.
///
/// Only the parameter map on `state` is written. The environment and
/// load-balancer stacks are read, never touched.
pub async fn apply_common_params(
    state: &mut WorkflowState,
    service: &ServiceDescriptor,
    waiter: &dyn StackWaiter,
    lister: &dyn RuleLister,
    store: &dyn ParamStore,
) -> Result<(), DeployError> {
    let env_stack = state.env_stack()?;
    let lb_stack = state.lb_stack()?;

    let vpc_id = export_name(&env_stack.name, OUTPUT_VPC_ID);
    let http_listener = export_name(&lb_stack.name, OUTPUT_ELB_HTTP_LISTENER_ARN);
    let https_listener = export_name(&lb_stack.name, OUTPUT_ELB_HTTPS_LISTENER_ARN);
    let lb_stack_name = lb_stack.name.clone();
    let listener_arn = lb_stack
        .output(OUTPUT_ELB_HTTP_LISTENER_ARN)
        .map(str::to_string);

    state.params.insert(PARAM_VPC_ID.to_string(), vpc_id);
    state
        .params
        .insert(PARAM_ELB_HTTP_LISTENER_ARN.to_string(), http_listener);
    state
        .params
        .insert(PARAM_ELB_HTTPS_LISTENER_ARN.to_string(), https_listener);

    let decision = match state.priority {
        Some(pinned) => PriorityDecision::Pinned(pinned),
        None => {
            let service_stack = waiter
                .await_final_status(state.stacks.service.name())
                .await?;
            // A stack whose first create failed is recreated from scratch, so
            // it needs a fresh priority like a first deploy.
            match service_stack.filter(|stack| !stack.status.requires_recreate()) {
                Some(_) => PriorityDecision::Unmanaged,
                None => {
                    let listener_arn = listener_arn.ok_or_else(|| {
                        DeployError::DependencyNotReady {
                            stack: lb_stack_name,
                            reason: format!("missing output {OUTPUT_ELB_HTTP_LISTENER_ARN}"),
                        }
                    })?;
                    let max = get_max_priority(lister, &listener_arn).await?;
                    PriorityDecision::Allocated(next_priority(max))
                }
            }
        }
    };
    info!(
        component = "parameter_resolver",
        event = "listener_priority_resolved",
        service = %state.service_name,
        decision = ?decision,
    );
    state.params.insert(
        PARAM_LISTENER_RULE_PRIORITY.to_string(),
        decision.parameter_value(),
    );

    // Barrier only: a co-deployed database must settle before the service
    // stack that may reference it is upserted.
    let database = waiter
        .await_final_status(state.stacks.database.name())
        .await?;
    debug!(
        component = "parameter_resolver",
        event = "database_settled",
        database_stack = %state.stacks.database,
        present = database.is_some(),
    );

    for (param, key) in &service.secrets {
        let value = store
            .get_param(key)
            .await
            .map_err(|source| DeployError::UpstreamQuery {
                operation: "get_param",
                target: key.clone(),
                source,
            })?;
        state.params.insert(param.clone(), value);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::adapters::memory::InMemoryCloud;
    use crate::error::QueryError;
    use crate::runtime::contract::{RoutingRule, Stack, StackStatus};
    use crate::runtime::naming::DEFAULT_NAMESPACE;
    use crate::workflows::waiter::{PollingStackWaiter, WaitPolicy};

    fn loaded_state(priority: u32) -> WorkflowState {
        let mut state = WorkflowState::new(DEFAULT_NAMESPACE, "dev", "myservice", priority)
            .expect("state should build");
        state.env_stack = Some(
            Stack::new("mu-environment-dev", StackStatus::CreateComplete)
                .with_output("ElbHttpListenerArn", "foo")
                .with_output("ElbHttpsListenerArn", "foo"),
        );
        state.lb_stack = Some(
            Stack::new("mu-loadbalancer-dev", StackStatus::CreateComplete)
                .with_output("ElbHttpListenerArn", "foo")
                .with_output("ElbHttpsListenerArn", "foo"),
        );
        state
    }

    fn cloud_with_rules() -> Arc<InMemoryCloud> {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.put_rules(
            "foo",
            vec![
                RoutingRule::with_priority("15"),
                RoutingRule::with_priority("5"),
                RoutingRule::with_priority("10"),
            ],
        );
        cloud
    }

    async fn resolve(
        cloud: &Arc<InMemoryCloud>,
        state: &mut WorkflowState,
        service: &ServiceDescriptor,
    ) -> Result<(), DeployError> {
        let waiter = PollingStackWaiter::new(cloud.clone(), WaitPolicy::default());
        apply_common_params(state, service, &waiter, cloud.as_ref(), cloud.as_ref()).await
    }

    #[tokio::test]
    async fn create_path_allocates_next_priority() {
        let cloud = cloud_with_rules();
        let mut state = loaded_state(0);

        resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect("resolver should pass");

        assert_eq!(state.params["VpcId"], "mu-environment-dev-VpcId");
        assert_eq!(
            state.params["ElbHttpListenerArn"],
            "mu-loadbalancer-dev-ElbHttpListenerArn"
        );
        assert_eq!(
            state.params["ElbHttpsListenerArn"],
            "mu-loadbalancer-dev-ElbHttpsListenerArn"
        );
        assert_eq!(state.params["ListenerRulePriority"], "16");
        assert_eq!(
            cloud.describe_calls(),
            vec![
                "mu-service-myservice-dev".to_string(),
                "mu-database-myservice-dev".to_string()
            ]
        );
        assert_eq!(cloud.list_calls(), vec!["foo".to_string()]);
    }

    #[tokio::test]
    async fn update_path_leaves_priority_unmanaged() {
        let cloud = cloud_with_rules();
        cloud.put_stack(Stack::new(
            "mu-service-myservice-dev",
            StackStatus::CreateComplete,
        ));
        let mut state = loaded_state(0);

        resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect("resolver should pass");

        assert_eq!(state.params["ListenerRulePriority"], "");
        assert_eq!(state.params["VpcId"], "mu-environment-dev-VpcId");
        assert_eq!(cloud.describe_calls().len(), 2);
        assert!(cloud.list_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_first_create_allocates_again() {
        let cloud = cloud_with_rules();
        cloud.put_stack(Stack::new(
            "mu-service-myservice-dev",
            StackStatus::CreateFailed,
        ));
        let mut state = loaded_state(0);

        resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect("resolver should pass");

        assert_eq!(state.params["ListenerRulePriority"], "16");
        assert_eq!(cloud.list_calls(), vec!["foo".to_string()]);
    }

    #[tokio::test]
    async fn pinned_priority_wins_over_allocation() {
        let cloud = cloud_with_rules();
        let mut state = loaded_state(77);

        resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect("resolver should pass");

        assert_eq!(state.params["ListenerRulePriority"], "77");
        assert_eq!(
            state.params["ElbHttpsListenerArn"],
            "mu-loadbalancer-dev-ElbHttpsListenerArn"
        );
        assert_eq!(
            cloud.describe_calls(),
            vec!["mu-database-myservice-dev".to_string()]
        );
    }

    #[tokio::test]
    async fn waits_for_database_without_consuming_outputs() {
        let cloud = cloud_with_rules();
        cloud.put_stack(
            Stack::new("mu-database-myservice-dev", StackStatus::CreateComplete)
                .with_output("DatabaseEndpointAddress", "db.internal"),
        );
        let mut state = loaded_state(0);

        resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect("resolver should pass");

        assert_eq!(cloud.describe_count("mu-database-myservice-dev"), 1);
        assert!(!state.params.contains_key("DatabaseEndpointAddress"));
        assert!(!state
            .params
            .values()
            .any(|value| value == "db.internal"));
    }

    #[tokio::test]
    async fn resolves_secrets_from_parameter_store() {
        let cloud = cloud_with_rules();
        cloud.put_param("mu-myservice-dev-ApiKey", "s3cr3t");
        let mut state = loaded_state(0);
        let service = ServiceDescriptor {
            secrets: BTreeMap::from([(
                "ApiKey".to_string(),
                "mu-myservice-dev-ApiKey".to_string(),
            )]),
            ..ServiceDescriptor::named("myservice")
        };

        resolve(&cloud, &mut state, &service)
            .await
            .expect("resolver should pass");

        assert_eq!(state.params["ApiKey"], "s3cr3t");
        assert_eq!(
            cloud.param_calls(),
            vec!["mu-myservice-dev-ApiKey".to_string()]
        );
    }

    #[tokio::test]
    async fn parameter_store_errors_propagate() {
        let cloud = cloud_with_rules();
        let mut state = loaded_state(0);
        let service = ServiceDescriptor {
            secrets: BTreeMap::from([("ApiKey".to_string(), "missing".to_string())]),
            ..ServiceDescriptor::named("myservice")
        };

        let error = resolve(&cloud, &mut state, &service)
            .await
            .expect_err("resolver should fail");
        assert_eq!(
            error,
            DeployError::UpstreamQuery {
                operation: "get_param",
                target: "missing".to_string(),
                source: QueryError::Fatal("parameter 'missing' not found".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn rule_listing_errors_propagate() {
        let cloud = cloud_with_rules();
        cloud.fail_rule_listing("foo", QueryError::Fatal("AccessDenied".to_string()));
        let mut state = loaded_state(0);

        let error = resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect_err("resolver should fail");
        assert!(matches!(
            error,
            DeployError::UpstreamQuery {
                operation: "list_rules",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn create_path_requires_listener_output() {
        let cloud = cloud_with_rules();
        let mut state = loaded_state(0);
        state.lb_stack = Some(Stack::new(
            "mu-loadbalancer-dev",
            StackStatus::CreateComplete,
        ));

        let error = resolve(&cloud, &mut state, &ServiceDescriptor::named("myservice"))
            .await
            .expect_err("resolver should fail");
        assert_eq!(
            error,
            DeployError::DependencyNotReady {
                stack: "mu-loadbalancer-dev".to_string(),
                reason: "missing output ElbHttpListenerArn".to_string(),
            }
        );
    }
}
