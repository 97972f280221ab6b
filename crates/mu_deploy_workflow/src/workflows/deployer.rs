use tracing::{info, warn};

use crate::adapters::stack::{StackUpserter, StackWaiter};
use crate::error::DeployError;
use crate::runtime::contract::{
    DeployTags, ParameterMap, Provider, UpsertAction, UpsertRequest, OUTPUT_ECS_CLUSTER,
    OUTPUT_PROVIDER, PARAM_ECS_CLUSTER, PARAM_IMAGE_URL, PARAM_PATH_PATTERN, PARAM_SERVICE_CPU,
    PARAM_SERVICE_DESIRED_COUNT, PARAM_SERVICE_HEALTH_CHECK_PATH, PARAM_SERVICE_MEMORY,
    PARAM_SERVICE_NAME, PARAM_SERVICE_PORT,
};
use crate::runtime::naming::export_name;
use crate::runtime::service::ServiceDescriptor;
use crate::workflows::state::WorkflowState;

/// Source-control metadata stamped onto the service stack as tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub revision: Option<String>,
    pub repo: Option<String>,
}

/// Submits the service stack with the fully resolved parameter map.
///
/// The service stack is awaited once first so an in-flight update finishes
/// before the next one is submitted, and so the run knows whether this is a
/// create or an update.
pub async fn upsert_service(
    state: &mut WorkflowState,
    service: &ServiceDescriptor,
    provenance: &Provenance,
    waiter: &dyn StackWaiter,
    upserter: &dyn StackUpserter,
) -> Result<UpsertAction, DeployError> {
    let env_stack = state.env_stack()?;
    let env_stack_name = env_stack.name.clone();
    let raw_provider = env_stack.output(OUTPUT_PROVIDER).map(str::to_string);
    let provider = Provider::from_output(raw_provider.as_deref()).ok_or_else(|| {
        DeployError::UnsupportedProvider {
            environment: state.environment.clone(),
            provider: raw_provider.clone().unwrap_or_default(),
        }
    })?;

    let stack_name = state.stacks.service.name().to_string();
    let existing = waiter.await_final_status(&stack_name).await?;
    let action = match &existing {
        Some(stack) if stack.status.requires_recreate() => {
            warn!(
                component = "service_deployer",
                event = "recreating_failed_stack",
                stack = %stack_name,
                status = stack.status.as_str(),
            );
            UpsertAction::Create
        }
        Some(stack) => {
            if !stack.status.is_successful() {
                warn!(
                    component = "service_deployer",
                    event = "updating_unhealthy_stack",
                    stack = %stack_name,
                    status = stack.status.as_str(),
                );
            }
            UpsertAction::Update
        }
        None => UpsertAction::Create,
    };

    apply_service_params(
        &mut state.params,
        &state.service_name,
        service,
        provider,
        &env_stack_name,
    );

    let tags = DeployTags {
        service: state.service_name.clone(),
        environment: state.environment.clone(),
        provider,
        revision: provenance.revision.clone(),
        repo: provenance.repo.clone(),
    };
    let request = UpsertRequest {
        stack_name: stack_name.clone(),
        template: provider.service_template().to_string(),
        parameters: state.params.clone(),
        tags: tags.to_map(),
    };

    info!(
        component = "service_deployer",
        event = "service_upsert_started",
        stack = %stack_name,
        action = ?action,
        provider = provider.as_str(),
        image = %service.image_url,
        parameters = request.parameters.len(),
    );

    upserter
        .upsert_stack(&request)
        .await
        .map_err(|source| DeployError::UpsertRejected {
            stack: stack_name.clone(),
            source,
        })?;

    state.upsert_action = Some(action);
    Ok(action)
}

fn apply_service_params(
    params: &mut ParameterMap,
    service_name: &str,
    service: &ServiceDescriptor,
    provider: Provider,
    env_stack_name: &str,
) {
    let mut set = |key: &str, value: String| {
        params.insert(key.to_string(), value);
    };

    set(PARAM_SERVICE_NAME, service_name.to_string());
    set(PARAM_IMAGE_URL, service.image_url.clone());
    set(PARAM_SERVICE_PORT, service.port.to_string());
    set(
        PARAM_SERVICE_HEALTH_CHECK_PATH,
        service.health_check_path.clone(),
    );
    set(PARAM_SERVICE_DESIRED_COUNT, service.desired_count.to_string());
    set(PARAM_SERVICE_CPU, service.cpu.to_string());
    set(PARAM_SERVICE_MEMORY, service.memory.to_string());
    set(PARAM_PATH_PATTERN, service.path_pattern_parameter());

    if provider == Provider::Ecs {
        set(
            PARAM_ECS_CLUSTER,
            export_name(env_stack_name, OUTPUT_ECS_CLUSTER),
        );
    }
}
