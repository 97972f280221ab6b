use tracing::info;

use crate::adapters::stack::StackWaiter;
use crate::error::DeployError;
use crate::runtime::contract::{Stack, StackStatus};
use crate::runtime::naming::StackRef;
use crate::workflows::state::WorkflowState;

/// Waits for the environment and load-balancer stacks and records them on the
/// state. Both stacks are always awaited so the error names every missing one
/// the operator has to provision first.
pub async fn load_environment(
    state: &mut WorkflowState,
    waiter: &dyn StackWaiter,
) -> Result<(), DeployError> {
    let env_ref = state.stacks.environment.clone();
    let lb_ref = state.stacks.load_balancer.clone();

    let env_stack = waiter.await_final_status(env_ref.name()).await?;
    let lb_stack = waiter.await_final_status(lb_ref.name()).await?;

    let env_stack = require_stable(&env_ref, env_stack)?;
    let lb_stack = require_stable(&lb_ref, lb_stack)?;

    info!(
        component = "environment_loader",
        event = "environment_loaded",
        environment = %state.environment,
        env_stack = %env_stack.name,
        env_status = env_stack.status.as_str(),
        lb_stack = %lb_stack.name,
        lb_status = lb_stack.status.as_str(),
    );

    state.env_stack = Some(env_stack);
    state.lb_stack = Some(lb_stack);
    Ok(())
}

fn require_stable(stack_ref: &StackRef, stack: Option<Stack>) -> Result<Stack, DeployError> {
    match stack {
        None => Err(DeployError::not_initialized(stack_ref.name())),
        Some(stack)
            if matches!(stack.status, StackStatus::Failed | StackStatus::CreateFailed) =>
        {
            Err(DeployError::DependencyNotReady {
                stack: stack_ref.name().to_string(),
                reason: format!(
                    "stack is in status {}{}",
                    stack.status.as_str(),
                    stack
                        .status_reason
                        .as_deref()
                        .map(|reason| format!(" ({reason})"))
                        .unwrap_or_default()
                ),
            })
        }
        Some(stack) => Ok(stack),
    }
}
