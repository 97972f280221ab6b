use serde::Serialize;

use crate::error::DeployError;
use crate::runtime::contract::{ParameterMap, Stack, UpsertAction};
use crate::runtime::naming::StackRef;
use crate::runtime::priority::priority_override;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Loading,
    Resolving,
    Upserting,
    Done,
    Failed,
}

impl DeployPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Resolving => "resolving",
            Self::Upserting => "upserting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Names of every stack one deployment reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStacks {
    pub environment: StackRef,
    pub load_balancer: StackRef,
    pub service: StackRef,
    pub database: StackRef,
}

impl DeployStacks {
    pub fn resolve(
        namespace: &str,
        environment: &str,
        service_name: &str,
    ) -> Result<Self, DeployError> {
        Ok(Self {
            environment: StackRef::environment(namespace, environment)?,
            load_balancer: StackRef::load_balancer(namespace, environment)?,
            service: StackRef::service(namespace, service_name, environment)?,
            database: StackRef::database(namespace, service_name, environment)?,
        })
    }
}

/// Per-run state handed from step to step. Never shared between runs.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    pub environment: String,
    pub service_name: String,
    pub priority: Option<u32>,
    pub stacks: DeployStacks,
    pub env_stack: Option<Stack>,
    pub lb_stack: Option<Stack>,
    pub params: ParameterMap,
    pub upsert_action: Option<UpsertAction>,
    pub phase: DeployPhase,
}

impl WorkflowState {
    /// `priority` of 0 leaves the listener-rule priority to the allocator.
    pub fn new(
        namespace: &str,
        environment: &str,
        service_name: &str,
        priority: u32,
    ) -> Result<Self, DeployError> {
        let stacks = DeployStacks::resolve(namespace, environment, service_name)?;
        Ok(Self {
            environment: environment.trim().to_string(),
            service_name: service_name.trim().to_string(),
            priority: priority_override(priority),
            stacks,
            env_stack: None,
            lb_stack: None,
            params: ParameterMap::new(),
            upsert_action: None,
            phase: DeployPhase::Loading,
        })
    }

    pub fn env_stack(&self) -> Result<&Stack, DeployError> {
        self.env_stack
            .as_ref()
            .ok_or_else(|| DeployError::not_initialized(self.stacks.environment.name()))
    }

    pub fn lb_stack(&self) -> Result<&Stack, DeployError> {
        self.lb_stack
            .as_ref()
            .ok_or_else(|| DeployError::not_initialized(self.stacks.load_balancer.name()))
    }
}
