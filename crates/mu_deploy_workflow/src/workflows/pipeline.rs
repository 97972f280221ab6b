use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::adapters::params::ParamStore;
use crate::adapters::rules::RuleLister;
use crate::adapters::stack::{StackUpserter, StackWaiter};
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::runtime::contract::{ParameterMap, UpsertAction};
use crate::runtime::service::ServiceDescriptor;
use crate::workflows::deployer::{upsert_service, Provenance};
use crate::workflows::environment::load_environment;
use crate::workflows::params::apply_common_params;
use crate::workflows::state::{DeployPhase, WorkflowState};

/// One stage of a deployment run. Steps only communicate through the
/// [`WorkflowState`] they are handed.
#[async_trait]
pub trait WorkflowStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn phase(&self) -> DeployPhase;

    async fn run(&self, state: &mut WorkflowState) -> Result<(), DeployError>;
}

pub struct EnvironmentLoader {
    waiter: Arc<dyn StackWaiter>,
}

impl EnvironmentLoader {
    pub fn new(waiter: Arc<dyn StackWaiter>) -> Self {
        Self { waiter }
    }
}

#[async_trait]
impl WorkflowStep for EnvironmentLoader {
    fn name(&self) -> &'static str {
        "environment_loader"
    }

    fn phase(&self) -> DeployPhase {
        DeployPhase::Loading
    }

    async fn run(&self, state: &mut WorkflowState) -> Result<(), DeployError> {
        load_environment(state, self.waiter.as_ref()).await
    }
}

pub struct CommonParamsResolver {
    service: Arc<ServiceDescriptor>,
    waiter: Arc<dyn StackWaiter>,
    rule_lister: Arc<dyn RuleLister>,
    param_store: Arc<dyn ParamStore>,
}

impl CommonParamsResolver {
    pub fn new(
        service: Arc<ServiceDescriptor>,
        waiter: Arc<dyn StackWaiter>,
        rule_lister: Arc<dyn RuleLister>,
        param_store: Arc<dyn ParamStore>,
    ) -> Self {
        Self {
            service,
            waiter,
            rule_lister,
            param_store,
        }
    }
}

#[async_trait]
impl WorkflowStep for CommonParamsResolver {
    fn name(&self) -> &'static str {
        "common_params_resolver"
    }

    fn phase(&self) -> DeployPhase {
        DeployPhase::Resolving
    }

    async fn run(&self, state: &mut WorkflowState) -> Result<(), DeployError> {
        apply_common_params(
            state,
            &self.service,
            self.waiter.as_ref(),
            self.rule_lister.as_ref(),
            self.param_store.as_ref(),
        )
        .await
    }
}

pub struct ServiceUpserter {
    service: Arc<ServiceDescriptor>,
    provenance: Provenance,
    waiter: Arc<dyn StackWaiter>,
    upserter: Arc<dyn StackUpserter>,
}

impl ServiceUpserter {
    pub fn new(
        service: Arc<ServiceDescriptor>,
        provenance: Provenance,
        waiter: Arc<dyn StackWaiter>,
        upserter: Arc<dyn StackUpserter>,
    ) -> Self {
        Self {
            service,
            provenance,
            waiter,
            upserter,
        }
    }
}

#[async_trait]
impl WorkflowStep for ServiceUpserter {
    fn name(&self) -> &'static str {
        "service_upserter"
    }

    fn phase(&self) -> DeployPhase {
        DeployPhase::Upserting
    }

    async fn run(&self, state: &mut WorkflowState) -> Result<(), DeployError> {
        upsert_service(
            state,
            &self.service,
            &self.provenance,
            self.waiter.as_ref(),
            self.upserter.as_ref(),
        )
        .await
        .map(|_| ())
    }
}

/// Collaborators and settings shared by every deployment the caller starts.
#[derive(Clone)]
pub struct DeployContext {
    pub config: DeployConfig,
    pub service: ServiceDescriptor,
    pub waiter: Arc<dyn StackWaiter>,
    pub upserter: Arc<dyn StackUpserter>,
    pub rule_lister: Arc<dyn RuleLister>,
    pub param_store: Arc<dyn ParamStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub stack_name: String,
    pub environment: String,
    pub service: String,
    /// `None` when the step list never reached an upsert.
    pub action: Option<UpsertAction>,
    pub phase: DeployPhase,
    pub parameters: ParameterMap,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct ServiceDeployer {
    state: WorkflowState,
    steps: Vec<Box<dyn WorkflowStep>>,
    failed_step: Option<&'static str>,
}

/// Builds the deployment pipeline for `service_name` in `environment`:
/// environment loader, common parameter resolver, then service upsert.
pub fn new_service_deployer(
    context: &DeployContext,
    environment: &str,
    service_name: &str,
) -> Result<ServiceDeployer, DeployError> {
    let service = Arc::new(ServiceDescriptor {
        name: service_name.trim().to_string(),
        ..context.service.clone()
    });
    service.validate()?;

    let state = WorkflowState::new(
        &context.config.namespace,
        environment,
        service_name,
        service.priority,
    )?;

    let provenance = Provenance {
        revision: context.config.code_revision.clone(),
        repo: context.config.repo_name.clone(),
    };

    let steps: Vec<Box<dyn WorkflowStep>> = vec![
        Box::new(EnvironmentLoader::new(context.waiter.clone())),
        Box::new(CommonParamsResolver::new(
            service.clone(),
            context.waiter.clone(),
            context.rule_lister.clone(),
            context.param_store.clone(),
        )),
        Box::new(ServiceUpserter::new(
            service,
            provenance,
            context.waiter.clone(),
            context.upserter.clone(),
        )),
    ];

    Ok(ServiceDeployer::with_steps(state, steps))
}

impl ServiceDeployer {
    pub fn with_steps(state: WorkflowState, steps: Vec<Box<dyn WorkflowStep>>) -> Self {
        Self {
            state,
            steps,
            failed_step: None,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn phase(&self) -> DeployPhase {
        self.state.phase
    }

    pub fn failed_step(&self) -> Option<&'static str> {
        self.failed_step
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Runs every step in order and stops at the first failure. Errors are
    /// returned as the step produced them.
    pub async fn run(&mut self) -> Result<DeployReport, DeployError> {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            component = "service_deployer",
            event = "deploy_started",
            service = %self.state.service_name,
            environment = %self.state.environment,
            steps = self.steps.len(),
        );

        for step in &self.steps {
            self.state.phase = step.phase();
            if let Err(error) = step.run(&mut self.state).await {
                self.state.phase = DeployPhase::Failed;
                self.failed_step = Some(step.name());
                error!(
                    component = "service_deployer",
                    event = "deploy_failed",
                    service = %self.state.service_name,
                    environment = %self.state.environment,
                    step = step.name(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                );
                return Err(error);
            }
        }

        self.state.phase = DeployPhase::Done;
        info!(
            component = "service_deployer",
            event = "deploy_completed",
            service = %self.state.service_name,
            environment = %self.state.environment,
            action = ?self.state.upsert_action,
            duration_ms = started.elapsed().as_millis() as u64,
        );

        Ok(DeployReport {
            stack_name: self.state.stacks.service.name().to_string(),
            environment: self.state.environment.clone(),
            service: self.state.service_name.clone(),
            action: self.state.upsert_action,
            phase: self.state.phase,
            parameters: self.state.params.clone(),
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::adapters::memory::InMemoryCloud;
    use crate::runtime::naming::DEFAULT_NAMESPACE;
    use crate::workflows::waiter::PollingStackWaiter;

    struct RecordingStep {
        name: &'static str,
        phase: DeployPhase,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl WorkflowStep for RecordingStep {
        fn name(&self) -> &'static str {
            self.name
        }

        fn phase(&self) -> DeployPhase {
            self.phase
        }

        async fn run(&self, state: &mut WorkflowState) -> Result<(), DeployError> {
            self.log.lock().expect("poisoned mutex").push(self.name);
            assert_eq!(state.phase, self.phase);
            if self.fail {
                return Err(DeployError::not_initialized("mu-environment-dev"));
            }
            state.params.insert(self.name.to_string(), "ran".to_string());
            Ok(())
        }
    }

    fn step(
        name: &'static str,
        phase: DeployPhase,
        fail: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn WorkflowStep> {
        Box::new(RecordingStep {
            name,
            phase,
            fail,
            log: log.clone(),
        })
    }

    fn state() -> WorkflowState {
        WorkflowState::new(DEFAULT_NAMESPACE, "dev", "foo", 0).expect("state should build")
    }

    #[tokio::test]
    async fn runs_steps_in_order_and_finishes_done() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut deployer = ServiceDeployer::with_steps(
            state(),
            vec![
                step("load", DeployPhase::Loading, false, &log),
                step("resolve", DeployPhase::Resolving, false, &log),
                step("upsert", DeployPhase::Upserting, false, &log),
            ],
        );

        let report = deployer.run().await.expect("run should pass");

        assert_eq!(*log.lock().expect("poisoned mutex"), vec!["load", "resolve", "upsert"]);
        assert_eq!(report.phase, DeployPhase::Done);
        assert_eq!(report.stack_name, "mu-service-foo-dev");
        assert_eq!(report.parameters.len(), 3);
        assert_eq!(report.action, None);
        assert_eq!(deployer.failed_step(), None);
    }

    #[tokio::test]
    async fn short_circuits_on_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut deployer = ServiceDeployer::with_steps(
            state(),
            vec![
                step("load", DeployPhase::Loading, true, &log),
                step("resolve", DeployPhase::Resolving, false, &log),
                step("upsert", DeployPhase::Upserting, false, &log),
            ],
        );

        let error = deployer.run().await.expect_err("run should fail");

        assert_eq!(error, DeployError::not_initialized("mu-environment-dev"));
        assert_eq!(*log.lock().expect("poisoned mutex"), vec!["load"]);
        assert_eq!(deployer.phase(), DeployPhase::Failed);
        assert_eq!(deployer.failed_step(), Some("load"));
        assert!(deployer.state().params.is_empty());
    }

    #[test]
    fn builds_fixed_pipeline() {
        let cloud = Arc::new(InMemoryCloud::new());
        let context = DeployContext {
            config: DeployConfig::default(),
            service: ServiceDescriptor::default(),
            waiter: Arc::new(PollingStackWaiter::new(
                cloud.clone(),
                DeployConfig::default().wait,
            )),
            upserter: cloud.clone(),
            rule_lister: cloud.clone(),
            param_store: cloud,
        };

        let deployer = new_service_deployer(&context, "dev", "foo").expect("should build");

        assert_eq!(
            deployer.step_names(),
            vec![
                "environment_loader",
                "common_params_resolver",
                "service_upserter"
            ]
        );
        assert_eq!(deployer.phase(), DeployPhase::Loading);
        assert_eq!(deployer.state().service_name, "foo");
    }

    #[test]
    fn rejects_invalid_names_before_running() {
        let cloud = Arc::new(InMemoryCloud::new());
        let context = DeployContext {
            config: DeployConfig::default(),
            service: ServiceDescriptor::default(),
            waiter: Arc::new(PollingStackWaiter::new(
                cloud.clone(),
                DeployConfig::default().wait,
            )),
            upserter: cloud.clone(),
            rule_lister: cloud.clone(),
            param_store: cloud.clone(),
        };

        let error = new_service_deployer(&context, "", "foo")
            .err()
            .expect("empty environment should fail");
        assert_eq!(error.to_string(), "environment cannot be empty");
        assert!(cloud.describe_calls().is_empty());
    }
}
