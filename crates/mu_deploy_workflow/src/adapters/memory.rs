//! In-memory stand-in for the stack service, listener-rule catalog and
//! parameter store. Every call is recorded so callers can assert on the
//! exact sequence of lookups a workflow performed.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::adapters::params::ParamStore;
use crate::adapters::rules::RuleLister;
use crate::adapters::stack::{StackDescriber, StackUpserter};
use crate::error::{QueryError, UpsertError};
use crate::runtime::contract::{RoutingRule, Stack, StackStatus, UpsertRequest};

#[derive(Debug, Default)]
struct CloudState {
    stacks: BTreeMap<String, Stack>,
    rules: BTreeMap<String, Vec<RoutingRule>>,
    params: BTreeMap<String, String>,
    rule_failures: BTreeMap<String, QueryError>,
    upsert_rejection: Option<String>,
    describe_calls: Vec<String>,
    list_calls: Vec<String>,
    param_calls: Vec<String>,
    upserts: Vec<UpsertRequest>,
    deleted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_stack(&self, stack: Stack) {
        self.lock().stacks.insert(stack.name.clone(), stack);
    }

    pub fn put_rules(&self, listener_arn: &str, rules: Vec<RoutingRule>) {
        self.lock().rules.insert(listener_arn.to_string(), rules);
    }

    pub fn put_param(&self, name: &str, value: &str) {
        self.lock()
            .params
            .insert(name.to_string(), value.to_string());
    }

    pub fn fail_rule_listing(&self, listener_arn: &str, error: QueryError) {
        self.lock()
            .rule_failures
            .insert(listener_arn.to_string(), error);
    }

    pub fn reject_upserts(&self, message: &str) {
        self.lock().upsert_rejection = Some(message.to_string());
    }

    pub fn stack(&self, name: &str) -> Option<Stack> {
        self.lock().stacks.get(name).cloned()
    }

    pub fn describe_calls(&self) -> Vec<String> {
        self.lock().describe_calls.clone()
    }

    pub fn describe_count(&self, name: &str) -> usize {
        self.lock()
            .describe_calls
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    pub fn list_calls(&self) -> Vec<String> {
        self.lock().list_calls.clone()
    }

    pub fn param_calls(&self) -> Vec<String> {
        self.lock().param_calls.clone()
    }

    pub fn upserts(&self) -> Vec<UpsertRequest> {
        self.lock().upserts.clone()
    }

    /// Stacks torn down before being created again.
    pub fn deleted_stacks(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }
}

#[async_trait]
impl StackDescriber for InMemoryCloud {
    async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, QueryError> {
        let mut state = self.lock();
        state.describe_calls.push(name.to_string());
        Ok(state.stacks.get(name).cloned())
    }
}

#[async_trait]
impl StackUpserter for InMemoryCloud {
    async fn upsert_stack(&self, request: &UpsertRequest) -> Result<(), UpsertError> {
        let mut state = self.lock();
        if let Some(message) = state.upsert_rejection.clone() {
            return Err(UpsertError::new(message));
        }
        state.upserts.push(request.clone());

        let stuck = state
            .stacks
            .get(&request.stack_name)
            .map(|stack| stack.status.requires_recreate())
            .unwrap_or(false);
        if stuck {
            state.stacks.remove(&request.stack_name);
            state.deleted.push(request.stack_name.clone());
        }

        let status = if state.stacks.contains_key(&request.stack_name) {
            StackStatus::UpdateComplete
        } else {
            StackStatus::CreateComplete
        };
        let stack = state
            .stacks
            .entry(request.stack_name.clone())
            .or_insert_with(|| Stack::new(request.stack_name.clone(), status));
        stack.status = status;
        Ok(())
    }
}

#[async_trait]
impl RuleLister for InMemoryCloud {
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<RoutingRule>, QueryError> {
        let mut state = self.lock();
        state.list_calls.push(listener_arn.to_string());
        if let Some(error) = state.rule_failures.get(listener_arn) {
            return Err(error.clone());
        }
        Ok(state.rules.get(listener_arn).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ParamStore for InMemoryCloud {
    async fn get_param(&self, name: &str) -> Result<String, QueryError> {
        let mut state = self.lock();
        state.param_calls.push(name.to_string());
        state
            .params
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::Fatal(format!("parameter '{name}' not found")))
    }
}
