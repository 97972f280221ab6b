use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_cloudformation::types::{Capability, Parameter, Tag};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::adapters::aws::{error_message, query_error};
use crate::adapters::stack::{StackDescriber, StackUpserter};
use crate::error::{QueryError, UpsertError};
use crate::runtime::contract::{ParameterMap, Stack, StackStatus, UpsertRequest};

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";
const DEFAULT_DELETE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_DELETE_MAX_ATTEMPTS: u32 = 180;

/// What an upsert has to do given the stack's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    Create,
    Update,
    /// The stack exists but can never be updated; delete it, then create.
    Recreate,
}

pub fn upsert_mode(existing: Option<StackStatus>) -> UpsertMode {
    match existing {
        None => UpsertMode::Create,
        Some(status) if status.requires_recreate() => UpsertMode::Recreate,
        Some(_) => UpsertMode::Update,
    }
}

#[derive(Debug, Clone)]
pub struct CloudFormationStacks {
    client: aws_sdk_cloudformation::Client,
    template_base_url: String,
    delete_poll_interval: Duration,
    delete_max_attempts: u32,
}

impl CloudFormationStacks {
    pub fn new(client: aws_sdk_cloudformation::Client, template_base_url: impl Into<String>) -> Self {
        Self {
            client,
            template_base_url: template_base_url.into(),
            delete_poll_interval: DEFAULT_DELETE_POLL_INTERVAL,
            delete_max_attempts: DEFAULT_DELETE_MAX_ATTEMPTS,
        }
    }

    /// Polling used while a stack that failed its first create is torn down.
    pub fn with_delete_polling(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.delete_poll_interval = interval;
        self.delete_max_attempts = max_attempts.max(1);
        self
    }

    async fn delete_and_wait(&self, name: &str) -> Result<(), UpsertError> {
        warn!(
            component = "cloudformation",
            event = "stack_delete_submitted",
            stack = name,
            "stack failed its first create and cannot be updated",
        );
        self.client
            .delete_stack()
            .stack_name(name)
            .send()
            .await
            .map_err(|error| UpsertError::new(query_error("failed to delete stack", &error).to_string()))?;

        for attempt in 1..=self.delete_max_attempts {
            tokio::time::sleep(self.delete_poll_interval).await;
            match self.describe_stack(name).await {
                Ok(None) => return Ok(()),
                Ok(Some(stack)) if stack.status == StackStatus::Failed => {
                    return Err(UpsertError::new(format!(
                        "stack '{name}' could not be deleted: {}",
                        stack.status_reason.unwrap_or_default()
                    )));
                }
                Ok(Some(_)) => {}
                Err(error) if error.is_transient() => {
                    debug!(
                        component = "cloudformation",
                        event = "stack_delete_poll_retry",
                        stack = name,
                        attempt,
                        error = %error,
                    );
                }
                Err(error) => return Err(UpsertError::new(error.to_string())),
            }
        }

        Err(UpsertError::new(format!(
            "stack '{name}' was still deleting after {} polls",
            self.delete_max_attempts
        )))
    }

    fn template_url(&self, template: &str) -> String {
        format!(
            "{}/{}",
            self.template_base_url.trim_end_matches('/'),
            template.trim_start_matches('/')
        )
    }

    async fn create(&self, request: &UpsertRequest, tags: Vec<Tag>) -> Result<(), UpsertError> {
        info!(
            component = "cloudformation",
            event = "stack_create_submitted",
            stack = %request.stack_name,
            template = %request.template,
        );
        self.client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_url(self.template_url(&request.template))
            .set_parameters(Some(stack_parameters(&request.parameters, false)))
            .set_tags(Some(tags))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| UpsertError::new(query_error("failed to create stack", &error).to_string()))
    }

    async fn update(&self, request: &UpsertRequest, tags: Vec<Tag>) -> Result<(), UpsertError> {
        info!(
            component = "cloudformation",
            event = "stack_update_submitted",
            stack = %request.stack_name,
            template = %request.template,
        );
        let result = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .template_url(self.template_url(&request.template))
            .set_parameters(Some(stack_parameters(&request.parameters, true)))
            .set_tags(Some(tags))
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(error)
                if error_message(&error)
                    .map(|message| message.contains(NO_UPDATES_MESSAGE))
                    .unwrap_or(false) =>
            {
                debug!(
                    component = "cloudformation",
                    event = "stack_unchanged",
                    stack = %request.stack_name,
                );
                Ok(())
            }
            Err(error) => Err(UpsertError::new(
                query_error("failed to update stack", &error).to_string(),
            )),
        }
    }
}

#[async_trait]
impl StackDescriber for CloudFormationStacks {
    async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, QueryError> {
        let output = match self.client.describe_stacks().stack_name(name).send().await {
            Ok(value) => value,
            Err(error) => {
                let missing = error_message(&error)
                    .map(|message| message.contains("does not exist"))
                    .unwrap_or(false);
                if missing {
                    return Ok(None);
                }
                return Err(query_error("failed to describe stack", &error));
            }
        };

        Ok(output
            .stacks()
            .first()
            .map(|raw| convert_stack(name, raw)))
    }
}

#[async_trait]
impl StackUpserter for CloudFormationStacks {
    async fn upsert_stack(&self, request: &UpsertRequest) -> Result<(), UpsertError> {
        let tags = stack_tags(&request.tags)?;
        let existing = self
            .describe_stack(&request.stack_name)
            .await
            .map_err(|error| UpsertError::new(error.to_string()))?;

        match upsert_mode(existing.map(|stack| stack.status)) {
            UpsertMode::Create => self.create(request, tags).await,
            UpsertMode::Update => self.update(request, tags).await,
            UpsertMode::Recreate => {
                self.delete_and_wait(&request.stack_name).await?;
                self.create(request, tags).await
            }
        }
    }
}

fn convert_stack(name: &str, raw: &aws_sdk_cloudformation::types::Stack) -> Stack {
    let outputs = raw
        .outputs()
        .iter()
        .filter_map(|output| {
            Some((
                output.output_key()?.to_string(),
                output.output_value().unwrap_or_default().to_string(),
            ))
        })
        .collect::<BTreeMap<_, _>>();

    let last_updated = raw
        .last_updated_time()
        .and_then(|time| DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos()));

    Stack {
        name: name.to_string(),
        status: StackStatus::from_cloudformation(
            raw.stack_status().map(|status| status.as_str()).unwrap_or_default(),
        ),
        status_reason: raw.stack_status_reason().map(str::to_string),
        outputs,
        last_updated,
    }
}

/// An empty value means "leave as is": on update it keeps the previous value,
/// on create the parameter is omitted so the template default applies.
fn stack_parameters(parameters: &ParameterMap, is_update: bool) -> Vec<Parameter> {
    parameters
        .iter()
        .filter_map(|(key, value)| {
            if !value.is_empty() {
                Some(
                    Parameter::builder()
                        .parameter_key(key)
                        .parameter_value(value)
                        .build(),
                )
            } else if is_update {
                Some(
                    Parameter::builder()
                        .parameter_key(key)
                        .use_previous_value(true)
                        .build(),
                )
            } else {
                None
            }
        })
        .collect()
}

fn stack_tags(tags: &BTreeMap<String, String>) -> Result<Vec<Tag>, UpsertError> {
    tags.iter()
        .map(|(key, value)| {
            Ok(Tag::builder().key(key).value(value).build())
        })
        .collect()
}
