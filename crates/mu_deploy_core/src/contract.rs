use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PARAM_VPC_ID: &str = "VpcId";
pub const PARAM_ELB_HTTP_LISTENER_ARN: &str = "ElbHttpListenerArn";
pub const PARAM_ELB_HTTPS_LISTENER_ARN: &str = "ElbHttpsListenerArn";
pub const PARAM_LISTENER_RULE_PRIORITY: &str = "ListenerRulePriority";
pub const PARAM_SERVICE_NAME: &str = "ServiceName";
pub const PARAM_IMAGE_URL: &str = "ImageUrl";
pub const PARAM_SERVICE_PORT: &str = "ServicePort";
pub const PARAM_SERVICE_HEALTH_CHECK_PATH: &str = "ServiceHealthCheckPath";
pub const PARAM_SERVICE_DESIRED_COUNT: &str = "ServiceDesiredCount";
pub const PARAM_SERVICE_CPU: &str = "ServiceCpu";
pub const PARAM_SERVICE_MEMORY: &str = "ServiceMemory";
pub const PARAM_PATH_PATTERN: &str = "PathPattern";
pub const PARAM_ECS_CLUSTER: &str = "EcsCluster";

pub const OUTPUT_VPC_ID: &str = "VpcId";
pub const OUTPUT_ELB_HTTP_LISTENER_ARN: &str = "ElbHttpListenerArn";
pub const OUTPUT_ELB_HTTPS_LISTENER_ARN: &str = "ElbHttpsListenerArn";
pub const OUTPUT_ECS_CLUSTER: &str = "EcsCluster";
pub const OUTPUT_PROVIDER: &str = "provider";

/// Parameter name to value, submitted verbatim to the stack upsert.
pub type ParameterMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    Pending,
    CreateInProgress,
    CreateComplete,
    UpdateInProgress,
    UpdateComplete,
    /// An update rolled back; the previous revision is still serving.
    RollbackComplete,
    /// The first create failed or rolled back. The stack holds no usable
    /// resources and can only be deleted.
    CreateFailed,
    Failed,
}

impl StackStatus {
    /// Maps a raw CloudFormation status string onto the status vocabulary.
    pub fn from_cloudformation(raw: &str) -> Self {
        match raw {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => {
                Self::UpdateInProgress
            }
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "UPDATE_ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "ROLLBACK_COMPLETE" | "ROLLBACK_FAILED" | "CREATE_FAILED" => Self::CreateFailed,
            other if other.ends_with("_FAILED") => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CreateComplete
                | Self::UpdateComplete
                | Self::RollbackComplete
                | Self::CreateFailed
                | Self::Failed
        )
    }

    pub fn is_successful(self) -> bool {
        matches!(self, Self::CreateComplete | Self::UpdateComplete)
    }

    /// True when the stack cannot be updated and has to be deleted before it
    /// is created again.
    pub fn requires_recreate(self) -> bool {
        self == Self::CreateFailed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::CreateInProgress => "create_in_progress",
            Self::CreateComplete => "create_complete",
            Self::UpdateInProgress => "update_in_progress",
            Self::UpdateComplete => "update_complete",
            Self::RollbackComplete => "rollback_complete",
            Self::CreateFailed => "create_failed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub status: StackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Stack {
    pub fn new(name: impl Into<String>, status: StackStatus) -> Self {
        Self {
            name: name.into(),
            status,
            status_reason: None,
            outputs: BTreeMap::new(),
            last_updated: None,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority: Option<String>,
}

impl RoutingRule {
    pub fn with_priority(priority: impl Into<String>) -> Self {
        Self {
            priority: Some(priority.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ecs,
    Ec2,
}

impl Provider {
    /// Resolves the provider advertised by an environment stack's `provider`
    /// output. Stacks created before the output existed are ECS environments.
    pub fn from_output(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") => Some(Self::Ecs),
            Some(raw) if raw.eq_ignore_ascii_case("ecs") => Some(Self::Ecs),
            Some(raw) if raw.eq_ignore_ascii_case("ec2") => Some(Self::Ec2),
            Some(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ecs => "ecs",
            Self::Ec2 => "ec2",
        }
    }

    pub fn service_template(self) -> &'static str {
        match self {
            Self::Ecs => "service-ecs.yml",
            Self::Ec2 => "service-ec2.yml",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTags {
    pub service: String,
    pub environment: String,
    pub provider: Provider,
    pub revision: Option<String>,
    pub repo: Option<String>,
}

impl DeployTags {
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::from([
            ("mu:service".to_string(), self.service.clone()),
            ("mu:environment".to_string(), self.environment.clone()),
            ("mu:type".to_string(), "service".to_string()),
            ("mu:provider".to_string(), self.provider.as_str().to_string()),
        ]);
        if let Some(revision) = self.revision.as_ref().filter(|value| !value.is_empty()) {
            tags.insert("mu:revision".to_string(), revision.clone());
        }
        if let Some(repo) = self.repo.as_ref().filter(|value| !value.is_empty()) {
            tags.insert("mu:repo".to_string(), repo.clone());
        }
        tags
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertRequest {
    pub stack_name: String,
    pub template: String,
    pub parameters: ParameterMap,
    pub tags: BTreeMap<String, String>,
}
