//! Domain entities
//!
//! Immutable value types produced by the adapters. Nothing here talks to
//! the network.

use super::routes::RouteDescriptor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identity and timestamps of a record-backed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub guid: Uuid,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
    Unknown,
}

impl AppState {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("STARTED") => Self::Started,
            Some("STOPPED") => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub meta: Option<Meta>,
    pub name: String,
    pub state: AppState,
    pub lifecycle: Option<String>,
    pub stack: Option<String>,
    pub buildpacks: Vec<String>,
    pub space_guid: Option<Uuid>,
    /// Values below come from the `web` process when one exists
    pub instances: Option<u64>,
    pub memory_mb: Option<u64>,
    pub disk_quota_mb: Option<u64>,
    pub command: Option<String>,
    pub health_check_type: Option<String>,
}

impl Application {
    pub fn guid(&self) -> Option<Uuid> {
        self.meta.as_ref().map(|m| m.guid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
    pub meta: Option<Meta>,
    pub name: String,
    pub internal: bool,
    /// Shared domains have no owning organization
    pub shared: bool,
    pub owning_organization_guid: Option<Uuid>,
    pub router_group_guid: Option<Uuid>,
    pub protocols: Vec<String>,
}

impl Domain {
    pub fn guid(&self) -> Option<Uuid> {
        self.meta.as_ref().map(|m| m.guid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub meta: Option<Meta>,
    pub descriptor: RouteDescriptor,
    pub domain_guid: Option<Uuid>,
    pub space_guid: Option<Uuid>,
    pub url: Option<String>,
    /// Applications the route currently sends traffic to
    pub app_guids: Vec<Uuid>,
}

impl Route {
    pub fn guid(&self) -> Option<Uuid> {
        self.meta.as_ref().map(|m| m.guid)
    }

    pub fn describes_the_same_uri(&self, other: &RouteDescriptor) -> bool {
        self.descriptor.describes_the_same_uri(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastOperation {
    pub operation_type: Option<String>,
    pub state: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServiceInstanceKind {
    Managed {
        offering: String,
        plan: String,
        offering_description: Option<String>,
        broker_guid: Option<Uuid>,
    },
    UserProvided {
        syslog_drain_url: Option<String>,
        route_service_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInstance {
    pub meta: Option<Meta>,
    pub name: String,
    pub kind: ServiceInstanceKind,
    pub tags: Vec<String>,
    pub space_guid: Option<Uuid>,
    pub dashboard_url: Option<String>,
    pub last_operation: Option<LastOperation>,
}

impl ServiceInstance {
    pub fn guid(&self) -> Option<Uuid> {
        self.meta.as_ref().map(|m| m.guid)
    }

    pub fn is_user_provided(&self) -> bool {
        matches!(self.kind, ServiceInstanceKind::UserProvided { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceBinding {
    pub meta: Option<Meta>,
    pub name: Option<String>,
    /// `app` or `key`
    pub binding_type: String,
    pub app_guid: Option<Uuid>,
    pub service_instance_guid: Option<Uuid>,
    pub last_operation: Option<LastOperation>,
}

/// Binding parameters as returned by the broker.
pub type BindingParameters = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Canceling,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskState {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("PENDING") => Self::Pending,
            Some("RUNNING") => Self::Running,
            Some("CANCELING") => Self::Canceling,
            Some("SUCCEEDED") => Self::Succeeded,
            Some("FAILED") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub meta: Option<Meta>,
    pub name: String,
    pub command: Option<String>,
    pub state: TaskState,
    pub sequence_id: Option<u64>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
    pub failure_reason: Option<String>,
    pub app_guid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stack {
    pub meta: Option<Meta>,
    pub name: String,
    pub description: Option<String>,
}

impl Stack {
    pub fn guid(&self) -> Option<Uuid> {
        self.meta.as_ref().map(|m| m.guid)
    }
}
