//! Record adapters
//!
//! An adapter wraps a raw record, plus any auxiliary records already fetched
//! for it, and derives one domain entity. Deriving is a pure function of the
//! wrapped records: no I/O, and the same records always give an equal
//! entity. Sequencing the auxiliary fetches is the aggregator's job.

use super::model::{
    AppState, Application, Domain, LastOperation, Meta, Route, ServiceBinding, ServiceInstance,
    ServiceInstanceKind, Stack, Task, TaskState,
};
use super::routes::RouteDescriptor;
use crate::cf::provider::RawRecord;
use crate::error::{CfError, CfResult};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A record (or records) that can be turned into a domain entity.
pub trait Derivable {
    type Output;

    fn derive(&self) -> CfResult<Self::Output>;
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> CfError {
    CfError::MalformedRecord {
        kind,
        reason: reason.into(),
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => {
            tracing::debug!("Ignoring unparseable timestamp '{}'", value);
            None
        },
    }
}

fn parse_guid(kind: &'static str, value: &str) -> CfResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| malformed(kind, format!("invalid guid '{}'", value)))
}

/// Absent GUIDs are fine; present but unparseable ones are not.
fn optional_guid(kind: &'static str, value: Option<&str>) -> CfResult<Option<Uuid>> {
    value.map(|v| parse_guid(kind, v)).transpose()
}

/// Metadata block; `None` for records without a guid.
fn meta(kind: &'static str, record: &RawRecord) -> CfResult<Option<Meta>> {
    let Some(guid) = record.guid.as_deref() else {
        return Ok(None);
    };
    Ok(Some(Meta {
        guid: parse_guid(kind, guid)?,
        created: parse_timestamp(record.created_at.as_deref()),
        updated: parse_timestamp(record.updated_at.as_deref()),
    }))
}

fn required_str(kind: &'static str, record: &RawRecord, field: &str) -> CfResult<String> {
    record
        .str_field(field)
        .map(str::to_string)
        .ok_or_else(|| malformed(kind, format!("missing '{}'", field)))
}

fn optional_str(record: &RawRecord, field: &str) -> Option<String> {
    record
        .str_field(field)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn last_operation(record: &RawRecord) -> Option<LastOperation> {
    record.field("last_operation")?;
    Some(LastOperation {
        operation_type: optional_str(record, "last_operation.type"),
        state: optional_str(record, "last_operation.state"),
        description: optional_str(record, "last_operation.description"),
    })
}

/// V3 app plus its `web` process, when it has one.
#[derive(Debug, Clone)]
pub struct ApplicationAdapter {
    app: RawRecord,
    web_process: Option<RawRecord>,
}

impl ApplicationAdapter {
    pub fn new(app: RawRecord, web_process: Option<RawRecord>) -> Self {
        Self { app, web_process }
    }
}

impl Derivable for ApplicationAdapter {
    type Output = Application;

    fn derive(&self) -> CfResult<Application> {
        const KIND: &str = "application";
        let app = &self.app;
        let process = self.web_process.as_ref();

        Ok(Application {
            meta: meta(KIND, app)?,
            name: required_str(KIND, app, "name")?,
            state: AppState::parse(app.str_field("state")),
            lifecycle: optional_str(app, "lifecycle.type"),
            stack: optional_str(app, "lifecycle.data.stack"),
            buildpacks: app.str_list("lifecycle.data.buildpacks"),
            space_guid: optional_guid(KIND, app.relationship_guid("space"))?,
            instances: process.and_then(|p| p.u64_field("instances")),
            memory_mb: process.and_then(|p| p.u64_field("memory_in_mb")),
            disk_quota_mb: process.and_then(|p| p.u64_field("disk_in_mb")),
            command: process.and_then(|p| optional_str(p, "command")),
            health_check_type: process.and_then(|p| optional_str(p, "health_check.type")),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DomainAdapter {
    domain: RawRecord,
}

impl DomainAdapter {
    pub fn new(domain: RawRecord) -> Self {
        Self { domain }
    }
}

impl Derivable for DomainAdapter {
    type Output = Domain;

    fn derive(&self) -> CfResult<Domain> {
        const KIND: &str = "domain";
        let domain = &self.domain;
        let owner = optional_guid(KIND, domain.relationship_guid("organization"))?;

        Ok(Domain {
            meta: meta(KIND, domain)?,
            name: required_str(KIND, domain, "name")?,
            internal: domain.bool_field("internal").unwrap_or(false),
            shared: owner.is_none(),
            owning_organization_guid: owner,
            router_group_guid: optional_guid(KIND, domain.str_field("router_group.guid"))?,
            protocols: domain.str_list("supported_protocols"),
        })
    }
}

/// V3 route plus its domain record.
///
/// Without the domain record the domain name is recovered from the route's
/// `url` by stripping host and path.
#[derive(Debug, Clone)]
pub struct RouteAdapter {
    route: RawRecord,
    domain: Option<RawRecord>,
}

impl RouteAdapter {
    pub fn new(route: RawRecord, domain: Option<RawRecord>) -> Self {
        Self { route, domain }
    }

    fn domain_name(&self) -> Option<String> {
        if let Some(name) = self.domain.as_ref().and_then(|d| d.str_field("name")) {
            return Some(name.to_string());
        }

        let url = self.route.str_field("url")?;
        let url = url.split('/').next().unwrap_or(url);
        let url = url.split(':').next().unwrap_or(url);
        match self.route.str_field("host").filter(|h| !h.is_empty()) {
            Some(host) => url
                .strip_prefix(host)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(str::to_string),
            None => Some(url.to_string()),
        }
    }
}

impl Derivable for RouteAdapter {
    type Output = Route;

    fn derive(&self) -> CfResult<Route> {
        const KIND: &str = "route";
        let route = &self.route;

        let domain = self
            .domain_name()
            .ok_or_else(|| malformed(KIND, "cannot determine domain"))?;
        let port = route
            .u64_field("port")
            .map(|p| u16::try_from(p).map_err(|_| malformed(KIND, format!("invalid port {}", p))))
            .transpose()?;

        let app_guids = route
            .field("destinations")
            .and_then(|v| v.as_array())
            .map(|destinations| {
                destinations
                    .iter()
                    .filter_map(|d| d.pointer("/app/guid").and_then(|g| g.as_str()))
                    .map(|g| parse_guid(KIND, g))
                    .collect::<CfResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Route {
            meta: meta(KIND, route)?,
            descriptor: RouteDescriptor {
                host: optional_str(route, "host"),
                domain,
                path: optional_str(route, "path"),
                port,
            },
            domain_guid: optional_guid(KIND, route.relationship_guid("domain"))?,
            space_guid: optional_guid(KIND, route.relationship_guid("space"))?,
            url: optional_str(route, "url"),
            app_guids,
        })
    }
}

/// Service instance plus, for managed instances, its plan and offering.
#[derive(Debug, Clone)]
pub struct ServiceInstanceAdapter {
    instance: RawRecord,
    plan: Option<RawRecord>,
    offering: Option<RawRecord>,
}

impl ServiceInstanceAdapter {
    pub fn user_provided(instance: RawRecord) -> Self {
        Self {
            instance,
            plan: None,
            offering: None,
        }
    }

    pub fn managed(instance: RawRecord, plan: RawRecord, offering: RawRecord) -> Self {
        Self {
            instance,
            plan: Some(plan),
            offering: Some(offering),
        }
    }

    /// Whether a record needs plan and offering before it can be derived.
    pub fn is_managed(instance: &RawRecord) -> bool {
        instance.str_field("type") != Some("user-provided")
    }
}

impl Derivable for ServiceInstanceAdapter {
    type Output = ServiceInstance;

    fn derive(&self) -> CfResult<ServiceInstance> {
        const KIND: &str = "service instance";
        let instance = &self.instance;

        let kind = if Self::is_managed(instance) {
            let plan = self
                .plan
                .as_ref()
                .ok_or_else(|| malformed(KIND, "managed instance derived without its plan"))?;
            let offering = self
                .offering
                .as_ref()
                .ok_or_else(|| malformed(KIND, "managed instance derived without its offering"))?;
            ServiceInstanceKind::Managed {
                offering: required_str(KIND, offering, "name")?,
                plan: required_str(KIND, plan, "name")?,
                offering_description: optional_str(offering, "description"),
                broker_guid: optional_guid(KIND, offering.relationship_guid("service_broker"))?,
            }
        } else {
            ServiceInstanceKind::UserProvided {
                syslog_drain_url: optional_str(instance, "syslog_drain_url"),
                route_service_url: optional_str(instance, "route_service_url"),
            }
        };

        Ok(ServiceInstance {
            meta: meta(KIND, instance)?,
            name: required_str(KIND, instance, "name")?,
            kind,
            tags: instance.str_list("tags"),
            space_guid: optional_guid(KIND, instance.relationship_guid("space"))?,
            dashboard_url: optional_str(instance, "dashboard_url"),
            last_operation: last_operation(instance),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServiceBindingAdapter {
    binding: RawRecord,
}

impl ServiceBindingAdapter {
    pub fn new(binding: RawRecord) -> Self {
        Self { binding }
    }
}

impl Derivable for ServiceBindingAdapter {
    type Output = ServiceBinding;

    fn derive(&self) -> CfResult<ServiceBinding> {
        const KIND: &str = "service binding";
        let binding = &self.binding;

        Ok(ServiceBinding {
            meta: meta(KIND, binding)?,
            name: optional_str(binding, "name"),
            binding_type: optional_str(binding, "type").unwrap_or_else(|| "app".to_string()),
            app_guid: optional_guid(KIND, binding.relationship_guid("app"))?,
            service_instance_guid: optional_guid(
                KIND,
                binding.relationship_guid("service_instance"),
            )?,
            last_operation: last_operation(binding),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TaskAdapter {
    task: RawRecord,
}

impl TaskAdapter {
    pub fn new(task: RawRecord) -> Self {
        Self { task }
    }
}

impl Derivable for TaskAdapter {
    type Output = Task;

    fn derive(&self) -> CfResult<Task> {
        const KIND: &str = "task";
        let task = &self.task;

        Ok(Task {
            meta: meta(KIND, task)?,
            name: required_str(KIND, task, "name")?,
            command: optional_str(task, "command"),
            state: TaskState::parse(task.str_field("state")),
            sequence_id: task.u64_field("sequence_id"),
            memory_mb: task.u64_field("memory_in_mb"),
            disk_mb: task.u64_field("disk_in_mb"),
            failure_reason: optional_str(task, "result.failure_reason"),
            app_guid: optional_guid(KIND, task.relationship_guid("app"))?,
        })
    }
}

/// Stacks are read through V2.
#[derive(Debug, Clone)]
pub struct StackAdapter {
    stack: RawRecord,
}

impl StackAdapter {
    pub fn new(stack: RawRecord) -> Self {
        Self { stack }
    }
}

impl Derivable for StackAdapter {
    type Output = Stack;

    fn derive(&self) -> CfResult<Stack> {
        const KIND: &str = "stack";
        Ok(Stack {
            meta: meta(KIND, &self.stack)?,
            name: required_str(KIND, &self.stack, "name")?,
            description: optional_str(&self.stack, "description"),
        })
    }
}
