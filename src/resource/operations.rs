//! Cloud Controller operations
//!
//! The caller-facing surface: applications, routes, domains, services,
//! tasks and stacks. Every lookup by name takes a `required` flag; absence
//! is `Ok(None)` unless the caller asked for the entity to exist.

use super::adapter::{
    ApplicationAdapter, DomainAdapter, RouteAdapter, ServiceBindingAdapter,
    ServiceInstanceAdapter, StackAdapter, TaskAdapter,
};
use super::cache::EntityCache;
use super::fetcher::{
    drain_all, fetch_all, fetch_all_with_auxiliary, fetch_one, fetch_one_with_auxiliary, pages,
};
use super::model::{
    Application, BindingParameters, Domain, Route, ServiceBinding, ServiceInstance, Stack, Task,
};
use super::routes::{self, RouteDescriptor};
use super::Derivable;
use crate::cf::provider::{ApiVersion, ListQuery, RawRecord, ResourceProvider};
use crate::error::{require, CfError, CfResult};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use ApiVersion::{V2, V3};

/// Parameters for a new one-off task.
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub name: Option<String>,
    pub command: String,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
}

/// Parameters for a new user-provided service instance.
#[derive(Debug, Clone, Default)]
pub struct UserProvidedServiceRequest {
    pub name: String,
    pub credentials: Map<String, Value>,
    pub syslog_drain_url: Option<String>,
    pub route_service_url: Option<String>,
    pub tags: Vec<String>,
}

/// Aggregating client over a [`ResourceProvider`].
pub struct CloudControllerClient<P: ?Sized> {
    provider: Arc<P>,
    space_guid: Option<Uuid>,
    stacks: EntityCache<Uuid, Stack>,
}

impl<P> CloudControllerClient<P>
where
    P: ResourceProvider + ?Sized,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            space_guid: None,
            stacks: EntityCache::new(),
        }
    }

    /// Scope list queries and creations to one space.
    pub fn with_space(mut self, space_guid: Uuid) -> Self {
        self.space_guid = Some(space_guid);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn space_filter(&self, query: ListQuery) -> ListQuery {
        let space = self.space_guid.map(|g| g.to_string());
        query.filter_opt("space_guids", space.as_deref())
    }

    fn require_space(&self) -> CfResult<Uuid> {
        self.space_guid
            .ok_or_else(|| CfError::Config("No target space configured".to_string()))
    }

    /// GET a single record, mapping `NotFound` to `None`.
    async fn get_optional(&self, version: ApiVersion, path: &str) -> CfResult<Option<RawRecord>> {
        match self.provider.get(version, path).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Applications
    // =========================================================================

    async fn application_with_process(&self, app: RawRecord) -> CfResult<ApplicationAdapter> {
        let guid = app.require_guid("application")?;
        let process = self
            .get_optional(V3, &format!("/v3/apps/{}/processes/web", guid))
            .await?;
        Ok(ApplicationAdapter::new(app, process))
    }

    /// All applications, each with its `web` process sizing.
    pub async fn get_applications(&self) -> CfResult<Vec<Application>> {
        let query = self.space_filter(ListQuery::v3("/v3/apps"));
        let mut apps = fetch_all_with_auxiliary(pages(&*self.provider, &query), |app| {
            self.application_with_process(app)
        })
        .await?;
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }

    pub async fn get_application(&self, name: &str, required: bool) -> CfResult<Option<Application>> {
        let query = self.space_filter(ListQuery::v3("/v3/apps").filter("names", name));
        let app = fetch_one_with_auxiliary(pages(&*self.provider, &query), |app| {
            self.application_with_process(app)
        })
        .await?;
        require(app, required, "Application", name)
    }

    pub async fn get_application_by_guid(
        &self,
        guid: Uuid,
        required: bool,
    ) -> CfResult<Option<Application>> {
        let app = match self.get_optional(V3, &format!("/v3/apps/{}", guid)).await? {
            Some(record) => Some(self.application_with_process(record).await?.derive()?),
            None => None,
        };
        require(app, required, "Application", &guid.to_string())
    }

    pub async fn create_application(
        &self,
        name: &str,
        stack: Option<&str>,
        buildpacks: &[String],
    ) -> CfResult<Application> {
        let space = self.require_space()?;
        let body = json!({
            "name": name,
            "relationships": {"space": {"data": {"guid": space}}},
            "lifecycle": {
                "type": "buildpack",
                "data": {"stack": stack, "buildpacks": buildpacks}
            }
        });
        let record = self.provider.create(V3, "/v3/apps", &body).await?;
        ApplicationAdapter::new(record, None).derive()
    }

    pub async fn delete_application(&self, name: &str) -> CfResult<()> {
        let guid = self.application_guid(name).await?;
        self.provider.delete(V3, &format!("/v3/apps/{}", guid)).await
    }

    async fn application_guid(&self, name: &str) -> CfResult<Uuid> {
        self.get_application(name, true)
            .await?
            .and_then(|app| app.guid())
            .ok_or_else(|| CfError::not_found("Application", name))
    }

    // =========================================================================
    // Domains and routes
    // =========================================================================

    pub async fn get_domains(&self) -> CfResult<Vec<Domain>> {
        let query = ListQuery::v3("/v3/domains");
        fetch_all(pages(&*self.provider, &query), DomainAdapter::new).await
    }

    pub async fn get_domain(&self, name: &str, required: bool) -> CfResult<Option<Domain>> {
        let query = ListQuery::v3("/v3/domains").filter("names", name);
        let domain = fetch_one(pages(&*self.provider, &query), DomainAdapter::new).await?;
        require(domain, required, "Domain", name)
    }

    /// Domain records keyed by guid, to pair with routes without one fetch per route.
    async fn domain_records(&self) -> CfResult<HashMap<String, RawRecord>> {
        let query = ListQuery::v3("/v3/domains");
        let records = drain_all(pages(&*self.provider, &query)).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.guid.clone().map(|guid| (guid, r)))
            .collect())
    }

    async fn route_with_domain(
        &self,
        route: RawRecord,
        domains: &HashMap<String, RawRecord>,
    ) -> CfResult<RouteAdapter> {
        let domain = match route.relationship_guid("domain") {
            Some(guid) => match domains.get(guid) {
                Some(domain) => Some(domain.clone()),
                None => self.get_optional(V3, &format!("/v3/domains/{}", guid)).await?,
            },
            None => None,
        };
        Ok(RouteAdapter::new(route, domain))
    }

    async fn list_routes(&self, query: ListQuery) -> CfResult<Vec<Route>> {
        let domains = &self.domain_records().await?;
        fetch_all_with_auxiliary(pages(&*self.provider, &query), |route| {
            self.route_with_domain(route, domains)
        })
        .await
    }

    /// Routes mapped to an application.
    pub async fn get_routes(&self, app_guid: Uuid) -> CfResult<Vec<Route>> {
        let query = ListQuery::v3("/v3/routes").filter("app_guids", &app_guid.to_string());
        self.list_routes(query).await
    }

    /// Routes of the target space (all visible routes when unscoped).
    pub async fn get_all_routes(&self) -> CfResult<Vec<Route>> {
        let query = self.space_filter(ListQuery::v3("/v3/routes"));
        self.list_routes(query).await
    }

    /// Resolve a URI string against the visible domains.
    pub async fn resolve_route(&self, uri: &str) -> CfResult<(RouteDescriptor, Domain)> {
        let domains = self.get_domains().await?;
        let descriptor = routes::resolve(uri, domains.iter().map(|d| d.name.as_str()))?;
        let domain = domains
            .into_iter()
            .find(|d| d.name == descriptor.domain)
            .ok_or_else(|| CfError::not_found("Domain", &descriptor.domain))?;
        Ok((descriptor, domain))
    }

    /// The existing route for a descriptor, if any.
    pub async fn find_route(&self, descriptor: &RouteDescriptor, domain: &Domain) -> CfResult<Option<Route>> {
        let domain_guid = domain
            .guid()
            .ok_or_else(|| CfError::not_found("Domain", &domain.name))?;
        let query = ListQuery::v3("/v3/routes")
            .filter("domain_guids", &domain_guid.to_string())
            .filter("hosts", descriptor.host_or_empty())
            .filter("paths", descriptor.path_or_empty());
        let query = match descriptor.port {
            Some(port) => query.filter("ports", &port.to_string()),
            None => query,
        };

        let routes = self.list_routes(query).await?;
        let mut matching = routes
            .into_iter()
            .filter(|route| route.describes_the_same_uri(descriptor));
        let route = matching.next();
        if matching.next().is_some() {
            return Err(CfError::Ambiguous(format!("more than one route matches '{}'", descriptor)));
        }
        Ok(route)
    }

    /// Map `uri` to an application, creating the route when needed.
    pub async fn add_route(&self, app_guid: Uuid, uri: &str) -> CfResult<Route> {
        let (descriptor, domain) = self.resolve_route(uri).await?;

        let route = match self.find_route(&descriptor, &domain).await? {
            Some(route) => route,
            None => self.create_route(&descriptor, &domain).await?,
        };
        let route_guid = route
            .guid()
            .ok_or_else(|| CfError::not_found("Route", &descriptor))?;

        if route.app_guids.contains(&app_guid) {
            tracing::debug!("Route {} already mapped to {}", descriptor, app_guid);
            return Ok(route);
        }

        tracing::info!("Mapping route {} to app {}", descriptor, app_guid);
        let body = json!({"destinations": [{"app": {"guid": app_guid}}]});
        self.provider
            .create(V3, &format!("/v3/routes/{}/destinations", route_guid), &body)
            .await?;

        let mut app_guids = route.app_guids.clone();
        app_guids.push(app_guid);
        Ok(Route { app_guids, ..route })
    }

    async fn create_route(&self, descriptor: &RouteDescriptor, domain: &Domain) -> CfResult<Route> {
        let space = self.require_space()?;
        let mut body = json!({
            "relationships": {
                "space": {"data": {"guid": space}},
                "domain": {"data": {"guid": domain.guid()}}
            }
        });
        if let Value::Object(ref mut map) = body {
            if !descriptor.host_or_empty().is_empty() {
                map.insert("host".to_string(), json!(descriptor.host_or_empty()));
            }
            if !descriptor.path_or_empty().is_empty() {
                map.insert("path".to_string(), json!(descriptor.path_or_empty()));
            }
            if let Some(port) = descriptor.port {
                map.insert("port".to_string(), json!(port));
            }
        }

        tracing::info!("Creating route {}", descriptor);
        let record = self.provider.create(V3, "/v3/routes", &body).await?;
        let domain_record = RawRecord::from_v3(json!({"name": domain.name}));
        RouteAdapter::new(record, Some(domain_record)).derive()
    }

    /// Delete the route a URI describes.
    pub async fn delete_route(&self, uri: &str) -> CfResult<()> {
        let (descriptor, domain) = self.resolve_route(uri).await?;
        let route = self
            .find_route(&descriptor, &domain)
            .await?
            .ok_or_else(|| CfError::not_found("Route", uri))?;
        let guid = route
            .guid()
            .ok_or_else(|| CfError::not_found("Route", uri))?;
        self.provider.delete(V3, &format!("/v3/routes/{}", guid)).await
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Plan then offering for managed instances; nothing for user-provided.
    async fn service_instance_with_plan(&self, instance: RawRecord) -> CfResult<ServiceInstanceAdapter> {
        if !ServiceInstanceAdapter::is_managed(&instance) {
            return Ok(ServiceInstanceAdapter::user_provided(instance));
        }

        let plan_guid = instance.relationship_guid("service_plan").ok_or_else(|| {
            CfError::MalformedRecord {
                kind: "service instance",
                reason: "managed instance without service plan".to_string(),
            }
        })?;
        let plan = self
            .provider
            .get(V3, &format!("/v3/service_plans/{}", plan_guid))
            .await?;

        let offering_guid = plan.relationship_guid("service_offering").ok_or_else(|| {
            CfError::MalformedRecord {
                kind: "service plan",
                reason: "plan without service offering".to_string(),
            }
        })?;
        let offering = self
            .provider
            .get(V3, &format!("/v3/service_offerings/{}", offering_guid))
            .await?;

        Ok(ServiceInstanceAdapter::managed(instance, plan, offering))
    }

    pub async fn get_service_instances(&self) -> CfResult<Vec<ServiceInstance>> {
        let query = self.space_filter(ListQuery::v3("/v3/service_instances"));
        let mut instances = fetch_all_with_auxiliary(pages(&*self.provider, &query), |instance| {
            self.service_instance_with_plan(instance)
        })
        .await?;
        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    pub async fn get_service_instance(
        &self,
        name: &str,
        required: bool,
    ) -> CfResult<Option<ServiceInstance>> {
        let query = self.space_filter(ListQuery::v3("/v3/service_instances").filter("names", name));
        let instance = fetch_one_with_auxiliary(pages(&*self.provider, &query), |instance| {
            self.service_instance_with_plan(instance)
        })
        .await?;
        require(instance, required, "Service instance", name)
    }

    pub async fn create_user_provided_service_instance(
        &self,
        request: &UserProvidedServiceRequest,
    ) -> CfResult<ServiceInstance> {
        let space = self.require_space()?;
        let body = json!({
            "type": "user-provided",
            "name": request.name,
            "credentials": request.credentials,
            "syslog_drain_url": request.syslog_drain_url,
            "route_service_url": request.route_service_url,
            "tags": request.tags,
            "relationships": {"space": {"data": {"guid": space}}}
        });
        let record = self.provider.create(V3, "/v3/service_instances", &body).await?;
        ServiceInstanceAdapter::user_provided(record).derive()
    }

    pub async fn delete_service_instance(&self, name: &str) -> CfResult<()> {
        let guid = self
            .get_service_instance(name, true)
            .await?
            .and_then(|instance| instance.guid())
            .ok_or_else(|| CfError::not_found("Service instance", name))?;
        self.provider
            .delete(V3, &format!("/v3/service_instances/{}", guid))
            .await
    }

    pub async fn get_service_bindings(&self, app_guid: Uuid) -> CfResult<Vec<ServiceBinding>> {
        let query = ListQuery::v3("/v3/service_credential_bindings")
            .filter("app_guids", &app_guid.to_string());
        fetch_all(pages(&*self.provider, &query), ServiceBindingAdapter::new).await
    }

    /// Parameters the broker holds for a binding.
    ///
    /// Brokers that cannot serve parameters yield an empty map.
    pub async fn get_service_binding_parameters(
        &self,
        binding_guid: Uuid,
    ) -> CfResult<BindingParameters> {
        let path = format!("/v3/service_credential_bindings/{}/parameters", binding_guid);
        match self.provider.get(V3, &path).await {
            Ok(record) => Ok(match record.entity {
                Value::Object(map) => map,
                _ => Map::new(),
            }),
            Err(e) if e.is_parameters_unavailable() => {
                tracing::warn!(
                    "Parameters for binding {} not retrievable, treating as empty: {}",
                    binding_guid,
                    e
                );
                Ok(Map::new())
            },
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn get_tasks(&self, app_guid: Uuid) -> CfResult<Vec<Task>> {
        let query = ListQuery::v3(&format!("/v3/apps/{}/tasks", app_guid));
        fetch_all(pages(&*self.provider, &query), TaskAdapter::new).await
    }

    pub async fn run_task(&self, app_guid: Uuid, request: &TaskRequest) -> CfResult<Task> {
        let mut body = json!({"command": request.command});
        if let Value::Object(ref mut map) = body {
            if let Some(name) = &request.name {
                map.insert("name".to_string(), json!(name));
            }
            if let Some(memory) = request.memory_mb {
                map.insert("memory_in_mb".to_string(), json!(memory));
            }
            if let Some(disk) = request.disk_mb {
                map.insert("disk_in_mb".to_string(), json!(disk));
            }
        }

        let record = self
            .provider
            .create(V3, &format!("/v3/apps/{}/tasks", app_guid), &body)
            .await?;
        TaskAdapter::new(record).derive()
    }

    pub async fn cancel_task(&self, task_guid: Uuid) -> CfResult<Task> {
        let record = self
            .provider
            .create(V3, &format!("/v3/tasks/{}/actions/cancel", task_guid), &json!({}))
            .await?;
        TaskAdapter::new(record).derive()
    }

    // =========================================================================
    // Stacks
    // =========================================================================

    /// A stack by guid, served from the cache after the first fetch.
    pub async fn get_stack(&self, guid: Uuid) -> CfResult<Stack> {
        self.stacks
            .get_or_compute(guid, || async move {
                tracing::debug!("Stack {} not cached, fetching", guid);
                let record = self.provider.get(V2, &format!("/v2/stacks/{}", guid)).await?;
                StackAdapter::new(record).derive()
            })
            .await
    }

    /// All stacks; each one found is remembered in the cache.
    pub async fn get_stacks(&self) -> CfResult<Vec<Stack>> {
        let query = ListQuery::v2("/v2/stacks");
        let stacks = fetch_all(pages(&*self.provider, &query), StackAdapter::new).await?;
        for stack in &stacks {
            if let Some(guid) = stack.guid() {
                self.stacks.insert_if_absent(guid, stack.clone());
            }
        }
        Ok(stacks)
    }

    pub async fn get_stack_by_name(&self, name: &str, required: bool) -> CfResult<Option<Stack>> {
        let query = ListQuery::v2("/v2/stacks").filter("name", name);
        let stack = fetch_one(pages(&*self.provider, &query), StackAdapter::new).await?;
        require(stack, required, "Stack", name)
    }

    /// Forget a cached stack, e.g. after it was found to be stale.
    pub fn invalidate_stack(&self, guid: Uuid) {
        if self.stacks.remove(&guid).is_some() {
            tracing::warn!("Invalidated cached stack {}", guid);
        }
    }

    pub fn cached_stack_count(&self) -> usize {
        self.stacks.len()
    }
}
