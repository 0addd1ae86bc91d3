//! The registry: owner of every service and router of the
//! request/release protocol.
//!
//! All mutation funnels through [`ServiceManager`].  Services never call
//! each other directly; the four protocol primitives (`act_request`,
//! `act_release`, `handle_request`, `handle_release`) are registry
//! methods that resolve their peers by id on every hop, so ownership
//! stays with the registry's map and the graph recursion needs no back
//! pointers.  Recursion is bounded because the dependency graph is kept
//! acyclic at create/update time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use rorg_error::{Error, Result};
use rorg_model::{
    ContainerStatus, DelayedAction, DockerServiceState, ReadyDetection, RunMode, ServiceId,
    ServiceOptions, ServiceRequest, ServiceRequestId, ServiceState, ServiceStatus, ServiceType,
};
use tracing::{debug, info, warn};

use crate::refresh::RefreshJob;
use crate::service::{Backend, Drivers, Service};
use crate::storage::Storage;
use crate::graph;

/// Tunables for the registry and its background stats refresher.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory for `.service_state` files.
    ///
    /// The default under `/tmp` is fine for a development box and wrong
    /// for production; point it at persistent storage there.
    pub storage_base_path: PathBuf,
    /// Prefix for generated container names.
    pub container_name_prefix: String,
    /// How long one stats reading stays valid before a read triggers a
    /// synchronous refresh.
    pub docker_stats_valid_time: Duration,
    /// Concurrency of the background stats sweep.
    pub refresh_stats_num_threads: usize,
    /// Minimum gap between the starts of two stats sweeps.
    pub minimal_time_between_refresh_stats: Duration,
}

impl Default for ManagerConfig {
    fn default() -> ManagerConfig {
        ManagerConfig {
            storage_base_path: PathBuf::from("/tmp/RorgStorage"),
            container_name_prefix: "rorg__".to_owned(),
            docker_stats_valid_time: Duration::from_secs_f64(5.0),
            refresh_stats_num_threads: 40,
            minimal_time_between_refresh_stats: Duration::from_secs(1),
        }
    }
}

/// Process-wide owner of all managed services.
pub struct ServiceManager {
    /// Every managed service, by id.
    services: HashMap<ServiceId, Service>,
    /// The on-disk store for service state.
    storage: Storage,
    /// Tunables.
    config: ManagerConfig,
    /// The container drivers services are bound to.
    drivers: Drivers,
}

impl ServiceManager {
    /// A new, empty registry.
    pub fn new(config: ManagerConfig, drivers: Drivers) -> ServiceManager {
        let storage = Storage::new(config.storage_base_path.clone());
        ServiceManager {
            services: HashMap::new(),
            storage,
            config,
            drivers,
        }
    }

    /// The registry's tunables.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Look up a service.
    fn get(&self, id: &ServiceId) -> Result<&Service> {
        self.services
            .get(id)
            .ok_or_else(|| Error::ServiceNotFound(format!("service {} not found", id)))
    }

    /// Look up a service for mutation.
    fn get_mut(&mut self, id: &ServiceId) -> Result<&mut Service> {
        self.services
            .get_mut(id)
            .ok_or_else(|| Error::ServiceNotFound(format!("service {} not found", id)))
    }

    /// Whether a service with this id is registered.
    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    /// Ids of every managed service, in canonical order.
    pub fn list_ids(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.services.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// A copy of one service's authoritative state.
    pub fn query(&self, id: &ServiceId) -> Result<ServiceState> {
        Ok(self.get(id)?.to_state())
    }

    /// Ensure the `__builtin:__operator` meta service exists.  Returns
    /// true if it was created by this call.
    pub fn create_meta_operator(&mut self) -> bool {
        let id = ServiceId::operator();
        if self.services.contains_key(&id) {
            return false;
        }
        let mut options = ServiceOptions::minimal(id.clone(), ServiceType::Meta);
        options.disable_deactivate = true;
        let service = Service::create_meta(options);
        self.services.insert(id.clone(), service);
        info!("created meta service {}", id);
        true
    }

    /// Create a service from client-submitted options.
    pub async fn create_service(&mut self, options: ServiceOptions) -> Result<()> {
        if options.id.is_builtin() {
            return Err(Error::ServiceUnsupportedOptions(format!(
                "{} is in a reserved namespace",
                options.id
            )));
        }
        if self.services.contains_key(&options.id) {
            return Err(Error::ServiceAlreadyExist(format!(
                "service {} already exists",
                options.id
            )));
        }
        graph::reject_cycles(&self.services, &options)?;
        let id = options.id.clone();
        let service = match options.service_type {
            ServiceType::Docker => {
                Service::create_docker(options, &self.drivers, &self.config.container_name_prefix)
                    .await?
            }
            ServiceType::Group => Service::create_group(options),
            ServiceType::Meta => Service::create_meta(options),
            _ => unreachable!("ServiceType has no other variants"),
        };
        self.services.insert(id.clone(), service);
        info!("created service {}", id);
        Ok(())
    }

    /// Replace a Docker service's options: tear it down (forced), swap
    /// the container, and re-activate if it was active before.
    pub async fn update_service(&mut self, options: ServiceOptions) -> Result<()> {
        if options.id.is_builtin() {
            return Err(Error::ServiceUnsupportedOptions(format!(
                "{} is in a reserved namespace",
                options.id
            )));
        }
        let id = options.id.clone();
        let service = self.get(&id)?;
        let (old_driver, container_name) = match &service.backend {
            Backend::Docker(b) => (b.driver.clone(), b.container_name.clone()),
            Backend::Group => {
                return Err(Error::ServiceUnsupportedOptions(
                    "a group service cannot be updated".to_owned(),
                ))
            }
            Backend::Meta => {
                return Err(Error::Internal("cannot update a meta service".to_owned()))
            }
        };
        if options.service_type != ServiceType::Docker {
            return Err(Error::ServiceUnsupportedOptions(format!(
                "cannot change the type of service {}",
                id
            )));
        }
        let docker_options = crate::service::validate_docker_options(&options)?;
        graph::reject_cycles(&self.services, &options)?;

        let previous_status = self.get(&id)?.status();
        self.deactivate(id.clone(), true).await?;
        old_driver
            .remove(&container_name, true)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "could not remove container {}: {}",
                    container_name, e
                ))
            })?;
        let driver = self.drivers.select(options.run_mode);
        driver
            .create(&container_name, &docker_options)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "could not recreate container {}: {}",
                    container_name, e
                ))
            })?;

        let service = self.get_mut(&id)?;
        service.state.options = options;
        service.backend = Backend::Docker(crate::service::DockerBackend {
            driver,
            container_name,
            stats: rorg_docker::StatsCell::new(),
        });
        info!("updated service {}", id);
        if previous_status == ServiceStatus::Active {
            self.activate(id).await?;
        }
        Ok(())
    }

    /// Remove a service: force-deactivate (cascading), drop its
    /// container, and unregister it.  The state file becomes a
    /// tombstone at the next commit.
    pub async fn remove_service(&mut self, id: &ServiceId) -> Result<()> {
        let service = self.get(id)?;
        let container = match &service.backend {
            Backend::Meta => {
                return Err(Error::Internal(format!("cannot remove meta service {}", id)))
            }
            Backend::Docker(b) => Some((b.driver.clone(), b.container_name.clone())),
            Backend::Group => None,
        };
        self.deactivate(id.clone(), true).await?;
        if let Some((driver, name)) = container {
            driver.remove(&name, true).await.map_err(|e| {
                Error::Internal(format!("could not remove container {}: {}", name, e))
            })?;
        }
        self.services.remove(id);
        info!("removed service {}", id);
        Ok(())
    }

    /// Route a request to its issuer.
    pub async fn request(&mut self, request: ServiceRequest) -> Result<Vec<DelayedAction>> {
        self.act_request(request).await
    }

    /// Route a release to its issuer.
    pub async fn release(&mut self, request_id: ServiceRequestId) -> Result<Vec<DelayedAction>> {
        self.act_release(request_id).await
    }

    /// Restart a Docker service's container in place; registry state is
    /// untouched.
    pub async fn force_restart(&mut self, id: &ServiceId) -> Result<()> {
        let service = self.get(id)?;
        match &service.backend {
            Backend::Docker(b) => {
                let driver = b.driver.clone();
                let name = b.container_name.clone();
                info!("force-restarting service {}", id);
                driver.restart(&name).await.map_err(|e| {
                    Error::Internal(format!("could not restart container {}: {}", name, e))
                })
            }
            Backend::Group => Err(Error::Internal(
                "cannot force-restart a group service; restart its members individually"
                    .to_owned(),
            )),
            Backend::Meta => Err(Error::Internal(format!(
                "cannot force-restart meta service {}",
                id
            ))),
        }
    }

    /// Record a request on the issuer, then fan it out to every target.
    ///
    /// Precondition: the issuer is `Active`.  At most one self-issued
    /// request per id is kept; re-issuing replaces the previous one.
    fn act_request(
        &mut self,
        request: ServiceRequest,
    ) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let issuer = request.id().issuer().clone();
            if request.targets().contains(&issuer) {
                return Err(Error::Internal(format!(
                    "service {} may not request itself",
                    issuer
                )));
            }
            let service = self.get_mut(&issuer)?;
            if !service.is_active() {
                return Err(Error::ServiceNotActive(format!(
                    "service {} is not active",
                    issuer
                )));
            }
            service
                .state
                .requests_by_self
                .retain(|r| r.id() != request.id());
            service.state.requests_by_self.push(request.clone());

            let mut actions = Vec::new();
            for target in request.targets().to_vec() {
                actions.extend(self.handle_request(target, request.clone()).await?);
            }
            Ok(actions)
        }
        .boxed()
    }

    /// Drop a self-issued request and release it on every target.
    ///
    /// Targets that have disappeared (possible after a forced remove)
    /// are skipped with a warning so the cascade can finish.
    fn act_release(
        &mut self,
        request_id: ServiceRequestId,
    ) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let issuer = request_id.issuer().clone();
            let service = self.get_mut(&issuer)?;
            match service.status() {
                ServiceStatus::Active | ServiceStatus::ToBeStopped => {}
                _ => {
                    return Err(Error::ServiceNotActive(format!(
                        "service {} is not active",
                        issuer
                    )))
                }
            }
            let position = service
                .state
                .requests_by_self
                .iter()
                .position(|r| r.id() == &request_id)
                .ok_or_else(|| {
                    Error::ServiceRequestNotExist(format!(
                        "service {} holds no request {}",
                        issuer, request_id
                    ))
                })?;
            let request = service.state.requests_by_self.remove(position);

            let mut actions = Vec::new();
            for target in request.targets().to_vec() {
                if !self.services.contains_key(&target) {
                    warn!(
                        "release of {}: target {} is no longer registered",
                        request_id, target
                    );
                    continue;
                }
                actions.extend(self.handle_release(target, request_id.clone()).await?);
            }
            Ok(actions)
        }
        .boxed()
    }

    /// Record an incoming request on the target and activate it.
    ///
    /// Idempotent per request id: a duplicate insert is deduplicated,
    /// most recent wins.
    fn handle_request(
        &mut self,
        target: ServiceId,
        request: ServiceRequest,
    ) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let service = self.get_mut(&target)?;
            if matches!(service.backend, Backend::Meta) {
                return Err(Error::Internal(format!(
                    "cannot request meta service {}",
                    target
                )));
            }
            service
                .state
                .requested_by_others
                .retain(|rid| rid != request.id());
            service.state.requested_by_others.push(request.id().clone());
            self.activate(target).await
        }
        .boxed()
    }

    /// Drop an incoming request from the target; deactivate it when the
    /// last one is gone.
    fn handle_release(
        &mut self,
        target: ServiceId,
        request_id: ServiceRequestId,
    ) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let service = self.get_mut(&target)?;
            if matches!(service.backend, Backend::Meta) {
                return Err(Error::Internal(format!(
                    "cannot release meta service {}",
                    target
                )));
            }
            let before = service.state.requested_by_others.len();
            service
                .state
                .requested_by_others
                .retain(|rid| rid != &request_id);
            if service.state.requested_by_others.len() == before {
                return Err(Error::ServiceRequestNotExist(format!(
                    "{} does not exist in {}",
                    request_id, target
                )));
            }
            if service.state.requested_by_others.is_empty() {
                self.deactivate(target, false).await
            } else {
                Ok(Vec::new())
            }
        }
        .boxed()
    }

    /// Bring a service up: start its runtime artifact, mark it active,
    /// and re-issue its standing requests (implied dependencies, and for
    /// a group its membership request).
    fn activate(&mut self, id: ServiceId) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let service = self.get_mut(&id)?;
            if service.is_active() {
                debug!("service {} is already active", id);
                return Ok(Vec::new());
            }
            let ready_detection = service.state.options.ready_detection.clone();
            let container = match &service.backend {
                Backend::Docker(b) => Some((b.driver.clone(), b.container_name.clone())),
                Backend::Group => None,
                Backend::Meta => {
                    return Err(Error::Internal(format!(
                        "cannot activate meta service {}",
                        id
                    )))
                }
            };
            info!("activating service {}", id);
            if let Some((driver, name)) = &container {
                driver.start(name).await.map_err(|e| {
                    Error::Internal(format!("could not start container {}: {}", name, e))
                })?;
            }

            let service = self.get_mut(&id)?;
            service.state.status = ServiceStatus::Active;
            if container.is_some() {
                service.state.docker_state = Some(DockerServiceState {
                    container_status: ContainerStatus::Active,
                });
            }
            let implied = service.state.implied_request();
            let group_request = match &service.backend {
                Backend::Group => {
                    let mut targets = service.state.options.implied_dependencies.clone();
                    if let Some(group) = &service.state.options.group {
                        targets.extend(group.grouped_services.iter().cloned());
                    }
                    Some(ServiceRequest::new(
                        ServiceRequestId::new(id.clone(), ""),
                        targets,
                    ))
                }
                _ => None,
            };

            let mut actions = Vec::new();
            if let Some(group_request) = group_request {
                actions.extend(self.act_request(group_request).await?);
            }
            actions.extend(self.act_request(implied).await?);

            match ready_detection {
                Some(ReadyDetection::WaitFixedTime { secs }) => {
                    actions.push(DelayedAction::wait_fixed(secs));
                }
                Some(ReadyDetection::WaitForProber { .. }) => {
                    return Err(Error::ServiceUnsupportedOptions(format!(
                        "{} uses the unsupported wait_for_prober ready detection",
                        id
                    )));
                }
                None => {}
                _ => unreachable!("ReadyDetection has no other variants"),
            }
            Ok(actions)
        }
        .boxed()
    }

    /// Tear a service down: release everything it requested, stop its
    /// runtime artifact, and mark it stopped.
    ///
    /// Without `force`, refuses while `disable_deactivate` is set or
    /// other services still hold requests on it; the guards run before
    /// any state changes, so a refused deactivation leaves the service
    /// active.
    fn deactivate(&mut self, id: ServiceId, force: bool) -> BoxFuture<'_, Result<Vec<DelayedAction>>> {
        async move {
            let service = self.get_mut(&id)?;
            if !service.is_active() {
                debug!("service {} is not active; nothing to deactivate", id);
                return Ok(Vec::new());
            }
            if matches!(service.backend, Backend::Meta) {
                return Err(Error::Internal(format!(
                    "cannot deactivate meta service {}",
                    id
                )));
            }
            if !force && service.state.options.disable_deactivate {
                return Err(Error::Internal(format!(
                    "cannot deactivate {}: disable_deactivate is set",
                    id
                )));
            }
            if !force && !service.state.requested_by_others.is_empty() {
                let holders: Vec<String> = service
                    .state
                    .requested_by_others
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                return Err(Error::Internal(format!(
                    "cannot deactivate {}: still requested by {}",
                    id,
                    holders.join(", ")
                )));
            }

            info!("deactivating service {}", id);
            service.state.status = ServiceStatus::ToBeStopped;
            let requests = service.state.requests_by_self.clone();
            let container = match &service.backend {
                Backend::Docker(b) => Some((b.driver.clone(), b.container_name.clone())),
                _ => None,
            };

            let mut actions = Vec::new();
            for request in requests {
                actions.extend(self.act_release(request.id().clone()).await?);
            }
            if let Some((driver, name)) = &container {
                driver.stop(name).await.map_err(|e| {
                    Error::Internal(format!("could not stop container {}: {}", name, e))
                })?;
            }

            let service = self.get_mut(&id)?;
            service.state.status = ServiceStatus::Stopped;
            if container.is_some() {
                service.state.docker_state = Some(DockerServiceState {
                    container_status: ContainerStatus::Stopped,
                });
            }
            debug!("deactivated service {}", id);
            Ok(actions)
        }
        .boxed()
    }

    /// CPU usage of one service, in logical-core units.  `None` when the
    /// service has nothing to report (group, meta, unparameterized
    /// simulation).
    pub async fn service_cpu_usage(&self, id: &ServiceId) -> Result<Option<f64>> {
        let service = self.get(id)?;
        match &service.backend {
            Backend::Docker(b) if service.state.options.run_mode == RunMode::Real => {
                let stats = b.fresh_stats(self.stats_valid_for()).await?;
                Ok(Some(stats.cpu_usage_cores()))
            }
            Backend::Docker(_) => Ok(service.simulated_cpu_usage()),
            _ => Ok(None),
        }
    }

    /// Memory usage of one service, in bytes, with the same conventions
    /// as [`ServiceManager::service_cpu_usage`].
    pub async fn service_memory_usage(&self, id: &ServiceId) -> Result<Option<u64>> {
        let service = self.get(id)?;
        match &service.backend {
            Backend::Docker(b) if service.state.options.run_mode == RunMode::Real => {
                let stats = b.fresh_stats(self.stats_valid_for()).await?;
                Ok(Some(stats.memory_usage_bytes()))
            }
            Backend::Docker(_) => Ok(service.simulated_memory_usage()),
            _ => Ok(None),
        }
    }

    /// Sum of CPU usage over all services that report one.
    pub async fn collect_all_cpu_usage(&self) -> Result<f64> {
        let mut total = 0.0;
        for id in self.list_ids() {
            if let Some(usage) = self.service_cpu_usage(&id).await? {
                total += usage;
            }
        }
        Ok(total)
    }

    /// Sum of memory usage over all services that report one.
    pub async fn collect_all_memory_usage(&self) -> Result<u64> {
        let mut total = 0;
        for id in self.list_ids() {
            if let Some(usage) = self.service_memory_usage(&id).await? {
                total += usage;
            }
        }
        Ok(total)
    }

    /// The stats validity window as a chrono duration.
    fn stats_valid_for(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.docker_stats_valid_time)
            .unwrap_or_else(|_| chrono::Duration::seconds(5))
    }

    /// Write every service's state to disk and tombstone orphans.  This
    /// is the commit point invoked after every mutating RPC.
    pub fn write_to_disk(&self) -> Result<()> {
        self.storage.write_all(self.services.values().map(|s| &s.state))
    }

    /// Rebuild the registry from disk.  Intended for a fresh registry at
    /// process start.
    pub async fn load_from_disk(&mut self) -> Result<()> {
        for state in self.storage.load_all()? {
            let service =
                Service::restore(state, &self.drivers, &self.config.container_name_prefix).await?;
            debug!("restored service {}", service.id());
            self.services.insert(service.id().clone(), service);
        }
        info!("loaded {} services from disk", self.services.len());
        Ok(())
    }

    /// Snapshot the work list for one background stats sweep: every
    /// real-mode Docker service's driver, container name and cache cell.
    pub fn stats_refresh_jobs(&self) -> Vec<RefreshJob> {
        self.services
            .values()
            .filter_map(|service| match &service.backend {
                Backend::Docker(b) if service.state.options.run_mode == RunMode::Real => {
                    Some(RefreshJob {
                        driver: b.driver.clone(),
                        container_name: b.container_name.clone(),
                        cell: b.stats.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }
}
