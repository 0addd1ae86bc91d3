//! The service variants and their runtime backends.
//!
//! A [`Service`] is its persisted [`ServiceState`] plus a [`Backend`]:
//! the runtime-only half that cannot be (and need not be) persisted.
//! Variant behavior is dispatched on the backend tag by the registry;
//! there is no inheritance tree, and a service never owns a pointer back
//! to the registry.

use std::sync::Arc;

use rorg_docker::{ContainerDriver, ContainerStats, StatsCell};
use rorg_error::{Error, Result};
use rorg_model::{
    DockerContainerOptions, RunMode, ServiceId, ServiceOptions, ServiceState, ServiceStatus,
    ServiceType, UsageDistribution,
};
use tracing::warn;

/// The process-wide pair of container drivers, selected per service by
/// its run mode.
#[derive(Clone)]
pub struct Drivers {
    /// Driver for services that run against the host's runtime.
    pub real: Arc<dyn ContainerDriver>,
    /// Driver for services that run in simulation.
    pub simulated: Arc<dyn ContainerDriver>,
}

impl Drivers {
    /// Pick the driver for the given run mode.
    pub fn select(&self, mode: RunMode) -> Arc<dyn ContainerDriver> {
        match mode {
            RunMode::Real => Arc::clone(&self.real),
            RunMode::Simulation => Arc::clone(&self.simulated),
            _ => unreachable!("RunMode has no other variants"),
        }
    }
}

/// Compute the container name for a service id.
///
/// `ns0/ns1:name` becomes `<prefix>ns0__ns1_name`.  The id alphabet
/// contains no `/` or `:`, so the mapping is a bijection and the
/// container can be relocated by name after a restart.
pub fn container_name(prefix: &str, id: &ServiceId) -> String {
    format!("{}{}_{}", prefix, id.namespace().join("__"), id.name())
}

/// Runtime-only half of a Docker service.
pub(crate) struct DockerBackend {
    /// The driver this service's containers live in.
    pub(crate) driver: Arc<dyn ContainerDriver>,
    /// The container's (bijective) name.
    pub(crate) container_name: String,
    /// Latest stats snapshot, shared with the background refresher.
    pub(crate) stats: StatsCell,
}

impl DockerBackend {
    /// Return a stats snapshot no older than `valid_for`, refreshing
    /// synchronously if the cache is stale or empty.
    pub(crate) async fn fresh_stats(
        &self,
        valid_for: chrono::Duration,
    ) -> Result<Arc<ContainerStats>> {
        if let Some(stats) = self.stats.latest() {
            if stats.age() <= valid_for {
                return Ok(stats);
            }
        }
        let stats = self
            .driver
            .stats(&self.container_name)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "could not read stats for {}: {}",
                    self.container_name, e
                ))
            })?;
        Ok(self.stats.publish(stats))
    }
}

/// Variant tag plus the variant's runtime-only data.
pub(crate) enum Backend {
    /// A containerized process.
    Docker(DockerBackend),
    /// A set of co-activated services; no runtime artifact of its own.
    Group,
    /// An always-active stand-in for an external actor.
    Meta,
}

/// One managed service: authoritative state plus runtime backend.
pub(crate) struct Service {
    /// The persisted, authoritative record.
    pub(crate) state: ServiceState,
    /// The runtime-only half.
    pub(crate) backend: Backend,
}

/// Check the submitted options for a Docker service, returning the
/// container options on success.
///
/// The orchestrator owns the container lifecycle, so options that would
/// have the runtime delete it behind our back are refused.
pub(crate) fn validate_docker_options(options: &ServiceOptions) -> Result<DockerContainerOptions> {
    let docker = options.docker.as_ref().ok_or_else(|| {
        Error::ServiceUnsupportedOptions(format!(
            "docker service {} has no container options",
            options.id
        ))
    })?;
    if docker.auto_remove == Some(true) {
        return Err(Error::ServiceUnsupportedOptions(
            "auto_remove cannot be set on a managed container".to_owned(),
        ));
    }
    if docker.remove == Some(true) {
        return Err(Error::ServiceUnsupportedOptions(
            "remove cannot be set on a managed container".to_owned(),
        ));
    }
    Ok(docker.clone())
}

impl Service {
    /// Create a Docker service: validate options, materialize the
    /// container, and start out `Stopped`.
    pub(crate) async fn create_docker(
        options: ServiceOptions,
        drivers: &Drivers,
        prefix: &str,
    ) -> Result<Service> {
        let docker_options = validate_docker_options(&options)?;
        let driver = drivers.select(options.run_mode);
        let name = container_name(prefix, &options.id);
        driver.create(&name, &docker_options).await.map_err(|e| {
            Error::Internal(format!("could not create container {}: {}", name, e))
        })?;
        Ok(Service {
            state: ServiceState::initial(options, ServiceStatus::Stopped),
            backend: Backend::Docker(DockerBackend {
                driver,
                container_name: name,
                stats: StatsCell::new(),
            }),
        })
    }

    /// Create a Group service; it has no runtime artifact.
    pub(crate) fn create_group(options: ServiceOptions) -> Service {
        Service {
            state: ServiceState::initial(options, ServiceStatus::Stopped),
            backend: Backend::Group,
        }
    }

    /// Create a Meta service: always active, never deactivatable.
    pub(crate) fn create_meta(mut options: ServiceOptions) -> Service {
        options.disable_deactivate = true;
        Service {
            state: ServiceState::initial(options, ServiceStatus::Active),
            backend: Backend::Meta,
        }
    }

    /// Rebuild a service from its persisted state.
    ///
    /// For a Docker service this rebinds the container by its generated
    /// name; a container that vanished while we were down is re-created
    /// from the recorded options.
    pub(crate) async fn restore(
        state: ServiceState,
        drivers: &Drivers,
        prefix: &str,
    ) -> Result<Service> {
        let backend = match state.service_type {
            ServiceType::Docker => {
                let docker_options = state.options.docker.clone().ok_or_else(|| {
                    Error::Internal(format!(
                        "stored docker service {} has no container options",
                        state.id
                    ))
                })?;
                let driver = drivers.select(state.options.run_mode);
                let name = container_name(prefix, &state.id);
                let present = driver.exists(&name).await.map_err(|e| {
                    Error::Internal(format!("could not look up container {}: {}", name, e))
                })?;
                if !present {
                    warn!("container {} for {} is gone; recreating it", name, state.id);
                    driver.create(&name, &docker_options).await.map_err(|e| {
                        Error::Internal(format!("could not recreate container {}: {}", name, e))
                    })?;
                }
                Backend::Docker(DockerBackend {
                    driver,
                    container_name: name,
                    stats: StatsCell::new(),
                })
            }
            ServiceType::Group => Backend::Group,
            ServiceType::Meta => Backend::Meta,
            _ => unreachable!("ServiceType has no other variants"),
        };
        Ok(Service { state, backend })
    }

    /// The service's identity.
    pub(crate) fn id(&self) -> &ServiceId {
        &self.state.id
    }

    /// Current lifecycle status.
    pub(crate) fn status(&self) -> ServiceStatus {
        self.state.status
    }

    /// True when the service is `Active`.
    pub(crate) fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// A copy of the authoritative state record.
    pub(crate) fn to_state(&self) -> ServiceState {
        self.state.clone()
    }

    /// Simulated CPU usage in logical-core units: 0 when inactive, a
    /// sample of the configured distribution otherwise, `None` when the
    /// simulation is unparameterized.
    pub(crate) fn simulated_cpu_usage(&self) -> Option<f64> {
        self.sample_simulated(|p| p.cpu_usage.as_ref())
    }

    /// Simulated memory usage in bytes, with the same conventions as
    /// [`Service::simulated_cpu_usage`].
    pub(crate) fn simulated_memory_usage(&self) -> Option<u64> {
        self.sample_simulated(|p| p.memory_usage.as_ref())
            .map(|v| v.max(0.0) as u64)
    }

    /// Common sampling path for the two simulated-usage readings.
    fn sample_simulated(
        &self,
        pick: impl Fn(&rorg_model::SimulationParameters) -> Option<&UsageDistribution>,
    ) -> Option<f64> {
        if !self.is_active() {
            return Some(0.0);
        }
        let params = self.state.options.simulation.as_ref()?;
        let distribution = pick(params)?;
        Some(distribution.sample(&mut rand::thread_rng()))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rorg_model::SimulationParameters;

    /// Shorthand for tests.
    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    #[test]
    fn container_names_are_bijective() {
        assert_eq!(
            container_name("rorg__", &sid("base:roscore")),
            "rorg__base_roscore"
        );
        assert_eq!(
            container_name("rorg__", &sid("base/nav:amcl")),
            "rorg__base__nav_amcl"
        );
        // Underscores in components cannot collide with the separators:
        // the namespace joiner is double, the name joiner single, and
        // both ids here remain distinct.
        assert_ne!(
            container_name("rorg__", &sid("a/b:c")),
            container_name("rorg__", &sid("a:b__c"))
        );
    }

    #[test]
    fn docker_option_validation() {
        let mut opts = ServiceOptions::minimal(sid("a:x"), ServiceType::Docker);
        assert!(validate_docker_options(&opts).is_err());

        opts.docker = Some(DockerContainerOptions {
            image: "busybox".to_owned(),
            ..Default::default()
        });
        assert!(validate_docker_options(&opts).is_ok());

        opts.docker.as_mut().unwrap().auto_remove = Some(true);
        assert!(validate_docker_options(&opts).is_err());
        let docker = opts.docker.as_mut().unwrap();
        docker.auto_remove = Some(false);
        docker.remove = Some(true);
        assert!(validate_docker_options(&opts).is_err());
    }

    #[test]
    fn meta_services_cannot_opt_out_of_disable_deactivate() {
        let options = ServiceOptions::minimal(ServiceId::operator(), ServiceType::Meta);
        let service = Service::create_meta(options);
        assert!(service.state.options.disable_deactivate);
        assert!(service.is_active());
    }

    #[test]
    fn inactive_simulated_usage_is_zero() {
        let mut options = ServiceOptions::minimal(sid("a:x"), ServiceType::Docker);
        options.simulation = Some(SimulationParameters {
            cpu_usage: Some(UsageDistribution::Fixed { value: 2.0 }),
            memory_usage: Some(UsageDistribution::Fixed { value: 512.0 }),
        });
        let mut service = Service {
            state: ServiceState::initial(options, ServiceStatus::Stopped),
            backend: Backend::Group,
        };
        assert_eq!(service.simulated_cpu_usage(), Some(0.0));
        assert_eq!(service.simulated_memory_usage(), Some(0));

        service.state.status = ServiceStatus::Active;
        assert_eq!(service.simulated_cpu_usage(), Some(2.0));
        assert_eq!(service.simulated_memory_usage(), Some(512));
    }

    #[test]
    fn unparameterized_simulation_reports_nothing() {
        let options = ServiceOptions::minimal(sid("a:x"), ServiceType::Docker);
        let mut service = Service {
            state: ServiceState::initial(options, ServiceStatus::Stopped),
            backend: Backend::Group,
        };
        service.state.status = ServiceStatus::Active;
        assert_eq!(service.simulated_cpu_usage(), None);
        assert_eq!(service.simulated_memory_usage(), None);
    }
}
