//! The authoritative, persisted runtime record of a service.

use serde::{Deserialize, Serialize};

use crate::{ServiceId, ServiceOptions, ServiceRequest, ServiceRequestId, ServiceType};

/// Lifecycle status of a service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceStatus {
    /// Not running; holds no claims on other services.
    Stopped,
    /// Running (or, for a meta service, permanently live).
    Active,
    /// Mid-deactivation: claims are being released and the underlying
    /// process is about to stop.
    ToBeStopped,
}

/// Status of the container behind a Docker service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ContainerStatus {
    /// The container exists but is not running.
    Stopped,
    /// The container is running.
    Active,
}

/// Variant-specific persisted state for a Docker service.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DockerServiceState {
    /// Last status we drove the container to.
    pub container_status: ContainerStatus,
}

/// Authoritative runtime record for one service.
///
/// This record alone is sufficient to reconstruct the service after a
/// restart: the registry persists one `ServiceState` per service and
/// rebuilds each service from it on load.
//
// Field order matters for the TOML rendering: plain values first, then
// arrays-of-tables and tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    /// The service's identity.
    pub id: ServiceId,
    /// The service's kind.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Current lifecycle status.
    pub status: ServiceStatus,
    /// Claims other services (or the operator) hold on this one.
    //
    // Empty claim lists are omitted from the rendering; non-empty ones
    // become arrays of tables, which must not precede plain values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_by_others: Vec<ServiceRequestId>,
    /// Claims this service holds on others, at most one per request id.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests_by_self: Vec<ServiceRequest>,
    /// Echo of the options the service was created or last updated with.
    pub options: ServiceOptions,
    /// Docker-specific state; present only for Docker services.
    #[serde(default)]
    pub docker_state: Option<DockerServiceState>,
}

impl ServiceState {
    /// Build the initial state for a freshly created service.
    pub fn initial(options: ServiceOptions, status: ServiceStatus) -> ServiceState {
        let docker_state = match options.service_type {
            ServiceType::Docker => Some(DockerServiceState {
                container_status: ContainerStatus::Stopped,
            }),
            _ => None,
        };
        ServiceState {
            id: options.id.clone(),
            service_type: options.service_type,
            status,
            requested_by_others: Vec::new(),
            requests_by_self: Vec::new(),
            options,
            docker_state,
        }
    }

    /// True when the service is `Active`.
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    /// The request this service issues for its implied dependencies
    /// whenever it activates.
    pub fn implied_request(&self) -> ServiceRequest {
        ServiceRequest::new(
            ServiceRequestId::implied(self.id.clone()),
            self.options.implied_dependencies.clone(),
        )
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{DockerContainerOptions, GroupOptions, RunMode, IMPLIED_REQUEST_UUID};

    /// Shorthand for tests.
    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    #[test]
    fn initial_state_for_docker() {
        let mut opts = ServiceOptions::minimal(sid("base:roscore"), ServiceType::Docker);
        opts.docker = Some(DockerContainerOptions {
            image: "ros:noetic".to_owned(),
            ..Default::default()
        });
        let state = ServiceState::initial(opts, ServiceStatus::Stopped);
        assert_eq!(state.status, ServiceStatus::Stopped);
        assert!(!state.is_active());
        assert_eq!(
            state.docker_state.unwrap().container_status,
            ContainerStatus::Stopped
        );
    }

    #[test]
    fn initial_state_for_meta_has_no_docker_state() {
        let opts = ServiceOptions::minimal(ServiceId::operator(), ServiceType::Meta);
        let state = ServiceState::initial(opts, ServiceStatus::Active);
        assert!(state.is_active());
        assert!(state.docker_state.is_none());
    }

    #[test]
    fn implied_request_names_the_dependencies() {
        let mut opts = ServiceOptions::minimal(sid("base:trigger_ui"), ServiceType::Docker);
        opts.implied_dependencies = vec![sid("base:roscore"), sid("base:roscore")];
        let state = ServiceState::initial(opts, ServiceStatus::Stopped);
        let req = state.implied_request();
        assert_eq!(req.id().issuer(), &sid("base:trigger_ui"));
        assert_eq!(req.id().uuid(), IMPLIED_REQUEST_UUID);
        // Deduplicated on construction.
        assert_eq!(req.targets(), &[sid("base:roscore")]);
    }

    #[test]
    fn state_toml_round_trip() {
        let mut opts = ServiceOptions::minimal(sid("base/nav:amcl"), ServiceType::Docker);
        opts.run_mode = RunMode::Simulation;
        opts.implied_dependencies = vec![sid("base:roscore")];
        opts.docker = Some(DockerContainerOptions {
            image: "cogrob/amcl".to_owned(),
            ..Default::default()
        });
        let mut state = ServiceState::initial(opts, ServiceStatus::Active);
        state
            .requested_by_others
            .push(ServiceRequestId::new(ServiceId::operator(), "r1"));
        state.requests_by_self.push(state.implied_request());

        let text = toml::to_string(&state).unwrap();
        let back: ServiceState = toml::from_str(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn group_state_toml_round_trip() {
        let mut opts = ServiceOptions::minimal(sid("base:all"), ServiceType::Group);
        opts.group = Some(GroupOptions {
            grouped_services: vec![sid("base:roscore"), sid("base:trigger_ui")],
        });
        let state = ServiceState::initial(opts, ServiceStatus::Stopped);
        let text = toml::to_string(&state).unwrap();
        let back: ServiceState = toml::from_str(&text).unwrap();
        assert_eq!(back, state);
    }
}
