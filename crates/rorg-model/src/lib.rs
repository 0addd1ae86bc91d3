//! `rorg-model`: Data model for the rorg service orchestrator.
//!
//! # Overview
//!
//! This crate defines the value types the orchestrator core operates on:
//!
//! * [`ServiceId`]: a namespace path plus a name, e.g. `base/nav:roscore`.
//! * [`ServiceRequestId`] and [`ServiceRequest`]: a live claim, issued by
//!   one service, on a set of other services.
//! * [`ServiceOptions`]: the declarative configuration submitted at
//!   create/update time.
//! * [`ServiceState`]: the authoritative runtime record persisted for
//!   each service; it alone is sufficient to reconstruct the service
//!   after a restart.
//! * [`DelayedAction`]: a token for a wait-until-ready condition that a
//!   caller may choose to block on, or hand back to the client.
//!
//! Everything here is plain data with `serde` support; the behavior that
//! manipulates these records lives in `rorg-manager`.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::unwrap_used)]

mod action;
mod id;
mod options;
mod request;
mod state;

pub use action::DelayedAction;
pub use id::ServiceId;
pub use options::{
    ContainerCommand, DockerContainerOptions, GroupOptions, ReadyDetection, RunMode, ServiceOptions,
    ServiceType, SimulationParameters, UsageDistribution,
};
pub use request::{ServiceRequest, ServiceRequestId, IMPLIED_REQUEST_UUID};
pub use state::{ContainerStatus, DockerServiceState, ServiceState, ServiceStatus};
