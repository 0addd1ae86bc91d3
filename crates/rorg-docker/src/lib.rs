//! `rorg-docker`: Container runtime drivers for the rorg service
//! orchestrator.
//!
//! # Overview
//!
//! The orchestrator manages containers through the capability set in
//! [`ContainerDriver`]: create, look up, start, stop, restart, remove,
//! and read resource statistics.  Containers are addressed by the name
//! the orchestrator assigned at creation time; the naming convention is
//! a bijection, so a name is as good as a handle.
//!
//! Two implementations exist:
//!
//! * [`DockerRuntime`] forwards every call to the host's Docker daemon.
//! * [`SimulatedRuntime`] keeps an in-memory table of pretend
//!   containers, for tests and for services whose run mode is
//!   `Simulation`.
//!
//! Each is constructed once at process start and shared behind
//! `Arc<dyn ContainerDriver>`; the registry picks one per service based
//! on the service's run mode.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::unwrap_used)]

mod real;
mod sim;
mod stats;

use async_trait::async_trait;
use rorg_model::DockerContainerOptions;

pub use real::DockerRuntime;
pub use sim::SimulatedRuntime;
pub use stats::{ContainerStats, CpuStats, CpuUsage, MemoryStats, StatsCell};

/// An error from a container runtime driver.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The named container does not exist.
    #[error("container {0} not found")]
    NotFound(String),

    /// Any other runtime failure, with the runtime's own message.
    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// A `Result` as returned by container drivers.
pub type Result<T> = std::result::Result<T, Error>;

/// The capability set the orchestrator needs from a container runtime.
///
/// All operations address containers by the orchestrator-assigned name.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Materialize a container under `name` from the given options.
    ///
    /// Fails if a container with that name already exists.
    async fn create(&self, name: &str, options: &DockerContainerOptions) -> Result<()>;

    /// Return whether a container with this name exists (in any state).
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Start the named container.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop the named container.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Restart the named container without touching its configuration.
    async fn restart(&self, name: &str) -> Result<()>;

    /// Remove the named container; `force` also removes a running one.
    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Fetch one resource-usage snapshot for the named container.
    async fn stats(&self, name: &str) -> Result<ContainerStats>;
}
