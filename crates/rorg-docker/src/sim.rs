//! The simulated driver: an in-memory table of pretend containers.
//!
//! Mirrors the observable behavior of the real driver closely enough
//! for the orchestrator's bookkeeping: name conflicts on create,
//! not-found on operations against unknown names, idempotent start and
//! stop.  The table lives only in this process, so after a restart the
//! registry re-creates whatever the loaded state says should exist.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rorg_model::DockerContainerOptions;
use tracing::trace;

use crate::{ContainerDriver, ContainerStats, Error, Result};

/// One simulated container.
#[derive(Debug, Default)]
struct SimContainer {
    /// Whether the pretend process is currently running.
    running: bool,
}

/// In-memory stand-in for a container runtime.
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    /// All simulated containers, by name.
    containers: Mutex<HashMap<String, SimContainer>>,
}

impl SimulatedRuntime {
    /// A new, empty simulated runtime.
    pub fn new() -> SimulatedRuntime {
        SimulatedRuntime::default()
    }

    /// Whether the named container exists and is running.  Test helper.
    pub fn is_running(&self, name: &str) -> bool {
        self.containers
            .lock()
            .expect("poisoned simulated-container table")
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ContainerDriver for SimulatedRuntime {
    async fn create(&self, name: &str, _options: &DockerContainerOptions) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .expect("poisoned simulated-container table");
        if containers.contains_key(name) {
            return Err(Error::Runtime(format!(
                "container name {} is already in use",
                name
            )));
        }
        trace!("simulated create: {}", name);
        containers.insert(name.to_owned(), SimContainer::default());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .containers
            .lock()
            .expect("poisoned simulated-container table")
            .contains_key(name))
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .expect("poisoned simulated-container table");
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        trace!("simulated start: {}", name);
        container.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .expect("poisoned simulated-container table");
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        trace!("simulated stop: {}", name);
        container.running = false;
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .expect("poisoned simulated-container table");
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        trace!("simulated restart: {}", name);
        container.running = true;
        Ok(())
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<()> {
        let mut containers = self
            .containers
            .lock()
            .expect("poisoned simulated-container table");
        containers
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        trace!("simulated remove: {}", name);
        Ok(())
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats> {
        // Simulated services derive their usage from their configured
        // distributions, never from the runtime.
        Err(Error::Runtime(format!(
            "stats are not available for simulated container {}",
            name
        )))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[tokio::test]
    async fn lifecycle() {
        let runtime = SimulatedRuntime::new();
        let options = DockerContainerOptions::default();

        runtime.create("rorg__base_roscore", &options).await.unwrap();
        assert!(runtime.exists("rorg__base_roscore").await.unwrap());
        assert!(!runtime.is_running("rorg__base_roscore"));

        runtime.start("rorg__base_roscore").await.unwrap();
        assert!(runtime.is_running("rorg__base_roscore"));

        runtime.restart("rorg__base_roscore").await.unwrap();
        assert!(runtime.is_running("rorg__base_roscore"));

        runtime.stop("rorg__base_roscore").await.unwrap();
        assert!(!runtime.is_running("rorg__base_roscore"));

        runtime.remove("rorg__base_roscore", false).await.unwrap();
        assert!(!runtime.exists("rorg__base_roscore").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_create_is_refused() {
        let runtime = SimulatedRuntime::new();
        let options = DockerContainerOptions::default();
        runtime.create("c", &options).await.unwrap();
        assert!(matches!(
            runtime.create("c", &options).await,
            Err(Error::Runtime(_))
        ));
    }

    #[tokio::test]
    async fn operations_on_unknown_names_are_not_found() {
        let runtime = SimulatedRuntime::new();
        assert!(matches!(runtime.start("nope").await, Err(Error::NotFound(_))));
        assert!(matches!(runtime.stop("nope").await, Err(Error::NotFound(_))));
        assert!(matches!(
            runtime.remove("nope", true).await,
            Err(Error::NotFound(_))
        ));
        assert!(!runtime.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn stats_are_unavailable() {
        let runtime = SimulatedRuntime::new();
        let options = DockerContainerOptions::default();
        runtime.create("c", &options).await.unwrap();
        assert!(matches!(runtime.stats("c").await, Err(Error::Runtime(_))));
    }
}
