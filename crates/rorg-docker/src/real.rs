//! The real driver: forwards every capability to the host's Docker
//! daemon via `bollard`.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::service::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rorg_model::{ContainerCommand, DockerContainerOptions};
use tracing::debug;

use crate::{ContainerDriver, ContainerStats, CpuStats, CpuUsage, Error, MemoryStats, Result};

/// Driver backed by the local Docker daemon.
///
/// Constructed once at process start; cheap to clone through the daemon
/// handle inside.
pub struct DockerRuntime {
    /// Connection to the daemon; `bollard` connects lazily.
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the platform's local defaults (Unix socket or named
    /// pipe).
    pub fn from_local_defaults() -> Result<DockerRuntime> {
        let docker = Docker::connect_with_local_defaults().map_err(runtime_error)?;
        Ok(DockerRuntime { docker })
    }
}

/// Map a `bollard` error onto the driver error type, preserving the
/// not-found distinction.
fn runtime_error(e: bollard::errors::Error) -> Error {
    Error::Runtime(e.to_string())
}

/// Like [`runtime_error`], but a 404 for `name` becomes [`Error::NotFound`].
fn container_error(name: &str, e: bollard::errors::Error) -> Error {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => Error::NotFound(name.to_owned()),
        other => runtime_error(other),
    }
}

/// Wrap a vector option the way `bollard` expects: `None` when empty.
fn non_empty(v: &[String]) -> Option<Vec<String>> {
    if v.is_empty() {
        None
    } else {
        Some(v.to_vec())
    }
}

/// Translate the declarative container options into a runtime creation
/// request.
fn container_config(options: &DockerContainerOptions) -> Config<String> {
    let cmd = options.command.as_ref().map(|command| match command {
        ContainerCommand::Exec(argv) => argv.clone(),
        ContainerCommand::Shell(line) => {
            vec!["/bin/sh".to_owned(), "-c".to_owned(), line.clone()]
        }
        _ => unreachable!("ContainerCommand has no other variants"),
    });
    let labels = if options.labels.is_empty() {
        None
    } else {
        Some(options.labels.clone().into_iter().collect())
    };
    let host_config = HostConfig {
        binds: non_empty(&options.binds),
        network_mode: options.network_mode.clone(),
        privileged: options.privileged,
        cap_add: non_empty(&options.cap_add),
        cap_drop: non_empty(&options.cap_drop),
        dns: non_empty(&options.dns),
        auto_remove: options.auto_remove,
        ..Default::default()
    };
    Config {
        image: Some(options.image.clone()),
        cmd,
        entrypoint: options.entrypoint.clone(),
        env: non_empty(&options.env),
        user: options.user.clone(),
        working_dir: options.working_dir.clone(),
        hostname: options.hostname.clone(),
        labels,
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerDriver for DockerRuntime {
    async fn create(&self, name: &str, options: &DockerContainerOptions) -> Result<()> {
        debug!("creating container {}", name);
        let create_options = CreateContainerOptions {
            name: name.to_owned(),
            platform: None,
        };
        self.docker
            .create_container(Some(create_options), container_config(options))
            .await
            .map_err(runtime_error)?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match container_error(name, e) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        debug!("starting container {}", name);
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| container_error(name, e))
    }

    async fn stop(&self, name: &str) -> Result<()> {
        debug!("stopping container {}", name);
        self.docker
            .stop_container(name, None::<StopContainerOptions>)
            .await
            .map_err(|e| container_error(name, e))
    }

    async fn restart(&self, name: &str) -> Result<()> {
        debug!("restarting container {}", name);
        self.docker
            .restart_container(name, None::<RestartContainerOptions>)
            .await
            .map_err(|e| container_error(name, e))
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        debug!("removing container {} (force={})", name, force);
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| container_error(name, e))
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let stream = self.docker.stats(name, Some(options));
        futures::pin_mut!(stream);
        match stream.next().await {
            Some(Ok(stats)) => Ok(convert_stats(stats)),
            Some(Err(e)) => Err(container_error(name, e)),
            None => Err(Error::Runtime(format!(
                "stats stream for {} ended without a sample",
                name
            ))),
        }
    }
}

/// Reduce the daemon's stats record to the fields the orchestrator
/// consumes.
fn convert_stats(stats: bollard::container::Stats) -> ContainerStats {
    ContainerStats {
        read: DateTime::parse_from_rfc3339(&stats.read)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        cpu_stats: CpuStats {
            cpu_usage: CpuUsage {
                total_usage: stats.cpu_stats.cpu_usage.total_usage,
                percpu_usage: stats.cpu_stats.cpu_usage.percpu_usage,
            },
            system_cpu_usage: stats.cpu_stats.system_cpu_usage,
        },
        precpu_stats: CpuStats {
            cpu_usage: CpuUsage {
                total_usage: stats.precpu_stats.cpu_usage.total_usage,
                percpu_usage: stats.precpu_stats.cpu_usage.percpu_usage,
            },
            system_cpu_usage: stats.precpu_stats.system_cpu_usage,
        },
        memory_stats: MemoryStats {
            usage: stats.memory_stats.usage,
        },
    }
}
