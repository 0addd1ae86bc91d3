//! Declarative service configuration, as submitted at create/update time.

use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::ServiceId;

/// The kind of a managed service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ServiceType {
    /// A containerized long-running process.
    Docker,
    /// A set of services to be co-activated.
    Group,
    /// An always-active stand-in for an external actor.
    Meta,
}

/// Whether a service runs against the real container runtime or the
/// in-process simulator.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RunMode {
    /// Drive the host's container runtime.
    #[default]
    Real,
    /// Drive the in-process simulator.
    Simulation,
}

/// How to decide that an activated service is ready for use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReadyDetection {
    /// Consider the service ready a fixed time after activation.
    WaitFixedTime {
        /// Seconds to wait after the activation call.
        secs: f64,
    },
    /// Wait for a prober service to report readiness.  Accepted in the
    /// options but not implemented; activation refuses it.
    WaitForProber {
        /// The prober service to consult.
        prober: ServiceId,
    },
}

/// A distribution to sample simulated resource usage from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum UsageDistribution {
    /// Normal distribution, parameterized by mean and variance.
    Gaussian {
        /// The mean of the distribution.
        mean: f64,
        /// The variance (not the standard deviation).
        variance: f64,
    },
    /// A fixed value.
    Fixed {
        /// The value to report every time.
        value: f64,
    },
}

impl UsageDistribution {
    /// Draw one sample.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            UsageDistribution::Gaussian { mean, variance } => {
                match Normal::new(mean, variance.max(0.0).sqrt()) {
                    Ok(normal) => normal.sample(rng),
                    // Only reachable for non-finite parameters.
                    Err(_) => mean,
                }
            }
            UsageDistribution::Fixed { value } => value,
        }
    }
}

/// Simulated resource usage of a service, sampled while it is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationParameters {
    /// Simulated CPU usage, in logical-core units.
    pub cpu_usage: Option<UsageDistribution>,
    /// Simulated memory usage, in bytes.
    pub memory_usage: Option<UsageDistribution>,
}

/// The form of a container's main command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ContainerCommand {
    /// Exec form: argv passed to the runtime verbatim.
    Exec(Vec<String>),
    /// Shell form: a single string run through `/bin/sh -c`.
    Shell(String),
}

/// Declarative options for the container behind a Docker service.
///
/// This is the supported subset of the runtime's creation surface; the
/// orchestrator owns the container's name and lifecycle, which is why
/// `auto_remove` and `remove` are rejected at create time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DockerContainerOptions {
    /// Image reference, e.g. `ros:noetic`.
    pub image: String,
    /// Main command, in exec or shell form.
    pub command: Option<ContainerCommand>,
    /// Entrypoint override.
    pub entrypoint: Option<Vec<String>>,
    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,
    /// User to run as.
    pub user: Option<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Container hostname.
    pub hostname: Option<String>,
    /// Network mode, e.g. `host`.
    pub network_mode: Option<String>,
    /// Run with extended privileges.
    pub privileged: Option<bool>,
    /// Bind mounts in `host:container[:mode]` form.
    pub binds: Vec<String>,
    /// Capabilities to add.
    pub cap_add: Vec<String>,
    /// Capabilities to drop.
    pub cap_drop: Vec<String>,
    /// DNS servers.
    pub dns: Vec<String>,
    /// Remove the container when it exits.  Not supported; the
    /// orchestrator must keep managing the container.
    pub auto_remove: Option<bool>,
    /// Remove the container after run.  Not supported, as above.
    pub remove: Option<bool>,
    /// Labels to attach to the container.
    ///
    /// Kept last: this is the one field that serializes as a TOML table.
    pub labels: BTreeMap<String, String>,
}

/// Members of a group service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GroupOptions {
    /// The services this group co-activates.
    pub grouped_services: Vec<ServiceId>,
}

/// Declarative configuration for one service.
///
/// Echoed back verbatim inside the persisted [`crate::ServiceState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// The service's identity.
    pub id: ServiceId,
    /// The service's kind.
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    /// Whether the service may be activated at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Refuse non-forced deactivation.
    #[serde(default)]
    pub disable_deactivate: bool,
    /// Real runtime or in-process simulation.
    #[serde(default)]
    pub run_mode: RunMode,
    /// Services this one requests whenever it is active.
    #[serde(default)]
    pub implied_dependencies: Vec<ServiceId>,
    /// How to decide the service is ready after activation.
    #[serde(default)]
    pub ready_detection: Option<ReadyDetection>,
    /// Container options; required for Docker services.
    #[serde(default)]
    pub docker: Option<DockerContainerOptions>,
    /// Group membership; used by Group services.
    #[serde(default)]
    pub group: Option<GroupOptions>,
    /// Simulated resource usage; used when `run_mode` is `Simulation`.
    #[serde(default)]
    pub simulation: Option<SimulationParameters>,
}

/// Services are enabled unless configured otherwise.
fn default_enabled() -> bool {
    true
}

impl ServiceOptions {
    /// A minimal options record of the given type, with everything else
    /// defaulted.
    pub fn minimal(id: ServiceId, service_type: ServiceType) -> ServiceOptions {
        ServiceOptions {
            id,
            service_type,
            enabled: true,
            disable_deactivate: false,
            run_mode: RunMode::default(),
            implied_dependencies: Vec::new(),
            ready_detection: None,
            docker: None,
            group: None,
            simulation: None,
        }
    }

    /// The ids this service depends on: implied dependencies plus, for a
    /// group, its members.
    pub fn dependency_edges(&self) -> impl Iterator<Item = &ServiceId> {
        self.implied_dependencies.iter().chain(
            self.group
                .iter()
                .flat_map(|g| g.grouped_services.iter()),
        )
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    /// Shorthand for tests.
    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    #[test]
    fn fixed_distribution_samples_exactly() {
        let mut rng = rand::thread_rng();
        let d = UsageDistribution::Fixed { value: 0.75 };
        assert_eq!(d.sample(&mut rng), 0.75);
    }

    #[test]
    fn gaussian_with_zero_variance_is_the_mean() {
        let mut rng = rand::thread_rng();
        let d = UsageDistribution::Gaussian {
            mean: 2.5,
            variance: 0.0,
        };
        for _ in 0..8 {
            assert!((d.sample(&mut rng) - 2.5).abs() < 1e-9);
        }
    }

    #[test]
    fn gaussian_samples_near_the_mean() {
        let mut rng = rand::thread_rng();
        let d = UsageDistribution::Gaussian {
            mean: 100.0,
            variance: 1.0,
        };
        // 12-sigma slack: effectively impossible to flake.
        for _ in 0..8 {
            let x = d.sample(&mut rng);
            assert!((x - 100.0).abs() < 12.0, "sample {} too far out", x);
        }
    }

    #[test]
    fn minimal_defaults() {
        let opts = ServiceOptions::minimal(sid("a:b"), ServiceType::Group);
        assert!(opts.enabled);
        assert!(!opts.disable_deactivate);
        assert_eq!(opts.run_mode, RunMode::Real);
        assert!(opts.implied_dependencies.is_empty());
    }

    #[test]
    fn dependency_edges_cover_implied_and_grouped() {
        let mut opts = ServiceOptions::minimal(sid("a:g"), ServiceType::Group);
        opts.implied_dependencies = vec![sid("a:x")];
        opts.group = Some(GroupOptions {
            grouped_services: vec![sid("a:y"), sid("a:z")],
        });
        let edges: Vec<String> = opts.dependency_edges().map(ToString::to_string).collect();
        assert_eq!(edges, ["a:x", "a:y", "a:z"]);
    }

    #[test]
    fn options_parse_from_sparse_json() {
        let json = r#"{
            "id": "base:roscore",
            "type": "docker",
            "docker": { "image": "ros:noetic" }
        }"#;
        let opts: ServiceOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.service_type, ServiceType::Docker);
        assert!(opts.enabled);
        assert_eq!(opts.docker.unwrap().image, "ros:noetic");
    }

    #[test]
    fn options_toml_round_trip() {
        let mut opts = ServiceOptions::minimal(sid("base:trigger_ui"), ServiceType::Docker);
        opts.run_mode = RunMode::Simulation;
        opts.implied_dependencies = vec![sid("base:roscore")];
        opts.ready_detection = Some(ReadyDetection::WaitFixedTime { secs: 1.5 });
        opts.docker = Some(DockerContainerOptions {
            image: "cogrob/trigger-ui".to_owned(),
            command: Some(ContainerCommand::Exec(vec![
                "roslaunch".to_owned(),
                "trigger_ui".to_owned(),
            ])),
            env: vec!["ROS_MASTER_URI=http://localhost:11311".to_owned()],
            ..Default::default()
        });
        opts.simulation = Some(SimulationParameters {
            cpu_usage: Some(UsageDistribution::Gaussian {
                mean: 0.2,
                variance: 0.01,
            }),
            memory_usage: Some(UsageDistribution::Fixed { value: 64e6 }),
        });

        let text = toml::to_string(&opts).unwrap();
        let back: ServiceOptions = toml::from_str(&text).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn shell_and_exec_commands_deserialize() {
        let exec: ContainerCommand = serde_json::from_str(r#"["roscore"]"#).unwrap();
        assert_eq!(exec, ContainerCommand::Exec(vec!["roscore".to_owned()]));
        let shell: ContainerCommand = serde_json::from_str(r#""roscore -v""#).unwrap();
        assert_eq!(shell, ContainerCommand::Shell("roscore -v".to_owned()));
    }
}
