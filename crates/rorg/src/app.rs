//! Defines the command line interface for the rorg server.

#![allow(clippy::missing_docs_in_private_items)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use rorg_docker::{ContainerDriver, DockerRuntime, SimulatedRuntime};
use rorg_manager::{Drivers, ManagerConfig, ServiceManager, StatsRefresher};
use rorg_rpc::{HostStatsCache, ServiceManagerRpc};
use tokio::sync::Mutex;
use tracing::info;

use crate::logging;
use crate::server;

/// Entrypoint to the rorg server CLI.
#[derive(Debug, Parser)]
#[clap(about = "Dependency-driven service orchestrator for a single host")]
pub(crate) struct App {
    /// Base path to store .service_state files.
    ///
    /// The default under /tmp is convenient for development; point this
    /// at persistent storage for anything that matters.
    #[clap(long, value_name = "PATH", default_value = "/tmp/RorgStorage")]
    storage_base_path: PathBuf,

    /// Name prefix for managed containers.
    #[clap(long, value_name = "PREFIX", default_value = "rorg__")]
    container_name_prefix: String,

    /// Time (in seconds) that one container stats reading stays valid.
    #[clap(long, value_name = "SECS", default_value_t = 5.0)]
    docker_stats_valid_time: f64,

    /// Number of concurrent workers in the background stats sweep.
    #[clap(long, value_name = "N", default_value_t = 40)]
    refresh_stats_num_threads: usize,

    /// Minimal time gap (in seconds) between full stats sweeps.
    #[clap(long, value_name = "SECS", default_value_t = 1)]
    minimal_time_secs_between_refresh_stats: u64,

    /// Address to listen on for RPC connections.
    #[clap(long, value_name = "ADDR", default_value = "[::]:7016")]
    listen: SocketAddr,

    /// Override the log level.
    ///
    /// Usually one of 'trace', 'debug', 'info', 'warn', 'error'.
    #[clap(short, long, value_name = "FILTER")]
    log_level: Option<String>,
}

impl App {
    pub(crate) async fn run(self) -> anyhow::Result<()> {
        logging::setup(self.log_level.as_deref());

        let real: Arc<dyn ContainerDriver> = Arc::new(
            DockerRuntime::from_local_defaults()
                .map_err(|e| anyhow!("could not connect to the container runtime: {}", e))?,
        );
        let drivers = Drivers {
            real,
            simulated: Arc::new(SimulatedRuntime::new()),
        };
        let config = ManagerConfig {
            storage_base_path: self.storage_base_path.clone(),
            container_name_prefix: self.container_name_prefix.clone(),
            docker_stats_valid_time: Duration::from_secs_f64(self.docker_stats_valid_time),
            refresh_stats_num_threads: self.refresh_stats_num_threads,
            minimal_time_between_refresh_stats: Duration::from_secs(
                self.minimal_time_secs_between_refresh_stats,
            ),
        };

        let mut manager = ServiceManager::new(config.clone(), drivers);
        manager
            .load_from_disk()
            .await
            .map_err(|e| anyhow!("could not load state from disk: {}", e))?;
        manager.create_meta_operator();
        manager
            .write_to_disk()
            .map_err(|e| anyhow!("could not write state to disk: {}", e))?;
        let manager = Arc::new(Mutex::new(manager));

        let refresher = StatsRefresher::launch(
            Arc::downgrade(&manager),
            config.refresh_stats_num_threads,
            config.minimal_time_between_refresh_stats,
        );
        let host_stats = HostStatsCache::start(Duration::from_secs(1));
        let rpc = Arc::new(ServiceManagerRpc::new(
            Arc::clone(&manager),
            Arc::clone(&host_stats),
        ));

        info!("server started");
        let outcome = server::serve(self.listen, rpc)
            .await
            .context("RPC server failed");

        refresher.shutdown().await;
        host_stats.stop();
        outcome
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::App;
    use clap::Parser;

    #[test]
    fn parse_command_lines() {
        for input in [
            vec!["rorg"],
            vec!["rorg", "--storage-base-path", "/var/lib/rorg"],
            vec!["rorg", "--listen", "127.0.0.1:7016", "-l", "debug"],
            vec!["rorg", "--docker-stats-valid-time", "2.5"],
        ] {
            App::try_parse_from(input).expect("invalid input");
        }
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let app = App::try_parse_from(["rorg"]).unwrap();
        assert_eq!(app.storage_base_path.to_str(), Some("/tmp/RorgStorage"));
        assert_eq!(app.container_name_prefix, "rorg__");
        assert_eq!(app.docker_stats_valid_time, 5.0);
        assert_eq!(app.refresh_stats_num_threads, 40);
        assert_eq!(app.minimal_time_secs_between_refresh_stats, 1);
        assert_eq!(app.listen.port(), 7016);
    }
}
