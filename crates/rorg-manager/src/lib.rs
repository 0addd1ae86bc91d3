//! `rorg-manager`: Manage a set of long-running services on one host.
//!
//! # Overview
//!
//! This crate is the core of rorg, a dependency-driven service
//! orchestrator.  Clients *request* services; the [`ServiceManager`]
//! registry activates them and, transitively, everything they imply, and
//! tears each service down again when the last outstanding request on it
//! is released.  Three service variants exist: Docker-backed processes,
//! groups (co-activation sets), and always-active meta services that
//! stand in for external actors so their requests can be attributed.
//!
//! The registry is the single owner of all services.  Every mutation is
//! expected to run under one process-wide lock, and after each mutating
//! call [`ServiceManager::write_to_disk`] commits the authoritative
//! state to disk, from where [`ServiceManager::load_from_disk`] can
//! rebuild the registry after a restart.
//!
//! A background [`StatsRefresher`] keeps per-container resource
//! statistics warm without holding the registry lock during fetches.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::unwrap_used)]

mod graph;
mod mgr;
mod refresh;
mod service;
mod storage;

pub use mgr::{ManagerConfig, ServiceManager};
pub use refresh::{RefreshJob, StatsRefresher};
pub use service::{container_name, Drivers};

pub use rorg_error::{Error, Result};
