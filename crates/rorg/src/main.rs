//! A dependency-driven service orchestrator for a single host.
//!
//! `rorg` manages the lifecycle of long-running services (primarily
//! Docker containers) through a request/release protocol: clients
//! request the services they want live, the orchestrator activates them
//! and everything they transitively depend on, and tears each service
//! down when the last outstanding request on it is released.
//!
//! The server listens for newline-delimited JSON requests on a TCP
//! socket (port 7016 by default) and persists all managed state under a
//! storage directory, from which it recovers after a restart.
//!
//! Run `rorg --help` for the available options.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![allow(clippy::print_stderr)] // Allowed in this crate only.
#![warn(clippy::unwrap_used)]

mod app;
mod logging;
mod server;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let app = app::App::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(app.run())
}
