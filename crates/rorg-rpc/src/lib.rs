//! `rorg-rpc`: The RPC surface of the rorg service orchestrator.
//!
//! # Overview
//!
//! This crate defines the typed messages spoken on the wire
//! ([`RpcRequest`], [`RpcResponse`]) and the facade
//! ([`ServiceManagerRpc`]) that executes them against the registry.
//! The wire framing itself (a socket carrying one JSON envelope per
//! line) lives with the server binary; everything here works on the
//! typed forms.
//!
//! The [`HostStatsCache`] keeps a continuously sampled reading of
//! host-wide CPU and memory usage for `QueryTotalResourceUsage`.

#![warn(missing_docs)]
#![warn(noop_method_call)]
#![deny(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(clippy::unwrap_used)]

mod facade;
mod host;
mod msgs;

pub use facade::ServiceManagerRpc;
pub use host::HostStatsCache;
pub use msgs::{CollectMethod, Method, MsgId, ResponseBody, RpcRequest, RpcResponse};
