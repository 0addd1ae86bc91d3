//! The RPC facade: typed messages in, typed responses out.
//!
//! Every handler takes the single process-wide registry mutex for its
//! entire body, including persistence and (for `wait_for_ready`) the
//! readiness waits.  That serializes all RPCs (correctness over
//! throughput) and makes each mutating call atomic with its commit to
//! disk.

use std::sync::Arc;

use rorg_error::Result;
use rorg_manager::ServiceManager;
use rorg_model::DelayedAction;
use tokio::sync::Mutex;
use tracing::info;

use crate::host::HostStatsCache;
use crate::msgs::{CollectMethod, Method, ResponseBody, RpcRequest, RpcResponse};

/// Translates wire requests into registry calls.
pub struct ServiceManagerRpc {
    /// The registry, behind the single global mutex.
    manager: Arc<Mutex<ServiceManager>>,
    /// Cached host-wide resource readings.
    host_stats: Arc<HostStatsCache>,
}

impl ServiceManagerRpc {
    /// Build the facade over a registry and a host-stats cache.
    pub fn new(
        manager: Arc<Mutex<ServiceManager>>,
        host_stats: Arc<HostStatsCache>,
    ) -> ServiceManagerRpc {
        ServiceManagerRpc {
            manager,
            host_stats,
        }
    }

    /// Handle one request, translating any core error into a
    /// `(code, message)` response.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let RpcRequest { id, method } = request;
        match self.dispatch(method).await {
            Ok(body) => RpcResponse::ok(id, body),
            Err(e) => RpcResponse::error(id, &e),
        }
    }

    /// Run one method against the registry.
    async fn dispatch(&self, method: Method) -> Result<Option<ResponseBody>> {
        match method {
            Method::CreateService { options } => {
                info!("received create request: {}", options.id);
                let mut manager = self.manager.lock().await;
                let outcome = manager.create_service(options).await;
                commit(&manager, outcome)?;
                Ok(None)
            }
            Method::QueryService { id } => {
                info!("received query request: {}", id);
                let manager = self.manager.lock().await;
                let service_state = manager.query(&id)?;
                Ok(Some(ResponseBody::Service { service_state }))
            }
            Method::UpdateService { options } => {
                info!("received update request: {}", options.id);
                let mut manager = self.manager.lock().await;
                let outcome = manager.update_service(options).await;
                commit(&manager, outcome)?;
                Ok(None)
            }
            Method::RemoveService { id } => {
                info!("received remove request: {}", id);
                let mut manager = self.manager.lock().await;
                let outcome = manager.remove_service(&id).await;
                commit(&manager, outcome)?;
                Ok(None)
            }
            Method::RequestService {
                request,
                wait_for_ready,
            } => {
                info!("received service request: {}", request.id());
                let mut manager = self.manager.lock().await;
                let outcome = manager.request(request).await;
                let actions = commit(&manager, outcome)?;
                if wait_for_ready {
                    // Still under the registry mutex, deliberately: the
                    // whole handler is one linearizable step.
                    wait_all(&actions).await?;
                    Ok(None)
                } else {
                    Ok(Some(ResponseBody::DelayedActions {
                        delayed_actions: actions,
                    }))
                }
            }
            Method::ReleaseService { request_id } => {
                info!("received release request: {}", request_id);
                let mut manager = self.manager.lock().await;
                let outcome = manager.release(request_id).await;
                commit(&manager, outcome)?;
                Ok(None)
            }
            Method::ListServices => {
                let manager = self.manager.lock().await;
                Ok(Some(ResponseBody::Services {
                    services: manager.list_ids(),
                }))
            }
            Method::QueryServiceResourceUsage { id } => {
                info!("received resource query: {}", id);
                let manager = self.manager.lock().await;
                let cpu_usage = manager.service_cpu_usage(&id).await?;
                let memory_usage = manager.service_memory_usage(&id).await?;
                Ok(Some(ResponseBody::Usage {
                    cpu_usage,
                    memory_usage,
                }))
            }
            Method::QueryTotalResourceUsage { collect_method } => {
                let manager = self.manager.lock().await;
                let (cpu_usage, memory_usage) = match collect_method {
                    CollectMethod::SumIndividual => (
                        manager.collect_all_cpu_usage().await?,
                        manager.collect_all_memory_usage().await?,
                    ),
                    CollectMethod::Psutil => {
                        (self.host_stats.cpu_usage(), self.host_stats.memory_usage())
                    }
                };
                Ok(Some(ResponseBody::Usage {
                    cpu_usage: Some(cpu_usage),
                    memory_usage: Some(memory_usage),
                }))
            }
        }
    }
}

/// Commit after a mutating call and merge the outcomes.
///
/// The state is written to disk regardless of whether the call
/// succeeded (a failed call may still have advanced state it is
/// entitled to keep).  The call's own error wins; a failed write turns
/// an otherwise successful call into `INTERNAL`, because the commit did
/// not happen.
fn commit<T>(manager: &ServiceManager, outcome: Result<T>) -> Result<T> {
    let committed = manager.write_to_disk();
    let value = outcome?;
    committed?;
    Ok(value)
}

/// Wait for every returned delayed action in turn.
async fn wait_all(actions: &[DelayedAction]) -> Result<()> {
    for action in actions {
        action.wait().await?;
    }
    Ok(())
}
