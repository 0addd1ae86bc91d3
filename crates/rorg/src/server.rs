//! The TCP listener: newline-delimited JSON envelopes in, one JSON
//! response line out per request.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use rorg_rpc::{RpcRequest, RpcResponse, ServiceManagerRpc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Upper bound on concurrently executing RPC handlers.
///
/// Connections beyond this just queue; the registry mutex serializes
/// the handlers anyway, so the bound only caps queued work.
const MAX_CONCURRENT_RPCS: usize = 10;

/// Accept connections until interrupted.
pub(crate) async fn serve(addr: SocketAddr, rpc: Arc<ServiceManagerRpc>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {}", addr))?;
    info!("listening on {}", addr);
    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_RPCS));

    loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted.context("could not listen for shutdown signal")?;
                info!("interrupt received; shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("accept failed")?;
                debug!("connection from {}", peer);
                let rpc = Arc::clone(&rpc);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, rpc, permits).await {
                        debug!("connection from {} ended: {}", peer, e);
                    }
                });
            }
        }
    }
}

/// Serve one connection: requests are processed in order, each under an
/// execution permit.
async fn handle_connection(
    stream: TcpStream,
    rpc: Arc<ServiceManagerRpc>,
    permits: Arc<Semaphore>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let _permit = permits.acquire().await.ok();
                rpc.handle(request).await
            }
            Err(e) => RpcResponse::unparseable(&e),
        };
        match serde_json::to_vec(&response) {
            Ok(mut buf) => {
                buf.push(b'\n');
                writer.write_all(&buf).await?;
            }
            Err(e) => error!("could not serialize response: {}", e),
        }
    }
    Ok(())
}
