// pca/src/daemon/rpc.rs
use std::sync::Arc;

use pca_common::error::{PcaError, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::DaemonContext;
use crate::rpc::{
    write_line, ErrorCode, RpcRequest, RpcResponse, METHOD_LOCK, METHOD_RECONFIGURE,
    METHOD_UNLOCK,
};

pub async fn serve(listener: TcpListener, ctx: Arc<DaemonContext>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("RPC connection from {}", peer);
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &ctx).await {
                warn!("RPC connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, ctx: &Arc<DaemonContext>) -> Result<()> {
    let (read, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut held: Option<String> = None;

    let outcome: Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) => dispatch(ctx, request, &mut held).await,
                Err(e) => RpcResponse::err(0, ErrorCode::InvalidRequest, e.to_string()),
            };
            write_line(&mut writer, &response).await?;
        }
        Ok(())
    }
    .await;

    if let Some(holder) = held {
        warn!("RPC client {} disconnected while holding the operation lock, releasing it", holder);
        ctx.unlock(&holder).await;
    }
    outcome
}

/// `held` tracks the holder name this connection acquired the lock under.
async fn dispatch(
    ctx: &Arc<DaemonContext>,
    request: RpcRequest,
    held: &mut Option<String>,
) -> RpcResponse {
    let id = request.id;
    match request.method.as_str() {
        METHOD_LOCK => {
            let holder = request
                .params
                .get("holder")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            match ctx.lock().try_acquire(holder) {
                Ok(()) => {
                    *held = Some(holder.to_string());
                    info!("Operation lock taken by {}", holder);
                    RpcResponse::ok(id, json!({ "holder": holder }))
                }
                Err(PcaError::ServiceBusy(current)) => {
                    RpcResponse::err(id, ErrorCode::Busy, current)
                }
                Err(e) => RpcResponse::err(id, ErrorCode::Internal, e.to_string()),
            }
        }
        METHOD_UNLOCK => {
            match held.take() {
                Some(holder) => ctx.unlock(&holder).await,
                None => debug!("Unlock from a connection without the lock ignored"),
            }
            RpcResponse::ok(id, Value::Bool(true))
        }
        METHOD_RECONFIGURE => match ctx.reconfigure().await {
            Ok(()) => RpcResponse::ok(id, Value::Bool(true)),
            Err(e) => RpcResponse::err(id, ErrorCode::Internal, e.to_string()),
        },
        other => RpcResponse::err(
            id,
            ErrorCode::UnknownMethod,
            format!("unknown method '{other}'"),
        ),
    }
}
