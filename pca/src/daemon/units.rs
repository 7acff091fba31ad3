// pca/src/daemon/units.rs
use std::sync::Arc;
use std::time::Duration;

use pca_common::error::{PcaError, Result};
use pca_core::ScheduledTask;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::DaemonContext;
use crate::cli;

const LOG_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const REMOTE_COMMAND_HOLDER: &str = "remote command";

pub fn http_listener(ctx: Arc<DaemonContext>, addr: String) -> ScheduledTask {
    let name = addr.clone();
    ScheduledTask::once("http listener", move || {
        let ctx = Arc::clone(&ctx);
        let addr = addr.clone();
        async move {
            let listener = TcpListener::bind(&addr).await?;
            info!("HTTP listener on {}", addr);
            axum::serve(listener, super::http::router(ctx)).await?;
            Ok::<(), PcaError>(())
        }
    })
    .with_cleanup(move || async move {
        debug!("HTTP listener on {} closed", name);
        Ok(())
    })
}

pub fn rpc_listener(ctx: Arc<DaemonContext>, addr: String) -> ScheduledTask {
    let name = addr.clone();
    ScheduledTask::once("rpc listener", move || {
        let ctx = Arc::clone(&ctx);
        let addr = addr.clone();
        async move {
            let listener = TcpListener::bind(&addr).await?;
            info!("RPC listener on {}", addr);
            super::rpc::serve(listener, ctx).await
        }
    })
    .with_cleanup(move || async move {
        debug!("RPC listener on {} closed", name);
        Ok(())
    })
}

pub fn remote_commands(ctx: Arc<DaemonContext>, interval: Duration) -> ScheduledTask {
    ScheduledTask::new("remote commands", interval, move || {
        let ctx = Arc::clone(&ctx);
        async move { execute_next_command(&ctx).await }
    })
}

pub fn log_flush(ctx: Arc<DaemonContext>) -> ScheduledTask {
    ScheduledTask::new("log flush", LOG_FLUSH_INTERVAL, move || {
        let ctx = Arc::clone(&ctx);
        async move {
            let control = ctx.control().await;
            let sent = ctx.log_buffer().await.flush(control.as_ref()).await?;
            if sent > 0 {
                info!("Delivered {} buffered log event(s)", sent);
            }
            Ok::<(), PcaError>(())
        }
    })
}

/// Pulls one queued command and runs it under the operation lock.
///
/// A busy lock skips this tick without contacting the control plane.
async fn execute_next_command(ctx: &DaemonContext) -> Result<()> {
    let _lease = match ctx.lock().lease(REMOTE_COMMAND_HOLDER) {
        Ok(lease) => lease,
        Err(PcaError::ServiceBusy(holder)) => {
            debug!("Skipping remote command poll, lock held by {}", holder);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let mut agent = ctx.agent().lock().await;
    let Some(command) = agent.next_remote_command().await? else {
        debug!("No remote command queued");
        return Ok(());
    };
    info!("Executing remote command #{}: {}", command.id, command.command);
    agent.set_trigger_command(Some(command.id));
    let outcome = cli::run_remote(&command.command, &mut agent).await;
    agent.set_trigger_command(None);
    ctx.refresh_view(&agent).await;

    if let Err(e) = &outcome {
        if e.is_fatal() {
            error!("Remote command #{} failed fatally: {}", command.id, e);
            std::process::exit(crate::FATAL_EXIT_CODE);
        }
    }
    outcome
}
