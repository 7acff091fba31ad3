// pca/src/rpc.rs
//! Newline-delimited JSON calls between CLI processes and the daemon.
//!
//! Each request is one line `{"id", "method", "params"}`; the daemon answers
//! with one line carrying either `result` or `error`.
use std::time::Duration;

use pca_common::error::{PcaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub const METHOD_LOCK: &str = "lock";
pub const METHOD_UNLOCK: &str = "unlock";
pub const METHOD_RECONFIGURE: &str = "reconfigure";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Busy,
    InvalidRequest,
    UnknownMethod,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(RpcError {
                code: ErrorCode::Busy,
                message,
            }) => Err(PcaError::ServiceBusy(message)),
            Some(RpcError { code, message }) => {
                Err(PcaError::Rpc(format!("{code:?}: {message}")))
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Writes `value` as one JSON line.
pub async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<()> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub struct RpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl RpcClient {
    /// Connects to the daemon, returning `None` when nothing listens on `addr`.
    pub async fn connect(addr: &str) -> Option<Self> {
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("No daemon reachable at {}: {}", addr, e);
                return None;
            }
            Err(_) => {
                debug!("Timed out connecting to daemon at {}", addr);
                return None;
            }
        };
        let (read, writer) = stream.into_split();
        Some(Self {
            lines: BufReader::new(read).lines(),
            writer,
            next_id: 1,
        })
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
        };
        write_line(&mut self.writer, &request).await?;
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| PcaError::Rpc("daemon closed the connection".to_string()))?;
        let response: RpcResponse = serde_json::from_str(&line)?;
        if response.id != id {
            return Err(PcaError::Rpc(format!(
                "response id {} does not match request {}",
                response.id, id
            )));
        }
        response.into_result()
    }

    pub async fn lock(&mut self, holder: &str) -> Result<()> {
        self.call(METHOD_LOCK, json!({ "holder": holder })).await?;
        Ok(())
    }

    pub async fn unlock(&mut self) -> Result<()> {
        self.call(METHOD_UNLOCK, Value::Null).await?;
        Ok(())
    }

    pub async fn reconfigure(&mut self) -> Result<()> {
        self.call(METHOD_RECONFIGURE, Value::Null).await?;
        Ok(())
    }
}

/// Operation lock held in the daemon for the lifetime of one CLI command.
///
/// Without a reachable daemon the session holds nothing.
pub struct LockSession {
    client: Option<RpcClient>,
}

impl LockSession {
    pub async fn acquire(addr: &str, holder: &str) -> Result<Self> {
        let Some(mut client) = RpcClient::connect(addr).await else {
            debug!("Running without the daemon lock");
            return Ok(Self { client: None });
        };
        client.lock(holder).await?;
        debug!("Acquired daemon lock as '{}'", holder);
        Ok(Self {
            client: Some(client),
        })
    }

    pub fn is_held(&self) -> bool {
        self.client.is_some()
    }

    pub async fn release(self) {
        if let Some(mut client) = self.client {
            if let Err(e) = client.unlock().await {
                warn!("Failed to release daemon lock: {}", e);
            }
        }
    }
}
