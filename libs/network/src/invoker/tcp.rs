//! TCP Remote Invoker
//!
//! Invocations travel as JSON documents in length-prefixed frames:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │ length (u32, BE)     │ JSON body (length bytes)     │
//! └──────────────────────┴──────────────────────────────┘
//! ```
//!
//! One request is in flight per connection; the response must echo the
//! request id. A failed or abandoned exchange drops the connection and the
//! next invocation reconnects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cluster_config::InvokerConfig;
use cluster_types::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{RemoteInvoker, RemoteInvokerProvider};
use crate::invocation::{FaultKind, Invocation, InvocationError};
use crate::{NetworkError, Result};

const ADDRESS_SCHEME: &str = "tcp://";

/// Request frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub request_id: u64,
    pub invocation: Invocation,
}

/// Terminal outcome carried by a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Result(Value),
    Error(InvocationError),
}

/// Response frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub request_id: u64,
    pub outcome: Outcome,
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len())
        .map_err(|_| NetworkError::protocol(format!("Frame of {} bytes too large", data.len())))?;

    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(data);

    writer
        .write_all(&frame)
        .await
        .map_err(|e| NetworkError::io("Failed to write frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| NetworkError::io("Failed to flush stream", e))?;
    Ok(())
}

/// Read one length-prefixed frame of at most `max_size` bytes
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| NetworkError::io("Failed to read frame length", e))?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_size {
        return Err(NetworkError::protocol(format!(
            "Frame size {} exceeds maximum {}",
            len, max_size
        )));
    }

    let mut body = BytesMut::zeroed(len);
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| NetworkError::io("Failed to read frame body", e))?;
    Ok(body.freeze())
}

/// `host:port` part of a `tcp://host:port` route address
fn socket_address(address: &str) -> Result<&str> {
    address
        .strip_prefix(ADDRESS_SCHEME)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            NetworkError::configuration(format!("Unsupported route address {:?}", address), Some("address"))
        })
}

/// Invoker speaking the framed JSON protocol over TCP
pub struct TcpRemoteInvoker {
    node_id: NodeId,
    config: InvokerConfig,
    address: parking_lot::Mutex<Option<String>>,
    connection: Mutex<Option<TcpStream>>,
    next_request: AtomicU64,
}

impl TcpRemoteInvoker {
    pub fn new(node_id: NodeId, config: InvokerConfig) -> Self {
        Self {
            node_id,
            config,
            address: parking_lot::Mutex::new(None),
            connection: Mutex::new(None),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn address(&self) -> Option<String> {
        self.address.lock().clone()
    }

    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let target = socket_address(address)?;
        let timeout = self.config.connect_timeout();

        let stream = tokio::time::timeout(timeout, TcpStream::connect(target))
            .await
            .map_err(|_| NetworkError::timeout("TCP connect", timeout.as_millis() as u64))?
            .map_err(|e| NetworkError::connection_with_source("Failed to connect", Some(address), e))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        Ok(stream)
    }

    async fn exchange(&self, stream: &mut TcpStream, request: &InvocationRequest) -> Result<InvocationResponse> {
        let body = serde_json::to_vec(request)?;
        write_frame(stream, &body).await?;

        let frame = read_frame(stream, self.config.max_frame_size).await?;
        let response: InvocationResponse = serde_json::from_slice(&frame)?;
        if response.request_id != request.request_id {
            return Err(NetworkError::protocol(format!(
                "Response id {} does not match request {}",
                response.request_id, request.request_id
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteInvoker for TcpRemoteInvoker {
    async fn start(&self, address: &str) -> Result<()> {
        if self.address.lock().is_some() {
            return Err(NetworkError::illegal_state("Invoker already started."));
        }

        let stream = self.connect(address).await?;
        *self.connection.lock().await = Some(stream);
        *self.address.lock() = Some(address.to_string());

        info!(node_id = %self.node_id, %address, "Remote invoker started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.address.lock().take();
        if let Some(mut stream) = self.connection.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                warn!("Error shutting down TCP connection: {}", e);
            }
            info!(node_id = %self.node_id, "Remote invoker stopped");
        }
        Ok(())
    }

    async fn invoke(&self, invocation: &Invocation) -> std::result::Result<Value, InvocationError> {
        let address = self.address().ok_or_else(|| {
            InvocationError::new(FaultKind::Transport, format!("Invoker for {} is not started", self.node_id))
        })?;

        let request = InvocationRequest {
            request_id: self.next_request.fetch_add(1, Ordering::Relaxed),
            invocation: invocation.clone(),
        };

        let mut connection = self.connection.lock().await;
        // a stop that ran while this call waited for the lock must not be undone
        if self.address.lock().is_none() {
            return Err(InvocationError::new(
                FaultKind::Transport,
                format!("Invoker for {} was stopped", self.node_id),
            ));
        }

        // the slot stays empty until the exchange completes, so an abandoned
        // call never leaves an unread response behind
        let mut stream = match connection.take() {
            Some(stream) => stream,
            None => {
                debug!(node_id = %self.node_id, "Reconnecting remote invoker");
                self.connect(&address).await?
            }
        };

        let timeout = self.config.request_timeout();
        let exchanged = tokio::time::timeout(timeout, self.exchange(&mut stream, &request))
            .await
            .unwrap_or_else(|_| Err(NetworkError::timeout("invocation", timeout.as_millis() as u64)));

        match exchanged {
            Ok(response) => {
                *connection = Some(stream);
                match response.outcome {
                    Outcome::Result(value) => Ok(value),
                    Outcome::Error(err) => Err(err),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Provider creating a TCP invoker per node
#[derive(Debug, Clone, Default)]
pub struct TcpInvokerProvider {
    config: InvokerConfig,
}

impl TcpInvokerProvider {
    pub fn new(config: InvokerConfig) -> Self {
        Self { config }
    }
}

impl RemoteInvokerProvider for TcpInvokerProvider {
    fn create(&self, node_id: &NodeId) -> Arc<dyn RemoteInvoker> {
        Arc::new(TcpRemoteInvoker::new(node_id.clone(), self.config.clone()))
    }
}
