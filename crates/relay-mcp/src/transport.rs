//! Stdio transport for MCP server communication.
//!
//! Spawns a child process and manages async communication over stdin/stdout
//! using newline-delimited JSON-RPC messages.

use crate::config::ServerSpec;
use crate::error::McpError;
use crate::jsonrpc::{Incoming, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// In-flight requests keyed by id. Once `closed` is set no new entry is accepted.
#[derive(Default)]
struct PendingRequests {
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: bool,
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    server: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: Arc<Mutex<PendingRequests>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Child,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn the server process and start background reader/writer tasks.
    ///
    /// The child is killed if the transport is dropped without `shutdown`.
    pub fn spawn(spec: &ServerSpec) -> Result<Self, McpError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: spec.name.clone(),
            source: e,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin was not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout was not captured".into()))?;

        let pending = Arc::new(Mutex::new(PendingRequests::default()));

        // Writer task: drains channel and writes to child stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        // Reader task. Holds only a weak sender so dropping `write_tx` still closes stdin.
        let reply_tx = write_tx.downgrade();
        let pending_for_reader = Arc::clone(&pending);
        let server = spec.name.clone();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match Incoming::parse(&line) {
                    Ok(Incoming::Response(resp)) => {
                        let Some(id) = resp.id else { continue };
                        let mut pending = pending_for_reader.lock().await;
                        if let Some(tx) = pending.waiters.remove(&id) {
                            let _ = tx.send(resp);
                        }
                    }
                    Ok(Incoming::Request { id, method }) => {
                        let reply = if method == "ping" {
                            JsonRpcReply::result(id, serde_json::json!({}))
                        } else {
                            tracing::debug!("MCP server '{server}' sent unsupported request {method}");
                            JsonRpcReply::method_not_found(id, &method)
                        };
                        let Some(tx) = reply_tx.upgrade() else { break };
                        match serde_json::to_string(&reply) {
                            Ok(json) => {
                                let _ = tx.send(json).await;
                            }
                            Err(e) => tracing::warn!("Failed to encode reply to '{server}': {e}"),
                        }
                    }
                    Ok(Incoming::Notification { method }) => {
                        tracing::debug!("MCP server '{server}' notification: {method}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse line from MCP server '{server}': {e}: {line}");
                    }
                }
            }

            // EOF: fail every waiter now instead of letting it hit the timeout
            let mut pending = pending_for_reader.lock().await;
            pending.closed = true;
            pending.waiters.clear();
            tracing::debug!("MCP server '{server}' closed stdout");
        });

        Ok(Self {
            server: spec.name.clone(),
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            reader_handle,
            writer_handle,
            child,
            request_timeout: spec.request_timeout,
        })
    }

    /// Send a JSON-RPC request and wait for the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(self.closed());
            }
            pending.waiters.insert(id, tx);
        }

        if self.write_tx.send(serialized).await.is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(self.closed());
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(self.closed()),
            Err(_) => {
                self.pending.lock().await.waiters.remove(&id);
                Err(McpError::Timeout {
                    name: format!("{}/{method}", self.server),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| self.closed())
    }

    /// Close stdin, give the child `grace` to exit, then kill it.
    pub async fn shutdown(self, grace: Duration) -> Result<(), McpError> {
        drop(self.write_tx);
        let mut child = self.child;

        let outcome = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("MCP server '{}' exited with {status}", self.server);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(McpError::Io(e))
            }
            Err(_) => {
                tracing::debug!(
                    "MCP server '{}' did not exit within {}ms, killing",
                    self.server,
                    grace.as_millis()
                );
                child.kill().await.map_err(McpError::Io)
            }
        };

        self.reader_handle.abort();
        self.writer_handle.abort();
        outcome
    }

    fn closed(&self) -> McpError {
        McpError::ConnectionClosed {
            name: self.server.clone(),
        }
    }
}
