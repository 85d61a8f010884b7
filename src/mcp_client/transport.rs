//! JSON-RPC transports for MCP servers.
//!
//! Three ways to reach a server, selected by the descriptor's `transport`:
//! - `stdio`: child process, one JSON object per line on stdin/stdout
//! - `http`: streamable HTTP, one POST per message; the reply is either a
//!   JSON body or a short SSE stream, and `mcp-session-id` is echoed back
//! - `sse`: legacy HTTP+SSE, a long-lived GET stream whose first `endpoint`
//!   event names the URL to POST messages to; replies arrive on the stream
//!
//! Every transport releases its resource on drop (child killed, reader task
//! aborted), so an abandoned connect or call never leaks a process or socket.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::sse::{SseDecoder, SseEvent};
use super::types::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpServerConfig, McpTransportKind,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Grace period for a stdio server to exit after stdin closes.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP connect timeout for network transports. The connection manager's
/// connect timeout bounds the whole handshake on top of this.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const SESSION_HEADER: &str = "mcp-session-id";

// ─── Request ID Generator ────────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A JSON-RPC channel to one MCP server.
#[async_trait]
pub trait McpTransport: Send {
    /// Send a request and wait for the response with the matching id.
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError>;

    /// Release the underlying process or session.
    async fn close(&mut self) -> Result<(), McpError>;
}

/// Opens transports from server descriptors.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, config: &McpServerConfig) -> Result<Box<dyn McpTransport>, McpError>;
}

/// Picks the transport from `config.transport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, config: &McpServerConfig) -> Result<Box<dyn McpTransport>, McpError> {
        config.validate()?;
        match config.transport {
            McpTransportKind::Stdio => Ok(Box::new(StdioTransport::spawn(config)?)),
            McpTransportKind::Http => Ok(Box::new(HttpTransport::new(config)?)),
            McpTransportKind::Sse => Ok(Box::new(SseTransport::connect(config).await?)),
        }
    }
}

fn encode_line<T: serde::Serialize>(server: &str, message: &T) -> Result<String, McpError> {
    let mut json = serde_json::to_string(message).map_err(|e| McpError::TransportError {
        server: server.to_string(),
        reason: format!("failed to serialize message: {e}"),
    })?;
    json.push('\n');
    Ok(json)
}

fn http_client(server: &str) -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| McpError::TransportError {
            server: server.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

/// Parse an SSE `message` event as the response to `id`, if it is one.
fn response_from_event(server: &str, event: &SseEvent, id: u64) -> Option<JsonRpcResponse> {
    if !event.is_message() || event.data.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(resp) if resp.answers(id) => Some(resp),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(
                server = server,
                error = %e,
                "failed to parse SSE event data as JSON-RPC message"
            );
            None
        }
    }
}

// ─── Stdio ───────────────────────────────────────────────────────────────────

/// JSON-RPC over a child process's stdio.
pub struct StdioTransport {
    server: String,
    child: Child,
    /// `None` once closed; dropping stdin signals EOF to the server.
    writer: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl StdioTransport {
    /// Spawn the server process. The configured env is layered over the
    /// parent environment.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, McpError> {
        let command = config.command.as_deref().ok_or_else(|| McpError::ConfigError {
            reason: format!("server '{}': stdio transport requires 'command'", config.id),
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.id.clone(),
            reason: format!("{command}: {e}"),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: config.id.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: config.id.clone(),
            reason: "failed to capture stdout".into(),
        })?;

        // Forward stderr to the log so a chatty server never blocks on a full pipe
        if let Some(stderr) = child.stderr.take() {
            let server = config.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, stderr = %line, "mcp server stderr");
                }
            });
        }

        tracing::debug!(server = %config.id, command = %command, "spawned MCP server");

        Ok(Self {
            server: config.id.clone(),
            child,
            writer: Some(stdin),
            reader: BufReader::new(stdout),
        })
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportError {
            server: self.server.clone(),
            reason: reason.into(),
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), McpError> {
        let server = self.server.clone();
        let writer = self.writer.as_mut().ok_or_else(|| McpError::TransportError {
            server: server.clone(),
            reason: "transport is closed".into(),
        })?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportError {
                server: server.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::TransportError {
            server,
            reason: format!("failed to flush stdin: {e}"),
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let line = encode_line(&self.server, &JsonRpcRequest::new(id, method, params))?;
        self.write_line(&line).await?;

        // Read lines until the matching response; anything else (server
        // notifications, log output on stdout) is skipped.
        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error("server stdout closed (process may have exited)"));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.answers(id) => return Ok(resp),
                Ok(_) => continue,
                Err(_) => {
                    tracing::debug!(server = %self.server, line = %trimmed, "skipping non-JSON-RPC stdout line");
                }
            }
        }
    }

    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let line = encode_line(&self.server, &JsonRpcNotification::new(method, params))?;
        self.write_line(&line).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        // Closing stdin asks the server to exit; kill it if it lingers.
        drop(self.writer.take());
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.transport_error(format!("failed to wait for exit: {e}"))),
            Err(_) => self
                .child
                .kill()
                .await
                .map_err(|e| self.transport_error(format!("failed to kill server: {e}"))),
        }
    }
}

// ─── Streamable HTTP ─────────────────────────────────────────────────────────

/// Streamable HTTP transport: each message is its own POST.
pub struct HttpTransport {
    server: String,
    client: reqwest::Client,
    url: reqwest::Url,
    session_id: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &McpServerConfig) -> Result<Self, McpError> {
        Ok(Self {
            server: config.id.clone(),
            client: http_client(&config.id)?,
            url: config.parsed_url()?,
            session_id: None,
        })
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportError {
            server: self.server.clone(),
            reason: reason.into(),
        }
    }

    async fn post<T: serde::Serialize + Sync>(&mut self, message: &T) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(ref session_id) = self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                self.transport_error(format!("failed to connect to {}: {e}", self.url))
            } else {
                self.transport_error(format!("HTTP request failed: {e}"))
            }
        })?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(session_id) {
                tracing::debug!(server = %self.server, session_id, "captured MCP session ID");
                self.session_id = Some(session_id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    async fn read_sse_reply(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| self.transport_error(format!("failed to read event stream: {e}")))?;
            for event in decoder.push(&chunk) {
                if let Some(resp) = response_from_event(&self.server, &event, id) {
                    return Ok(resp);
                }
            }
        }

        decoder
            .finish()
            .and_then(|event| response_from_event(&self.server, &event, id))
            .ok_or_else(|| self.transport_error("event stream ended without a response"))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        if is_event_stream {
            return self.read_sse_reply(response, id).await;
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;

        let resp: JsonRpcResponse =
            serde_json::from_str(&body).map_err(|e| McpError::ProtocolError {
                server: self.server.clone(),
                reason: format!("response is not JSON-RPC: {e}"),
            })?;

        if !resp.answers(id) {
            return Err(McpError::ProtocolError {
                server: self.server.clone(),
                reason: format!("response id {:?} does not match request {id}", resp.id),
            });
        }
        Ok(resp)
    }

    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };

        let response = self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &session_id)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("failed to end session: {e}")))?;

        // 405 means the server does not support explicit session termination
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(self.transport_error(format!("ending session returned HTTP {status}")))
        }
    }
}

// ─── Legacy HTTP+SSE ─────────────────────────────────────────────────────────

/// Legacy SSE transport: replies arrive on a background event stream.
pub struct SseTransport {
    server: String,
    client: reqwest::Client,
    post_url: reqwest::Url,
    inbox: mpsc::UnboundedReceiver<JsonRpcResponse>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(config: &McpServerConfig) -> Result<Self, McpError> {
        let server = config.id.clone();
        let client = http_client(&server)?;
        let url = config.parsed_url()?;

        let response = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| McpError::TransportError {
                server: server.clone(),
                reason: format!("failed to open event stream: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::TransportError {
                server,
                reason: format!("event stream returned HTTP {status}"),
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_event_stream(
            server.clone(),
            response,
            endpoint_tx,
            inbox_tx,
        ));

        let endpoint = match endpoint_rx.await {
            Ok(endpoint) => endpoint,
            Err(_) => {
                reader.abort();
                return Err(McpError::ProtocolError {
                    server,
                    reason: "event stream closed before the endpoint event".into(),
                });
            }
        };

        let post_url = match url.join(endpoint.trim()) {
            Ok(post_url) => post_url,
            Err(e) => {
                reader.abort();
                return Err(McpError::ProtocolError {
                    server,
                    reason: format!("invalid endpoint '{endpoint}': {e}"),
                });
            }
        };

        tracing::debug!(server = %server, endpoint = %post_url, "SSE transport ready");

        Ok(Self {
            server,
            client,
            post_url,
            inbox,
            reader,
        })
    }

    fn transport_error(&self, reason: impl Into<String>) -> McpError {
        McpError::TransportError {
            server: self.server.clone(),
            reason: reason.into(),
        }
    }

    async fn post<T: serde::Serialize + Sync>(&self, message: &T) -> Result<(), McpError> {
        let response = self
            .client
            .post(self.post_url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }
}

/// Background reader: first `endpoint` event goes to `endpoint_tx`, every
/// JSON-RPC message after that goes to `inbox`.
async fn read_event_stream(
    server: String,
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    inbox: mpsc::UnboundedSender<JsonRpcResponse>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = Box::pin(response.bytes_stream());
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "SSE stream read failed");
                return;
            }
        };

        for event in decoder.push(&chunk) {
            if event.event.as_deref() == Some("endpoint") {
                if let Some(tx) = endpoint_tx.take() {
                    let _ = tx.send(event.data);
                }
                continue;
            }
            if !event.is_message() || event.data.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                Ok(msg) => {
                    if inbox.send(msg).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server,
                        error = %e,
                        "failed to parse SSE event data as JSON-RPC message"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        self.post(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            match self.inbox.recv().await {
                Some(resp) if resp.answers(id) => return Ok(resp),
                Some(_) => continue,
                None => return Err(self.transport_error("event stream closed")),
            }
        }
    }

    async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.reader.abort();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
