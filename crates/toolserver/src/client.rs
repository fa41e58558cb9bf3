//! Tool-server client (spawn, handshake, request correlation, lifecycle).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId, Tool,
};

/// Default timeout for tool-server operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum inbound frame size (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Bound on queued-but-undispatched notifications.
const NOTIFICATION_QUEUE: usize = 64;

/// Configuration for launching one tool server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Callback invoked for unsolicited server notifications.
///
/// Runs on the client's dispatch task; it must not block.
pub type NotificationHandler = Arc<dyn Fn(JsonRpcNotification) + Send + Sync>;

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>>;
type HandlerSlot = Arc<StdMutex<Option<NotificationHandler>>>;

/// Handle to a running tool-server subprocess.
///
/// A dedicated reader task owns stdout: responses are routed to their
/// pending request by id, notifications to the registered handler via a
/// bounded queue. Multiple calls may be in flight concurrently; the
/// pending map is the correlation state.
pub struct Client {
    config: ServerConfig,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stderr: StdMutex<Option<ChildStderr>>,
    pending: Pending,
    handler: HandlerSlot,
    next_id: AtomicI64,
    initialized: AtomicBool,
    server_info: StdMutex<Option<InitializeResult>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Spawn a tool-server process and start its reader tasks.
    ///
    /// Environment values undergo `$VAR` expansion before the spawn.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(expand_env(&config.env))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("failed to capture stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("failed to capture stdout".to_string()))?;
        let stderr = process.stderr.take();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let handler: HandlerSlot = Arc::new(StdMutex::new(None));
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_QUEUE);

        let reader = tokio::spawn(read_loop(
            config.name.clone(),
            BufReader::new(stdout),
            Arc::clone(&pending),
            notify_tx,
        ));
        let dispatcher = tokio::spawn(dispatch_loop(
            config.name.clone(),
            notify_rx,
            Arc::clone(&handler),
        ));

        Ok(Self {
            config,
            child: Mutex::new(process),
            stdin: Mutex::new(stdin),
            stderr: StdMutex::new(stderr),
            pending,
            handler,
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
            server_info: StdMutex::new(None),
            reader: StdMutex::new(Some(reader)),
            dispatcher: StdMutex::new(Some(dispatcher)),
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Handshake with the server (must be called before other operations).
    ///
    /// An unreachable or dying server yields `Error::Connection`; a
    /// malformed handshake payload yields `Error::Protocol`.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await
            .map_err(|e| match e {
                Error::Timeout | Error::ServerExited => Error::Connection(e.to_string()),
                Error::Protocol(msg) => Error::Protocol(format!("malformed handshake: {msg}")),
                other => other,
            })?;

        self.notify("notifications/initialized", None::<()>).await?;

        if let Ok(mut info) = self.server_info.lock() {
            *info = Some(result.clone());
        }
        self.initialized.store(true, Ordering::SeqCst);

        Ok(result)
    }

    /// Whether the handshake completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Server info captured during the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().ok().and_then(|info| info.clone())
    }

    /// List the server's tools in the order it reports them.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let result: ListToolsResult = self.request("tools/list", None::<()>).await?;
        Ok(result.tools)
    }

    /// Call a tool and block for its correlated response.
    ///
    /// Any `Connection`/`Protocol`/`Rpc`/`Timeout` error here is a
    /// transport-level failure. A result carrying `is_error: true` is NOT
    /// one of those: the tool reported its own failure, and that flag
    /// travels back to the model as ordinary result data.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResult> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(params)).await
    }

    /// Register the notification callback.
    ///
    /// Delivered on the client's dispatch task; the handler must not block
    /// it. Registering again replaces the previous handler.
    pub fn on_notification(&self, handler: impl Fn(JsonRpcNotification) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(Arc::new(handler));
        }
    }

    /// Take the server's diagnostic stream. Unbuffered; the caller drains.
    ///
    /// Returns `None` after the first take.
    pub fn stderr(&self) -> Option<ChildStderr> {
        self.stderr.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Check if the server process is still running.
    pub async fn is_running(&self) -> bool {
        let mut process = self.child.lock().await;
        matches!(process.try_wait(), Ok(None))
    }

    /// Shut down: cancel the reader tasks, then kill and reap the process.
    pub async fn close(self) -> Result<()> {
        // Best effort; many servers just exit on stdin close.
        let _ = self.notify("shutdown", None::<()>).await;

        for slot in [&self.reader, &self.dispatcher] {
            if let Some(task) = slot.lock().ok().and_then(|mut guard| guard.take()) {
                task.abort();
            }
        }

        let mut process = self.child.lock().await;
        let _ = process.kill().await;

        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(err) = self.send_line(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        let response = match timeout(DEFAULT_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            // The reader task dropped our sender: stdout closed under us.
            Ok(Err(_)) => return Err(Error::ServerExited),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout);
            }
        };

        let value = response.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("invalid {method} result: {e}")))
    }

    async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<()>
    where
        P: Serialize,
    {
        let mut notification = JsonRpcNotification::new(method);
        notification.params = params.and_then(|p| serde_json::to_value(p).ok());
        self.send_line(&notification).await
    }

    async fn send_line(&self, message: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| Error::Protocol(format!("failed to serialize request: {e}")))?;

        let mut stdin = self.stdin.lock().await;
        let write = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write
            .await
            .map_err(|e| Error::Connection(format!("write to server failed: {e}")))
    }
}

async fn read_loop(
    server: String,
    mut stdout: BufReader<ChildStdout>,
    pending: Pending,
    notify_tx: mpsc::Sender<JsonRpcNotification>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match stdout.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(server = %server, error = %e, "stdout read failed");
                break;
            }
        }

        if line.len() > MAX_OUTPUT_SIZE {
            warn!(server = %server, size = line.len(), "dropping oversized frame");
            continue;
        }
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonRpcMessage>(frame) {
            Ok(JsonRpcMessage::Response(response)) => {
                let sender = pending.lock().await.remove(&response.id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(server = %server, id = ?response.id, "response with no pending request")
                    }
                }
            }
            Ok(JsonRpcMessage::Notification(notification)) => {
                if notify_tx.try_send(notification).is_err() {
                    warn!(server = %server, "notification queue full, dropping");
                }
            }
            Err(e) => debug!(server = %server, error = %e, "unparseable frame"),
        }
    }

    // Dropping the senders wakes every in-flight request with ServerExited.
    pending.lock().await.clear();
}

async fn dispatch_loop(
    server: String,
    mut notify_rx: mpsc::Receiver<JsonRpcNotification>,
    handler: HandlerSlot,
) {
    while let Some(notification) = notify_rx.recv().await {
        let callback = handler.lock().ok().and_then(|slot| slot.clone());
        match callback {
            Some(cb) => cb(notification),
            None => {
                debug!(server = %server, method = %notification.method, "notification with no handler")
            }
        }
    }
}

fn expand_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(key, value)| (key.clone(), expand_env_value(value)))
        .collect()
}

/// Expand `$NAME` and `${NAME}` references against the process environment.
/// Unset variables expand to the empty string.
fn expand_env_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }

        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(command: &str, args: &[&str]) -> ServerConfig {
        ServerConfig {
            name: "docs".to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    // Scripted stdio server: handshake, one tools/list, one tools/call
    // preceded by a notification.
    const FAKE_SERVER: &str = r#"
read req
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1"}}}'
read note
read req
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"search","description":"Search things","inputSchema":{"type":"object","properties":{"q":{"type":"string"}},"required":["q"]}}]}}'
read req
printf '%s\n' '{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1}}'
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"ok: x"}],"isError":false}}'
read req
"#;

    #[tokio::test]
    async fn handshake_list_and_call() {
        let client = Client::spawn(config("sh", &["-c", FAKE_SERVER])).await.unwrap();

        let (seen_tx, mut seen_rx) = mpsc::channel(8);
        client.on_notification(move |n| {
            let _ = seen_tx.try_send(n.method);
        });

        let info = client.initialize().await.unwrap();
        assert_eq!(info.server_info.name, "fake");
        assert!(client.is_initialized());

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");

        let result = client
            .call_tool("search", Some(json!({"q": "x"})))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content[0].as_text(), Some("ok: x"));

        let method = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("notification not dispatched")
            .unwrap();
        assert_eq!(method, "notifications/progress");

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn spawn_failure_is_connection_error() {
        let err = Client::spawn(config("skipper-no-such-command", &[]))
            .await
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[tokio::test]
    async fn malformed_handshake_is_protocol_error() {
        // `cat` echoes our own request back: a frame with our id but no
        // usable result, which must surface as a protocol error.
        let client = Client::spawn(config("cat", &[])).await.unwrap();
        let err = client.initialize().await.err().expect("handshake should fail");
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn call_before_initialize_is_rejected() {
        let client = Client::spawn(config("cat", &[])).await.unwrap();
        let err = client.call_tool("search", None).await.err().unwrap();
        assert!(matches!(err, Error::NotInitialized));
        client.close().await.unwrap();
    }

    #[test]
    fn env_expansion() {
        // Safety: test-local variable name, no concurrent readers care.
        unsafe { std::env::set_var("SKIPPER_TEST_TOKEN", "sekrit") };
        assert_eq!(expand_env_value("plain"), "plain");
        assert_eq!(expand_env_value("$SKIPPER_TEST_TOKEN"), "sekrit");
        assert_eq!(expand_env_value("x-${SKIPPER_TEST_TOKEN}-y"), "x-sekrit-y");
        assert_eq!(expand_env_value("$SKIPPER_TEST_UNSET_VAR"), "");
        assert_eq!(expand_env_value("100$"), "100$");
    }
}
