//! Tool-server manager: a named set of clients behind one registry surface.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::ChildStderr;
use tokio::sync::RwLock;
use tracing::debug;

use crate::client::{Client, ServerConfig};
use crate::declare::FunctionDeclaration;
use crate::error::{Error, Result};
use crate::protocol::JsonRpcNotification;

/// Launch spec for one configured server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Logical-server-name -> launch spec. Ordered so initialization and its
/// fail-fast behavior are deterministic.
pub type ServersConfig = BTreeMap<String, ServerSpec>;

/// Owns every tool-server client, keyed by server name.
///
/// Writes happen sequentially at init; conversation-time lookups and
/// dispatches take the read side and may run concurrently.
#[derive(Default)]
pub struct Manager {
    clients: RwLock<HashMap<String, Client>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch and handshake each configured server in sequence.
    ///
    /// Fail-fast: any single failure closes the servers already started
    /// and aborts the whole initialization; no partial registry survives.
    pub async fn initialize_from_config(&self, config: &ServersConfig) -> Result<()> {
        for (name, spec) in config {
            let launched = self.launch(name, spec).await;

            match launched {
                Ok(client) => {
                    self.clients.write().await.insert(name.clone(), client);
                }
                Err(err) => {
                    let _ = self.close().await;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn launch(&self, name: &str, spec: &ServerSpec) -> Result<Client> {
        let client = Client::spawn(ServerConfig {
            name: name.to_string(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env: spec.env.clone(),
        })
        .await?;

        match client.initialize().await {
            Ok(info) => {
                debug!(
                    server = name,
                    remote = %info.server_info.name,
                    "tool server initialized"
                );
                Ok(client)
            }
            Err(err) => {
                let _ = client.close().await;
                Err(err)
            }
        }
    }

    /// Names of the registered servers.
    pub async fn server_names(&self) -> Vec<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    /// Whether a server with this name is registered.
    pub async fn has_server(&self, name: &str) -> bool {
        self.clients.read().await.contains_key(name)
    }

    /// Aggregate every client's tool list into qualified declarations.
    ///
    /// Each tool is exposed as `"<server>_<tool>"` for registry-wide
    /// uniqueness. Per-server failures are combined into one error while
    /// the declarations that succeeded are still returned.
    pub async fn generate_all_declarations(
        &self,
    ) -> (Vec<FunctionDeclaration>, Option<Error>) {
        let clients = self.clients.read().await;
        let mut declarations = Vec::new();
        let mut failures = Vec::new();

        for (name, client) in clients.iter() {
            match client.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        let qualified = format!("{name}_{}", tool.name);
                        declarations.push(tool.to_declaration(qualified));
                    }
                }
                Err(err) => failures.push(err),
            }
        }

        let error = match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(Error::Aggregate(failures)),
        };
        (declarations, error)
    }

    /// Dispatch a qualified `"<server>_<tool>"` call to its owning client
    /// and normalize the result into the canonical
    /// `{"is_error": bool, "content": String}` map.
    pub async fn dispatch(
        &self,
        qualified_name: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let (server, tool) = qualified_name
            .split_once('_')
            .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
            .ok_or_else(|| Error::InvalidToolName(qualified_name.to_string()))?;

        let clients = self.clients.read().await;
        let client = clients
            .get(server)
            .ok_or_else(|| Error::UnknownServer(server.to_string()))?;

        let result = client.call_tool(tool, Some(Value::Object(args))).await?;

        let content = result
            .content
            .iter()
            .map(|block| match block.as_text() {
                Some(text) => text.to_string(),
                None => serde_json::to_string(block).unwrap_or_default(),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut normalized = Map::new();
        normalized.insert("is_error".to_string(), Value::Bool(result.is_error));
        normalized.insert("content".to_string(), Value::String(content));
        Ok(normalized)
    }

    /// Wire every client's notifications to a server-name-tagged callback.
    pub async fn setup_notification_handlers(
        &self,
        handler: impl Fn(&str, JsonRpcNotification) + Send + Sync + Clone + 'static,
    ) {
        let clients = self.clients.read().await;
        for (name, client) in clients.iter() {
            let server = name.clone();
            let handler = handler.clone();
            client.on_notification(move |notification| handler(&server, notification));
        }
    }

    /// Take each client's diagnostic stream for the caller to drain.
    pub async fn stderr_readers(&self) -> HashMap<String, ChildStderr> {
        let clients = self.clients.read().await;
        clients
            .iter()
            .filter_map(|(name, client)| client.stderr().map(|stderr| (name.clone(), stderr)))
            .collect()
    }

    /// Close every client, combining any errors into one.
    pub async fn close(&self) -> Result<()> {
        let mut clients = self.clients.write().await;
        let mut failures = Vec::new();

        for (_, client) in clients.drain() {
            if let Err(err) = client.close().await {
                failures.push(err);
            }
        }

        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(Error::Aggregate(failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(command: &str, args: &[&str]) -> ServerSpec {
        ServerSpec {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }

    // Handshake, then answer one tools/list and one tools/call.
    const FAKE_SERVER: &str = r#"
read req
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake"}}}'
read note
read req
case "$req" in
*tools/list*)
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"search","description":"Search","inputSchema":{"type":"object","properties":{"q":{"type":"string"}}}}]}}'
;;
*tools/call*)
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"hit"}],"isError":false}}'
;;
esac
read req
"#;

    async fn manager_with_fake(name: &str) -> Manager {
        let manager = Manager::new();
        let mut config = ServersConfig::new();
        config.insert(name.to_string(), spec("sh", &["-c", FAKE_SERVER]));
        manager.initialize_from_config(&config).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn declarations_are_qualified() {
        let manager = manager_with_fake("docs").await;

        let (declarations, error) = manager.generate_all_declarations().await;
        assert!(error.is_none());
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "docs_search");

        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_routes_to_named_server() {
        let manager = manager_with_fake("docs").await;

        let mut args = Map::new();
        args.insert("q".to_string(), json!("x"));
        let result = manager.dispatch("docs_search", args).await.unwrap();

        assert_eq!(result["is_error"], json!(false));
        assert_eq!(result["content"], json!("hit"));

        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_unknown_server_is_error() {
        let manager = Manager::new();
        let err = manager.dispatch("ghost_search", Map::new()).await.err().unwrap();
        assert!(matches!(err, Error::UnknownServer(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn dispatch_unqualified_name_is_error() {
        let manager = Manager::new();
        let err = manager.dispatch("search", Map::new()).await.err().unwrap();
        assert!(matches!(err, Error::InvalidToolName(_)));
    }

    #[tokio::test]
    async fn init_failure_leaves_no_partial_registry() {
        let manager = Manager::new();
        let mut config = ServersConfig::new();
        // BTreeMap order: "a" starts fine, "b" fails to spawn.
        config.insert("a".to_string(), spec("sh", &["-c", FAKE_SERVER]));
        config.insert("b".to_string(), spec("skipper-no-such-command", &[]));

        let err = manager.initialize_from_config(&config).await;
        assert!(err.is_err());
        assert!(manager.server_names().await.is_empty());
    }

    #[tokio::test]
    async fn handshake_failure_leaves_no_partial_registry() {
        let manager = Manager::new();
        let mut config = ServersConfig::new();
        // "a" handshakes fine; "b" is `cat`, which echoes the request back
        // and fails the handshake with a protocol error.
        config.insert("a".to_string(), spec("sh", &["-c", FAKE_SERVER]));
        config.insert("b".to_string(), spec("cat", &[]));

        let err = manager.initialize_from_config(&config).await.err().unwrap();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
        assert!(manager.server_names().await.is_empty());
    }
}
