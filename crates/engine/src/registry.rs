//! Tool registry: one namespace over local handlers and remote servers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use toolserver::{FunctionDeclaration, Manager};
use tracing::debug;

/// Errors from tool lookup and execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("tool {name} failed: {message}")]
    Execution { name: String, message: String },

    #[error("remote tool {name} failed: {source}")]
    Remote {
        name: String,
        #[source]
        source: toolserver::Error,
    },
}

/// Future returned by a local tool handler.
pub type HandlerFuture = BoxFuture<'static, Result<Map<String, Value>, ToolError>>;

/// A local tool handler: string-keyed args in, string-keyed result out.
///
/// Handlers embed ordinary failures in the result map (`is_error`); an
/// `Err` from a handler is fatal to the whole processing call.
pub type Handler = Box<dyn Fn(Map<String, Value>) -> HandlerFuture + Send + Sync>;

/// An in-process tool: its model-facing declaration plus the handler.
pub struct LocalTool {
    pub declaration: FunctionDeclaration,
    pub handler: Handler,
}

impl LocalTool {
    pub fn new(
        declaration: FunctionDeclaration,
        handler: impl Fn(Map<String, Value>) -> HandlerFuture + Send + Sync + 'static,
    ) -> Self {
        Self {
            declaration,
            handler: Box::new(handler),
        }
    }
}

/// The merged tool namespace the engine consults.
///
/// Local tools are keyed by name; remote tools are reachable through their
/// qualified `"<server>_<tool>"` names. Remote declarations and the server
/// set are snapshotted at construction, after the manager initialized.
pub struct Registry {
    local: HashMap<String, LocalTool>,
    manager: Arc<Manager>,
    remote_declarations: Vec<FunctionDeclaration>,
    servers: HashSet<String>,
}

impl Registry {
    /// Build the registry from the manager's current servers and the given
    /// local tools.
    ///
    /// Per-server listing failures are returned alongside the registry;
    /// the declarations that succeeded are still registered.
    pub async fn new(
        manager: Arc<Manager>,
        local_tools: Vec<LocalTool>,
    ) -> (Self, Option<toolserver::Error>) {
        let (remote_declarations, failures) = manager.generate_all_declarations().await;
        let servers = manager.server_names().await.into_iter().collect();

        let local = local_tools
            .into_iter()
            .map(|tool| (tool.declaration.name.clone(), tool))
            .collect();

        let registry = Self {
            local,
            manager,
            remote_declarations,
            servers,
        };
        (registry, failures)
    }

    /// Every declaration in the namespace: local first, then remote.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<FunctionDeclaration> = self
            .local
            .values()
            .map(|tool| tool.declaration.clone())
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations.extend(self.remote_declarations.iter().cloned());
        declarations
    }

    /// Whether this name routes to a tool server.
    ///
    /// A name carries the remote convention when its `"<server>_"` prefix
    /// matches a registered server.
    pub fn is_remote(&self, name: &str) -> bool {
        name.split_once('_')
            .is_some_and(|(server, _)| self.servers.contains(server))
    }

    /// Execute one call by name, routing remote-prefixed names through the
    /// manager and everything else through the local table.
    pub async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        if self.is_remote(name) {
            debug!(tool = name, "dispatching to tool server");
            return self
                .manager
                .dispatch(name, args)
                .await
                .map_err(|source| ToolError::Remote {
                    name: name.to_string(),
                    source,
                });
        }

        let tool = self
            .local
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        debug!(tool = name, "executing local tool");
        (tool.handler)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use toolserver::Schema;

    fn echo_tool(name: &str) -> LocalTool {
        let declaration = FunctionDeclaration {
            name: name.to_string(),
            description: "Echo the args back".to_string(),
            parameters: Schema::object([], []),
        };
        LocalTool::new(declaration, |args| {
            Box::pin(async move {
                let mut result = Map::new();
                result.insert("echo".to_string(), Value::Object(args));
                Ok(result)
            })
        })
    }

    #[tokio::test]
    async fn local_tools_execute_by_name() {
        let (registry, failures) =
            Registry::new(Arc::new(Manager::new()), vec![echo_tool("probe")]).await;
        assert!(failures.is_none());

        let mut args = Map::new();
        args.insert("x".to_string(), json!(1));
        let result = registry.execute("probe", args).await.unwrap();
        assert_eq!(result["echo"]["x"], json!(1));
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let (registry, _) = Registry::new(Arc::new(Manager::new()), Vec::new()).await;
        let err = registry.execute("nope", Map::new()).await.err().unwrap();
        assert!(matches!(err, ToolError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn underscore_names_without_a_server_stay_local() {
        let (registry, _) =
            Registry::new(Arc::new(Manager::new()), vec![echo_tool("git_status")]).await;
        assert!(!registry.is_remote("git_status"));
        assert!(registry.execute("git_status", Map::new()).await.is_ok());
    }

    #[tokio::test]
    async fn declarations_are_sorted_and_merged() {
        let (registry, _) = Registry::new(
            Arc::new(Manager::new()),
            vec![echo_tool("zeta"), echo_tool("alpha")],
        )
        .await;
        let names: Vec<String> = registry.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
