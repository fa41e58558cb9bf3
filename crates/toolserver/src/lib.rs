//! Tool-server client library.
//!
//! This crate talks to external tool providers: subprocesses that expose
//! invocable operations over a request/response/notification protocol on
//! their standard streams. A [`Client`] owns one such process; a
//! [`Manager`] owns a named set of them and presents one registry surface
//! with globally-unique qualified tool names.
//!
//! # Example
//!
//! ```no_run
//! use toolserver::{Manager, ServerSpec, ServersConfig};
//!
//! # async fn example() -> toolserver::Result<()> {
//! let mut config = ServersConfig::new();
//! config.insert(
//!     "docs".to_string(),
//!     ServerSpec {
//!         command: "docs-server".to_string(),
//!         args: vec!["--root".to_string(), "./workspace".to_string()],
//!         env: Default::default(),
//!     },
//! );
//!
//! let manager = Manager::new();
//! manager.initialize_from_config(&config).await?;
//!
//! let (declarations, _failures) = manager.generate_all_declarations().await;
//! for decl in &declarations {
//!     println!("Tool: {}", decl.name);
//! }
//!
//! let result = manager
//!     .dispatch("docs_search", serde_json::Map::new())
//!     .await?;
//! println!("{result:?}");
//!
//! manager.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod declare;
mod error;
mod manager;
mod protocol;

pub use client::{Client, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE, NotificationHandler, ServerConfig};
pub use declare::{FunctionDeclaration, Schema, SchemaType};
pub use error::{Error, Result};
pub use manager::{Manager, ServerSpec, ServersConfig};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    RequestId, ServerCapabilities, ServerInfo, Tool, ToolContent,
};
