//! Skipper conversation engine.
//!
//! This crate drives a session's turn-processing loop against a model
//! backend, dispatching the model's function calls to local handlers or to
//! external tool servers.
//!
//! # Overview
//!
//! The engine is organized around these concepts:
//!
//! - **Engine**: the per-session state machine — model turn, function
//!   calls, results back to the model, until a terminal tool call.
//! - **ModelBackend**: a trait abstracting the model provider; the
//!   [`GeminiBackend`] implementation ships here.
//! - **Registry**: the merged tool namespace — built-in local handlers
//!   plus qualified remote tools from a [`toolserver::Manager`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use engine::{Engine, GeminiBackend, Registry, builtin_tools};
//! use storage::{Session, SessionStore};
//! use tokio_util::sync::CancellationToken;
//! use toolserver::Manager;
//!
//! # async fn example() -> engine::Result<()> {
//! let manager = Arc::new(Manager::new());
//! let (registry, _) = Registry::new(manager, builtin_tools()).await;
//!
//! let backend = GeminiBackend::builder("AIza...", "gemini-2.0-flash-lite").build();
//! let store = SessionStore::new(".skipper/sessions");
//!
//! let mut engine = Engine::new(backend, registry, store, Session::new());
//! let outcome = engine
//!     .process_message(&CancellationToken::new(), "Summarize the diff")
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod backend;
mod builtins;
mod engine;
mod error;
mod registry;

pub use backend::{
    GeminiBackend, GeminiBackendBuilder, ModelBackend, ModelError, ModelRequest, ModelResponse,
};
pub use builtins::{ASK_QUESTION, COMPLETE, builtin_tools, is_terminal};
pub use engine::{Engine, Outcome};
pub use error::{Error, Result};
pub use registry::{Handler, HandlerFuture, LocalTool, Registry, ToolError};
