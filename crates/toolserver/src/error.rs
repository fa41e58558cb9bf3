//! Tool-server error types.

use crate::protocol::JsonRpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn tool server: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("tool server connection failed: {0}")]
    Connection(String),

    #[error("tool server protocol error: {0}")]
    Protocol(String),

    #[error("tool server returned error: {0}")]
    Rpc(#[from] JsonRpcError),

    #[error("timeout waiting for tool server response")]
    Timeout,

    #[error("tool server exited unexpectedly")]
    ServerExited,

    #[error("tool server not initialized")]
    NotInitialized,

    #[error("unknown tool server: {0}")]
    UnknownServer(String),

    #[error("invalid qualified tool name: {0}")]
    InvalidToolName(String),

    #[error("multiple tool server errors: {}", join_errors(.0))]
    Aggregate(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
