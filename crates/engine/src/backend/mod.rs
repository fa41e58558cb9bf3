//! Model backend abstraction.
//!
//! Provides a trait for conversation backends, allowing skipper to support
//! multiple providers through a unified interface. The engine only needs
//! one operation: send the history, get back the next turn's parts.

mod gemini;

pub use gemini::{GeminiBackend, GeminiBackendBuilder};

use std::future::Future;

use storage::{Content, FunctionCall, Part};
use thiserror::Error;
use toolserver::FunctionDeclaration;

/// Errors from model backend calls.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Request to send to a model backend.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    /// Full conversation history, replayed on every call.
    pub history: &'a [Content],
    /// System instruction, if any.
    pub system: Option<&'a str>,
    /// Function declarations the model may call.
    pub declarations: &'a [FunctionDeclaration],
}

/// The model's next turn.
///
/// An empty part list means the model produced nothing actionable; the
/// engine's continue-nudge path handles that case.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub parts: Vec<Part>,
}

impl ModelResponse {
    /// Function calls in emitted order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts.iter().filter_map(Part::as_function_call).collect()
    }
}

/// Trait for model backends.
///
/// Implementations handle the specifics of communicating with different
/// providers (API calls, etc.).
pub trait ModelBackend: Send + Sync {
    /// Send the conversation and get the model's next turn.
    fn generate(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;
}
