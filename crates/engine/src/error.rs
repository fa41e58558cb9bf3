use thiserror::Error;

use crate::backend::ModelError;
use crate::registry::ToolError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty input")]
    EmptyInput,

    #[error("model produced no actionable content after {0} continue prompts")]
    ContinueLimit(u32),

    #[error("processing cancelled")]
    Cancelled,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
