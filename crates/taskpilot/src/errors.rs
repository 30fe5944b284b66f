use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Could not decode tool arguments: {0}")]
    ArgumentDecode(String),

    #[error("Step budget of {budget} exhausted before a final answer")]
    StepBudgetExceeded { budget: usize },

    #[error("Tool execution timed out after {seconds}s")]
    ToolExecutionTimeout { seconds: u64 },

    #[error("Model call failed: {0}")]
    ModelCall(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Invalid structured response: {0}")]
    InvalidResponse(String),

    #[error("Tool result {0} does not answer a pending tool request")]
    UnmatchedToolResult(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error aborts the whole turn instead of being reported back to the model.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::ToolExecutionTimeout { .. })
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
