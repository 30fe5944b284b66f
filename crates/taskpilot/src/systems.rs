use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::tool::{Tool, ToolCall};

/// A group of tools the agent can call
#[async_trait]
pub trait System: Send + Sync {
    /// Get the name of the system
    fn name(&self) -> &str;

    /// Get the system description
    fn description(&self) -> &str;

    /// Get available tools
    fn tools(&self) -> &[Tool];

    /// Call one of this system's tools. Returning `ToolExecutionTimeout` aborts the turn,
    /// any other error is handed back to the model as a failed result.
    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>>;
}

/// Lets a task keep a handle on a system it has also given to an agent
#[async_trait]
impl<T: System + ?Sized> System for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> &str {
        (**self).description()
    }

    fn tools(&self) -> &[Tool] {
        (**self).tools()
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        (**self).call(tool_call).await
    }
}

/// Decode the arguments of a tool call into the typed parameters of the tool
pub fn decode_arguments<T: DeserializeOwned>(tool_call: &ToolCall) -> AgentResult<T> {
    serde_json::from_value(tool_call.arguments.clone()).map_err(|e| {
        AgentError::ArgumentDecode(format!("{} arguments: {}", tool_call.name, e))
    })
}
