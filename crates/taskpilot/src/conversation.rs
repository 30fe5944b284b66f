//! The append-only message log of one session.
//!
//! A [`Conversation`] is owned by whoever drives the current turn and is passed explicitly
//! into every loop. Messages are only ever appended, and tool results are checked against
//! the requests of the assistant message they answer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::role::Role;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a conversation from recorded messages, applying the same checks as `push`
    pub fn restore<I>(messages: I) -> AgentResult<Self>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut conversation = Self::new();
        for message in messages {
            conversation.push(message)?;
        }
        Ok(conversation)
    }

    pub fn with_message(mut self, message: Message) -> AgentResult<Self> {
        self.push(message)?;
        Ok(self)
    }

    /// Append a message to the end of the log
    pub fn push(&mut self, message: Message) -> AgentResult<()> {
        let responses: Vec<&str> = message.tool_responses().map(|r| r.id.as_str()).collect();
        if !responses.is_empty() {
            self.check_tool_results(&responses)?;
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append the result of one tool request as its own tool message
    pub fn push_tool_result<S: Into<String>>(
        &mut self,
        id: S,
        result: AgentResult<Vec<Content>>,
    ) -> AgentResult<()> {
        self.push(Message::tool().with_tool_response(id, result))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages appended after the given mark, as returned by an earlier `len()`
    pub fn since(&self, mark: usize) -> &[Message] {
        &self.messages[mark.min(self.messages.len())..]
    }

    pub fn last_assistant_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(Message::text)
    }

    /// Requests of the latest assistant message that have not been answered yet
    pub fn pending_tool_requests(&self) -> Vec<&ToolRequest> {
        let Some(index) = self.last_assistant_index() else {
            return Vec::new();
        };
        let answered = self.answered_since(index);
        self.messages[index]
            .tool_requests()
            .filter(|request| !answered.contains(request.id.as_str()))
            .collect()
    }

    fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
    }

    fn answered_since(&self, index: usize) -> HashSet<&str> {
        self.messages[index + 1..]
            .iter()
            .flat_map(|m| m.tool_responses())
            .map(|r| r.id.as_str())
            .collect()
    }

    fn check_tool_results(&self, ids: &[&str]) -> AgentResult<()> {
        let unmatched = |id: &str| AgentError::UnmatchedToolResult(id.to_string());

        let index = self
            .last_assistant_index()
            .ok_or_else(|| unmatched(ids[0]))?;

        // results must directly follow the assistant message they answer
        if self.messages[index + 1..].iter().any(|m| m.role != Role::Tool) {
            return Err(unmatched(ids[0]));
        }

        let requested: HashSet<&str> = self.messages[index]
            .tool_requests()
            .map(|r| r.id.as_str())
            .collect();
        let mut answered = self.answered_since(index);
        for &id in ids {
            if !requested.contains(id) || !answered.insert(id) {
                return Err(unmatched(id));
            }
        }
        Ok(())
    }
}
