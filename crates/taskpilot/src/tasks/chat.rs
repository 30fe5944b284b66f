use async_trait::async_trait;
use std::sync::Arc;

use super::{model_error, primed, Reply, Task, TaskKind};
use crate::conversation::Conversation;
use crate::errors::AgentResult;
use crate::models::message::Message;
use crate::providers::base::Provider;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const GREETING: &str = "How can I help you?";

/// Plain chat: every input is answered from the whole history in one model call
pub struct ChatTask {
    provider: Arc<dyn Provider>,
}

impl ChatTask {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Task for ChatTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Chat
    }

    fn start(&self) -> AgentResult<Conversation> {
        primed(SYSTEM_PROMPT, Some(GREETING))
    }

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply> {
        conversation.push(Message::user().with_text(input))?;
        let (response, _) = self
            .provider
            .complete(conversation.messages(), &[], None)
            .await
            .map_err(model_error)?;

        let text = response.text().unwrap_or_default();
        conversation.push(Message::assistant().with_text(text.clone()))?;
        Ok(Reply::Answer(text))
    }
}
