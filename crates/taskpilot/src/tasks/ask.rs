use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::{model_error, primed, Reply, Task, TaskKind};
use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::prompt_template::load_prompt_file;
use crate::providers::base::Provider;
use crate::store::{retrieve, DocumentStore};

pub const SYSTEM_PROMPT: &str = "Ask something about the articles in our local db";

/// Question answering over the chunks retrieved from the document store
pub struct AskTask {
    provider: Arc<dyn Provider>,
    store: Arc<dyn DocumentStore>,
    top_k: usize,
}

impl AskTask {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn DocumentStore>, top_k: usize) -> Self {
        Self {
            provider,
            store,
            top_k,
        }
    }
}

#[async_trait]
impl Task for AskTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Ask
    }

    fn start(&self) -> AgentResult<Conversation> {
        primed(SYSTEM_PROMPT, None)
    }

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply> {
        conversation.push(Message::user().with_text(input))?;

        let chunks = retrieve(self.store.as_ref(), input, self.top_k).await?;
        let context = load_prompt_file(
            "qa_context.md",
            &json!({"question": input, "chunks": chunks}),
        )
        .map_err(|e| AgentError::Internal(e.to_string()))?;
        conversation.push(Message::system().with_text(context))?;

        let (response, _) = self
            .provider
            .complete(conversation.messages(), &[], None)
            .await
            .map_err(model_error)?;

        let answer = format!("Answer:\n\n{}", response.text().unwrap_or_default());
        conversation.push(Message::assistant().with_text(answer.clone()))?;
        Ok(Reply::Answer(answer))
    }
}
