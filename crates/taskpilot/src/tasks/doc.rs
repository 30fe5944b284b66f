use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{model_error, primed, reject, Reply, Task, TaskKind};
use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::providers::base::Provider;
use crate::refine::{Critic, ModelCritic, RefineLoop};
use crate::structured::{Gate, GateDecision, Gated, StructuredOutput};

pub const SYSTEM_PROMPT: &str = "You are an automated dynamic document generator assistant";
pub const GREETING: &str = "Ask me to generate a document for you.";
pub const ANALYSE_PROMPT: &str = "Analyze if the text describes a document generating event.";
pub const COMPLETE_PROMPT: &str = "Now complete user's request";
pub const REJECTION: &str = "The input is not a document generating request.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub description: String,
    pub is_document_generating_event: bool,
    pub target_length: i64,
    pub document_style: String,
    pub key_words: Vec<String>,
    pub confidence_score: f64,
}

impl StructuredOutput for DocumentRequest {
    const NAME: &'static str = "EventExtraction";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Raw description of the event"
                },
                "is_document_generating_event": {
                    "type": "boolean",
                    "description": "Whether this text describes a document generating request?"
                },
                "target_length": {
                    "type": "integer",
                    "description": "Does this text require a document generated to have a specific length?"
                },
                "document_style": {
                    "type": "string",
                    "description": "Does this text require a document generated to have a specific style?"
                },
                "key_words": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "What are they keywords or bullet points user requested when generating a document"
                },
                "confidence_score": {
                    "type": "number",
                    "description": "Confidence score between 0 and 1"
                }
            },
            "required": [
                "description",
                "is_document_generating_event",
                "target_length",
                "document_style",
                "key_words",
                "confidence_score"
            ],
            "additionalProperties": false
        })
    }
}

impl Gated for DocumentRequest {
    fn flag(&self) -> bool {
        self.is_document_generating_event
    }

    fn confidence(&self) -> f64 {
        self.confidence_score
    }
}

/// Drafts a document and keeps refining it until a judge is satisfied
pub struct DocTask {
    provider: Arc<dyn Provider>,
    critic: Box<dyn Critic>,
    gate: Gate,
    refine: RefineLoop,
}

impl DocTask {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            critic: Box::new(ModelCritic::new(provider.clone())),
            provider,
            gate: Gate::default(),
            refine: RefineLoop::default(),
        }
    }

    pub fn with_critic(mut self, critic: Box<dyn Critic>) -> Self {
        self.critic = critic;
        self
    }

    pub fn with_refine_loop(mut self, refine: RefineLoop) -> Self {
        self.refine = refine;
        self
    }
}

#[async_trait]
impl Task for DocTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Doc
    }

    fn start(&self) -> AgentResult<Conversation> {
        primed(SYSTEM_PROMPT, Some(GREETING))
    }

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply> {
        conversation.push(Message::user().with_text(input))?;

        let messages = [
            Message::system().with_text(ANALYSE_PROMPT),
            Message::user().with_text(input),
        ];
        let request = match self
            .gate
            .classify::<DocumentRequest>(self.provider.as_ref(), &messages)
            .await?
        {
            GateDecision::Accepted(request) => request,
            GateDecision::Rejected(_) => return reject(conversation, REJECTION),
        };

        let extraction =
            serde_json::to_string(&request).map_err(|e| AgentError::Internal(e.to_string()))?;
        conversation.push(Message::system().with_text(extraction))?;
        conversation.push(Message::system().with_text(COMPLETE_PROMPT))?;

        let (response, _) = self
            .provider
            .complete(conversation.messages(), &[], None)
            .await
            .map_err(model_error)?;
        let draft = response
            .text()
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| AgentError::ModelCall("the model returned no draft".to_string()))?;

        let outcome = self.refine.run(self.critic.as_ref(), input, draft).await?;
        if !outcome.accepted {
            tracing::warn!(
                retries = outcome.retries,
                "document still falls short of the requirement, returning the latest draft"
            );
        }

        conversation.push(Message::assistant().with_text(outcome.artifact.clone()))?;
        Ok(Reply::Answer(outcome.artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn request_json(confidence: f64) -> String {
        json!({
            "description": "A haiku about autumn",
            "is_document_generating_event": true,
            "target_length": 17,
            "document_style": "haiku",
            "key_words": ["autumn", "leaves"],
            "confidence_score": confidence
        })
        .to_string()
    }

    fn verdict(satisfied: bool, confidence: f64) -> Message {
        Message::assistant().with_text(
            json!({"satisfyRequirement": satisfied, "confidence_score": confidence}).to_string(),
        )
    }

    #[tokio::test]
    async fn test_draft_accepted_on_first_judgement() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text(request_json(0.9)),
            Message::assistant().with_text("Leaves fall"),
            verdict(true, 0.95),
        ]);
        let task = DocTask::new(Arc::new(provider.clone()));
        let mut conversation = task.start().unwrap();

        let reply = task
            .reply(&mut conversation, "Write a haiku about autumn")
            .await
            .unwrap();

        assert_eq!(reply, Reply::Answer("Leaves fall".to_string()));
        assert_eq!(provider.call_count(), 3);

        // the draft sees the extraction and the instruction to complete
        let draft_request = &provider.requests()[1];
        let texts: Vec<String> = draft_request
            .messages
            .iter()
            .filter_map(|m| m.text())
            .collect();
        assert_eq!(texts.last().map(String::as_str), Some(COMPLETE_PROMPT));
        assert!(texts[texts.len() - 2].contains("\"document_style\":\"haiku\""));
        assert_eq!(conversation.last_assistant_text().as_deref(), Some("Leaves fall"));
    }

    #[tokio::test]
    async fn test_refines_until_retries_run_out() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text(request_json(0.9)),
            Message::assistant().with_text("draft 1"),
            verdict(false, 0.4),
            Message::assistant().with_text("draft 2"),
            verdict(true, 0.8),
            Message::assistant().with_text("draft 3"),
            verdict(true, 0.9),
            Message::assistant().with_text("draft 4"),
        ]);
        let task = DocTask::new(Arc::new(provider.clone()));
        let mut conversation = task.start().unwrap();

        let reply = task.reply(&mut conversation, "Write a haiku").await.unwrap();

        assert_eq!(reply, Reply::Answer("draft 4".to_string()));
        assert_eq!(provider.call_count(), 8);
    }

    #[tokio::test]
    async fn test_not_a_document_request() {
        let provider = MockProvider::new(vec![Message::assistant().with_text(
            json!({
                "description": "Weather question",
                "is_document_generating_event": false,
                "target_length": 0,
                "document_style": "",
                "key_words": [],
                "confidence_score": 0.99
            })
            .to_string(),
        )]);
        let task = DocTask::new(Arc::new(provider.clone()));
        let mut conversation = task.start().unwrap();

        let reply = task
            .reply(&mut conversation, "Is it raining?")
            .await
            .unwrap();

        assert_eq!(reply, Reply::Rejected(REJECTION.to_string()));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_draft_is_a_model_error() {
        let provider = MockProvider::new(vec![
            Message::assistant().with_text(request_json(0.9)),
            Message::assistant(),
        ]);
        let task = DocTask::new(Arc::new(provider));
        let mut conversation = task.start().unwrap();

        let err = task.reply(&mut conversation, "Write a haiku").await.unwrap_err();
        assert!(matches!(err, AgentError::ModelCall(_)));
    }
}
