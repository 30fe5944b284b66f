use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use taskpilot::models::message::Message;
use taskpilot::models::tool::Tool;
use taskpilot::providers::base::{Provider, ResponseFormat, Usage};

/// Scripted provider for session tests. The library's own mock is compiled only into the
/// library's tests.
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    fail_when_empty: bool,
}

impl MockProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Default::default()
        }
    }

    pub fn failing_when_empty(mut self) -> Self {
        self.fail_when_empty = true;
        self
    }

    /// The messages sent on each call
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        _response_format: Option<&ResponseFormat>,
    ) -> Result<(Message, Usage)> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            if self.fail_when_empty {
                return Err(anyhow!("no scripted response left"));
            }
            Ok((Message::assistant().with_text(""), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }
}
