use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{Provider, ResponseFormat, Usage};

/// A mock provider that returns pre-configured responses and records every request
#[derive(Clone, Default)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Message>>>,
    requests: Arc<Mutex<Vec<MockRequest>>>,
    fail_when_empty: bool,
}

/// What the provider was asked for on one call
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
    pub response_format: Option<String>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Default::default()
        }
    }

    /// Error out instead of replying with empty text once the script runs out
    pub fn failing_when_empty(mut self) -> Self {
        self.fail_when_empty = true;
        self
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Tool],
        response_format: Option<&ResponseFormat>,
    ) -> Result<(Message, Usage)> {
        self.requests.lock().unwrap().push(MockRequest {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            response_format: response_format.map(|f| f.name.clone()),
        });

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
