use anyhow::Result;
use std::path::PathBuf;

use crate::prompt::{InputType, Prompt};
use session_file::{load_messages, persist_messages};
use taskpilot::conversation::Conversation;
use taskpilot::models::message::{Message, MessageContent};
use taskpilot::tasks::{Reply, Task};

#[cfg(test)]
mod mock_provider;
pub mod session_file;

pub struct Session<'a> {
    task: Box<dyn Task>,
    prompt: Box<dyn Prompt + 'a>,
    session_file: PathBuf,
    conversation: Conversation,
}

impl<'a> Session<'a> {
    /// Resume the conversation recorded in `session_file`, or start the task afresh
    pub fn new(
        task: Box<dyn Task>,
        prompt: Box<dyn Prompt + 'a>,
        session_file: PathBuf,
    ) -> Result<Self> {
        let recorded = load_messages(&session_file)?;
        let conversation = if recorded.is_empty() {
            task.start()?
        } else {
            Conversation::restore(recorded)?
        };
        Ok(Session {
            task,
            prompt,
            session_file,
            conversation,
        })
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub async fn start(&mut self) -> Result<()> {
        self.setup_session();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = &input.content {
                        self.process_turn(content).await;
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }
        }
        self.close_session();
        Ok(())
    }

    pub async fn headless_start(&mut self, initial_message: &str) -> Result<()> {
        self.setup_session();
        self.process_turn(initial_message).await;
        self.close_session();
        Ok(())
    }

    /// Run one turn on a copy of the conversation, committing the copy only when the
    /// turn finishes. Ctrl-C drops the turn and leaves the conversation as it was.
    async fn process_turn(&mut self, input: &str) {
        self.prompt.show_busy();
        let mut working = self.conversation.clone();
        let mark = working.len();

        let outcome = {
            let reply = self.task.reply(&mut working, input);
            tokio::select! {
                result = reply => Some(result),
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        self.prompt.hide_busy();

        match outcome {
            Some(Ok(reply)) => {
                self.render_turn(working.since(mark), &reply);
                self.conversation = working;
                persist_messages(&self.session_file, self.conversation.messages())
                    .unwrap_or_else(|e| eprintln!("Failed to persist messages: {}", e));
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "turn failed");
                self.prompt.render(raw_message(&format!("Error: {}\n", e)));
            }
            None => {
                self.prompt.render(raw_message(
                    " Interrupt: Resetting conversation to before the last sent message...\n",
                ));
            }
        }
    }

    /// Show the tool steps taken during the turn, then the reply
    fn render_turn(&mut self, appended: &[Message], reply: &Reply) {
        for message in appended {
            let tool_content: Vec<MessageContent> = message
                .content
                .iter()
                .filter(|content| !matches!(content, MessageContent::Text(_)))
                .cloned()
                .collect();
            if !tool_content.is_empty() {
                self.prompt.render(Box::new(Message {
                    content: tool_content,
                    ..message.clone()
                }));
            }
        }
        self.prompt.render(raw_message(&reply.to_string()));
    }

    fn setup_session(&mut self) {
        self.prompt.render(raw_message(&format!(
            "Starting session. Recording to {}\n",
            self.session_file.display()
        )));

        // replay what the user has already seen
        let shown: Vec<Message> = self
            .conversation
            .messages()
            .iter()
            .filter(|message| message.text().is_some() && !message.has_tool_requests())
            .cloned()
            .collect();
        for message in shown {
            self.prompt.render(Box::new(message));
        }

        self.prompt.ready(&self.task.kind().to_string());
    }

    fn close_session(&mut self) {
        self.prompt.render(raw_message(&format!(
            "Closing session. Recorded to {}\n",
            self.session_file.display()
        )));
        self.prompt.close();
    }
}

fn raw_message(content: &str) -> Box<Message> {
    Box::new(Message::assistant().with_text(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Input;
    use mock_provider::MockProvider;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use taskpilot::models::role::Role;
    use taskpilot::models::tool::ToolCall;
    use taskpilot::tasks::{build_task, TaskContext, TaskKind};

    /// Feeds canned input and records everything rendered
    struct ScriptedPrompt {
        inputs: VecDeque<String>,
        rendered: Arc<Mutex<Vec<Message>>>,
    }

    impl ScriptedPrompt {
        fn new(inputs: &[&str]) -> (Self, Arc<Mutex<Vec<Message>>>) {
            let rendered = Arc::new(Mutex::new(Vec::new()));
            let prompt = Self {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                rendered: rendered.clone(),
            };
            (prompt, rendered)
        }
    }

    impl Prompt for ScriptedPrompt {
        fn render(&mut self, message: Box<Message>) {
            self.rendered.lock().unwrap().push(*message);
        }

        fn get_input(&mut self) -> Result<Input> {
            Ok(match self.inputs.pop_front() {
                Some(text) => Input {
                    input_type: InputType::Message,
                    content: Some(text),
                },
                None => Input {
                    input_type: InputType::Exit,
                    content: None,
                },
            })
        }

        fn show_busy(&mut self) {}
        fn hide_busy(&mut self) {}
        fn close(&self) {}
        fn ready(&self, _task: &str) {}
    }

    fn task(kind: TaskKind, provider: &MockProvider) -> Box<dyn Task> {
        build_task(kind, &TaskContext::new(Arc::new(provider.clone()))).unwrap()
    }

    fn texts(rendered: &Arc<Mutex<Vec<Message>>>) -> Vec<String> {
        rendered
            .lock()
            .unwrap()
            .iter()
            .filter_map(|m| m.text())
            .collect()
    }

    #[tokio::test]
    async fn test_chat_session_is_recorded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chat.jsonl");
        let provider = MockProvider::new(vec![
            Message::assistant().with_text("Kia ora!"),
            Message::assistant().with_text("Auckland."),
        ]);
        let (prompt, rendered) = ScriptedPrompt::new(&["hello", "which city?"]);

        let mut session = Session::new(task(TaskKind::Chat, &provider), Box::new(prompt), path.clone())?;
        session.start().await?;

        let shown = texts(&rendered);
        assert!(shown.contains(&"How can I help you?".to_string()));
        assert!(shown.contains(&"Kia ora!".to_string()));
        assert!(shown.contains(&"Auckland.".to_string()));

        assert_eq!(session.conversation().len(), 6);
        assert_eq!(load_messages(&path)?.len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_resumes_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chat.jsonl");
        persist_messages(
            &path,
            &[
                Message::system().with_text("You are a helpful assistant."),
                Message::assistant().with_text("How can I help you?"),
                Message::user().with_text("hello"),
                Message::assistant().with_text("Kia ora!"),
            ],
        )?;

        let provider = MockProvider::new(vec![Message::assistant().with_text("Still here.")]);
        let (prompt, _) = ScriptedPrompt::new(&["are you there?"]);
        let mut session = Session::new(task(TaskKind::Chat, &provider), Box::new(prompt), path.clone())?;
        session.start().await?;

        // the model saw the recorded history
        assert_eq!(provider.requests()[0].len(), 5);
        assert_eq!(load_messages(&path)?.len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_turn_is_not_committed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chat.jsonl");
        let provider = MockProvider::new(vec![]).failing_when_empty();
        let (prompt, rendered) = ScriptedPrompt::new(&["hello"]);

        let mut session = Session::new(task(TaskKind::Chat, &provider), Box::new(prompt), path.clone())?;
        session.start().await?;

        assert_eq!(session.conversation().len(), 2);
        assert!(texts(&rendered)
            .iter()
            .any(|text| text.starts_with("Error: Model call failed")));
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_steps_are_rendered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let gate = json!({
            "description": "trip",
            "is_trip_planning_event": true,
            "should_query_local_data": false,
            "trip_duration": "unknown",
            "location": "Auckland",
            "confidence_score": 0.9
        });
        let provider = MockProvider::new(vec![
            Message::assistant().with_text(gate.to_string()),
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("book_flight", json!({}))),
            ),
            Message::assistant().with_text("I can only plan, not book."),
        ]);
        let (prompt, rendered) = ScriptedPrompt::new(&[]);

        let mut session = Session::new(
            task(TaskKind::Trip, &provider),
            Box::new(prompt),
            dir.path().join("trip.jsonl"),
        )?;
        session.headless_start("Book me a flight to Auckland").await?;

        let rendered = rendered.lock().unwrap();
        let request = rendered.iter().find(|m| m.has_tool_requests()).unwrap();
        assert_eq!(request.text(), None);
        let response = rendered.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(!response.tool_responses().next().unwrap().is_success());
        assert!(rendered
            .iter()
            .any(|m| m.text().as_deref() == Some("I can only plan, not book.")));
        Ok(())
    }
}
