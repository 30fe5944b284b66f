//! The assistants a session can run.
//!
//! Every task primes a [`Conversation`] with [`Task::start`] and then answers one user
//! input per [`Task::reply`], appending everything it does to the conversation it is given.

pub mod ask;
pub mod chat;
pub mod code;
pub mod doc;
pub mod trip;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

use crate::agent::{LoopOutcome, Termination};
use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::executor::ScriptRunner;
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::providers::base::Provider;
use crate::store::{DocumentStore, MemoryStore};

pub use ask::AskTask;
pub use chat::ChatTask;
pub use code::CodeTask;
pub use doc::DocTask;
pub use trip::TripTask;

pub const DEFAULT_TOP_K: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TaskKind {
    Chat,
    Ask,
    Trip,
    Doc,
    Code,
}

/// How a turn ended, as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Answer(String),
    /// The input did not pass the task's gate
    Rejected(String),
    /// The step budget ran out; carries the last content the model produced
    Exhausted { last: Option<String>, budget: usize },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Answer(text) | Reply::Rejected(text) => write!(f, "{}", text),
            Reply::Exhausted {
                last: Some(text), ..
            } => write!(f, "{}", text),
            Reply::Exhausted { last: None, budget } => {
                write!(f, "{}", AgentError::StepBudgetExceeded { budget: *budget })
            }
        }
    }
}

#[async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// A fresh conversation with the task's priming messages and greeting
    fn start(&self) -> AgentResult<Conversation>;

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply>;
}

/// What tasks are built from
#[derive(Clone)]
pub struct TaskContext {
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn DocumentStore>,
    pub top_k: usize,
    /// Where generated code is written and run
    pub workdir: PathBuf,
    pub runner: ScriptRunner,
}

impl TaskContext {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            store: Arc::new(MemoryStore::new()),
            top_k: DEFAULT_TOP_K,
            workdir: PathBuf::from("."),
            runner: ScriptRunner::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_runner(mut self, runner: ScriptRunner) -> Self {
        self.runner = runner;
        self
    }

    /// The context of one session: files the task writes go to `<workdir>/<kind>-<id>`,
    /// so sessions running side by side never share a file.
    pub fn for_session(&self, kind: TaskKind, id: &str) -> TaskContext {
        let dir: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.clone().with_workdir(self.workdir.join(format!("{}-{}", kind, dir)))
    }
}

pub fn build_task(kind: TaskKind, context: &TaskContext) -> AgentResult<Box<dyn Task>> {
    Ok(match kind {
        TaskKind::Chat => Box::new(ChatTask::new(context.provider.clone())),
        TaskKind::Ask => Box::new(AskTask::new(
            context.provider.clone(),
            context.store.clone(),
            context.top_k,
        )),
        TaskKind::Trip => Box::new(TripTask::new(context)?),
        TaskKind::Doc => Box::new(DocTask::new(context.provider.clone())),
        TaskKind::Code => Box::new(CodeTask::new(context)?),
    })
}

/// Conversation holding the given system priming and an optional assistant greeting
fn primed(system: &str, greeting: Option<&str>) -> AgentResult<Conversation> {
    let conversation = Conversation::new().with_message(Message::system().with_text(system))?;
    match greeting {
        Some(text) => conversation.with_message(Message::assistant().with_text(text)),
        None => Ok(conversation),
    }
}

/// Record a gate rejection as the assistant's answer
fn reject(conversation: &mut Conversation, text: &str) -> AgentResult<Reply> {
    conversation.push(Message::assistant().with_text(text))?;
    Ok(Reply::Rejected(text.to_string()))
}

/// Turn the outcome of a tool loop into a reply. The loop already appended the final
/// answer; an exhausted budget is recorded as an assistant message.
fn conclude(conversation: &mut Conversation, outcome: LoopOutcome) -> AgentResult<Reply> {
    match outcome.termination {
        Termination::Completed => Ok(Reply::Answer(outcome.content.unwrap_or_default())),
        Termination::StepBudgetExceeded { budget } => {
            let reply = Reply::Exhausted {
                last: outcome.content,
                budget,
            };
            conversation.push(Message::assistant().with_text(reply.to_string()))?;
            Ok(reply)
        }
    }
}

/// Announcement shown when the model requests a tool call
pub fn step_label(call: &ToolCall) -> String {
    let local = call.arguments["should_query_local_data"].as_bool() == Some(true);
    match call.arguments["location"].as_str() {
        Some(location) if call.name == "get_attractions" && local => {
            format!("Step: {} for {} (use local data)", call.name, location)
        }
        _ => format!("Step: {}", call.name),
    }
}

fn model_error(e: anyhow::Error) -> AgentError {
    AgentError::ModelCall(e.to_string())
}
