//! The bounded tool-call loop.
//!
//! [`Agent::run`] invokes the model with the whole conversation and the tools of every
//! registered [`System`]. Tool requests are executed one at a time in the order the model
//! listed them, and each one gets exactly one result appended to the conversation before the
//! model is asked again. The loop ends when the model answers with plain content or when
//! the step budget is spent.

use std::sync::Arc;

use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::providers::base::{Provider, ResponseFormat};
use crate::systems::System;

/// How a response carrying both content and tool calls is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentPrecedence {
    /// Execute the tool calls and keep looping; the content is not final
    #[default]
    ToolCallsFirst,
    /// Execute the tool calls, then finish with the content
    ContentIsFinal,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum number of model invocations in one run
    pub step_budget: usize,
    pub precedence: ContentPrecedence,
    /// Appended as a system message before every invocation after the first
    pub continuation_prompt: Option<String>,
    pub response_format: Option<ResponseFormat>,
}

impl LoopConfig {
    pub fn new(step_budget: usize) -> Self {
        Self {
            step_budget,
            precedence: ContentPrecedence::default(),
            continuation_prompt: None,
            response_format: None,
        }
    }

    pub fn with_precedence(mut self, precedence: ContentPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_continuation_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.continuation_prompt = Some(prompt.into());
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Step accounting for one run. The step count never decreases and the state is terminal
/// once the budget is reached or the run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    step: usize,
    budget: usize,
    terminated: bool,
}

impl LoopState {
    pub fn new(budget: usize) -> AgentResult<Self> {
        if budget == 0 {
            return Err(AgentError::Internal(
                "step budget must allow at least one model call".to_string(),
            ));
        }
        Ok(Self {
            step: 0,
            budget,
            terminated: false,
        })
    }

    /// Start the next step, returning false once no step is left
    pub fn begin_step(&mut self) -> bool {
        if self.terminated || self.step >= self.budget {
            self.terminated = true;
            return false;
        }
        self.step += 1;
        true
    }

    pub fn finish(&mut self) {
        self.terminated = true;
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Completed,
    StepBudgetExceeded { budget: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub termination: Termination,
    /// The final answer, or on exhaustion the last content the model produced (if any)
    pub content: Option<String>,
    pub steps: usize,
}

impl LoopOutcome {
    pub fn is_completed(&self) -> bool {
        self.termination == Termination::Completed
    }

    /// The final answer, treating an exhausted budget as an error
    pub fn into_answer(self) -> AgentResult<String> {
        match self.termination {
            Termination::Completed => Ok(self.content.unwrap_or_default()),
            Termination::StepBudgetExceeded { budget } => {
                Err(AgentError::StepBudgetExceeded { budget })
            }
        }
    }
}

/// Agent integrates a foundational LLM with the systems it needs to pilot
pub struct Agent {
    systems: Vec<Box<dyn System>>,
    provider: Arc<dyn Provider>,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            systems: Vec::new(),
            provider,
        }
    }

    /// Add a system to the agent. Tool names must stay unique across systems.
    pub fn add_system(&mut self, system: Box<dyn System>) -> AgentResult<()> {
        if let Some(clash) = system
            .tools()
            .iter()
            .find(|tool| self.system_for_tool(&tool.name).is_some())
        {
            return Err(AgentError::Internal(format!(
                "tool {} is already provided by another system",
                clash.name
            )));
        }
        self.systems.push(system);
        Ok(())
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.systems
            .iter()
            .flat_map(|system| system.tools().iter().cloned())
            .collect()
    }

    fn system_for_tool(&self, name: &str) -> Option<&dyn System> {
        self.systems
            .iter()
            .find(|system| system.tools().iter().any(|tool| tool.name == name))
            .map(|v| &**v)
    }

    /// Dispatch a single tool call to the system that declares it
    async fn dispatch_tool_call(
        &self,
        tool_call: AgentResult<ToolCall>,
    ) -> AgentResult<Vec<Content>> {
        let call = tool_call?;
        let system = self
            .system_for_tool(&call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;
        system.call(call).await
    }

    /// One model invocation without tools or loop bookkeeping
    pub async fn complete(
        &self,
        messages: &[Message],
        response_format: Option<&ResponseFormat>,
    ) -> AgentResult<Message> {
        let (message, _) = self
            .provider
            .complete(messages, &[], response_format)
            .await
            .map_err(|e| AgentError::ModelCall(e.to_string()))?;
        Ok(message)
    }

    /// Drive the model until it answers or the step budget is spent, appending every
    /// response and tool result to `conversation`
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        config: &LoopConfig,
    ) -> AgentResult<LoopOutcome> {
        let mut state = LoopState::new(config.step_budget)?;
        let tools = self.tools();
        let mut last_content = None;

        while state.begin_step() {
            if state.step() > 1 {
                if let Some(prompt) = &config.continuation_prompt {
                    conversation.push(Message::system().with_text(prompt))?;
                }
            }

            let (response, usage) = self
                .provider
                .complete(
                    conversation.messages(),
                    &tools,
                    config.response_format.as_ref(),
                )
                .await
                .map_err(|e| AgentError::ModelCall(e.to_string()))?;

            let content = response.text().filter(|text| !text.trim().is_empty());
            let requests: Vec<ToolRequest> = response.tool_requests().cloned().collect();
            tracing::debug!(
                step = state.step(),
                budget = state.budget(),
                tool_calls = requests.len(),
                total_tokens = ?usage.total_tokens,
                "model step"
            );
            conversation.push(response)?;

            if content.is_some() {
                last_content = content.clone();
            }

            if requests.is_empty() {
                match content {
                    Some(text) => {
                        state.finish();
                        return Ok(LoopOutcome {
                            termination: Termination::Completed,
                            content: Some(text),
                            steps: state.step(),
                        });
                    }
                    // an empty reply stays in the log and the model is asked again
                    None => continue,
                }
            }

            self.execute_requests(conversation, &requests).await?;

            if config.precedence == ContentPrecedence::ContentIsFinal {
                if let Some(text) = content {
                    state.finish();
                    return Ok(LoopOutcome {
                        termination: Termination::Completed,
                        content: Some(text),
                        steps: state.step(),
                    });
                }
            }
        }

        tracing::warn!(budget = state.budget(), "step budget exhausted");
        Ok(LoopOutcome {
            termination: Termination::StepBudgetExceeded {
                budget: state.budget(),
            },
            content: last_content,
            steps: state.step(),
        })
    }

    async fn execute_requests(
        &self,
        conversation: &mut Conversation,
        requests: &[ToolRequest],
    ) -> AgentResult<()> {
        let mut remaining = requests.iter();
        while let Some(request) = remaining.next() {
            tracing::info!(
                tool = request.name().unwrap_or("<undecodable>"),
                id = %request.id,
                "calling tool"
            );
            let result = self.dispatch_tool_call(request.tool_call.clone()).await;

            match result {
                Err(error) if error.is_fatal() => {
                    tracing::error!(id = %request.id, %error, "tool call aborted the turn");
                    conversation.push_tool_result(&request.id, Err(error.clone()))?;
                    for skipped in remaining.by_ref() {
                        conversation.push_tool_result(
                            &skipped.id,
                            Err(AgentError::ExecutionError(
                                "not executed because an earlier tool call aborted the turn"
                                    .to_string(),
                            )),
                        )?;
                    }
                    return Err(error);
                }
                result => {
                    if let Err(error) = &result {
                        tracing::warn!(id = %request.id, %error, "tool call failed");
                    }
                    conversation.push_tool_result(&request.id, result)?;
                }
            }
        }
        Ok(())
    }
}
