use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{conclude, primed, Reply, Task, TaskContext, TaskKind};
use crate::agent::{Agent, LoopConfig, Termination};
use crate::conversation::Conversation;
use crate::errors::{AgentError, AgentResult};
use crate::executor::ScriptRunner;
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::structured::{parse, StructuredOutput};
use crate::systems::System;

pub const SYSTEM_PROMPT: &str = "You are a Python AI coding assistant, you only know Python. When generating any code, always make the code executable and includes different inputs as examples. Print statements should have new line at the end.";
pub const OUTPUT_FILE: &str = "output.py";
pub const STEP_BUDGET: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnswer {
    pub description: String,
    pub generated_code: String,
    pub general_output: String,
    pub confidence_score: f64,
}

impl StructuredOutput for CodeAnswer {
    const NAME: &'static str = "EventExtraction";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "Raw description of the latest user input"
                },
                "generated_code": {
                    "type": "string",
                    "description": "Any executable Python code generated in this answer"
                },
                "general_output": {
                    "type": "string",
                    "description": "Answer which will be displayed to the user, including any code generated"
                },
                "confidence_score": {
                    "type": "number",
                    "description": "Confidence score between 0 and 1"
                }
            },
            "required": ["description", "generated_code", "general_output", "confidence_score"],
            "additionalProperties": false
        })
    }
}

/// Reads and runs the code file kept in the working directory
pub struct CodingSystem {
    workdir: PathBuf,
    runner: ScriptRunner,
    tools: Vec<Tool>,
}

impl CodingSystem {
    pub fn new(workdir: PathBuf, runner: ScriptRunner) -> Self {
        let no_arguments = json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        });
        let tools = vec![
            Tool::new(
                "get_local_code",
                "Read code generated and stored in local.",
                no_arguments.clone(),
            )
            .strict(),
            Tool::new(
                "run_local_code",
                "Run the code stored in local and return what it printed.",
                no_arguments,
            )
            .strict(),
        ];
        Self {
            runner: runner.with_working_dir(&workdir),
            workdir,
            tools,
        }
    }

    pub fn code_path(&self) -> PathBuf {
        self.workdir.join(OUTPUT_FILE)
    }

    async fn read_code(&self) -> AgentResult<String> {
        tokio::fs::read_to_string(self.code_path())
            .await
            .map_err(|e| AgentError::ExecutionError(format!("cannot read {}: {}", OUTPUT_FILE, e)))
    }

    /// Replace the stored code with `code`. The file stays in place even when the
    /// turn that wrote it is later discarded.
    pub async fn write_code(&self, code: &str) -> AgentResult<()> {
        tokio::fs::create_dir_all(&self.workdir).await.map_err(|e| {
            let dir = self.workdir.display();
            AgentError::ExecutionError(format!("cannot create {}: {}", dir, e))
        })?;
        tokio::fs::write(self.code_path(), code)
            .await
            .map_err(|e| AgentError::ExecutionError(format!("cannot write {}: {}", OUTPUT_FILE, e)))
    }

    /// Run the stored code; the script path is relative to the working directory
    pub async fn run_code(&self) -> AgentResult<String> {
        let output = self.runner.run(Path::new(OUTPUT_FILE)).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl System for CodingSystem {
    fn name(&self) -> &str {
        "CodingSystem"
    }

    fn description(&self) -> &str {
        "Access to the locally stored Python code"
    }

    fn tools(&self) -> &[Tool] {
        &self.tools
    }

    async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
        let text = match tool_call.name.as_str() {
            "get_local_code" => self.read_code().await?,
            "run_local_code" => self.run_code().await?,
            _ => return Err(AgentError::UnknownTool(tool_call.name)),
        };
        Ok(vec![Content::text(text)])
    }
}

/// Coding assistant that answers in a structured form and runs the code it writes
pub struct CodeTask {
    agent: Agent,
    coding: Arc<CodingSystem>,
    config: LoopConfig,
}

impl CodeTask {
    pub fn new(context: &TaskContext) -> AgentResult<Self> {
        let coding = Arc::new(CodingSystem::new(
            context.workdir.clone(),
            context.runner.clone(),
        ));
        let mut agent = Agent::new(context.provider.clone());
        agent.add_system(Box::new(coding.clone()))?;
        Ok(Self {
            agent,
            coding,
            config: LoopConfig::new(STEP_BUDGET)
                .with_response_format(CodeAnswer::response_format()),
        })
    }

    /// The readable answer, with the result of running any generated code appended
    async fn present(&self, answer: CodeAnswer) -> AgentResult<String> {
        let mut text = answer.general_output;
        if answer.generated_code.trim().is_empty() {
            return Ok(text);
        }

        self.coding.write_code(&answer.generated_code).await?;
        text.push_str(&format!("\n\nYou may find the code in {}.", OUTPUT_FILE));
        match self.coding.run_code().await {
            Ok(stdout) => text.push_str(&format!("\n\nExecuted code, output:\n\n{}", stdout)),
            Err(AgentError::ExecutionError(detail)) => {
                tracing::warn!(%detail, "generated code failed");
                text.push_str(&format!("\n\nRunning the code failed:\n\n{}", detail));
            }
            Err(e) => return Err(e),
        }
        Ok(text)
    }
}

#[async_trait]
impl Task for CodeTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Code
    }

    fn start(&self) -> AgentResult<Conversation> {
        primed(SYSTEM_PROMPT, None)
    }

    async fn reply(&self, conversation: &mut Conversation, input: &str) -> AgentResult<Reply> {
        conversation.push(Message::user().with_text(input))?;
        let outcome = self.agent.run(conversation, &self.config).await?;
        if outcome.termination != Termination::Completed {
            return conclude(conversation, outcome);
        }

        // the structured answer is the last message the loop appended
        let answer: CodeAnswer = match conversation.last() {
            Some(message) => parse(message)?,
            None => return Err(AgentError::Internal("conversation is empty".to_string())),
        };
        let text = self.present(answer).await?;
        conversation.push(Message::assistant().with_text(text.clone()))?;
        Ok(Reply::Answer(text))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::time::Duration;

    fn answer(code: &str) -> Message {
        Message::assistant().with_text(
            json!({
                "description": "print a number",
                "generated_code": code,
                "general_output": "Here is the program.",
                "confidence_score": 0.9
            })
            .to_string(),
        )
    }

    fn task(provider: &MockProvider, dir: &tempfile::TempDir, timeout: Duration) -> CodeTask {
        let context = TaskContext::new(Arc::new(provider.clone()))
            .with_workdir(dir.path())
            .with_runner(ScriptRunner::new("sh", timeout));
        CodeTask::new(&context).unwrap()
    }

    #[tokio::test]
    async fn test_generated_code_is_written_and_run() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(vec![answer("echo 42\n")]);
        let task = task(&provider, &dir, Duration::from_secs(5));
        let mut conversation = task.start().unwrap();

        let reply = task.reply(&mut conversation, "print 42").await.unwrap();

        assert_eq!(
            reply,
            Reply::Answer(
                "Here is the program.\n\nYou may find the code in output.py.\n\nExecuted code, output:\n\n42\n"
                    .to_string()
            )
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join(OUTPUT_FILE)).unwrap(),
            "echo 42\n"
        );
        assert_eq!(
            provider.requests()[0].response_format.as_deref(),
            Some("EventExtraction")
        );
        // system, user, structured answer, readable answer
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn test_answer_without_code_is_not_run() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(vec![answer("")]);
        let task = task(&provider, &dir, Duration::from_secs(5));
        let mut conversation = task.start().unwrap();

        let reply = task.reply(&mut conversation, "hi").await.unwrap();
        assert_eq!(reply, Reply::Answer("Here is the program.".to_string()));
        assert!(!dir.path().join(OUTPUT_FILE).exists());
    }

    #[tokio::test]
    async fn test_reads_local_code_before_answering() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OUTPUT_FILE), "echo old\n").unwrap();
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("c1", Ok(ToolCall::new("get_local_code", json!({})))),
            answer("echo new\n"),
        ]);
        let task = task(&provider, &dir, Duration::from_secs(5));
        let mut conversation = task.start().unwrap();

        let reply = task
            .reply(&mut conversation, "change the program")
            .await
            .unwrap();

        let result = conversation
            .messages()
            .iter()
            .flat_map(|m| m.tool_responses())
            .next()
            .unwrap();
        assert_eq!(
            result.tool_result.as_ref().unwrap(),
            &vec![Content::text("echo old\n")]
        );
        assert!(reply.to_string().ends_with("output:\n\nnew\n"));
    }

    #[tokio::test]
    async fn test_failing_code_is_reported_in_the_answer() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(vec![answer("echo oops >&2\nexit 3\n")]);
        let task = task(&provider, &dir, Duration::from_secs(5));
        let mut conversation = task.start().unwrap();

        let reply = task.reply(&mut conversation, "fail").await.unwrap();
        let text = reply.to_string();
        assert!(text.contains("Running the code failed:\n\nexit code 3"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout_aborts_the_turn() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(vec![answer("sleep 60\n")]);
        let task = task(&provider, &dir, Duration::from_secs(1));
        let mut conversation = task.start().unwrap();

        let err = task.reply(&mut conversation, "wait").await.unwrap_err();
        assert_eq!(err, AgentError::ToolExecutionTimeout { seconds: 1 });
        // no readable answer is appended, the written file is kept
        assert_eq!(conversation.len(), 3);
        assert!(dir.path().join(OUTPUT_FILE).exists());
    }

    #[tokio::test]
    async fn test_timed_out_tool_call_aborts_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(OUTPUT_FILE), "sleep 60\n").unwrap();
        let provider = MockProvider::new(vec![Message::assistant()
            .with_tool_request("c1", Ok(ToolCall::new("run_local_code", json!({}))))]);
        let task = task(&provider, &dir, Duration::from_secs(1));
        let mut conversation = task.start().unwrap();

        let err = task.reply(&mut conversation, "run it").await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionTimeout { .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_side_by_side_run_their_own_code() {
        let base = tempfile::tempdir().unwrap();
        let session = |code: &str, id: &str| {
            let provider = MockProvider::new(vec![answer(code)]);
            let context = TaskContext::new(Arc::new(provider))
                .with_workdir(base.path())
                .with_runner(ScriptRunner::new("sh", Duration::from_secs(5)))
                .for_session(TaskKind::Code, id);
            CodeTask::new(&context).unwrap()
        };
        let a = session("sleep 0.2\necho from-a\n", "a");
        let b = session("echo from-b\n", "b");
        let mut first = a.start().unwrap();
        let mut second = b.start().unwrap();

        let (reply_a, reply_b) = tokio::join!(
            a.reply(&mut first, "print a"),
            b.reply(&mut second, "print b")
        );

        assert!(reply_a.unwrap().to_string().ends_with("output:\n\nfrom-a\n"));
        assert!(reply_b.unwrap().to_string().ends_with("output:\n\nfrom-b\n"));
        assert!(base.path().join("code-a").join(OUTPUT_FILE).exists());
        assert!(base.path().join("code-b").join(OUTPUT_FILE).exists());
    }
}
