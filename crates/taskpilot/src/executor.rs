use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::errors::{AgentError, AgentResult};

pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

/// Runs a script file with an interpreter under a hard wall-clock limit
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    pub interpreter: String,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }
}

impl ScriptRunner {
    pub fn new<S: Into<String>>(interpreter: S, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub async fn run(&self, script: &Path) -> AgentResult<ScriptOutput> {
        tracing::info!(
            interpreter = %self.interpreter,
            script = %script.display(),
            "running script"
        );

        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            AgentError::ExecutionError(format!("failed to start {}: {}", self.interpreter, e))
        })?;

        // the child is killed when the timed out future drops it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| AgentError::ExecutionError(e.to_string()))?,
            Err(_) => {
                tracing::warn!(seconds = self.timeout.as_secs(), "script timed out");
                return Err(AgentError::ToolExecutionTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let result = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(-1),
        };

        if output.status.success() {
            Ok(result)
        } else {
            let mut detail = format!("exit code {}", result.status);
            for stream in [&result.stdout, &result.stderr] {
                if !stream.trim().is_empty() {
                    detail.push('\n');
                    detail.push_str(stream.trim_end());
                }
            }
            Err(AgentError::ExecutionError(detail))
        }
    }
}
