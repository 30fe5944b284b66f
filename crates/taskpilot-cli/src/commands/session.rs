use anyhow::{Context, Result};
use cliclack::input;
use std::path::PathBuf;

use crate::prompt::cliclack::CliclackPrompt;
use crate::session::session_file::ensure_session_dir;
use crate::session::Session;
use taskpilot::tasks::{build_task, TaskContext, TaskKind};

/// Session for `kind`, recorded under the name given or asked for
pub fn build_session(
    kind: TaskKind,
    context: &TaskContext,
    session_name: Option<String>,
    interactive: bool,
) -> Result<Session<'static>> {
    let session_name = match session_name {
        Some(name) => name,
        None if interactive => input("Session name:")
            .placeholder(&kind.to_string())
            .default_input(&kind.to_string())
            .interact()?,
        None => kind.to_string(),
    };
    let session_file = session_path(ensure_session_dir()?, &session_name);

    let task = build_task(kind, context)
        .with_context(|| format!("Failed to set up the {} task", kind))?;
    Session::new(task, Box::new(CliclackPrompt::new()), session_file)
}

fn session_path(dir: PathBuf, name: &str) -> PathBuf {
    let file_name: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.jsonl", file_name))
}
