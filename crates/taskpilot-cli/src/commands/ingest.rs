use anyhow::Result;
use console::style;
use std::path::PathBuf;

use taskpilot::store::{ingest, DocumentStore, TextSplitter};

/// Load `files` into the store, optionally emptying it first
pub async fn run_ingest(
    store: &dyn DocumentStore,
    files: &[PathBuf],
    splitter: &TextSplitter,
    reset: bool,
) -> Result<usize> {
    if reset {
        store.reset().await?;
        println!("{}", style("Store reset").dim());
    }

    let reports = ingest(store, files, splitter).await?;
    let mut total = 0;
    for report in &reports {
        println!(
            "{} {} ({} chunks)",
            style("Added").green(),
            report.source.display(),
            report.chunks
        );
        total += report.chunks;
    }
    Ok(total)
}
