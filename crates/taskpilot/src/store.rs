//! Document storage for retrieval.
//!
//! The store itself is an external collaborator (a Chroma server); [`MemoryStore`] stands in
//! for it offline. Ingestion chunks local text files with [`TextSplitter`] before adding them.

pub mod chroma;
pub mod memory;
pub mod splitter;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{AgentError, AgentResult};

pub use chroma::ChromaStore;
pub use memory::MemoryStore;
pub use splitter::{split_text, TextSplitter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    /// Where the text was loaded from
    pub source: String,
}

impl Document {
    pub fn new<I, T, S>(id: I, text: T, source: S) -> Self
    where
        I: Into<String>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Ids of the `top_k` documents closest to `text`, best match first
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>>;

    /// Texts of the given documents, in the order of `ids`; unknown ids are skipped
    async fn fetch(&self, ids: &[String]) -> Result<Vec<String>>;

    async fn add(&self, documents: &[Document]) -> Result<()>;

    /// Drop everything stored so far
    async fn reset(&self) -> Result<()>;
}

/// Query then fetch, the way retrieval is done for a question
pub async fn retrieve(
    store: &dyn DocumentStore,
    text: &str,
    top_k: usize,
) -> AgentResult<Vec<String>> {
    let ids = store
        .query(text, top_k)
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?;
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let chunks = store
        .fetch(&ids)
        .await
        .map_err(|e| AgentError::Store(e.to_string()))?;
    tracing::debug!(requested = top_k, found = chunks.len(), "retrieved chunks");
    Ok(chunks)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source: PathBuf,
    pub chunks: usize,
}

/// Chunk each UTF-8 text file and add the chunks to `store` with ids `<file stem>-<n>`
pub async fn ingest(
    store: &dyn DocumentStore,
    sources: &[PathBuf],
    splitter: &TextSplitter,
) -> Result<Vec<IngestReport>> {
    let mut reports = Vec::with_capacity(sources.len());

    for source in sources {
        let text = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let stem = file_stem(source);
        let documents: Vec<Document> = splitter
            .split_text(&text)
            .into_iter()
            .enumerate()
            .map(|(n, chunk)| {
                Document::new(format!("{}-{}", stem, n), chunk, source.display().to_string())
            })
            .collect();

        store.add(&documents).await?;
        tracing::info!(source = %source.display(), chunks = documents.len(), "added chunks");
        reports.push(IngestReport {
            source: source.clone(),
            chunks: documents.len(),
        });
    }

    Ok(reports)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_ingest_then_retrieve() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let attractions = dir.path().join("auckland_attraction.txt");
        fs::write(
            &attractions,
            "Sky Tower offers views over Auckland.\n\nWaiheke Island has vineyards and beaches.",
        )?;
        let terms = dir.path().join("terms.txt");
        fs::write(&terms, "These terms govern use of the service.")?;

        let store = MemoryStore::new();
        let splitter = TextSplitter::new(50, 0);
        let reports = ingest(&store, &[attractions.clone(), terms], &splitter).await?;

        assert_eq!(reports[0].source, attractions);
        assert_eq!(reports[0].chunks, 2);
        assert_eq!(reports[1].chunks, 1);

        let chunks = retrieve(&store, "vineyards on Waiheke", 1).await.unwrap();
        assert_eq!(chunks, vec!["Waiheke Island has vineyards and beaches."]);
        assert_eq!(
            store.fetch(&["auckland_attraction-0".to_string()]).await?,
            vec!["Sky Tower offers views over Auckland."]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ingest_missing_file() {
        let store = MemoryStore::new();
        let err = ingest(
            &store,
            &[PathBuf::from("/definitely/not/here.txt")],
            &TextSplitter::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
