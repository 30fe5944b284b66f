use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;

use super::{Document, DocumentStore};

/// In-process store that ranks documents by how many distinct query terms they contain
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<String>> {
        let wanted = terms(text);
        let documents = self
            .documents
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        let mut scored: Vec<(usize, usize)> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| (terms(&doc.text).intersection(&wanted).count(), index))
            .filter(|(score, _)| *score > 0)
            .collect();
        // best score first, earlier documents win ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, index)| documents[index].id.clone())
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<String>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        Ok(ids
            .iter()
            .filter_map(|id| documents.iter().find(|doc| &doc.id == id))
            .map(|doc| doc.text.clone())
            .collect())
    }

    async fn add(&self, new_documents: &[Document]) -> Result<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        for document in new_documents {
            match documents.iter_mut().find(|doc| doc.id == document.id) {
                Some(existing) => *existing = document.clone(),
                None => documents.push(document.clone()),
            }
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?
            .clear();
        Ok(())
    }
}
