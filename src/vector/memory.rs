use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{Metadata, RecordSet, ScoredMatch, VectorStore};
use crate::error::VectorStoreError;

/// Brute-force in-process store.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: RwLock<RecordSet>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(
        &self,
        embeddings: Vec<Vec<f32>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>, VectorStoreError> {
        let ids = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(embeddings, metadatas)?;
        tracing::debug!(added = ids.len(), "stored embeddings");
        Ok(ids)
    }

    async fn query_scored(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, VectorStoreError> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rank(embedding, top_k)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError> {
        let removed = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ids);
        tracing::debug!(requested = ids.len(), removed, "deleted embeddings");
        Ok(())
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    async fn count(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
