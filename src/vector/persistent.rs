use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Metadata, RecordSet, ScoredMatch, VectorStore};
use crate::error::VectorStoreError;

/// Collection persisted as `<dir>/<collection>.json`.
///
/// The whole collection is loaded on open and rewritten after every mutation
/// through a temporary file and a rename, so a crash never leaves a partially
/// written collection behind.
#[derive(Debug)]
pub struct JsonFileVectorStore {
    path: PathBuf,
    records: Mutex<RecordSet>,
}

impl JsonFileVectorStore {
    pub async fn open(
        dir: impl AsRef<Path>,
        collection: &str,
    ) -> Result<Self, VectorStoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{collection}.json"));

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => RecordSet::from_records(serde_json::from_slice(&bytes)?)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => RecordSet::default(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "opened vector collection"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &RecordSet) -> Result<(), VectorStoreError> {
        let bytes = serde_json::to_vec(records.records())?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for JsonFileVectorStore {
    async fn add(
        &self,
        embeddings: Vec<Vec<f32>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>, VectorStoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        let ids = next.insert(embeddings, metadatas)?;
        self.persist(&next).await?;
        *records = next;
        tracing::debug!(added = ids.len(), path = %self.path.display(), "stored embeddings");
        Ok(ids)
    }

    async fn query_scored(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, VectorStoreError> {
        self.records.lock().await.rank(embedding, top_k)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        if next.remove(ids) == 0 {
            return Ok(());
        }
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        let mut records = self.records.lock().await;
        let next = RecordSet::default();
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn count(&self) -> usize {
        self.records.lock().await.len()
    }
}
