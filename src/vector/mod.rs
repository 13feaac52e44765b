//! Embedding storage with cosine-similarity retrieval.

mod memory;
mod persistent;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::VectorStoreError;

pub use memory::InMemoryVectorStore;
pub use persistent::JsonFileVectorStore;

pub type Metadata = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Store of `(id, vector, metadata)` records.
///
/// All vectors in a non-empty store share one dimension, fixed by the first
/// insertion and released when the store becomes empty again.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts one record per embedding and returns the generated ids in input
    /// order. Nothing is stored if any input is rejected.
    async fn add(
        &self,
        embeddings: Vec<Vec<f32>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>, VectorStoreError>;

    /// Up to `top_k` records by descending cosine similarity. Ties keep
    /// insertion order.
    async fn query_scored(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, VectorStoreError>;

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<Metadata>, VectorStoreError> {
        Ok(self
            .query_scored(embedding, top_k)
            .await?
            .into_iter()
            .map(|found| found.metadata)
            .collect())
    }

    /// Removes the listed ids; unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<(), VectorStoreError>;

    async fn clear(&self) -> Result<(), VectorStoreError>;

    async fn count(&self) -> usize;
}

/// Cosine similarity of two equal-length vectors; 0.0 when either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Shared record bookkeeping behind both store backends.
#[derive(Clone, Debug, Default)]
pub(crate) struct RecordSet {
    records: Vec<EmbeddingRecord>,
}

impl RecordSet {
    /// Accepts loaded records only if they share one dimension and hold
    /// finite components.
    pub(crate) fn from_records(records: Vec<EmbeddingRecord>) -> Result<Self, VectorStoreError> {
        if let Some(first) = records.first() {
            let expected = first.vector.len();
            for record in &records {
                if record.vector.len() != expected {
                    return Err(VectorStoreError::InconsistentDimension {
                        expected,
                        actual: record.vector.len(),
                    });
                }
                check_finite(&record.vector)?;
            }
        }
        Ok(Self { records })
    }

    pub(crate) fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.records.first().map(|record| record.vector.len())
    }

    /// Validates every input before inserting any of them.
    pub(crate) fn insert(
        &mut self,
        embeddings: Vec<Vec<f32>>,
        metadatas: Option<Vec<Metadata>>,
    ) -> Result<Vec<String>, VectorStoreError> {
        let metadatas = match metadatas {
            Some(metadatas) if metadatas.len() != embeddings.len() => {
                return Err(VectorStoreError::DimensionMismatch {
                    embeddings: embeddings.len(),
                    metadatas: metadatas.len(),
                });
            }
            Some(metadatas) => metadatas,
            None => vec![Metadata::new(); embeddings.len()],
        };

        if let Some(first) = embeddings.first() {
            let expected = self.dimension().unwrap_or(first.len());
            if let Some(bad) = embeddings.iter().find(|vector| vector.len() != expected) {
                return Err(VectorStoreError::InconsistentDimension {
                    expected,
                    actual: bad.len(),
                });
            }
        }
        for vector in &embeddings {
            check_finite(vector)?;
        }

        let ids = embeddings
            .into_iter()
            .zip(metadatas)
            .map(|(vector, metadata)| {
                let id = uuid::Uuid::new_v4().to_string();
                self.records.push(EmbeddingRecord {
                    id: id.clone(),
                    vector,
                    metadata,
                });
                id
            })
            .collect();
        Ok(ids)
    }

    pub(crate) fn rank(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredMatch>, VectorStoreError> {
        let Some(expected) = self.dimension() else {
            return Ok(Vec::new());
        };
        if embedding.len() != expected {
            return Err(VectorStoreError::InconsistentDimension {
                expected,
                actual: embedding.len(),
            });
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredMatch> = self
            .records
            .iter()
            .map(|record| ScoredMatch {
                id: record.id.clone(),
                score: cosine_similarity(embedding, &record.vector),
                metadata: record.metadata.clone(),
            })
            .collect();

        // `sort_by` is stable, so equal scores keep insertion order. A NaN
        // score (from a non-finite query) sorts last.
        scored.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => b.score.total_cmp(&a.score),
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Returns how many records were removed.
    pub(crate) fn remove(&mut self, ids: &[String]) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !ids.contains(&record.id));
        before - self.records.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }
}

fn check_finite(vector: &[f32]) -> Result<(), VectorStoreError> {
    match vector.iter().position(|component| !component.is_finite()) {
        Some(index) => Err(VectorStoreError::NonFiniteComponent { index }),
        None => Ok(()),
    }
}
