//! In-memory vector index over document chunks.
//!
//! The index holds one immutable [`IndexSnapshot`] behind an `Arc`. A rebuild
//! chunks and embeds a whole document set off to the side, then swaps the
//! pointer, so queries always see either the complete old set or the complete
//! new one. If any step of a rebuild fails the previous snapshot stays in
//! place.
//!
//! Scoring is brute-force cosine similarity over every chunk. Results are
//! ordered by descending score; equal scores fall back to ascending chunk index
//! and then ascending document id so identical inputs always rank identically.

use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};

use crate::chunk::Chunker;
use crate::embedding::{cosine_similarity, embed_batched, embed_query, Embedder};
use crate::models::{Chunk, Document, ScoredChunk};

/// One fully built generation of the index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub chunks: Vec<Chunk>,
    /// Vector length shared by every chunk; `0` for an empty snapshot.
    pub dims: usize,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Counters describing a completed rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub documents: usize,
    pub chunks: usize,
    /// Rough token count of the embedded text (characters / 4).
    pub estimated_tokens: u64,
    pub embedding_calls: u64,
}

pub struct VectorIndex {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the index with chunks built from `documents`.
    pub async fn rebuild(
        &self,
        documents: &[Document],
        chunker: &Chunker,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<RebuildStats> {
        let _guard = self.rebuild_lock.lock().await;

        let mut pending = Vec::new();
        for doc in documents {
            for candidate in chunker.split_document(doc) {
                pending.push((doc, candidate));
            }
        }

        let texts: Vec<String> = pending.iter().map(|(_, c)| c.text.clone()).collect();
        let (vectors, calls) = embed_batched(embedder, &texts, batch_size).await?;

        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims || v.is_empty()) {
            bail!(
                "embedding {} has {} dimensions, expected {}",
                bad,
                vectors[bad].len(),
                dims
            );
        }

        let estimated_tokens = texts
            .iter()
            .map(|t| t.chars().count() as u64)
            .sum::<u64>()
            .div_ceil(4);

        let chunks: Vec<Chunk> = pending
            .into_iter()
            .zip(vectors)
            .map(|((doc, candidate), embedding)| Chunk {
                id: format!("{}-{}", doc.id, candidate.chunk_index),
                document_id: doc.id.clone(),
                source_name: doc.source_name.clone(),
                chunk_index: candidate.chunk_index,
                page: candidate.page,
                text: candidate.text,
                embedding,
            })
            .collect();

        let stats = RebuildStats {
            documents: documents.len(),
            chunks: chunks.len(),
            estimated_tokens,
            embedding_calls: calls,
        };

        self.install(Arc::new(IndexSnapshot { chunks, dims }));
        tracing::info!(
            documents = stats.documents,
            chunks = stats.chunks,
            dims,
            "vector index rebuilt"
        );

        Ok(stats)
    }

    /// Top `k` chunks for `text`. An empty index returns nothing and never
    /// calls the embedder.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<ScoredChunk>> {
        let snapshot = match self.snapshot() {
            Some(s) if !s.is_empty() && k > 0 => s,
            _ => return Ok(Vec::new()),
        };

        let query_vec = embed_query(embedder, text).await?;
        if query_vec.len() != snapshot.dims {
            bail!(
                "query embedding has {} dimensions, index has {}",
                query_vec.len(),
                snapshot.dims
            );
        }

        let mut scored: Vec<ScoredChunk> = snapshot
            .chunks
            .iter()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(&query_vec, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
        });
        scored.truncate(k);

        tracing::debug!(
            candidates = snapshot.len(),
            returned = scored.len(),
            top_score = scored.first().map(|s| s.score),
            "index query"
        );
        Ok(scored)
    }

    /// The current snapshot, installing an empty one if nothing was ever built.
    pub fn ensure_exists(&self) -> Arc<IndexSnapshot> {
        if let Some(snapshot) = self.snapshot() {
            return snapshot;
        }
        let mut current = self.write();
        current
            .get_or_insert_with(|| Arc::new(IndexSnapshot::default()))
            .clone()
    }

    /// Back to the never-built state.
    pub fn clear(&self) {
        *self.write() = None;
    }

    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn install(&self, snapshot: Arc<IndexSnapshot>) {
        *self.write() = Some(snapshot);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<IndexSnapshot>>> {
        self.current.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}
