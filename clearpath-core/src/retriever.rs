//! Similarity retrieval over the corpus index.
//!
//! Scores every segment against a unit-normalized query embedding with a
//! dot product, drops results below the relevance floor, and returns the
//! top k in descending score order. Ties keep corpus order: the sort is
//! stable and only compares scores.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::index::{CorpusIndex, normalize};
use crate::types::Segment;

/// One retrieval hit: a corpus position plus its cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSegment {
    pub index: usize,
    pub score: f32,
}

pub struct Retriever {
    index: Arc<CorpusIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(index: Arc<CorpusIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    /// Retrieve the top-k segments for a query embedding. An empty result
    /// is a valid outcome and means nothing cleared the relevance floor.
    pub fn retrieve(&self, query_embedding: &[f32]) -> Vec<ScoredSegment> {
        let mut query = query_embedding.to_vec();
        if normalize(&mut query).is_none() {
            return Vec::new();
        }

        let mut scored: Vec<ScoredSegment> = self
            .index
            .segments()
            .iter()
            .enumerate()
            .map(|(i, segment)| ScoredSegment { index: i, score: dot(&query, &segment.embedding) })
            .filter(|s| s.score >= self.config.floor)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(self.config.top_k);

        debug!(
            candidates = self.index.len(),
            retained = scored.len(),
            top_score = scored.first().map(|s| s.score).unwrap_or(0.0),
            "Retrieved segments"
        );
        scored
    }

    /// Resolve hits back to their segments, in hit order.
    pub fn resolve<'a>(&'a self, hits: &[ScoredSegment]) -> Vec<&'a Segment> {
        hits.iter().filter_map(|hit| self.index.get(hit.index)).collect()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
