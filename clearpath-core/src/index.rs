//! In-memory corpus index loaded from a JSON segment file.
//!
//! Segments are validated and unit-normalized once at load time so that
//! retrieval scoring reduces to a dot product.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::error::IndexError;
use crate::types::Segment;

#[derive(Deserialize)]
struct IndexFile {
    segments: Vec<Segment>,
}

/// Immutable set of embedded corpus segments sharing one dimensionality.
#[derive(Debug)]
pub struct CorpusIndex {
    segments: Vec<Segment>,
    dimension: usize,
}

impl CorpusIndex {
    /// Build an index from raw segments, validating dimensional consistency
    /// and normalizing every embedding to unit length.
    pub fn from_segments(
        mut segments: Vec<Segment>,
        expected_dimension: usize,
    ) -> Result<Self, IndexError> {
        for segment in &mut segments {
            if segment.embedding.len() != expected_dimension {
                return Err(IndexError::DimensionMismatch {
                    segment: segment.id.clone(),
                    expected: expected_dimension,
                    found: segment.embedding.len(),
                });
            }
            normalize(&mut segment.embedding)
                .ok_or_else(|| IndexError::ZeroVector { segment: segment.id.clone() })?;
        }
        Ok(Self { segments, dimension: expected_dimension })
    }

    /// Load and validate an index from a `{"segments": [...]}` JSON file.
    pub fn load(path: &Path, expected_dimension: usize) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| IndexError::FileNotFound { path: path.to_path_buf() })?;
        let file: IndexFile = serde_json::from_str(&raw)
            .map_err(|e| IndexError::Parse { message: e.to_string() })?;

        let index = Self::from_segments(file.segments, expected_dimension)?;
        info!(
            segments = index.len(),
            dimension = index.dimension(),
            path = %path.display(),
            "Loaded corpus index"
        );
        Ok(index)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scale a vector to unit length in place. Returns `None` for vectors with
/// zero (or non-finite) norm, which cannot participate in cosine scoring.
pub fn normalize(vector: &mut [f32]) -> Option<()> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return None;
    }
    for v in vector.iter_mut() {
        *v /= norm;
    }
    Some(())
}
