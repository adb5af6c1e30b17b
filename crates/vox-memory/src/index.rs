//! In-memory vector index with brute-force cosine similarity search.
//!
//! Keyed by (session, turn) so searches can be restricted to one session.
//! All operations are O(n) over that session's vectors, which is acceptable
//! for conversation-length datasets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use vox_core::error::VoxError;
use vox_core::types::TurnId;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Turn identifier of the matching entry.
    pub turn_id: TurnId,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
}

/// In-memory vector index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock; cheap to clone (shared state).
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<(Uuid, TurnId), Vec<f32>>>>,
}

impl VectorIndex {
    /// Create a new empty vector index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vector for the given (session, turn) key.
    ///
    /// Overwrites any existing entry with the same key.
    pub fn insert(
        &self,
        session_id: Uuid,
        turn_id: TurnId,
        embedding: Vec<f32>,
    ) -> Result<(), VoxError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| VoxError::Storage(format!("Index lock poisoned: {}", e)))?;
        entries.insert((session_id, turn_id), embedding);
        Ok(())
    }

    /// Search one session for the k nearest neighbors to the query vector.
    ///
    /// Results are sorted by descending similarity score; ties break toward
    /// the more recent turn (higher turn_id).
    pub fn search(
        &self,
        session_id: Uuid,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, VoxError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| VoxError::Storage(format!("Index lock poisoned: {}", e)))?;

        let mut scored: Vec<IndexHit> = entries
            .iter()
            .filter(|((sid, _), _)| *sid == session_id)
            .map(|((_, turn_id), embedding)| IndexHit {
                turn_id: *turn_id,
                score: cosine_similarity(query, embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.turn_id.cmp(&a.turn_id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Return the number of vectors currently stored in the index.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Return true if the index contains no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
