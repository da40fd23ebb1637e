//! Exact cosine ranking shared by every index backend.

use crate::storage::{ScoredChunk, RetrievalResult};
use half::f16;
use std::cmp::Ordering;
use sunzi_chunk::Chunk;

fn norm(v: &[f16]) -> f32 {
    v.iter().map(|x| x.to_f32() * x.to_f32()).sum::<f32>().sqrt()
}

/// Cosine similarity computed in f32. Returns 0 for mismatched lengths or a zero vector.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (norm_a, norm_b) = (norm(a), norm(b));
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

fn dot(a: &[f16], b: &[f16]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum()
}

/// Result ordering: higher score first, ties broken by ascending chunk id.
pub fn compare_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.id().cmp(&b.chunk.id()))
}

/// Score every candidate against `query` and keep the best `k`.
///
/// The search is exhaustive, so the result is exact: it has `min(k, candidates)`
/// entries in [`compare_scored`] order.
pub fn rank<'a, I>(query: &[f16], candidates: I, k: usize) -> RetrievalResult
where
    I: IntoIterator<Item = (&'a Chunk, &'a [f16])>,
{
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|(chunk, vector)| ScoredChunk {
            chunk: chunk.clone(),
            score: cosine_similarity(query, vector),
        })
        .collect();

    scored.sort_by(compare_scored);
    scored.truncate(k);
    scored
}
