//! Similarity scoring between face embeddings.
//!
//! The primary score follows the face_recognition convention: Euclidean distance 0
//! is a perfect match (1.0) and any distance at or beyond 1.0 collapses to 0.
//! Accumulation is done in `f64` so `score(a, a)` is exactly 1.0.

use crate::error::MatchError;

fn check_dims(a: &[f32], b: &[f32]) -> Result<(), MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Euclidean (L2) distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f64, MatchError> {
    check_dims(a, b)?;
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

/// Similarity in [0, 1]: `max(0, 1 - min(distance, 1))`.
///
/// Symmetric by construction; vectors of unequal length fail with
/// [`MatchError::DimensionMismatch`].
pub fn score(a: &[f32], b: &[f32]) -> Result<f64, MatchError> {
    let distance = euclidean_distance(a, b)?;
    if !distance.is_finite() {
        return Ok(0.0);
    }
    Ok((1.0 - distance.min(1.0)).max(0.0))
}

/// Cosine similarity in [-1, 1]. Returns 0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, MatchError> {
    check_dims(a, b)?;
    let (mut dot, mut mag_a, mut mag_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return Ok(0.0);
    }
    Ok(dot / denom)
}

/// Scale to unit length. The zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let magnitude = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if magnitude == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| (*x as f64 / magnitude) as f32).collect()
}
