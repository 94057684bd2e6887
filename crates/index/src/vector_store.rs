//! Dense row-major matrix of unit-normalized embeddings.
//!
//! Row `i` of the store is the embedding of metadata row `i`. Scores are
//! inner products, which equal cosine similarity for unit vectors.

use newsdex_core::{AppError, AppResult};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Maximum allowed deviation of a row's L2 norm from 1.0.
pub const NORM_TOLERANCE: f32 = 1e-3;

/// A scored row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredRow {
    pub row_index: usize,
    pub score: f32,
}

/// Heap entry ordered by score, then by ascending row index.
///
/// "Greater" means a better hit: higher score, or equal score and lower row.
#[derive(Debug, Clone, Copy)]
struct Ranked(ScoredRow);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .total_cmp(&other.0.score)
            .then_with(|| other.0.row_index.cmp(&self.0.row_index))
    }
}

/// In-memory vector store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    /// Fixed by construction or by the first `add` on an empty store
    dim: Option<usize>,
    data: Vec<f32>,
}

impl VectorStore {
    /// Empty store whose dimension is fixed by the first `add`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store with a known dimension.
    pub fn with_dimension(dim: usize) -> Self {
        Self {
            dim: Some(dim),
            data: Vec::new(),
        }
    }

    /// Build a store from a flat row-major matrix, validating every row norm.
    pub fn from_matrix(dim: usize, data: Vec<f32>) -> AppResult<Self> {
        if dim == 0 {
            if data.is_empty() {
                return Ok(Self::new());
            }
            return Err(AppError::Index(
                "vector matrix has data but dimension 0".to_string(),
            ));
        }
        if data.len() % dim != 0 {
            return Err(AppError::Index(format!(
                "vector matrix length {} is not a multiple of dimension {}",
                data.len(),
                dim
            )));
        }

        for (row_index, row) in data.chunks_exact(dim).enumerate() {
            check_unit_norm(row).map_err(|norm| {
                AppError::Invariant(format!(
                    "row {} has L2 norm {:.6}, expected 1.0 ± {}",
                    row_index, norm, NORM_TOLERANCE
                ))
            })?;
        }

        Ok(Self {
            dim: Some(dim),
            data,
        })
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        match self.dim {
            Some(dim) if dim > 0 => self.data.len() / dim,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, row_index: usize) -> Option<&[f32]> {
        let dim = self.dim?;
        let start = row_index.checked_mul(dim)?;
        self.data.get(start..start + dim)
    }

    /// Flat row-major view of every vector.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Append vectors and return the row index of the first one.
    ///
    /// The whole batch is validated before anything is appended, so a
    /// rejected batch leaves the store unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> AppResult<usize> {
        let start = self.len();
        let Some(first) = vectors.first() else {
            return Ok(start);
        };

        let dim = match self.dim {
            Some(dim) => dim,
            None => first.len(),
        };
        if dim == 0 {
            return Err(AppError::Index(
                "cannot add zero-length vectors".to_string(),
            ));
        }

        for (offset, vector) in vectors.iter().enumerate() {
            if vector.len() != dim {
                return Err(AppError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            check_unit_norm(vector).map_err(|norm| {
                AppError::Invariant(format!(
                    "vector for row {} has L2 norm {:.6}, expected 1.0 ± {}",
                    start + offset,
                    norm,
                    NORM_TOLERANCE
                ))
            })?;
        }

        self.dim = Some(dim);
        self.data.reserve(vectors.len() * dim);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(start)
    }

    /// Top-k rows by inner product over the whole store.
    pub fn search(&self, query: &[f32], k: usize) -> AppResult<Vec<ScoredRow>> {
        self.check_query(query)?;
        let Some(dim) = self.dim else {
            return Ok(Vec::new());
        };
        let scored = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(row_index, row)| ScoredRow {
                row_index,
                score: dot(query, row),
            });
        Ok(top_k(scored, k, self.len()))
    }

    /// Top-k over an explicit subset of rows.
    pub fn score_rows(&self, query: &[f32], rows: &[usize], k: usize) -> AppResult<Vec<ScoredRow>> {
        self.check_query(query)?;
        let mut scored = Vec::with_capacity(rows.len());
        for &row_index in rows {
            let row = self.row(row_index).ok_or_else(|| {
                AppError::Index(format!(
                    "row {} out of range (store has {} rows)",
                    row_index,
                    self.len()
                ))
            })?;
            scored.push(ScoredRow {
                row_index,
                score: dot(query, row),
            });
        }
        let candidates = scored.len();
        Ok(top_k(scored, k, candidates))
    }

    /// Re-check every row norm.
    pub fn validate_norms(&self) -> AppResult<()> {
        let Some(dim) = self.dim else {
            return Ok(());
        };
        for (row_index, row) in self.data.chunks_exact(dim).enumerate() {
            check_unit_norm(row).map_err(|norm| {
                AppError::Invariant(format!(
                    "row {} has L2 norm {:.6}, expected 1.0 ± {}",
                    row_index, norm, NORM_TOLERANCE
                ))
            })?;
        }
        Ok(())
    }

    fn check_query(&self, query: &[f32]) -> AppResult<()> {
        match self.dim {
            Some(dim) if query.len() != dim => Err(AppError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// `Err(norm)` when the vector is not unit length within tolerance.
fn check_unit_norm(vector: &[f32]) -> Result<(), f32> {
    let norm = l2_norm(vector);
    if (norm - 1.0).abs() <= NORM_TOLERANCE {
        Ok(())
    } else {
        Err(norm)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Best `k` of `candidates` scored rows; `k` may exceed the candidate count.
fn top_k(scored: impl IntoIterator<Item = ScoredRow>, k: usize, candidates: usize) -> Vec<ScoredRow> {
    let k = k.min(candidates);
    if k == 0 {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k.saturating_add(1));
    for row in scored {
        heap.push(Reverse(Ranked(row)));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut ranked: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
    ranked.sort_by(|a, b| b.cmp(a));
    ranked.into_iter().map(|r| r.0).collect()
}
