//! # Flat Vector Index
//!
//! Exact nearest-neighbour search over the passage embeddings. Every row of the
//! index is one passage vector; the row number is the passage position in the
//! metadata file. Distances are squared L2, the same metric a flat L2 index uses.
//!
//! ## File formats:
//! - **.safetensors**: a rank-2 tensor named `embeddings` (or the only tensor in the file)
//! - **.npy**: a rank-2 array
//!
//! Any float dtype is accepted and converted to `f32` on load.

use crate::rag::error::RagError;
use candle_core::{DType, Device, Tensor};
use std::path::Path;
use tracing::debug;

/// Name of the tensor looked up in a multi-tensor safetensors file.
pub const EMBEDDINGS_TENSOR: &str = "embeddings";

/// One search hit: a row of the index and its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Row-major matrix of passage embeddings.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl VectorIndex {
    /// Build an index from in-memory rows. All rows must share one non-zero dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, RagError> {
        let dim = rows.first().map(|row| row.len()).unwrap_or(0);
        if rows.is_empty() {
            return Ok(Self { data: Vec::new(), rows: 0, dim });
        }
        if dim == 0 {
            return Err(RagError::Load("index rows have zero dimension".to_string()));
        }

        let mut data = Vec::with_capacity(rows.len() * dim);
        for (position, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(RagError::Load(format!(
                    "index row {} has dimension {}, expected {}",
                    position,
                    row.len(),
                    dim
                )));
            }
            data.extend_from_slice(row);
        }

        Ok(Self { data, rows: rows.len(), dim })
    }

    /// Build an index from a rank-2 tensor of shape `[rows, dim]`.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self, RagError> {
        let (rows, dim) = tensor
            .dims2()
            .map_err(|e| RagError::Load(format!("index tensor must be rank 2: {}", e)))?;
        if rows > 0 && dim == 0 {
            return Err(RagError::Load("index rows have zero dimension".to_string()));
        }

        let data = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| RagError::Load(format!("failed to read index tensor: {}", e)))?;

        Ok(Self { data, rows, dim })
    }

    /// Load an index file from disk.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        if !path.is_file() {
            return Err(RagError::Load(format!("index file not found: {}", path.display())));
        }

        let is_npy = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("npy"))
            .unwrap_or(false);

        let tensor = if is_npy {
            Tensor::read_npy(path)
                .map_err(|e| RagError::Load(format!("failed to decode {}: {}", path.display(), e)))?
        } else {
            let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)
                .map_err(|e| RagError::Load(format!("failed to decode {}: {}", path.display(), e)))?;

            match tensors.remove(EMBEDDINGS_TENSOR) {
                Some(tensor) => tensor,
                None if tensors.len() == 1 => match tensors.into_values().next() {
                    Some(tensor) => tensor,
                    None => return Err(RagError::Load(format!("{} holds no tensors", path.display()))),
                },
                None => {
                    let mut names: Vec<String> = tensors.into_keys().collect();
                    names.sort();
                    return Err(RagError::Load(format!(
                        "{} has no '{}' tensor (found {:?})",
                        path.display(),
                        EMBEDDINGS_TENSOR,
                        names
                    )));
                }
            }
        };

        let index = Self::from_tensor(&tensor)?;
        debug!(rows = index.rows, dim = index.dim, path = %path.display(), "Vector index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// Return up to `k` rows closest to `query`, nearest first.
    ///
    /// Equal distances are ordered by row number so results are deterministic.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RagError> {
        if self.rows == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(RagError::Embedding(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(row, query),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.position.cmp(&b.position))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_index() -> VectorIndex {
        VectorIndex::from_rows(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 2.0],
            vec![3.0, 3.0],
            vec![-1.0, 0.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = sample_index();
        let hits = index.search(&[0.9, 0.1], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![1, 0, 4]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_ties_break_by_position() {
        let index = sample_index();
        // rows 1 and 4 are both at distance 1 from the origin
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 1, 4]);
    }

    #[test]
    fn test_k_larger_than_rows() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0], 50).unwrap().len(), 5);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_embedding_error() {
        let index = sample_index();
        let err = index.search(&[0.0, 0.0, 0.0], 2).unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = VectorIndex::from_rows(vec![vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, RagError::Load(_)));
    }

    #[test]
    fn test_load_safetensors_and_npy() {
        let dir = tempfile::tempdir().unwrap();
        let tensor = Tensor::new(&[[0f32, 1.0, 2.0], [3.0, 4.0, 5.0]], &Device::Cpu).unwrap();

        let st_path = dir.path().join("index.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert("vectors".to_string(), tensor.clone());
        candle_core::safetensors::save(&tensors, &st_path).unwrap();

        let index = VectorIndex::load(&st_path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), 3);
        assert_eq!(index.search(&[3.0, 4.0, 5.0], 1).unwrap()[0].position, 1);

        let npy_path = dir.path().join("index.npy");
        tensor.write_npy(&npy_path).unwrap();
        let index = VectorIndex::load(&npy_path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.dimension(), 3);
    }

    #[test]
    fn test_load_missing_or_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.safetensors");
        assert!(matches!(VectorIndex::load(&missing), Err(RagError::Load(_))));

        let garbage = dir.path().join("garbage.safetensors");
        std::fs::write(&garbage, b"not a tensor file").unwrap();
        assert!(matches!(VectorIndex::load(&garbage), Err(RagError::Load(_))));
    }

    #[test]
    fn test_load_rejects_ambiguous_safetensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.safetensors");
        let mut tensors = HashMap::new();
        tensors.insert("a".to_string(), Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap());
        tensors.insert("b".to_string(), Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap());
        candle_core::safetensors::save(&tensors, &path).unwrap();
        assert!(matches!(VectorIndex::load(&path), Err(RagError::Load(_))));
    }
}
