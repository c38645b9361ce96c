//! Attribute descriptors: named, typed per-element data columns stored
//! alongside the indexed vectors.
use crate::error::{Error, Result};
use crate::utils::chunk_exact;
use ndarray::prelude::*;
use ndarray::stack;
use serde::{Deserialize, Serialize};

/// How an attribute's values are laid out as bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeKind {
    /// Fixed-shape f32 tensors, serialized as raw little-endian bytes in
    /// row-major order.
    Tensor { shape: Vec<usize> },
    /// Caller-produced byte records of a fixed width.
    Opaque { element_size: usize },
}

/// A named stream descriptor. Every element of an attribute occupies a
/// constant number of bytes, so a bucket's element count is its byte length
/// divided by [element_size](Attribute::element_size).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

impl Attribute {
    pub fn tensor(name: &str, shape: Vec<usize>) -> Self {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Tensor { shape },
        }
    }

    pub fn opaque(name: &str, element_size: usize) -> Self {
        Attribute {
            name: name.to_string(),
            kind: AttributeKind::Opaque { element_size },
        }
    }

    /// Number of bytes one logical element occupies.
    pub fn element_size(&self) -> usize {
        match &self.kind {
            AttributeKind::Tensor { shape } => {
                shape.iter().product::<usize>() * std::mem::size_of::<f32>()
            }
            AttributeKind::Opaque { element_size } => *element_size,
        }
    }

    /// Width of a tensor batch row, i.e. the flattened element shape.
    pub fn row_width(&self) -> Option<usize> {
        match &self.kind {
            AttributeKind::Tensor { shape } => Some(shape.iter().product()),
            AttributeKind::Opaque { .. } => None,
        }
    }

    /// Serialize a batch into one byte chunk per element.
    pub fn encode(&self, batch: &AttributeBatch) -> Result<Vec<Vec<u8>>> {
        match (&self.kind, batch) {
            (AttributeKind::Tensor { shape }, AttributeBatch::Tensor(values)) => {
                let width: usize = shape.iter().product();
                if values.ncols() != width {
                    return Err(Error::DimensionMismatch {
                        expected: width,
                        got: values.ncols(),
                    });
                }
                let mut chunks = Vec::with_capacity(values.nrows());
                for row in values.genrows() {
                    let mut buf = Vec::with_capacity(width * 4);
                    for &x in row {
                        buf.extend_from_slice(&x.to_le_bytes());
                    }
                    chunks.push(buf);
                }
                Ok(chunks)
            }
            (AttributeKind::Opaque { element_size }, AttributeBatch::Opaque(values)) => {
                for value in values {
                    if value.len() != *element_size {
                        return Err(Error::DimensionMismatch {
                            expected: *element_size,
                            got: value.len(),
                        });
                    }
                }
                Ok(values.clone())
            }
            _ => Err(Error::Failed(format!(
                "attribute {} cannot encode a batch of a different kind",
                self.name
            ))),
        }
    }

    /// Decode a bucket's concatenated bytes back into a batch.
    pub fn decode(&self, bytes: &[u8]) -> Result<AttributeBatch> {
        let element_size = self.element_size();
        let chunks = chunk_exact(bytes, element_size)?;
        match &self.kind {
            AttributeKind::Tensor { shape } => {
                let width: usize = shape.iter().product();
                let mut flat = Vec::with_capacity(chunks.len() * width);
                for chunk in &chunks {
                    for quad in chunk.chunks(4) {
                        flat.push(f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]));
                    }
                }
                let values = Array2::from_shape_vec((chunks.len(), width), flat)
                    .map_err(|e| Error::Failed(e.to_string()))?;
                Ok(AttributeBatch::Tensor(values))
            }
            AttributeKind::Opaque { .. } => Ok(AttributeBatch::Opaque(
                chunks.into_iter().map(|c| c.to_vec()).collect(),
            )),
        }
    }

    /// Decoded form of an empty bucket.
    pub fn empty_batch(&self) -> AttributeBatch {
        match &self.kind {
            AttributeKind::Tensor { shape } => {
                let width: usize = shape.iter().product();
                AttributeBatch::Tensor(Array2::zeros((0, width)))
            }
            AttributeKind::Opaque { .. } => AttributeBatch::Opaque(vec![]),
        }
    }
}

/// A decoded batch of attribute values. Tensor elements are flattened to
/// rows; opaque elements are kept as raw records.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeBatch {
    Tensor(Array2<f32>),
    Opaque(Vec<Vec<u8>>),
}

impl AttributeBatch {
    pub fn len(&self) -> usize {
        match self {
            AttributeBatch::Tensor(values) => values.nrows(),
            AttributeBatch::Opaque(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select the elements at `indices`, in order.
    pub fn select(&self, indices: &[usize]) -> AttributeBatch {
        match self {
            AttributeBatch::Tensor(values) => {
                AttributeBatch::Tensor(values.select(Axis(0), indices))
            }
            AttributeBatch::Opaque(values) => {
                AttributeBatch::Opaque(indices.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }

    /// Append another batch of the same kind, preserving element order.
    pub fn append(&mut self, other: &AttributeBatch) -> Result<()> {
        match (&mut *self, other) {
            (AttributeBatch::Tensor(values), AttributeBatch::Tensor(tail)) => {
                *values = stack(Axis(0), &[values.view(), tail.view()])
                    .map_err(|e| Error::Failed(e.to_string()))?;
                Ok(())
            }
            (AttributeBatch::Opaque(values), AttributeBatch::Opaque(tail)) => {
                values.extend(tail.iter().cloned());
                Ok(())
            }
            _ => Err(Error::Failed(
                "cannot append attribute batches of different kinds".to_string(),
            )),
        }
    }

    /// View a tensor batch as a 2-D array. None for opaque batches.
    pub fn as_tensor(&self) -> Option<ArrayView2<f32>> {
        match self {
            AttributeBatch::Tensor(values) => Some(values.view()),
            AttributeBatch::Opaque(_) => None,
        }
    }
}
