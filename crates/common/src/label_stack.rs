//! Raw label stacks: flat little-endian `u64` voxels in `(z, y, x)` order
//!
//! The container format produced by segmentation is opaque to the pipeline;
//! job payloads exchange label stacks as headerless raw files whose shape is
//! implied by the bounding box they cover.

use crate::{LabelError, Result};
use ndarray::{Array3, ArrayView3};
use std::path::Path;

/// 3D label array indexed `[z, y, x]`
pub type LabelArray = Array3<u64>;

/// Encode voxels as little-endian `u64` in row-major `(z, y, x)` order
#[must_use]
pub fn encode_le(labels: ArrayView3<'_, u64>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(labels.len() * 8);
    for label in labels.iter() {
        bytes.extend_from_slice(&label.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `u64` voxels into an array of the given `(z, y, x)` shape
pub fn decode_le(bytes: &[u8], shape: (usize, usize, usize)) -> Result<LabelArray> {
    let expected = shape.0 * shape.1 * shape.2 * 8;
    if bytes.len() != expected {
        return Err(LabelError::Other(format!(
            "label stack has {} bytes, expected {} for shape {:?}",
            bytes.len(),
            expected,
            shape
        )));
    }
    let voxels: Vec<u64> = bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect();
    Array3::from_shape_vec(shape, voxels).map_err(|e| LabelError::Other(e.to_string()))
}

/// Read a raw label stack from disk
pub fn read_raw(path: &Path, shape: (usize, usize, usize)) -> Result<LabelArray> {
    let bytes = std::fs::read(path)?;
    decode_le(&bytes, shape)
}

/// Write a raw label stack to disk
pub fn write_raw(path: &Path, labels: ArrayView3<'_, u64>) -> Result<()> {
    std::fs::write(path, encode_le(labels))?;
    Ok(())
}
