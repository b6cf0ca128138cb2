//! NumPy `.npy` arrays.
//!
//! Kilosort and the older open-source behavior layout store arrays with
//! whatever dtype the producing tool chose, so the loaders here accept the
//! common integer and float dtypes and convert.

use crate::error::{ConversionError, Result};
use ndarray::{ArrayD, IxDyn};
use ndarray_npy::read_npy;
use std::path::Path;

fn require(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::FileNotFound(path.display().to_string()))
    }
}

/// Load an array of any numeric dtype as `f64`
pub fn read_f64_array(path: &Path) -> Result<ArrayD<f64>> {
    require(path)?;

    if let Ok(a) = read_npy::<_, ArrayD<f64>>(path) {
        return Ok(a);
    }
    if let Ok(a) = read_npy::<_, ArrayD<f32>>(path) {
        return Ok(a.mapv(f64::from));
    }
    if let Ok(a) = read_npy::<_, ArrayD<i64>>(path) {
        return Ok(a.mapv(|v| v as f64));
    }
    if let Ok(a) = read_npy::<_, ArrayD<i32>>(path) {
        return Ok(a.mapv(f64::from));
    }
    if let Ok(a) = read_npy::<_, ArrayD<u64>>(path) {
        return Ok(a.mapv(|v| v as f64));
    }
    read_npy::<_, ArrayD<u32>>(path)
        .map(|a| a.mapv(f64::from))
        .map_err(|e| ConversionError::parse(path, e))
}

/// Load an integer array (any shape) flattened to `i64`
pub fn read_i64_vector(path: &Path) -> Result<Vec<i64>> {
    require(path)?;

    if let Ok(a) = read_npy::<_, ArrayD<i64>>(path) {
        return Ok(a.iter().copied().collect());
    }
    if let Ok(a) = read_npy::<_, ArrayD<u64>>(path) {
        return Ok(a.iter().map(|&v| v as i64).collect());
    }
    if let Ok(a) = read_npy::<_, ArrayD<i32>>(path) {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }
    if let Ok(a) = read_npy::<_, ArrayD<u32>>(path) {
        return Ok(a.iter().map(|&v| i64::from(v)).collect());
    }
    let floats = read_npy::<_, ArrayD<f64>>(path).map_err(|e| ConversionError::parse(path, e))?;
    Ok(floats.iter().map(|&v| v.round() as i64).collect())
}

/// Load a float array flattened to one dimension
pub fn read_f64_vector(path: &Path) -> Result<Vec<f64>> {
    Ok(read_f64_array(path)?.iter().copied().collect())
}

/// Squeeze length-1 axes, the way `(N, 1)` time arrays are stored
pub fn squeeze(array: ArrayD<f64>) -> ArrayD<f64> {
    let mut shape: Vec<usize> = array.shape().iter().copied().filter(|&d| d != 1).collect();
    if shape.is_empty() {
        shape.push(array.len());
    }
    let values: Vec<f64> = array.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(&shape), values).unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0])))
}
