//! MATLAB v7.3 `.mat` files.
//!
//! A v7.3 file is an HDF5 file: a struct variable is a group with one
//! dataset per field, and matrices are stored column-major, so an `(r, c)`
//! MATLAB matrix appears as a `(c, r)` dataset. Reading needs the HDF5
//! library and therefore the `nwb-support` feature.

use crate::error::{ConversionError, Result};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;

/// Numeric fields of a struct variable, each flattened to a vector
pub type MatFields = BTreeMap<String, Vec<f64>>;

fn require(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConversionError::FileNotFound(path.display().to_string()))
    }
}

#[cfg(feature = "nwb-support")]
fn open(path: &Path) -> Result<hdf5::File> {
    hdf5::File::open(path).map_err(|e| ConversionError::parse(path, e))
}

/// Read `fields` of the struct variable `name` as flat vectors
#[cfg(feature = "nwb-support")]
pub fn read_struct_fields(path: &Path, name: &str, fields: &[&str]) -> Result<MatFields> {
    require(path)?;
    let file = open(path)?;
    let group = file
        .group(name)
        .map_err(|_| ConversionError::parse(path, format!("no struct '{}'", name)))?;

    fields
        .iter()
        .map(|field| {
            let values = group
                .dataset(field)
                .and_then(|d| d.read_raw::<f64>())
                .map_err(|e| ConversionError::parse(path, format!("{}.{}: {}", name, field, e)))?;
            Ok((field.to_string(), values))
        })
        .collect()
}

/// Read the matrix variable `name` in MATLAB orientation
#[cfg(feature = "nwb-support")]
pub fn read_matrix(path: &Path, name: &str) -> Result<Array2<f64>> {
    require(path)?;
    let stored = open(path)?
        .dataset(name)
        .and_then(|d| d.read_2d::<f64>())
        .map_err(|e| ConversionError::parse(path, format!("{}: {}", name, e)))?;
    Ok(stored.reversed_axes())
}

#[cfg(not(feature = "nwb-support"))]
fn needs_hdf5(path: &Path) -> ConversionError {
    ConversionError::UnsupportedFormat(format!(
        "{}: MATLAB v7.3 files need the nwb-support feature",
        path.display()
    ))
}

#[cfg(not(feature = "nwb-support"))]
pub fn read_struct_fields(path: &Path, _name: &str, _fields: &[&str]) -> Result<MatFields> {
    require(path)?;
    Err(needs_hdf5(path))
}

#[cfg(not(feature = "nwb-support"))]
pub fn read_matrix(path: &Path, _name: &str) -> Result<Array2<f64>> {
    require(path)?;
    Err(needs_hdf5(path))
}

/// Sorted distinct values; NaNs compare equal to each other
pub fn unique_values(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup_by(|a, b| a == b || (a.is_nan() && b.is_nan()));
    sorted
}
