use crate::error::{ConversionError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A behavioral stream stored as `{"times": [...], "values": [...]}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonSeries<T> {
    pub times: Vec<f64>,
    pub values: Vec<T>,
}

impl<T: DeserializeOwned> JsonSeries<T> {
    pub fn load(path: &Path) -> Result<Self> {
        let series: Self = read_json(path)?;
        if series.times.len() != series.values.len() {
            return Err(ConversionError::InvalidData(format!(
                "{}: {} times but {} values",
                path.display(),
                series.times.len(),
                series.values.len()
            )));
        }
        Ok(series)
    }
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
    serde_json::from_str(&text).map_err(|e| ConversionError::parse(path, e))
}
