use crate::error::{ConversionError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// A tab separated table keyed by its header
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TsvTable {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| ConversionError::parse(path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| ConversionError::parse(path, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|r| r.iter().map(|v| v.trim().to_string()).collect())
                    .map_err(|e| ConversionError::parse(path, e))
            })
            .collect::<Result<Vec<Vec<String>>>>()?;

        Ok(Self { headers, rows })
    }

    /// Column values keyed by the value of `key_column`
    pub fn column_by_key(&self, key_column: &str, column: &str) -> BTreeMap<String, String> {
        let key_index = self.headers.iter().position(|h| h == key_column);
        let value_index = self.headers.iter().position(|h| h == column);

        match (key_index, value_index) {
            (Some(k), Some(v)) => self
                .rows
                .iter()
                .filter_map(|row| Some((row.get(k)?.clone(), row.get(v)?.clone())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}
