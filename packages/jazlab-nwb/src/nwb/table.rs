//! Column-oriented tables (`DynamicTable` and its subtypes).

use crate::error::{ConversionError, Result};
use ndarray::{ArrayD, Axis, IxDyn};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    /// Fixed-shape rows; the first axis indexes rows
    Array(ArrayD<f64>),
    /// Variable-length rows stored flat with cumulative end offsets
    Ragged { values: Vec<f64>, index: Vec<u64> },
    RaggedBool { values: Vec<bool>, index: Vec<u64> },
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Array(a) => a.shape().first().copied().unwrap_or(0),
            ColumnData::Ragged { index, .. } => index.len(),
            ColumnData::RaggedBool { index, .. } => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ragged(rows: Vec<Vec<f64>>) -> Self {
        let index = cumulative_ends(rows.iter().map(Vec::len));
        ColumnData::Ragged {
            values: rows.into_iter().flatten().collect(),
            index,
        }
    }

    pub fn ragged_bool(rows: Vec<Vec<bool>>) -> Self {
        let index = cumulative_ends(rows.iter().map(Vec::len));
        ColumnData::RaggedBool {
            values: rows.into_iter().flatten().collect(),
            index,
        }
    }

    /// Add `offset` to every value of a numeric column
    pub fn shift(&mut self, offset: f64) {
        match self {
            ColumnData::Float(v) => v.iter_mut().for_each(|x| *x += offset),
            ColumnData::Array(a) => a.mapv_inplace(|x| x + offset),
            ColumnData::Ragged { values, .. } => values.iter_mut().for_each(|x| *x += offset),
            ColumnData::Int(v) => {
                *self = ColumnData::Float(v.iter().map(|&x| x as f64 + offset).collect())
            }
            _ => {}
        }
    }

    pub fn first_float(&self) -> Option<f64> {
        match self {
            ColumnData::Float(v) => v.first().copied(),
            ColumnData::Int(v) => v.first().map(|&x| x as f64),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<Vec<f64>> {
        match self {
            ColumnData::Float(v) => Some(v.clone()),
            ColumnData::Int(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    /// Infer a column from JSON values, one value per row.
    ///
    /// Numbers (with nulls as NaN) become numeric columns, rectangular nested
    /// lists become arrays, uneven numeric lists become ragged columns and
    /// anything else is stored as serialized JSON text.
    pub fn from_json(values: &[Value]) -> Self {
        if values.is_empty() {
            return ColumnData::Float(Vec::new());
        }

        // integers past i64::MAX fall through to the float column
        if values.iter().all(Value::is_i64) {
            return ColumnData::Int(values.iter().filter_map(Value::as_i64).collect());
        }
        if values.iter().all(|v| v.is_number() || v.is_null())
            && values.iter().any(Value::is_number)
        {
            return ColumnData::Float(values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect());
        }
        if values.iter().all(Value::is_boolean) {
            return ColumnData::Bool(values.iter().filter_map(Value::as_bool).collect());
        }
        if values.iter().all(Value::is_string) {
            return ColumnData::Text(
                values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            );
        }

        if values.iter().all(Value::is_array) {
            if let Some(array) = rectangular(values) {
                return ColumnData::Array(array);
            }
            let numeric_rows: Option<Vec<Vec<f64>>> = values
                .iter()
                .map(|row| {
                    row.as_array()?
                        .iter()
                        .map(|x| if x.is_null() { Some(f64::NAN) } else { x.as_f64() })
                        .collect()
                })
                .collect();
            if let Some(rows) = numeric_rows {
                return ColumnData::ragged(rows);
            }
            let bool_rows: Option<Vec<Vec<bool>>> = values
                .iter()
                .map(|row| row.as_array()?.iter().map(Value::as_bool).collect())
                .collect();
            if let Some(rows) = bool_rows {
                return ColumnData::ragged_bool(rows);
            }
        }

        ColumnData::Text(values.iter().map(Value::to_string).collect())
    }

    /// Infer a column from text cells (TSV files): numeric when every cell parses
    pub fn from_text(values: Vec<String>) -> Self {
        let numbers: Option<Vec<f64>> = values
            .iter()
            .map(|v| match v.as_str() {
                "" | "nan" | "NaN" => Some(f64::NAN),
                other => other.parse::<f64>().ok(),
            })
            .collect();
        match numbers {
            Some(numbers) if numbers.iter().any(|x| !x.is_nan()) => ColumnData::Float(numbers),
            _ => ColumnData::Text(values),
        }
    }

    /// Placeholder rows for a table that lacks this column
    fn filler(&self, rows: usize) -> ColumnData {
        match self {
            ColumnData::Float(_) => ColumnData::Float(vec![f64::NAN; rows]),
            ColumnData::Int(_) => ColumnData::Float(vec![f64::NAN; rows]),
            ColumnData::Bool(_) => ColumnData::Bool(vec![false; rows]),
            ColumnData::Text(_) => ColumnData::Text(vec![String::new(); rows]),
            ColumnData::Array(a) => {
                let mut shape = a.shape().to_vec();
                shape[0] = rows;
                ColumnData::Array(ArrayD::from_elem(IxDyn(&shape), f64::NAN))
            }
            ColumnData::Ragged { .. } => ColumnData::ragged(vec![Vec::new(); rows]),
            ColumnData::RaggedBool { .. } => ColumnData::ragged_bool(vec![Vec::new(); rows]),
        }
    }

    fn into_text(self) -> Vec<String> {
        match self {
            ColumnData::Text(v) => v,
            ColumnData::Float(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::Int(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnData::Bool(v) => v.iter().map(|x| x.to_string()).collect(),
            other => vec![String::new(); other.len()],
        }
    }

    /// Append the rows of `other`
    pub fn append(&mut self, other: ColumnData) -> Result<()> {
        let current = std::mem::replace(self, ColumnData::Float(Vec::new()));
        *self = match (current, other) {
            (ColumnData::Float(mut a), ColumnData::Float(b)) => {
                a.extend(b);
                ColumnData::Float(a)
            }
            (ColumnData::Int(mut a), ColumnData::Int(b)) => {
                a.extend(b);
                ColumnData::Int(a)
            }
            (ColumnData::Int(a), ColumnData::Float(b)) => {
                let mut a: Vec<f64> = a.iter().map(|&x| x as f64).collect();
                a.extend(b);
                ColumnData::Float(a)
            }
            (ColumnData::Float(mut a), ColumnData::Int(b)) => {
                a.extend(b.iter().map(|&x| x as f64));
                ColumnData::Float(a)
            }
            (ColumnData::Bool(mut a), ColumnData::Bool(b)) => {
                a.extend(b);
                ColumnData::Bool(a)
            }
            (ColumnData::Array(a), ColumnData::Array(b)) => ColumnData::Array(
                ndarray::concatenate(Axis(0), &[a.view(), b.view()])
                    .map_err(|e| ConversionError::InvalidData(format!("cannot append rows: {}", e)))?,
            ),
            (ColumnData::Ragged { mut values, mut index }, ColumnData::Ragged { values: v, index: i }) => {
                let base = values.len() as u64;
                values.extend(v);
                index.extend(i.iter().map(|end| end + base));
                ColumnData::Ragged { values, index }
            }
            (ColumnData::RaggedBool { mut values, mut index }, ColumnData::RaggedBool { values: v, index: i }) => {
                let base = values.len() as u64;
                values.extend(v);
                index.extend(i.iter().map(|end| end + base));
                ColumnData::RaggedBool { values, index }
            }
            (a @ ColumnData::Text(_), b) | (a, b @ ColumnData::Text(_)) => {
                let mut text = a.into_text();
                text.extend(b.into_text());
                ColumnData::Text(text)
            }
            (a, b) => {
                return Err(ConversionError::InvalidData(format!(
                    "cannot append {} rows to {} column",
                    b.kind(),
                    a.kind()
                )))
            }
        };
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ColumnData::Float(_) => "float",
            ColumnData::Int(_) => "int",
            ColumnData::Bool(_) => "bool",
            ColumnData::Text(_) => "text",
            ColumnData::Array(_) => "array",
            ColumnData::Ragged { .. } => "ragged",
            ColumnData::RaggedBool { .. } => "ragged bool",
        }
    }
}

fn cumulative_ends(lengths: impl Iterator<Item = usize>) -> Vec<u64> {
    lengths
        .scan(0u64, |end, len| {
            *end += len as u64;
            Some(*end)
        })
        .collect()
}

/// Shape of a rectangular nested numeric JSON list
fn json_shape(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Number(_) | Value::Null => Some(Vec::new()),
        Value::Array(items) if !items.is_empty() => {
            let inner = json_shape(&items[0])?;
            for item in &items[1..] {
                if json_shape(item)? != inner {
                    return None;
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner);
            Some(shape)
        }
        _ => None,
    }
}

fn flatten_json(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten_json(item, out)),
        other => out.push(other.as_f64().unwrap_or(f64::NAN)),
    }
}

fn rectangular(rows: &[Value]) -> Option<ArrayD<f64>> {
    let inner = json_shape(&rows[0])?;
    if inner.is_empty() {
        return None;
    }
    for row in &rows[1..] {
        if json_shape(row)? != inner {
            return None;
        }
    }

    let mut values = Vec::new();
    rows.iter().for_each(|row| flatten_json(row, &mut values));
    let mut shape = vec![rows.len()];
    shape.extend(inner);
    ArrayD::from_shape_vec(IxDyn(&shape), values).ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub description: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: &str, description: &str, data: ColumnData) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicTable {
    pub name: String,
    pub neurodata_type: &'static str,
    pub description: String,
    pub columns: Vec<Column>,
}

impl DynamicTable {
    pub fn new(name: &str, neurodata_type: &'static str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            neurodata_type,
            description: description.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Add a column; its length must match the existing rows
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.column(&column.name).is_some() {
            return Err(ConversionError::InvalidData(format!(
                "column {} already exists in {}",
                column.name, self.name
            )));
        }
        if !self.columns.is_empty() && column.data.len() != self.num_rows() {
            return Err(ConversionError::InvalidData(format!(
                "column {} has {} rows but {} has {}",
                column.name,
                column.data.len(),
                self.name,
                self.num_rows()
            )));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Append the rows of `other`, filling columns missing on either side
    pub fn extend(&mut self, other: DynamicTable) -> Result<()> {
        if self.columns.is_empty() {
            self.columns = other.columns;
            return Ok(());
        }

        let existing_rows = self.num_rows();
        let other_rows = other.num_rows();
        let mut incoming = other.columns;

        for column in self.columns.iter_mut() {
            match incoming.iter().position(|c| c.name == column.name) {
                Some(pos) => {
                    let data = incoming.remove(pos).data;
                    column.data.append(data)?;
                }
                None => {
                    let filler = column.data.filler(other_rows);
                    column.data.append(filler)?;
                }
            }
        }
        for column in incoming {
            let mut data = column.data.filler(existing_rows);
            data.append(column.data)?;
            self.columns.push(Column { data, ..column });
        }
        Ok(())
    }

    /// Fill `stop_time` with the next row's `start_time`; the last row stops at its start.
    /// An existing `stop_time` column is kept.
    pub fn fill_stop_times(&mut self) -> Result<()> {
        if self.column("stop_time").is_some() {
            return Ok(());
        }
        let starts = self
            .column("start_time")
            .and_then(|c| c.data.as_floats())
            .ok_or_else(|| {
                ConversionError::InvalidData(format!("{} has no numeric start_time column", self.name))
            })?;

        let stops: Vec<f64> = starts
            .iter()
            .enumerate()
            .map(|(i, start)| starts.get(i + 1).copied().unwrap_or(*start))
            .collect();

        let position = self
            .columns
            .iter()
            .position(|c| c.name == "start_time")
            .map(|p| p + 1)
            .unwrap_or(self.columns.len());
        self.columns.insert(
            position,
            Column::new("stop_time", "Stop time of each row.", ColumnData::Float(stops)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_scalar_columns() {
        assert_eq!(ColumnData::from_json(&[json!(1), json!(2)]), ColumnData::Int(vec![1, 2]));
        let floats = ColumnData::from_json(&[json!(1.5), Value::Null]);
        match floats {
            ColumnData::Float(v) => {
                assert_eq!(v[0], 1.5);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ColumnData::from_json(&[json!(true), json!(false)]), ColumnData::Bool(vec![true, false]));
        assert_eq!(
            ColumnData::from_json(&[json!("fixation"), json!("stimulus")]),
            ColumnData::Text(vec!["fixation".into(), "stimulus".into()])
        );
    }

    #[test]
    fn test_infer_large_unsigned_as_float() {
        let column = ColumnData::from_json(&[json!(1), json!(u64::MAX)]);
        assert_eq!(column.len(), 2);
        assert_eq!(column, ColumnData::Float(vec![1.0, u64::MAX as f64]));
    }

    #[test]
    fn test_infer_array_and_ragged_columns() {
        let positions = ColumnData::from_json(&[json!([0.1, 0.2]), json!([0.3, 0.4])]);
        match positions {
            ColumnData::Array(a) => {
                assert_eq!(a.shape(), &[2, 2]);
                assert_eq!(a[[1, 0]], 0.3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let ragged = ColumnData::from_json(&[json!([1, 2, 3]), json!([4])]);
        assert_eq!(ragged, ColumnData::Ragged { values: vec![1.0, 2.0, 3.0, 4.0], index: vec![3, 4] });

        let mixed = ColumnData::from_json(&[json!({"a": 1}), json!("b")]);
        assert_eq!(mixed, ColumnData::Text(vec!["{\"a\":1}".into(), "\"b\"".into()]));
    }

    #[test]
    fn test_from_text() {
        assert_eq!(
            ColumnData::from_text(vec!["1.5".into(), "2".into()]),
            ColumnData::Float(vec![1.5, 2.0])
        );
        assert_eq!(
            ColumnData::from_text(vec!["good".into(), "1".into()]),
            ColumnData::Text(vec!["good".into(), "1".into()])
        );
    }

    #[test]
    fn test_add_column_checks_length() {
        let mut table = DynamicTable::new("trials", "TimeIntervals", "data about each trial");
        table.add_column(Column::new("start_time", "", ColumnData::Float(vec![0.0, 1.0]))).unwrap();
        assert!(table.add_column(Column::new("x", "", ColumnData::Int(vec![1]))).is_err());
        assert!(table.add_column(Column::new("start_time", "", ColumnData::Int(vec![1, 2]))).is_err());
        assert_eq!(table.num_rows(), 2);
    }

    #[test]
    fn test_fill_stop_times() {
        let mut table = DynamicTable::new("display", "TimeIntervals", "data about each displayed frame");
        table.add_column(Column::new("start_time", "", ColumnData::Float(vec![0.0, 0.5, 2.0]))).unwrap();
        table.add_column(Column::new("task_phase", "", ColumnData::Text(vec!["a".into(), "b".into(), "c".into()]))).unwrap();
        table.fill_stop_times().unwrap();

        assert_eq!(table.columns[1].name, "stop_time");
        assert_eq!(table.columns[1].data, ColumnData::Float(vec![0.5, 2.0, 2.0]));

        table.column_mut("stop_time").unwrap().data = ColumnData::Float(vec![0.25, 1.0, 3.0]);
        table.fill_stop_times().unwrap();
        assert_eq!(table.columns[1].data, ColumnData::Float(vec![0.25, 1.0, 3.0]));
    }

    #[test]
    fn test_extend_fills_missing_columns() {
        let mut first = DynamicTable::new("units", "Units", "");
        first.add_column(Column::new("unit_name", "", ColumnData::Text(vec!["0".into()]))).unwrap();
        first.add_column(Column::new("spike_times", "", ColumnData::ragged(vec![vec![0.1, 0.2]]))).unwrap();

        let mut second = DynamicTable::new("units", "Units", "");
        second.add_column(Column::new("unit_name", "", ColumnData::Text(vec!["5".into()]))).unwrap();
        second.add_column(Column::new("spike_times", "", ColumnData::ragged(vec![vec![0.3]]))).unwrap();
        second.add_column(Column::new("Amplitude", "", ColumnData::Float(vec![12.0]))).unwrap();

        first.extend(second).unwrap();
        assert_eq!(first.num_rows(), 2);
        assert_eq!(
            first.column("spike_times").unwrap().data,
            ColumnData::Ragged { values: vec![0.1, 0.2, 0.3], index: vec![2, 3] }
        );
        match &first.column("Amplitude").unwrap().data {
            ColumnData::Float(v) => {
                assert!(v[0].is_nan());
                assert_eq!(v[1], 12.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shift_columns() {
        let mut column = ColumnData::Float(vec![1.0, f64::NAN]);
        column.shift(2.0);
        match column {
            ColumnData::Float(v) => {
                assert_eq!(v[0], 3.0);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
