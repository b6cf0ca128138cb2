//! Storage backends receiving the laid-out document.

use crate::error::{ConversionError, Result};
use crate::readers::SampleSource;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Frames read per block when streaming a recording
pub const RECORDING_CHUNK_FRAMES: usize = 30_000;

pub const LAYOUT_FORMAT: &str = "jazlab-nwb-layout";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    TextList(Vec<String>),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttrValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValues {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    UInt(Vec<u64>),
    UInt8(Vec<u8>),
    Bool(Vec<bool>),
    Text(Vec<String>),
    ScalarText(String),
    ScalarFloat(f64),
}

impl DatasetValues {
    pub fn floats(values: Vec<f64>) -> Self {
        DatasetValues::Float(ArrayD::from_shape_vec(ndarray::IxDyn(&[values.len()]), values)
            .unwrap_or_else(|_| ArrayD::zeros(ndarray::IxDyn(&[0]))))
    }

    pub fn ints(values: Vec<i64>) -> Self {
        DatasetValues::Int(ArrayD::from_shape_vec(ndarray::IxDyn(&[values.len()]), values)
            .unwrap_or_else(|_| ArrayD::zeros(ndarray::IxDyn(&[0]))))
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            DatasetValues::Float(_) | DatasetValues::ScalarFloat(_) => "float64",
            DatasetValues::Int(_) => "int64",
            DatasetValues::UInt(_) => "uint64",
            DatasetValues::UInt8(_) => "uint8",
            DatasetValues::Bool(_) => "bool",
            DatasetValues::Text(_) | DatasetValues::ScalarText(_) => "text",
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match self {
            DatasetValues::Float(a) => a.shape().to_vec(),
            DatasetValues::Int(a) => a.shape().to_vec(),
            DatasetValues::UInt(v) => vec![v.len()],
            DatasetValues::UInt8(v) => vec![v.len()],
            DatasetValues::Bool(v) => vec![v.len()],
            DatasetValues::Text(v) => vec![v.len()],
            DatasetValues::ScalarText(_) | DatasetValues::ScalarFloat(_) => Vec::new(),
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    fn to_json(&self) -> Value {
        match self {
            DatasetValues::Float(a) => nested_json(a.shape(), &a.iter().map(|&x| float_json(x)).collect::<Vec<_>>()),
            DatasetValues::Int(a) => nested_json(a.shape(), &a.iter().map(|&x| Value::from(x)).collect::<Vec<_>>()),
            DatasetValues::UInt(v) => Value::from(v.clone()),
            DatasetValues::UInt8(v) => Value::from(v.clone()),
            DatasetValues::Bool(v) => Value::from(v.clone()),
            DatasetValues::Text(v) => Value::from(v.clone()),
            DatasetValues::ScalarText(s) => Value::from(s.clone()),
            DatasetValues::ScalarFloat(x) => float_json(*x),
        }
    }
}

fn float_json(x: f64) -> Value {
    serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

/// Row-major values reshaped into nested JSON lists
fn nested_json(shape: &[usize], flat: &[Value]) -> Value {
    match shape {
        [] => flat.first().cloned().unwrap_or(Value::Null),
        [_] => Value::Array(flat.to_vec()),
        [rows, rest @ ..] => {
            let stride: usize = rest.iter().product();
            Value::Array(
                (0..*rows)
                    .map(|r| nested_json(rest, &flat[r * stride..(r + 1) * stride]))
                    .collect(),
            )
        }
    }
}

/// Receiver of an NWB layout. Paths are absolute (`/general/devices/vprobe0`).
pub trait ContainerSink {
    fn create_group(&mut self, path: &str) -> Result<()>;

    fn write_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()>;

    fn write_dataset(&mut self, path: &str, values: &DatasetValues, compress: bool) -> Result<()>;

    /// Stream the first `num_frames` frames of `source` into a `(frames, channels)` dataset
    fn write_recording(&mut self, path: &str, source: &dyn SampleSource, num_frames: usize) -> Result<()>;

    /// Soft link at `path` pointing to `target`
    fn link(&mut self, path: &str, target: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Group,
    Dataset,
    Link,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub compressed: bool,
}

impl LayoutNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
            dtype: None,
            shape: None,
            values: None,
            target: None,
            compressed: false,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Length of the first dimension
    pub fn len(&self) -> Option<usize> {
        self.shape.as_ref().and_then(|s| s.first().copied())
    }
}

/// Flat description of an NWB file: every group, dataset and link by path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutManifest {
    pub format: String,
    pub nwb_version: String,
    pub nodes: BTreeMap<String, LayoutNode>,
}

impl Default for LayoutManifest {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), LayoutNode::new(NodeKind::Group));
        Self {
            format: LAYOUT_FORMAT.to_string(),
            nwb_version: super::NWB_VERSION.to_string(),
            nodes,
        }
    }
}

impl LayoutManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
        let manifest: LayoutManifest =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| ConversionError::parse(path, e))?;
        if manifest.format != LAYOUT_FORMAT {
            return Err(ConversionError::parse(path, format!("not a {} file", LAYOUT_FORMAT)));
        }
        Ok(manifest)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| ConversionError::WriteError(e.to_string()))
    }

    pub fn node(&self, path: &str) -> Option<&LayoutNode> {
        self.nodes.get(path)
    }

    pub fn attr_text(&self, path: &str, name: &str) -> Option<&str> {
        self.node(path)?.attr(name)?.as_str()
    }

    /// Direct children of `path`
    pub fn children(&self, path: &str) -> Vec<&str> {
        let prefix = if path == "/" { "/".to_string() } else { format!("{}/", path) };
        self.nodes
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then_some(p.as_str())
            })
            .collect()
    }

    /// Structural problems: missing required objects, dangling links, ragged
    /// or misaligned table columns
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.attr_text("/", "neurodata_type") != Some("NWBFile") {
            problems.push("root group is not an NWBFile".to_string());
        }
        for required in ["/identifier", "/session_description", "/session_start_time", "/general", "/acquisition"] {
            if self.node(required).is_none() {
                problems.push(format!("missing {}", required));
            }
        }

        for (path, node) in &self.nodes {
            if node.kind == NodeKind::Link {
                match node.target.as_deref() {
                    Some(target) if self.nodes.contains_key(target) => {}
                    Some(target) => problems.push(format!("{} links to missing {}", path, target)),
                    None => problems.push(format!("{} is a link without target", path)),
                }
            }
            if node.kind == NodeKind::Group && node.attr("colnames").is_some() {
                problems.extend(self.validate_table(path, node));
            }
        }
        problems
    }

    fn validate_table(&self, path: &str, node: &LayoutNode) -> Vec<String> {
        let mut problems = Vec::new();
        let rows = match self.node(&format!("{}/id", path)).and_then(LayoutNode::len) {
            Some(rows) => rows,
            None => return vec![format!("table {} has no id column", path)],
        };
        let colnames = match node.attr("colnames") {
            Some(AttrValue::TextList(names)) => names.clone(),
            Some(AttrValue::Text(name)) => vec![name.clone()],
            _ => Vec::new(),
        };

        for column in colnames {
            let column_path = format!("{}/{}", path, column);
            let index_path = format!("{}_index", column_path);
            let length = if self.nodes.contains_key(&index_path) {
                self.node(&index_path).and_then(LayoutNode::len)
            } else {
                self.node(&column_path).and_then(LayoutNode::len)
            };
            match length {
                Some(len) if len == rows => {}
                Some(len) => problems.push(format!("{} has {} rows, expected {}", column_path, len, rows)),
                None => problems.push(format!("missing column {}", column_path)),
            }
        }
        problems
    }
}

/// Sink that records the layout without writing data files.
///
/// Datasets up to `inline_limit` elements keep their values; larger ones keep
/// shape and type only.
#[derive(Debug, Clone)]
pub struct LayoutSink {
    manifest: LayoutManifest,
    inline_limit: usize,
}

impl Default for LayoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutSink {
    pub fn new() -> Self {
        Self::with_inline_limit(1000)
    }

    pub fn with_inline_limit(inline_limit: usize) -> Self {
        Self {
            manifest: LayoutManifest::default(),
            inline_limit,
        }
    }

    pub fn manifest(&self) -> &LayoutManifest {
        &self.manifest
    }

    pub fn into_manifest(self) -> LayoutManifest {
        self.manifest
    }

    fn insert(&mut self, path: &str, node: LayoutNode) -> Result<()> {
        let parent = match path.rfind('/') {
            Some(0) => "/",
            Some(i) => &path[..i],
            None => return Err(ConversionError::WriteError(format!("relative path {}", path))),
        };
        match self.manifest.nodes.get(parent) {
            Some(n) if n.kind == NodeKind::Group => {}
            _ => return Err(ConversionError::WriteError(format!("parent group of {} does not exist", path))),
        }
        if self.manifest.nodes.contains_key(path) {
            return Err(ConversionError::WriteError(format!("{} already exists", path)));
        }
        self.manifest.nodes.insert(path.to_string(), node);
        Ok(())
    }
}

impl ContainerSink for LayoutSink {
    fn create_group(&mut self, path: &str) -> Result<()> {
        self.insert(path, LayoutNode::new(NodeKind::Group))
    }

    fn write_attr(&mut self, path: &str, name: &str, value: &AttrValue) -> Result<()> {
        let node = self
            .manifest
            .nodes
            .get_mut(path)
            .ok_or_else(|| ConversionError::WriteError(format!("no object at {} for attribute {}", path, name)))?;
        node.attributes.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn write_dataset(&mut self, path: &str, values: &DatasetValues, compress: bool) -> Result<()> {
        let mut node = LayoutNode::new(NodeKind::Dataset);
        node.dtype = Some(values.dtype().to_string());
        node.shape = Some(values.shape());
        node.compressed = compress;
        if values.num_elements() <= self.inline_limit {
            node.values = Some(values.to_json());
        }
        self.insert(path, node)
    }

    fn write_recording(&mut self, path: &str, source: &dyn SampleSource, num_frames: usize) -> Result<()> {
        let info = source.info();
        let frames = num_frames.min(info.num_frames);

        let mut node = LayoutNode::new(NodeKind::Dataset);
        node.dtype = Some(info.sample_type.as_str().to_string());
        node.shape = Some(vec![frames, info.num_channels]);
        if frames * info.num_channels <= self.inline_limit {
            let block = source.read_frames(0, frames)?.to_f64();
            let flat: Vec<Value> = block.iter().map(|&x| float_json(x)).collect();
            node.values = Some(nested_json(&[frames, info.num_channels], &flat));
        }
        self.insert(path, node)
    }

    fn link(&mut self, path: &str, target: &str) -> Result<()> {
        let mut node = LayoutNode::new(NodeKind::Link);
        node.target = Some(target.to_string());
        self.insert(path, node)
    }
}
