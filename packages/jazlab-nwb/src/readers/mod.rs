/// Input Readers Module
///
/// Readers turn the heterogeneous files of a session into in-memory values:
/// behavioral JSON series, NumPy arrays, raw probe binaries, SpikeGLX streams
/// and Kilosort output folders.
///
/// Raw recordings are far larger than memory, so they are exposed through the
/// `SampleSource` trait and read in blocks of frames.
use crate::error::{ConversionError, Result};
use ndarray::Array2;
use serde::Serialize;
use std::path::Path;

pub mod binary;
pub mod json_series;
pub mod kilosort;
pub mod mat;
pub mod mmap;
pub mod npy;
pub mod probe;
pub mod spikeglx;
pub mod tables;

pub use binary::{BinaryRecordingConfig, FlatBinaryReader};
pub use json_series::JsonSeries;
pub use kilosort::KilosortFolder;
pub use probe::ProbeGeometry;
pub use spikeglx::{SpikeGlxMeta, SpikeGlxReader};

/// Storage type of raw samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    Int16,
    Float32,
    Float64,
}

impl SampleType {
    pub fn size(&self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Float32 => 4,
            SampleType::Float64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Int16 => "int16",
            SampleType::Float32 => "float32",
            SampleType::Float64 => "float64",
        }
    }
}

impl std::str::FromStr for SampleType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int16" | "i2" | "<i2" => Ok(SampleType::Int16),
            "float32" | "single" | "f4" | "<f4" => Ok(SampleType::Float32),
            "float64" | "double" | "f8" | "<f8" => Ok(SampleType::Float64),
            other => Err(ConversionError::InvalidData(format!(
                "unsupported sample type '{}'",
                other
            ))),
        }
    }
}

/// A block of frames, shaped `(frames, channels)`
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBlock {
    Int16(Array2<i16>),
    Float32(Array2<f32>),
    Float64(Array2<f64>),
}

impl SampleBlock {
    pub fn frames(&self) -> usize {
        match self {
            SampleBlock::Int16(a) => a.nrows(),
            SampleBlock::Float32(a) => a.nrows(),
            SampleBlock::Float64(a) => a.nrows(),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleBlock::Int16(_) => SampleType::Int16,
            SampleBlock::Float32(_) => SampleType::Float32,
            SampleBlock::Float64(_) => SampleType::Float64,
        }
    }

    /// Samples as floats, used for previews
    pub fn to_f64(&self) -> Array2<f64> {
        match self {
            SampleBlock::Int16(a) => a.mapv(f64::from),
            SampleBlock::Float32(a) => a.mapv(f64::from),
            SampleBlock::Float64(a) => a.clone(),
        }
    }
}

/// Description of a raw recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingInfo {
    pub file_path: String,
    pub format: String,
    pub sampling_rate: f64,
    pub num_channels: usize,
    pub num_frames: usize,
    pub sample_type: SampleType,
    pub channel_names: Vec<String>,
    /// Per-channel factor from stored samples to microvolts
    pub gains_to_uv: Vec<f64>,
    pub offset_to_uv: f64,
}

impl RecordingInfo {
    pub fn duration(&self) -> f64 {
        self.num_frames as f64 / self.sampling_rate
    }
}

/// Trait implemented by every raw recording reader
pub trait SampleSource: Send + Sync {
    fn info(&self) -> &RecordingInfo;

    /// Read `count` frames starting at `start`, clipped to the end of the file
    fn read_frames(&self, start: usize, count: usize) -> Result<SampleBlock>;

    fn format_name(&self) -> &str;
}

/// Factory selecting a recording reader by file extension
pub struct RecordingReaderFactory;

impl RecordingReaderFactory {
    pub fn create_reader(path: &Path, binary: &BinaryRecordingConfig) -> Result<Box<dyn SampleSource>> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            "dat" | "raw" => Ok(Box::new(FlatBinaryReader::open(path, binary)?)),
            "bin" => Ok(Box::new(SpikeGlxReader::open(path)?)),
            _ => Err(ConversionError::UnsupportedFormat(format!(
                "Unsupported recording extension: {}",
                extension
            ))),
        }
    }

    pub fn supported_extensions() -> Vec<&'static str> {
        vec!["dat", "raw", "bin"]
    }
}

/// Clip a frame range to `num_frames`
pub(crate) fn clip_range(start: usize, count: usize, num_frames: usize) -> (usize, usize) {
    let start = start.min(num_frames);
    let end = start.saturating_add(count).min(num_frames);
    (start, end - start)
}
