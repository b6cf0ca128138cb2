use super::mmap::mmap_file;
use super::{clip_range, RecordingInfo, SampleBlock, SampleSource, SampleType};
use crate::error::{ConversionError, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use ndarray::Array2;
use std::path::Path;

/// Layout of a headerless interleaved recording
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryRecordingConfig {
    pub channel_count: usize,
    pub sample_type: SampleType,
    pub sampling_rate: f64,
    pub gain_to_uv: f64,
    pub offset_to_uv: f64,
}

impl Default for BinaryRecordingConfig {
    fn default() -> Self {
        Self {
            channel_count: 64,
            sample_type: SampleType::Int16,
            sampling_rate: 30000.0,
            gain_to_uv: 1.0,
            offset_to_uv: 0.0,
        }
    }
}

/// Reader for flat `.dat` dumps written by Open Ephys
pub struct FlatBinaryReader {
    mmap: Mmap,
    info: RecordingInfo,
}

impl FlatBinaryReader {
    pub fn open(path: &Path, config: &BinaryRecordingConfig) -> Result<Self> {
        if config.channel_count == 0 {
            return Err(ConversionError::InvalidData("channel_count must be positive".into()));
        }

        let mmap = mmap_file(path)?;
        let frame_bytes = config.channel_count * config.sample_type.size();
        if mmap.len() % frame_bytes != 0 {
            return Err(ConversionError::InvalidData(format!(
                "{}: size {} is not a multiple of the {}-byte frame",
                path.display(),
                mmap.len(),
                frame_bytes
            )));
        }

        let info = RecordingInfo {
            file_path: path.display().to_string(),
            format: "binary".to_string(),
            sampling_rate: config.sampling_rate,
            num_channels: config.channel_count,
            num_frames: mmap.len() / frame_bytes,
            sample_type: config.sample_type,
            channel_names: (0..config.channel_count).map(|c| c.to_string()).collect(),
            gains_to_uv: vec![config.gain_to_uv; config.channel_count],
            offset_to_uv: config.offset_to_uv,
        };

        log::debug!(
            "Opened {} ({} channels, {} frames)",
            info.file_path,
            info.num_channels,
            info.num_frames
        );

        Ok(Self { mmap, info })
    }
}

impl SampleSource for FlatBinaryReader {
    fn info(&self) -> &RecordingInfo {
        &self.info
    }

    fn read_frames(&self, start: usize, count: usize) -> Result<SampleBlock> {
        let (start, count) = clip_range(start, count, self.info.num_frames);
        decode_frames(
            &self.mmap,
            self.info.sample_type,
            self.info.num_channels,
            self.info.num_channels,
            start,
            count,
        )
    }

    fn format_name(&self) -> &str {
        "Binary"
    }
}

/// Decode `count` frames of `stored_channels` samples, keeping the first
/// `kept_channels` of each frame.
pub(crate) fn decode_frames(
    bytes: &[u8],
    sample_type: SampleType,
    stored_channels: usize,
    kept_channels: usize,
    start: usize,
    count: usize,
) -> Result<SampleBlock> {
    let size = sample_type.size();
    let frame_bytes = stored_channels * size;
    let begin = start * frame_bytes;
    let end = begin + count * frame_bytes;
    let raw = bytes.get(begin..end).ok_or_else(|| {
        ConversionError::InvalidData(format!("frames {}..{} out of bounds", start, start + count))
    })?;

    fn keep<T: Copy>(all: Vec<T>, stored: usize, kept: usize, count: usize) -> Result<Array2<T>> {
        let values: Vec<T> = if stored == kept {
            all
        } else {
            all.chunks(stored).flat_map(|frame| frame[..kept].iter().copied()).collect()
        };
        Array2::from_shape_vec((count, kept), values)
            .map_err(|e| ConversionError::InvalidData(e.to_string()))
    }

    let n = count * stored_channels;
    Ok(match sample_type {
        SampleType::Int16 => {
            let mut all = vec![0i16; n];
            LittleEndian::read_i16_into(raw, &mut all);
            SampleBlock::Int16(keep(all, stored_channels, kept_channels, count)?)
        }
        SampleType::Float32 => {
            let mut all = vec![0f32; n];
            LittleEndian::read_f32_into(raw, &mut all);
            SampleBlock::Float32(keep(all, stored_channels, kept_channels, count)?)
        }
        SampleType::Float64 => {
            let mut all = vec![0f64; n];
            LittleEndian::read_f64_into(raw, &mut all);
            SampleBlock::Float64(keep(all, stored_channels, kept_channels, count)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_i16(path: &Path, values: &[i16]) {
        let mut buf = Vec::new();
        for v in values {
            buf.write_i16::<LittleEndian>(*v).unwrap();
        }
        File::create(path).unwrap().write_all(&buf).unwrap();
    }

    #[test]
    fn test_reads_interleaved_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording.dat");
        write_i16(&path, &[1, 2, 3, 4, 5, 6, 7, 8]);

        let config = BinaryRecordingConfig {
            channel_count: 2,
            ..BinaryRecordingConfig::default()
        };
        let reader = FlatBinaryReader::open(&path, &config).unwrap();
        assert_eq!(reader.info().num_frames, 4);
        assert_eq!(reader.info().channel_names, vec!["0", "1"]);

        match reader.read_frames(1, 10).unwrap() {
            SampleBlock::Int16(block) => {
                assert_eq!(block.shape(), &[3, 2]);
                assert_eq!(block[[0, 0]], 3);
                assert_eq!(block[[2, 1]], 8);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn test_float64_recording() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording.dat");
        let mut buf = Vec::new();
        for v in [0.5f64, -0.5, 1.5, -1.5] {
            buf.write_f64::<LittleEndian>(v).unwrap();
        }
        File::create(&path).unwrap().write_all(&buf).unwrap();

        let config = BinaryRecordingConfig {
            channel_count: 2,
            sample_type: SampleType::Float64,
            ..BinaryRecordingConfig::default()
        };
        let reader = FlatBinaryReader::open(&path, &config).unwrap();
        let block = reader.read_frames(0, 2).unwrap().to_f64();
        assert_eq!(block[[1, 1]], -1.5);
    }

    #[test]
    fn test_rejects_partial_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recording.dat");
        write_i16(&path, &[1, 2, 3]);

        let config = BinaryRecordingConfig {
            channel_count: 2,
            ..BinaryRecordingConfig::default()
        };
        assert!(matches!(
            FlatBinaryReader::open(&path, &config),
            Err(ConversionError::InvalidData(_))
        ));
    }

    #[test]
    fn test_decode_drops_trailing_channels() {
        let mut bytes = Vec::new();
        for v in [1i16, 2, 99, 3, 4, 99] {
            bytes.write_i16::<LittleEndian>(v).unwrap();
        }
        let block = decode_frames(&bytes, SampleType::Int16, 3, 2, 0, 2).unwrap();
        assert_eq!(block, SampleBlock::Int16(ndarray::array![[1, 2], [3, 4]]));
    }
}
