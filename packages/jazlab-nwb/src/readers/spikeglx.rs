/// SpikeGLX Reader
///
/// Reads Neuropixels `.ap.bin` / `.lf.bin` streams together with their `.meta`
/// sidecar. The meta file is a list of `key=value` lines; table-valued keys
/// carry a `~` prefix (`~imroTbl`, `~snsGeomMap`).
use super::binary::decode_frames;
use super::mmap::mmap_file;
use super::probe::ProbeGeometry;
use super::{clip_range, RecordingInfo, SampleBlock, SampleSource, SampleType};
use crate::error::{ConversionError, Result};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const NP2_GAIN: f64 = 80.0;
const NP1_X_POSITIONS: [f64; 4] = [43.0, 11.0, 59.0, 27.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Ap,
    Lf,
}

impl StreamKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path.to_string_lossy();
        if name.ends_with(".ap.bin") || name.ends_with(".ap.meta") {
            Ok(StreamKind::Ap)
        } else if name.ends_with(".lf.bin") || name.ends_with(".lf.meta") {
            Ok(StreamKind::Lf)
        } else {
            Err(ConversionError::UnsupportedFormat(format!(
                "not a SpikeGLX imec stream: {}",
                name
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Ap => "AP",
            StreamKind::Lf => "LF",
        }
    }
}

/// One channel entry of `~imroTbl`
#[derive(Debug, Clone, PartialEq)]
pub struct ImroEntry {
    pub channel: usize,
    pub electrode: usize,
    pub ap_gain: f64,
    pub lf_gain: f64,
}

#[derive(Debug, Clone)]
pub struct SpikeGlxMeta {
    path: PathBuf,
    fields: HashMap<String, String>,
}

impl SpikeGlxMeta {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
        Ok(Self::parse(path, &text))
    }

    pub fn parse(path: &Path, text: &str) -> Self {
        let fields = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                (
                    key.trim().trim_start_matches('~').to_string(),
                    value.trim().to_string(),
                )
            })
            .collect();
        Self {
            path: path.to_path_buf(),
            fields,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| ConversionError::parse(&self.path, format!("missing {}", key)))
    }

    fn number(&self, key: &str) -> Result<f64> {
        self.required(key)?
            .parse()
            .map_err(|_| ConversionError::parse(&self.path, format!("invalid {}", key)))
    }

    fn number_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            Some(_) => self.number(key),
            None => Ok(default),
        }
    }

    pub fn sampling_rate(&self) -> Result<f64> {
        self.number("imSampRate")
    }

    pub fn saved_channels(&self) -> Result<usize> {
        Ok(self.number("nSavedChans")? as usize)
    }

    /// `(ap, lf, sync)` channel counts from `snsApLfSy`
    pub fn channel_counts(&self) -> Result<(usize, usize, usize)> {
        let counts: Vec<usize> = self
            .required("snsApLfSy")?
            .split(',')
            .map(|v| v.trim().parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| ConversionError::parse(&self.path, "invalid snsApLfSy"))?;
        match counts.as_slice() {
            [ap, lf, sy] => Ok((*ap, *lf, *sy)),
            _ => Err(ConversionError::parse(&self.path, "snsApLfSy needs three values")),
        }
    }

    /// Channels holding neural data; the sync channel is excluded
    pub fn neural_channels(&self) -> Result<usize> {
        let (ap, lf, _) = self.channel_counts()?;
        Ok(ap + lf)
    }

    pub fn ai_range_max(&self) -> Result<f64> {
        self.number_or("imAiRangeMax", 0.6)
    }

    pub fn max_int(&self) -> Result<f64> {
        self.number_or("imMaxInt", 512.0)
    }

    pub fn probe_type(&self) -> Option<&str> {
        self.get("imDatPrb_type")
    }

    /// Entries of `~imroTbl`, skipping the header
    pub fn imro_entries(&self) -> Result<Vec<ImroEntry>> {
        let table = match self.get("imroTbl") {
            Some(table) => table,
            None => return Ok(Vec::new()),
        };

        table_entries(table)
            .skip(1)
            .map(|entry| {
                let values: Vec<f64> = entry
                    .split_whitespace()
                    .map(|v| v.parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|_| ConversionError::parse(&self.path, format!("invalid imro entry '{}'", entry)))?;

                match values.as_slice() {
                    // NP1.0: chan bank refid apgain lfgain hpfilt
                    [chan, bank, _, ap, lf, _] => Ok(ImroEntry {
                        channel: *chan as usize,
                        electrode: *chan as usize + 384 * *bank as usize,
                        ap_gain: *ap,
                        lf_gain: *lf,
                    }),
                    // NP2.0 single and multi shank: ... elec
                    [chan, .., elec] if values.len() >= 4 => Ok(ImroEntry {
                        channel: *chan as usize,
                        electrode: *elec as usize,
                        ap_gain: NP2_GAIN,
                        lf_gain: NP2_GAIN,
                    }),
                    _ => Err(ConversionError::parse(
                        &self.path,
                        format!("unexpected imro entry '{}'", entry),
                    )),
                }
            })
            .collect()
    }

    /// Conversion factor to microvolts for each neural channel
    pub fn gains_to_uv(&self, kind: StreamKind) -> Result<Vec<f64>> {
        let channels = self.neural_channels()?;
        let scale = self.ai_range_max()? / self.max_int()? * 1e6;
        let entries = self.imro_entries()?;

        Ok((0..channels)
            .map(|c| {
                let gain = entries
                    .get(c)
                    .map(|e| match kind {
                        StreamKind::Ap => e.ap_gain,
                        StreamKind::Lf => e.lf_gain,
                    })
                    .filter(|g| *g > 0.0)
                    .unwrap_or(NP2_GAIN);
                scale / gain
            })
            .collect())
    }

    /// Contact positions from `~snsGeomMap`, or the NP1.0 staggered layout
    pub fn geometry(&self, name: &str) -> Result<ProbeGeometry> {
        let channels = self.neural_channels()?;

        if let Some(map) = self.get("snsGeomMap") {
            let positions = table_entries(map)
                .skip(1)
                .take(channels)
                .map(|entry| {
                    let parts: Vec<&str> = entry.split(':').collect();
                    match parts.as_slice() {
                        [_, x, z, ..] => Ok([
                            x.parse::<f64>().map_err(|_| ConversionError::parse(&self.path, "invalid snsGeomMap x"))?,
                            z.parse::<f64>().map_err(|_| ConversionError::parse(&self.path, "invalid snsGeomMap z"))?,
                        ]),
                        _ => Err(ConversionError::parse(&self.path, format!("invalid snsGeomMap entry '{}'", entry))),
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(ProbeGeometry {
                name: name.to_string(),
                positions,
            });
        }

        let entries = self.imro_entries()?;
        let positions = (0..channels)
            .map(|c| {
                let electrode = entries.get(c).map(|e| e.electrode).unwrap_or(c);
                [NP1_X_POSITIONS[electrode % 4], 20.0 * (electrode / 2) as f64]
            })
            .collect();
        Ok(ProbeGeometry {
            name: name.to_string(),
            positions,
        })
    }
}

fn table_entries(table: &str) -> impl Iterator<Item = &str> {
    table
        .split(')')
        .map(|entry| entry.trim().trim_start_matches('('))
        .filter(|entry| !entry.is_empty())
}

/// Meta file next to a `.bin` stream
pub fn meta_path(bin_path: &Path) -> PathBuf {
    bin_path.with_extension("meta")
}

pub struct SpikeGlxReader {
    mmap: Mmap,
    meta: SpikeGlxMeta,
    kind: StreamKind,
    saved_channels: usize,
    info: RecordingInfo,
}

impl SpikeGlxReader {
    pub fn open(path: &Path) -> Result<Self> {
        let kind = StreamKind::from_path(path)?;
        let meta = SpikeGlxMeta::load(&meta_path(path))?;
        let saved_channels = meta.saved_channels()?;
        let neural_channels = meta.neural_channels()?;
        if neural_channels > saved_channels {
            return Err(ConversionError::parse(
                meta_path(path),
                "more neural channels than saved channels",
            ));
        }

        let mmap = mmap_file(path)?;
        let frame_bytes = saved_channels * SampleType::Int16.size();
        if frame_bytes == 0 || mmap.len() % frame_bytes != 0 {
            return Err(ConversionError::InvalidData(format!(
                "{}: size {} is not a multiple of {} saved channels",
                path.display(),
                mmap.len(),
                saved_channels
            )));
        }

        let info = RecordingInfo {
            file_path: path.display().to_string(),
            format: "spikeglx".to_string(),
            sampling_rate: meta.sampling_rate()?,
            num_channels: neural_channels,
            num_frames: mmap.len() / frame_bytes,
            sample_type: SampleType::Int16,
            channel_names: (0..neural_channels)
                .map(|c| format!("{}{}", kind.as_str(), c))
                .collect(),
            gains_to_uv: meta.gains_to_uv(kind)?,
            offset_to_uv: 0.0,
        };

        log::debug!(
            "Opened SpikeGLX {} stream {} ({} channels at {} Hz)",
            kind.as_str(),
            info.file_path,
            info.num_channels,
            info.sampling_rate
        );

        Ok(Self {
            mmap,
            meta,
            kind,
            saved_channels,
            info,
        })
    }

    pub fn meta(&self) -> &SpikeGlxMeta {
        &self.meta
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }
}

impl SampleSource for SpikeGlxReader {
    fn info(&self) -> &RecordingInfo {
        &self.info
    }

    fn read_frames(&self, start: usize, count: usize) -> Result<SampleBlock> {
        let (start, count) = clip_range(start, count, self.info.num_frames);
        decode_frames(
            &self.mmap,
            SampleType::Int16,
            self.saved_channels,
            self.info.num_channels,
            start,
            count,
        )
    }

    fn format_name(&self) -> &str {
        "SpikeGLX"
    }
}
