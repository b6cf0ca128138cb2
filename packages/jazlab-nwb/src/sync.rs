//! Clock transforms between acquisition systems and the behavioral clock.
//!
//! A sync directory holds `open_ephys/transform`, `open_ephys/recording_start_time`
//! and `spikeglx/transform`. A transform maps device time `t` to behavior time
//! `intercept + coef * (start + t)`.

use crate::error::{ConversionError, Result};
use crate::readers::json_series::read_json;
use crate::readers::KilosortFolder;
use crate::timebase::Timebase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Spikes further than this past the last recorded frame are an error
pub const MAX_EXCESS_SAMPLES: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockTransform {
    pub intercept: f64,
    pub coef: f64,
}

/// Acquisition system a recording was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClockSource {
    OpenEphys,
    SpikeGlx,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub transform: ClockTransform,
    pub start: f64,
}

impl Alignment {
    pub fn apply(&self, timebase: &Timebase) -> Timebase {
        timebase.affine(self.transform.intercept, self.transform.coef, self.start)
    }
}

#[derive(Debug, Clone)]
pub struct SyncDir {
    root: PathBuf,
}

impl SyncDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn alignment(&self, source: ClockSource) -> Result<Alignment> {
        match source {
            ClockSource::OpenEphys => {
                let dir = self.root.join("open_ephys");
                Ok(Alignment {
                    transform: read_json(&dir.join("transform"))?,
                    start: read_start_time(&dir.join("recording_start_time"))?,
                })
            }
            ClockSource::SpikeGlx => Ok(Alignment {
                transform: read_json(&self.root.join("spikeglx").join("transform"))?,
                start: 0.0,
            }),
        }
    }
}

fn read_start_time(path: &Path) -> Result<f64> {
    let text = fs::read_to_string(path)
        .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
    text.trim()
        .parse()
        .map_err(|_| ConversionError::parse(path, format!("invalid start time '{}'", text.trim())))
}

/// Drop sorted spikes that fall just past the end of their recording.
///
/// Returns the number of dropped spikes.
pub fn trim_excess_spikes(sorting: &mut KilosortFolder, num_frames: usize, name: &str) -> Result<usize> {
    let last = match sorting.last_spike_sample() {
        Some(last) => last as i64,
        None => return Ok(0),
    };

    let excess = last - num_frames as i64 + 1;
    if excess > MAX_EXCESS_SAMPLES {
        return Err(ConversionError::InvalidData(format!(
            "{}: spikes detected at least {} samples after the end of the recording",
            name, excess
        )));
    }
    if excess <= 0 {
        return Ok(0);
    }

    let removed = sorting.truncate_spikes(num_frames as u64);
    log::warn!(
        "{}: removed {} spikes up to {} samples past the end of the recording",
        name,
        removed,
        excess
    );
    Ok(removed)
}
