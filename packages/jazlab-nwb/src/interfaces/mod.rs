/// Data Interfaces Module
///
/// One interface per source of a session: behavioral streams, trial tables,
/// raw recordings, spike sortings and binned rates. Each interface loads its
/// source, exposes its clock for alignment and adds its containers to an
/// `NwbFile`.
///
/// Source → DataInterface → Converter (align, merge metadata) → NwbFile
use crate::error::Result;
use crate::metadata::SessionMetadata;
use crate::nwb::NwbFile;
use serde::{Deserialize, Serialize};

pub mod behavior;
pub mod binned;
pub mod recording;
pub mod sorting;
pub mod trials;

pub use behavior::{
    AudioInterface, EyePositionInterface, HandPositionInterface, PupilSizeInterface,
    RewardLineInterface,
};
pub use binned::BinnedSpikesInterface;
pub use recording::{RecordingInterface, VProbeConfig};
pub use sorting::{Curation, SortingInterface};
pub use trials::{DisplayInterface, TrialsInterface, TrialsSchema};

pub const BEHAVIOR_MODULE: &str = "behavior";
pub const BEHAVIOR_DESCRIPTION: &str = "Contains behavioral data from experiment.";
pub const EVENTS_DESCRIPTION: &str = "Contains audio and reward data from experiment.";

/// Where sorted units are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAs {
    #[default]
    Units,
    Processing,
}

/// Per-interface options of one conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceOptions {
    /// Write only a preview of raw recordings and sortings
    pub stub_test: bool,
    /// Recordings: write the ElectricalSeries, or only the electrodes
    pub write_electrical_series: bool,
    pub write_as: WriteAs,
}

impl Default for InterfaceOptions {
    fn default() -> Self {
        Self {
            stub_test: false,
            write_electrical_series: true,
            write_as: WriteAs::Units,
        }
    }
}

impl InterfaceOptions {
    pub fn stub(stub_test: bool) -> Self {
        Self {
            stub_test,
            ..Self::default()
        }
    }

    pub fn without_electrical_series(mut self) -> Self {
        self.write_electrical_series = false;
        self
    }

    pub fn write_as(mut self, write_as: WriteAs) -> Self {
        self.write_as = write_as;
        self
    }
}

/// Trait implemented by every data source of a session
pub trait DataInterface: Send {
    /// Kind of interface, for logging
    fn interface_name(&self) -> &str;

    /// Earliest timestamp on the session clock, if the interface has a clock
    fn first_timestamp(&self) -> Option<f64>;

    /// Move every timestamp by `offset` seconds
    fn shift(&mut self, offset: f64);

    fn contribute_metadata(&self, _metadata: &mut SessionMetadata) -> Result<()> {
        Ok(())
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, options: &InterfaceOptions) -> Result<()>;

    fn as_recording(&self) -> Option<&RecordingInterface> {
        None
    }

    fn as_recording_mut(&mut self) -> Option<&mut RecordingInterface> {
        None
    }

    fn as_sorting(&self) -> Option<&SortingInterface> {
        None
    }

    fn as_sorting_mut(&mut self) -> Option<&mut SortingInterface> {
        None
    }
}
