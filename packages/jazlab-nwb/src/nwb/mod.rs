/// NWB Document Module
///
/// An in-memory NWB 2.x document assembled by the data interfaces, and the
/// machinery that lays it out on disk:
///
/// NwbFile → emit() → ContainerSink (HDF5 file or JSON layout manifest)
///
/// Raw recordings are never loaded: an `ElectricalSeries` keeps a handle on its
/// `SampleSource` and the sink streams frames in chunks.
use crate::error::{ConversionError, Result};
use crate::metadata::{DeviceMetadata, ElectrodeGroupMetadata, SessionMetadata, SubjectMetadata};
use crate::readers::SampleSource;
use crate::timebase::Timebase;
use chrono::{DateTime, FixedOffset, Utc};
use ndarray::ArrayD;
use std::sync::Arc;

#[cfg(feature = "nwb-support")]
pub mod hdf5_sink;
pub mod layout;
pub mod sink;
pub mod table;
pub mod writer;

#[cfg(feature = "nwb-support")]
pub use hdf5_sink::Hdf5Sink;
pub use layout::emit;
pub use sink::{AttrValue, ContainerSink, DatasetValues, LayoutManifest, LayoutNode, LayoutSink, NodeKind};
pub use table::{Column, ColumnData, DynamicTable};
pub use writer::{NwbBackend, NwbWriter};

pub const NWB_VERSION: &str = "2.6.0";

/// One row of the electrodes table
#[derive(Debug, Clone, PartialEq)]
pub struct Electrode {
    pub group: String,
    pub channel_name: String,
    pub location: String,
    pub rel_x: f64,
    pub rel_y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    /// `TimeSeries` or `SpatialSeries`
    pub neurodata_type: &'static str,
    pub description: String,
    pub data: ArrayD<f64>,
    pub unit: String,
    pub conversion: f64,
    pub reference_frame: Option<String>,
    pub timestamps: Vec<f64>,
    pub compress: bool,
}

/// Discrete coded events (`ndx-events`)
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledEvents {
    pub name: String,
    pub description: String,
    pub timestamps: Vec<f64>,
    pub data: Vec<u8>,
    pub labels: Vec<String>,
}

/// Rates of every unit binned around aligned events (`ndx-binned-spikes`)
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedAlignedSpikes {
    pub name: String,
    pub description: String,
    /// `(bins, events, units)`, NaN where a unit has no data for an event
    pub data: ArrayD<f64>,
    pub event_timestamps: Vec<f64>,
    pub bin_width_in_milliseconds: f64,
    pub milliseconds_from_event_to_first_bin: f64,
}

#[derive(Clone)]
pub struct ElectricalSeries {
    pub name: String,
    pub description: String,
    pub source: Arc<dyn SampleSource>,
    /// Rows of the electrodes table, one per channel
    pub electrodes: Vec<usize>,
    pub timebase: Timebase,
    /// Frames to write; fewer than the recording holds in stub mode
    pub num_frames: usize,
    /// Factor from stored samples to volts, when uniform across channels
    pub conversion: f64,
    pub channel_conversion: Option<Vec<f64>>,
    pub offset: f64,
}

impl std::fmt::Debug for ElectricalSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectricalSeries")
            .field("name", &self.name)
            .field("source", &self.source.info().file_path)
            .field("electrodes", &self.electrodes.len())
            .field("timebase", &self.timebase)
            .field("num_frames", &self.num_frames)
            .finish()
    }
}

impl ElectricalSeries {
    /// Build a series over `source`, deriving the volts conversion from its gains
    pub fn new(
        name: &str,
        description: &str,
        source: Arc<dyn SampleSource>,
        electrodes: Vec<usize>,
        timebase: Timebase,
        num_frames: usize,
    ) -> Self {
        let info = source.info();
        let gains = &info.gains_to_uv;
        let uniform = gains.windows(2).all(|w| (w[0] - w[1]).abs() < f64::EPSILON);
        let (conversion, channel_conversion) = match gains.first() {
            Some(gain) if uniform => (gain * 1e-6, None),
            Some(_) => (1e-6, Some(gains.clone())),
            None => (1e-6, None),
        };
        let offset = info.offset_to_uv * 1e-6;

        Self {
            name: name.to_string(),
            description: description.to_string(),
            source,
            electrodes,
            timebase,
            num_frames,
            conversion,
            channel_conversion,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    TimeSeries(TimeSeries),
    LabeledEvents(LabeledEvents),
    BinnedAlignedSpikes(BinnedAlignedSpikes),
    Table(DynamicTable),
}

impl Container {
    pub fn name(&self) -> &str {
        match self {
            Container::TimeSeries(s) => &s.name,
            Container::LabeledEvents(e) => &e.name,
            Container::BinnedAlignedSpikes(b) => &b.name,
            Container::Table(t) => &t.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub containers: Vec<Container>,
}

impl ProcessingModule {
    pub fn add(&mut self, container: Container) -> Result<()> {
        if self.get(container.name()).is_some() {
            return Err(ConversionError::InvalidData(format!(
                "{} already exists in processing module {}",
                container.name(),
                self.name
            )));
        }
        self.containers.push(container);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name() == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.name() == name)
    }
}

/// In-memory NWB document
#[derive(Debug, Clone)]
pub struct NwbFile {
    pub identifier: String,
    pub session_description: String,
    pub session_start_time: DateTime<FixedOffset>,
    pub file_create_date: DateTime<FixedOffset>,
    pub session_id: Option<String>,
    pub institution: String,
    pub lab: String,
    pub experimenter: Vec<String>,
    pub subject: Option<SubjectMetadata>,
    pub devices: Vec<DeviceMetadata>,
    pub electrode_groups: Vec<ElectrodeGroupMetadata>,
    pub electrodes: Vec<Electrode>,
    pub acquisition: Vec<ElectricalSeries>,
    pub processing: Vec<ProcessingModule>,
    pub intervals: Vec<DynamicTable>,
    pub units: Option<DynamicTable>,
}

impl NwbFile {
    pub fn new(metadata: &SessionMetadata) -> Result<Self> {
        let nwbfile = &metadata.nwbfile;
        let session_start_time = nwbfile.session_start_time.ok_or_else(|| {
            ConversionError::MissingStartTime(nwbfile.session_id.clone().unwrap_or_default())
        })?;

        Ok(Self {
            identifier: nwbfile.identifier.clone(),
            session_description: nwbfile.session_description.clone(),
            session_start_time,
            file_create_date: Utc::now().fixed_offset(),
            session_id: nwbfile.session_id.clone(),
            institution: nwbfile.institution.clone(),
            lab: nwbfile.lab.clone(),
            experimenter: nwbfile.experimenter.clone(),
            subject: metadata.subject.clone(),
            devices: metadata.ecephys.devices.clone(),
            electrode_groups: metadata.ecephys.electrode_groups.clone(),
            electrodes: Vec::new(),
            acquisition: Vec::new(),
            processing: Vec::new(),
            intervals: Vec::new(),
            units: None,
        })
    }

    /// Get or create a processing module; the first description wins
    pub fn processing_module(&mut self, name: &str, description: &str) -> &mut ProcessingModule {
        let index = match self.processing.iter().position(|m| m.name == name) {
            Some(index) => index,
            None => {
                self.processing.push(ProcessingModule {
                    name: name.to_string(),
                    description: description.to_string(),
                    containers: Vec::new(),
                });
                self.processing.len() - 1
            }
        };
        &mut self.processing[index]
    }

    pub fn module(&self, name: &str) -> Option<&ProcessingModule> {
        self.processing.iter().find(|m| m.name == name)
    }

    /// Add an electrode row unless the same channel of the same group exists;
    /// returns the row index
    pub fn add_electrode(&mut self, electrode: Electrode) -> Result<usize> {
        if !self.electrode_groups.iter().any(|g| g.name == electrode.group) {
            return Err(ConversionError::InvalidData(format!(
                "electrode group {} is not declared",
                electrode.group
            )));
        }
        if let Some(index) = self
            .electrodes
            .iter()
            .position(|e| e.group == electrode.group && e.channel_name == electrode.channel_name)
        {
            return Ok(index);
        }
        self.electrodes.push(electrode);
        Ok(self.electrodes.len() - 1)
    }

    pub fn add_acquisition(&mut self, series: ElectricalSeries) -> Result<()> {
        if self.acquisition.iter().any(|s| s.name == series.name) {
            return Err(ConversionError::InvalidData(format!(
                "acquisition {} already exists",
                series.name
            )));
        }
        if let Some(&bad) = series.electrodes.iter().find(|&&i| i >= self.electrodes.len()) {
            return Err(ConversionError::InvalidData(format!(
                "{} references electrode {} but the table has {} rows",
                series.name,
                bad,
                self.electrodes.len()
            )));
        }
        self.acquisition.push(series);
        Ok(())
    }

    pub fn add_time_intervals(&mut self, table: DynamicTable) -> Result<()> {
        if self.intervals.iter().any(|t| t.name == table.name) {
            return Err(ConversionError::InvalidData(format!(
                "time intervals {} already exist",
                table.name
            )));
        }
        self.intervals.push(table);
        Ok(())
    }

    /// Append units to `/units`
    pub fn add_units(&mut self, units: DynamicTable) -> Result<()> {
        match self.units.as_mut() {
            Some(existing) => existing.extend(units),
            None => {
                self.units = Some(units);
                Ok(())
            }
        }
    }

    /// Append units to a table of the same name inside a processing module
    pub fn add_processed_units(&mut self, module: &str, description: &str, units: DynamicTable) -> Result<()> {
        let module = self.processing_module(module, description);
        match module.get_mut(&units.name) {
            Some(Container::Table(existing)) => existing.extend(units),
            Some(_) => Err(ConversionError::InvalidData(format!(
                "{} in {} is not a table",
                units.name, module.name
            ))),
            None => module.add(Container::Table(units)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::{DeviceMetadata, ElectrodeGroupMetadata};
    use crate::readers::{RecordingInfo, SampleBlock, SampleType};
    use chrono::TimeZone;
    use ndarray::Array2;

    /// In-memory recording with `value = frame * 10 + channel`
    pub(crate) struct RampSource {
        info: RecordingInfo,
    }

    impl RampSource {
        pub(crate) fn new(num_channels: usize, num_frames: usize, gains: Vec<f64>) -> Self {
            Self {
                info: RecordingInfo {
                    file_path: "ramp.dat".to_string(),
                    format: "ramp".to_string(),
                    sampling_rate: 1000.0,
                    num_channels,
                    num_frames,
                    sample_type: SampleType::Int16,
                    channel_names: (0..num_channels).map(|c| c.to_string()).collect(),
                    gains_to_uv: gains,
                    offset_to_uv: 0.0,
                },
            }
        }
    }

    impl SampleSource for RampSource {
        fn info(&self) -> &RecordingInfo {
            &self.info
        }

        fn read_frames(&self, start: usize, count: usize) -> Result<SampleBlock> {
            let (start, count) = crate::readers::clip_range(start, count, self.info.num_frames);
            Ok(SampleBlock::Int16(Array2::from_shape_fn(
                (count, self.info.num_channels),
                |(f, c)| ((start + f) * 10 + c) as i16,
            )))
        }

        fn format_name(&self) -> &str {
            "ramp"
        }
    }

    pub(crate) fn test_metadata() -> SessionMetadata {
        let mut metadata = SessionMetadata::default();
        metadata.nwbfile.session_description = "test session".to_string();
        metadata.nwbfile.session_start_time =
            Some(FixedOffset::west_opt(5 * 3600).unwrap().with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap());
        metadata.ecephys.add_device(DeviceMetadata {
            name: "vprobe0".to_string(),
            description: "64-channel Plexon V-Probe".to_string(),
            manufacturer: "Plexon".to_string(),
        });
        metadata.ecephys.add_electrode_group(ElectrodeGroupMetadata {
            name: "probe01".to_string(),
            description: "a group representing electrodes on vprobe0".to_string(),
            location: "unknown".to_string(),
            device: "vprobe0".to_string(),
            position: None,
        });
        metadata
    }

    fn electrode(channel: &str) -> Electrode {
        Electrode {
            group: "probe01".to_string(),
            channel_name: channel.to_string(),
            location: "unknown".to_string(),
            rel_x: 0.0,
            rel_y: 0.0,
        }
    }

    #[test]
    fn test_new_requires_start_time() {
        let mut metadata = test_metadata();
        metadata.nwbfile.session_start_time = None;
        assert!(matches!(NwbFile::new(&metadata), Err(ConversionError::MissingStartTime(_))));
    }

    #[test]
    fn test_electrodes_are_deduplicated() {
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        assert_eq!(file.add_electrode(electrode("0")).unwrap(), 0);
        assert_eq!(file.add_electrode(electrode("1")).unwrap(), 1);
        assert_eq!(file.add_electrode(electrode("0")).unwrap(), 0);
        assert_eq!(file.electrodes.len(), 2);

        let mut unknown = electrode("0");
        unknown.group = "probe02".to_string();
        assert!(file.add_electrode(unknown).is_err());
    }

    #[test]
    fn test_processing_module_keeps_first_description() {
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        file.processing_module("behavior", "Contains behavioral data from experiment.");
        file.processing_module("behavior", "Contains audio and reward data from experiment.");
        assert_eq!(file.processing.len(), 1);
        assert_eq!(
            file.module("behavior").unwrap().description,
            "Contains behavioral data from experiment."
        );
    }

    #[test]
    fn test_electrical_series_conversion() {
        let uniform = ElectricalSeries::new(
            "ElectricalSeriesVP0",
            "",
            Arc::new(RampSource::new(2, 10, vec![0.195, 0.195])),
            vec![0, 1],
            Timebase::regular(0.0, 1000.0),
            10,
        );
        assert!((uniform.conversion - 0.195e-6).abs() < 1e-15);
        assert!(uniform.channel_conversion.is_none());

        let mixed = ElectricalSeries::new(
            "ElectricalSeriesNP",
            "",
            Arc::new(RampSource::new(2, 10, vec![2.34, 4.68])),
            vec![0, 1],
            Timebase::regular(0.0, 1000.0),
            10,
        );
        assert_eq!(mixed.conversion, 1e-6);
        assert_eq!(mixed.channel_conversion, Some(vec![2.34, 4.68]));
    }

    #[test]
    fn test_acquisition_checks_electrode_rows() {
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        file.add_electrode(electrode("0")).unwrap();
        let series = ElectricalSeries::new(
            "ElectricalSeriesVP0",
            "",
            Arc::new(RampSource::new(2, 10, vec![1.0, 1.0])),
            vec![0, 1],
            Timebase::regular(0.0, 1000.0),
            10,
        );
        assert!(file.add_acquisition(series).is_err());
    }
}
