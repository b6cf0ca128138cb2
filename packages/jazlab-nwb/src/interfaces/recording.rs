/// Raw Extracellular Recordings
///
/// A recording interface wraps a `SampleSource` (Open Ephys V-Probe dump or
/// SpikeGLX stream) together with its probe geometry. It contributes a device
/// and an electrode group to the session metadata, fills the electrodes table
/// and, unless disabled, adds an `ElectricalSeries` to `/acquisition`.
///
/// The recording clock stays regular: alignment only changes the starting
/// time and rate, so frames are never timestamped one by one.
use super::{DataInterface, InterfaceOptions};
use crate::error::{ConversionError, Result};
use crate::metadata::{DeviceMetadata, ElectrodeGroupMetadata, ProbeMetadata, SessionMetadata, NEUROPIXELS_DEVICE};
use crate::nwb::{ElectricalSeries, Electrode, NwbFile};
use crate::readers::{
    BinaryRecordingConfig, FlatBinaryReader, ProbeGeometry, RecordingInfo, SampleSource, SampleType,
    SpikeGlxReader,
};
use crate::sync::Alignment;
use crate::timebase::Timebase;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Frames written per recording in stub mode
pub const STUB_FRAMES: usize = 100;

pub const SPIKEGLX_GROUP: &str = "Imec";
const ELECTRICAL_SERIES_DESCRIPTION: &str = "Acquisition traces for the ElectricalSeries.";

/// Layout of one V-Probe `.dat` file
#[derive(Debug, Clone, PartialEq)]
pub struct VProbeConfig {
    /// Device and electrode group name, `vprobe{N}`
    pub probe_name: String,
    /// Label of the probe in the probe metadata file, `probe{N+1:02}`
    pub probe_key: String,
    pub channel_count: usize,
    pub sample_type: SampleType,
    pub sampling_rate: f64,
    /// Contact spacing in micrometers
    pub ypitch: f64,
    pub es_key: String,
    /// `probes.metadata.json`, whose entry may list explicit contact locations
    pub probe_metadata: Option<PathBuf>,
}

impl VProbeConfig {
    /// 64-channel int16 V-Probe number `index`
    pub fn new(index: usize) -> Self {
        Self {
            probe_name: format!("vprobe{}", index),
            probe_key: format!("probe{:02}", index + 1),
            channel_count: 64,
            sample_type: SampleType::Int16,
            sampling_rate: 30000.0,
            ypitch: 50.0,
            es_key: format!("ElectricalSeriesVP{}", index),
            probe_metadata: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Probe {
    VProbe { name: String, channel_count: usize },
    SpikeGlx { probe_type: Option<String> },
}

pub struct RecordingInterface {
    source: Arc<dyn SampleSource>,
    probe: Probe,
    geometry: ProbeGeometry,
    es_key: String,
    timebase: Timebase,
}

/// Channel names without their stream prefix, so AP and LF share electrodes
fn electrode_channel_name(name: &str) -> &str {
    name.trim_start_matches(|c: char| c.is_ascii_alphabetic())
}

impl RecordingInterface {
    pub fn vprobe(file_path: &Path, config: &VProbeConfig) -> Result<Self> {
        let binary = BinaryRecordingConfig {
            channel_count: config.channel_count,
            sample_type: config.sample_type,
            sampling_rate: config.sampling_rate,
            ..BinaryRecordingConfig::default()
        };
        let reader = FlatBinaryReader::open(file_path, &binary)?;

        let locations = match &config.probe_metadata {
            Some(path) => ProbeMetadata::load(path)?
                .entry_by_label(&config.probe_key)
                .and_then(|entry| entry.electrodes_locations.clone()),
            None => None,
        };
        let geometry = match locations {
            Some(locations) => {
                let geometry = ProbeGeometry::from_locations(&config.probe_name, &locations)?;
                if geometry.len() != config.channel_count {
                    return Err(ConversionError::InvalidData(format!(
                        "{} lists {} electrode locations for {} channels",
                        config.probe_key,
                        geometry.len(),
                        config.channel_count
                    )));
                }
                geometry
            }
            None => ProbeGeometry::linear(&config.probe_name, config.channel_count, config.ypitch),
        };

        Ok(Self::new(
            Arc::new(reader),
            Probe::VProbe {
                name: config.probe_name.clone(),
                channel_count: config.channel_count,
            },
            geometry,
            &config.es_key,
        ))
    }

    /// SpikeGLX `.ap.bin` or `.lf.bin` stream, series `ElectricalSeriesAP`/`ElectricalSeriesLF`
    pub fn spikeglx(file_path: &Path) -> Result<Self> {
        let reader = SpikeGlxReader::open(file_path)?;
        let geometry = reader.meta().geometry(SPIKEGLX_GROUP)?;
        let probe_type = reader.meta().probe_type().map(str::to_string);
        let es_key = format!("ElectricalSeries{}", reader.kind().as_str());

        Ok(Self::new(
            Arc::new(reader),
            Probe::SpikeGlx { probe_type },
            geometry,
            &es_key,
        ))
    }

    fn new(source: Arc<dyn SampleSource>, probe: Probe, geometry: ProbeGeometry, es_key: &str) -> Self {
        let timebase = Timebase::regular(0.0, source.info().sampling_rate);
        Self {
            source,
            probe,
            geometry,
            es_key: es_key.to_string(),
            timebase,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_source(source: Arc<dyn SampleSource>, probe_name: &str, es_key: &str) -> Self {
        let channel_count = source.info().num_channels;
        Self::new(
            source,
            Probe::VProbe {
                name: probe_name.to_string(),
                channel_count,
            },
            ProbeGeometry::linear(probe_name, channel_count, 50.0),
            es_key,
        )
    }

    pub fn info(&self) -> &RecordingInfo {
        self.source.info()
    }

    pub fn num_frames(&self) -> usize {
        self.info().num_frames
    }

    pub fn es_key(&self) -> &str {
        &self.es_key
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    pub fn geometry(&self) -> &ProbeGeometry {
        &self.geometry
    }

    /// Map the recording clock onto the behavioral clock
    pub fn align(&mut self, alignment: &Alignment) {
        self.timebase = alignment.apply(&self.timebase);
    }

    fn group_name(&self) -> &str {
        match &self.probe {
            Probe::VProbe { name, .. } => name,
            Probe::SpikeGlx { .. } => SPIKEGLX_GROUP,
        }
    }

    fn add_electrodes(&self, file: &mut NwbFile) -> Result<Vec<usize>> {
        let group = self.group_name();
        let location = file
            .electrode_groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.location.clone())
            .unwrap_or_else(|| "unknown".to_string());

        self.info()
            .channel_names
            .iter()
            .enumerate()
            .map(|(channel, name)| {
                let [rel_x, rel_y] = self.geometry.positions.get(channel).copied().unwrap_or([0.0, 0.0]);
                file.add_electrode(Electrode {
                    group: group.to_string(),
                    channel_name: electrode_channel_name(name).to_string(),
                    location: location.clone(),
                    rel_x,
                    rel_y,
                })
            })
            .collect()
    }
}

impl DataInterface for RecordingInterface {
    fn interface_name(&self) -> &str {
        match self.probe {
            Probe::VProbe { .. } => "DatRecordingInterface",
            Probe::SpikeGlx { .. } => "SpikeGLXRecordingInterface",
        }
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timebase.first()
    }

    fn shift(&mut self, offset: f64) {
        self.timebase.shift(offset);
    }

    fn contribute_metadata(&self, metadata: &mut SessionMetadata) -> Result<()> {
        match &self.probe {
            Probe::VProbe { name, channel_count } => {
                metadata.ecephys.add_device(DeviceMetadata {
                    name: name.clone(),
                    description: format!("{}-channel Plexon V-Probe", channel_count),
                    manufacturer: "Plexon".to_string(),
                });
                metadata.ecephys.add_electrode_group(ElectrodeGroupMetadata {
                    name: name.clone(),
                    description: format!("a group representing electrodes on {}", name),
                    location: "unknown".to_string(),
                    device: name.clone(),
                    position: None,
                });
            }
            Probe::SpikeGlx { probe_type, .. } => {
                let description = match probe_type {
                    Some(t) => format!("Neuropixels probe (imDatPrb_type {}) recorded with SpikeGLX.", t),
                    None => "Neuropixels probe recorded with SpikeGLX.".to_string(),
                };
                metadata.ecephys.add_device(DeviceMetadata {
                    name: NEUROPIXELS_DEVICE.to_string(),
                    description,
                    manufacturer: "Imec".to_string(),
                });
                metadata.ecephys.add_electrode_group(ElectrodeGroupMetadata {
                    name: SPIKEGLX_GROUP.to_string(),
                    description: format!("A group representing probe/shank '{}'.", SPIKEGLX_GROUP),
                    location: "unknown".to_string(),
                    device: NEUROPIXELS_DEVICE.to_string(),
                    position: None,
                });
            }
        }
        Ok(())
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, options: &InterfaceOptions) -> Result<()> {
        let electrodes = self.add_electrodes(file)?;
        if !options.write_electrical_series {
            log::debug!("{}: electrodes only", self.es_key);
            return Ok(());
        }

        let num_frames = if options.stub_test {
            self.num_frames().min(STUB_FRAMES)
        } else {
            self.num_frames()
        };
        log::info!(
            "Adding {} ({} channels, {} of {} frames from {})",
            self.es_key,
            electrodes.len(),
            num_frames,
            self.num_frames(),
            self.info().file_path
        );

        file.add_acquisition(ElectricalSeries::new(
            &self.es_key,
            ELECTRICAL_SERIES_DESCRIPTION,
            Arc::clone(&self.source),
            electrodes,
            self.timebase.clone(),
            num_frames,
        ))
    }

    fn as_recording(&self) -> Option<&RecordingInterface> {
        Some(self)
    }

    fn as_recording_mut(&mut self) -> Option<&mut RecordingInterface> {
        Some(self)
    }
}
