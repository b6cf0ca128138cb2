//! Session converter: a named set of data interfaces, aligned together and
//! written into one NWB file.
//!
//! Interface keys follow the acquisition layout: `RecordingVP{N}` for V-Probe
//! recordings (Open Ephys clock), `RecordingNP` and `LF` for the SpikeGLX
//! streams, `Sorting*` for spike sortings, and free-form names for behavior.

use crate::error::{ConversionError, Result};
use crate::interfaces::behavior::{
    AudioInterface, EyePositionInterface, HandPositionInterface, PupilSizeInterface,
    RewardLineInterface,
};
use crate::interfaces::{
    BinnedSpikesInterface, Curation, DataInterface, DisplayInterface, RecordingInterface, SortingInterface,
    TrialsInterface, TrialsSchema, VProbeConfig,
};
use crate::metadata::SessionMetadata;
use crate::nwb::{NwbFile, NwbWriter};
use crate::sync::{Alignment, ClockSource, SyncDir};
use crate::timebase::Timebase;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use crate::interfaces::InterfaceOptions;

struct Entry {
    key: String,
    interface: Box<dyn DataInterface>,
    options: InterfaceOptions,
}

/// Clock a recording key is aligned with
fn clock_source(key: &str) -> Result<ClockSource> {
    match key.strip_prefix("Recording") {
        Some(probe) if probe.starts_with("VP") => Ok(ClockSource::OpenEphys),
        Some("NP") => Ok(ClockSource::SpikeGlx),
        None if key == "LF" => Ok(ClockSource::SpikeGlx),
        _ => Err(ConversionError::InvalidData(format!(
            "cannot tell the acquisition clock of recording '{}'",
            key
        ))),
    }
}

pub struct Converter {
    entries: Vec<Entry>,
    sync_dir: Option<SyncDir>,
    next_unit_name: i64,
}

impl Converter {
    pub fn new(sync_dir: Option<SyncDir>) -> Self {
        Self {
            entries: Vec::new(),
            sync_dir,
            next_unit_name: 0,
        }
    }

    /// Add an interface under `key`.
    ///
    /// Sortings get consecutive unit names: each starts after the largest
    /// unit id of the sortings added before it. A curated subset of a sorter
    /// that is already added reuses that sorter's names.
    pub fn add(&mut self, key: &str, mut interface: Box<dyn DataInterface>, options: InterfaceOptions) -> Result<()> {
        if self.entries.iter().any(|e| e.key == key) {
            return Err(ConversionError::InvalidData(format!(
                "interface '{}' added twice",
                key
            )));
        }

        if let Some(sorting) = interface.as_sorting_mut() {
            let sorter_offset = if sorting.is_curated() {
                self.entries
                    .iter()
                    .filter_map(|e| e.interface.as_sorting())
                    .find(|s| !s.is_curated() && s.sorting().folder == sorting.sorting().folder)
                    .map(SortingInterface::unit_name_offset)
            } else {
                None
            };
            match sorter_offset {
                Some(offset) => sorting.set_unit_name_offset(offset),
                None => {
                    sorting.set_unit_name_offset(self.next_unit_name);
                    if let Some(max_id) = sorting.max_unit_id() {
                        self.next_unit_name += max_id + 1;
                    }
                }
            }
        }

        log::debug!("Added {} ({})", key, interface.interface_name());
        self.entries.push(Entry {
            key: key.to_string(),
            interface,
            options,
        });
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn interface(&self, key: &str) -> Option<&dyn DataInterface> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.interface.as_ref())
    }

    /// Map every recording onto the behavioral clock and register sortings
    /// to their recordings. Returns `false` when there is no sync directory.
    pub fn align_clocks(&mut self) -> Result<bool> {
        let sync_dir = match &self.sync_dir {
            Some(dir) => dir.clone(),
            None => {
                log::info!("No sync directory, keeping acquisition clocks");
                return Ok(false);
            }
        };
        log::info!("Temporally aligning data interfaces with {}", sync_dir.root().display());

        let mut alignments: HashMap<&'static str, Alignment> = HashMap::new();
        let mut recordings: HashMap<String, (usize, Timebase)> = HashMap::new();

        for entry in self.entries.iter_mut() {
            let Some(recording) = entry.interface.as_recording_mut() else {
                continue;
            };
            let source = clock_source(&entry.key)?;
            let name = match source {
                ClockSource::OpenEphys => "open_ephys",
                ClockSource::SpikeGlx => "spikeglx",
            };
            let alignment = match alignments.get(name) {
                Some(alignment) => *alignment,
                None => {
                    let alignment = sync_dir.alignment(source)?;
                    alignments.insert(name, alignment);
                    alignment
                }
            };
            recording.align(&alignment);
            recordings.insert(
                entry.key.clone(),
                (recording.num_frames(), recording.timebase().clone()),
            );
        }

        for entry in self.entries.iter_mut() {
            let key = entry.key.clone();
            let Some(sorting) = entry.interface.as_sorting_mut() else {
                continue;
            };
            let recording_key = match sorting.recording_key() {
                Some(k) => k.to_string(),
                None => key.replacen("Sorting", "Recording", 1),
            };
            let (num_frames, timebase) = recordings.get(&recording_key).ok_or_else(|| {
                ConversionError::InvalidData(format!(
                    "{} has no recording '{}' to register to",
                    key, recording_key
                ))
            })?;
            sorting.register_recording(&key, *num_frames, timebase)?;
        }

        Ok(true)
    }

    /// Earliest timestamp of every interface with a clock
    pub fn first_timestamp(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter_map(|e| e.interface.first_timestamp())
            .filter(|t| !t.is_nan())
            .reduce(f64::min)
    }

    pub fn shift(&mut self, offset: f64) {
        for entry in self.entries.iter_mut() {
            entry.interface.shift(offset);
        }
    }

    /// Align clocks and move the earliest timestamp to zero
    pub fn temporally_align(&mut self) -> Result<()> {
        align_session(&mut [self])
    }

    /// Session metadata merged from every interface
    pub fn metadata(&self) -> Result<SessionMetadata> {
        let mut metadata = SessionMetadata::default();
        for entry in &self.entries {
            entry.interface.contribute_metadata(&mut metadata)?;
        }
        Ok(metadata)
    }

    pub fn build_file(&self, metadata: &SessionMetadata) -> Result<NwbFile> {
        let mut file = NwbFile::new(metadata)?;
        for entry in &self.entries {
            log::debug!("Adding {} to the NWB file", entry.key);
            entry.interface.add_to_nwbfile(&mut file, &entry.options)?;
        }
        Ok(file)
    }

    pub fn run_conversion(&self, metadata: &SessionMetadata, nwbfile_path: &Path, overwrite: bool) -> Result<()> {
        let file = self.build_file(metadata)?;
        NwbWriter::write_file(&file, nwbfile_path, overwrite)
    }
}

/// Align several converters of one session to a shared zero.
///
/// Clocks are aligned per converter; the earliest timestamp across all of
/// them then becomes zero. Without sync directories nothing is shifted.
pub fn align_session(converters: &mut [&mut Converter]) -> Result<()> {
    let mut aligned = false;
    for converter in converters.iter_mut() {
        aligned |= converter.align_clocks()?;
    }
    if !aligned {
        return Ok(());
    }

    let first = converters
        .iter()
        .filter_map(|c| c.first_timestamp())
        .reduce(f64::min);
    if let Some(first) = first {
        log::info!("Session zero at {:.6} s on the behavioral clock", first);
        for converter in converters.iter_mut() {
            converter.shift(-first);
        }
    }
    Ok(())
}

/// Non-trial behavioral streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    EyePosition,
    PupilSize,
    RewardLine,
    Audio,
    HandPosition,
}

/// Where an interface loads its data from
#[derive(Debug, Clone, PartialEq)]
pub enum InterfaceSpec {
    VProbe {
        file_path: PathBuf,
        config: VProbeConfig,
    },
    SpikeGlx {
        file_path: PathBuf,
    },
    Kilosort {
        folder: PathBuf,
        keep_good_only: bool,
        recording: Option<String>,
    },
    CuratedSorting {
        folder: PathBuf,
        postprocessed: PathBuf,
        recording: Option<String>,
    },
    Behavior {
        kind: BehaviorKind,
        folder: PathBuf,
        module_description: Option<String>,
    },
    Trials {
        folder: PathBuf,
        schema: TrialsSchema,
    },
    Display {
        folder: PathBuf,
    },
    BinnedSpikes {
        folder: PathBuf,
    },
}

impl InterfaceSpec {
    pub fn behavior(kind: BehaviorKind, folder: &Path) -> Self {
        InterfaceSpec::Behavior {
            kind,
            folder: folder.to_path_buf(),
            module_description: None,
        }
    }

    pub fn open(&self) -> Result<Box<dyn DataInterface>> {
        Ok(match self {
            InterfaceSpec::VProbe { file_path, config } => {
                Box::new(RecordingInterface::vprobe(file_path, config)?)
            }
            InterfaceSpec::SpikeGlx { file_path } => Box::new(RecordingInterface::spikeglx(file_path)?),
            InterfaceSpec::Kilosort {
                folder,
                keep_good_only,
                recording,
            } => {
                let sorting = SortingInterface::load(folder, *keep_good_only)?;
                match recording {
                    Some(key) => Box::new(sorting.paired_with(key)),
                    None => Box::new(sorting),
                }
            }
            InterfaceSpec::CuratedSorting {
                folder,
                postprocessed,
                recording,
            } => {
                let curation = Curation::load(postprocessed)?;
                let sorting = SortingInterface::curated(folder, &curation)?;
                match recording {
                    Some(key) => Box::new(sorting.paired_with(key)),
                    None => Box::new(sorting),
                }
            }
            InterfaceSpec::Behavior {
                kind,
                folder,
                module_description,
            } => open_behavior(*kind, folder, module_description.as_deref())?,
            InterfaceSpec::Trials { folder, schema } => Box::new(TrialsInterface::load(folder, *schema)?),
            InterfaceSpec::Display { folder } => Box::new(DisplayInterface::load(folder)?),
            InterfaceSpec::BinnedSpikes { folder } => Box::new(BinnedSpikesInterface::load(folder)?),
        })
    }
}

fn open_behavior(kind: BehaviorKind, folder: &Path, description: Option<&str>) -> Result<Box<dyn DataInterface>> {
    macro_rules! described {
        ($interface:expr) => {{
            let interface = $interface;
            let interface = match description {
                Some(d) => interface.with_module_description(d),
                None => interface,
            };
            Box::new(interface) as Box<dyn DataInterface>
        }};
    }

    Ok(match kind {
        BehaviorKind::EyePosition => described!(EyePositionInterface::load(folder)?),
        BehaviorKind::PupilSize => described!(PupilSizeInterface::load(folder)?),
        BehaviorKind::RewardLine => described!(RewardLineInterface::load(folder)?),
        BehaviorKind::Audio => described!(AudioInterface::load(folder)?),
        BehaviorKind::HandPosition => described!(HandPositionInterface::load(folder)?),
    })
}

/// Interfaces of the raw and processed files of one session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionPlan {
    pub raw: Vec<(String, InterfaceSpec, InterfaceOptions)>,
    pub processed: Vec<(String, InterfaceSpec, InterfaceOptions)>,
}

impl ConversionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_raw(&mut self, key: &str, spec: InterfaceSpec, options: InterfaceOptions) {
        self.raw.push((key.to_string(), spec, options));
    }

    pub fn add_processed(&mut self, key: &str, spec: InterfaceSpec, options: InterfaceOptions) {
        self.processed.push((key.to_string(), spec, options));
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.processed.is_empty()
    }

    /// Open the raw and processed converters
    pub fn build(&self, sync_dir: Option<&Path>) -> Result<(Converter, Converter)> {
        Ok((
            build_converter(&self.raw, sync_dir)?,
            build_converter(&self.processed, sync_dir)?,
        ))
    }
}

fn build_converter(specs: &[(String, InterfaceSpec, InterfaceOptions)], sync_dir: Option<&Path>) -> Result<Converter> {
    let mut converter = Converter::new(sync_dir.map(SyncDir::new));
    for (key, spec, options) in specs {
        converter.add(key, spec.open()?, options.clone())?;
    }
    Ok(converter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::trials::tests::{task_trial, write_task_trials};
    use crate::nwb::tests::{test_metadata, RampSource};
    use crate::readers::kilosort::tests::write_sorting;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_sync(dir: &Path, open_ephys: (f64, f64, f64), spikeglx: (f64, f64)) {
        fs::create_dir_all(dir.join("open_ephys")).unwrap();
        fs::create_dir_all(dir.join("spikeglx")).unwrap();
        fs::write(
            dir.join("open_ephys/transform"),
            format!(r#"{{"intercept": {}, "coef": {}}}"#, open_ephys.0, open_ephys.1),
        )
        .unwrap();
        fs::write(dir.join("open_ephys/recording_start_time"), format!("{}\n", open_ephys.2)).unwrap();
        fs::write(
            dir.join("spikeglx/transform"),
            format!(r#"{{"intercept": {}, "coef": {}}}"#, spikeglx.0, spikeglx.1),
        )
        .unwrap();
    }

    fn ramp_recording(name: &str, es_key: &str, frames: usize) -> Box<dyn DataInterface> {
        Box::new(RecordingInterface::from_source(
            Arc::new(RampSource::new(2, frames, vec![1.0, 1.0])),
            name,
            es_key,
        ))
    }

    fn sorting(dir: &Path, times: &[u64], clusters: &[u32]) -> Box<dyn DataInterface> {
        write_sorting(dir, times, clusters, &[]);
        Box::new(SortingInterface::load(dir, false).unwrap())
    }

    #[test]
    fn test_clock_source_by_key() {
        assert_eq!(clock_source("RecordingVP0").unwrap(), ClockSource::OpenEphys);
        assert_eq!(clock_source("RecordingVP1").unwrap(), ClockSource::OpenEphys);
        assert_eq!(clock_source("RecordingNP").unwrap(), ClockSource::SpikeGlx);
        assert_eq!(clock_source("LF").unwrap(), ClockSource::SpikeGlx);
        assert!(matches!(clock_source("RecordingXY"), Err(ConversionError::InvalidData(_))));
    }

    #[test]
    fn test_duplicate_key() {
        let mut converter = Converter::new(None);
        converter
            .add("RecordingVP0", ramp_recording("vprobe0", "ElectricalSeriesVP0", 10), InterfaceOptions::default())
            .unwrap();
        assert!(converter
            .add("RecordingVP0", ramp_recording("vprobe0", "ElectricalSeriesVP0", 10), InterfaceOptions::default())
            .is_err());
        assert_eq!(converter.keys(), vec!["RecordingVP0"]);
    }

    #[test]
    fn test_unit_names_continue_across_sortings() {
        let dir = TempDir::new().unwrap();
        let mut converter = Converter::new(None);
        converter
            .add("SortingVP0", sorting(&dir.path().join("a"), &[1, 2], &[0, 4]), InterfaceOptions::default())
            .unwrap();
        converter
            .add("SortingNP", sorting(&dir.path().join("b"), &[1, 2], &[0, 2]), InterfaceOptions::default())
            .unwrap();

        assert_eq!(unit_names(&converter, "SortingVP0"), vec!["0", "4"]);
        assert_eq!(unit_names(&converter, "SortingNP"), vec!["5", "7"]);
    }

    fn curated(sorter: &Path, post: &Path, curation: &str, stability: &str) -> Box<dyn DataInterface> {
        fs::create_dir_all(post).unwrap();
        fs::write(post.join("manual_curation.json"), curation).unwrap();
        fs::write(post.join("stability.json"), stability).unwrap();
        let curation = Curation::load(post).unwrap();
        Box::new(SortingInterface::curated(sorter, &curation).unwrap())
    }

    fn unit_names(converter: &Converter, key: &str) -> Vec<String> {
        converter
            .interface(key)
            .and_then(|i| i.as_sorting())
            .map(|s| s.unit_names())
            .unwrap()
    }

    #[test]
    fn test_curated_units_keep_sorter_names() {
        let dir = TempDir::new().unwrap();
        let sorter = dir.path().join("sorter_output");
        let post = dir.path().join("postprocessed");

        let mut converter = Converter::new(None);
        converter
            .add("SortingVP0", sorting(&dir.path().join("vp"), &[1, 2], &[0, 4]), InterfaceOptions::default())
            .unwrap();
        converter
            .add("SortingNP", sorting(&sorter, &[1, 2, 3], &[0, 1, 2]), InterfaceOptions::default())
            .unwrap();
        converter
            .add(
                "CuratedSortingNP",
                curated(&sorter, &post, r#"{"2": "good"}"#, "[[true], [true], [false, true]]"),
                InterfaceOptions::default(),
            )
            .unwrap();
        converter
            .add("SortingNP1", sorting(&dir.path().join("np1"), &[1], &[0]), InterfaceOptions::default())
            .unwrap();

        assert_eq!(unit_names(&converter, "SortingNP"), vec!["5", "6", "7"]);
        assert_eq!(unit_names(&converter, "CuratedSortingNP"), vec!["7"]);
        // the curated subset does not advance the names
        assert_eq!(unit_names(&converter, "SortingNP1"), vec!["8"]);
    }

    #[test]
    fn test_curated_sorting_alone_uses_raw_ids() {
        let dir = TempDir::new().unwrap();
        let sorter = dir.path().join("sorter_output");
        write_sorting(&sorter, &[1, 2, 3], &[0, 1, 2], &[]);

        let mut converter = Converter::new(None);
        converter
            .add(
                "CuratedSortingNP",
                curated(&sorter, &dir.path().join("post"), r#"{"2": "good", "0": "good"}"#, "[[true], [true], [true]]"),
                InterfaceOptions::default(),
            )
            .unwrap();
        assert_eq!(unit_names(&converter, "CuratedSortingNP"), vec!["0", "2"]);
    }

    #[test]
    fn test_alignment_sets_session_zero() {
        let dir = TempDir::new().unwrap();
        let sync = dir.path().join("sync_pulses");
        // open ephys: t -> 100 + (2 + t); spikeglx: t -> 101 + t
        write_sync(&sync, (100.0, 1.0, 2.0), (101.0, 1.0));

        let mut converter = Converter::new(Some(SyncDir::new(&sync)));
        converter
            .add("RecordingVP0", ramp_recording("vprobe0", "ElectricalSeriesVP0", 1000), InterfaceOptions::default())
            .unwrap();
        converter
            .add("RecordingNP", ramp_recording("Imec", "ElectricalSeriesAP", 1000), InterfaceOptions::default())
            .unwrap();
        converter
            .add("SortingVP0", sorting(&dir.path().join("ks"), &[0, 500], &[0, 0]), InterfaceOptions::default())
            .unwrap();

        converter.temporally_align().unwrap();

        let vp = converter.interface("RecordingVP0").unwrap();
        let np = converter.interface("RecordingNP").unwrap();
        assert_eq!(np.first_timestamp(), Some(0.0));
        assert_eq!(vp.first_timestamp(), Some(1.0));

        let units = converter
            .interface("SortingVP0")
            .and_then(|i| i.as_sorting())
            .unwrap()
            .units_table(false)
            .unwrap();
        assert_eq!(
            units.column("spike_times").unwrap().data,
            crate::nwb::ColumnData::ragged(vec![vec![1.0, 1.5]])
        );
    }

    #[test]
    fn test_sorting_without_recording() {
        let dir = TempDir::new().unwrap();
        let sync = dir.path().join("sync_pulses");
        write_sync(&sync, (0.0, 1.0, 0.0), (0.0, 1.0));

        let mut converter = Converter::new(Some(SyncDir::new(&sync)));
        converter
            .add("SortingVP1", sorting(&dir.path().join("ks"), &[0], &[0]), InterfaceOptions::default())
            .unwrap();
        assert!(matches!(converter.align_clocks(), Err(ConversionError::InvalidData(_))));
    }

    #[test]
    fn test_shared_zero_across_files() {
        let dir = TempDir::new().unwrap();
        let sync = dir.path().join("sync_pulses");
        write_sync(&sync, (10.0, 1.0, 0.0), (0.0, 1.0));
        let behavior = dir.path().join("behavior");
        fs::create_dir_all(&behavior).unwrap();
        write_task_trials(&behavior, &[task_trial(5.0, None, None), task_trial(20.0, Some(21.0), None)]);

        let mut raw = Converter::new(Some(SyncDir::new(&sync)));
        raw.add("RecordingVP0", ramp_recording("vprobe0", "ElectricalSeriesVP0", 100), InterfaceOptions::default())
            .unwrap();
        let mut processed = Converter::new(Some(SyncDir::new(&sync)));
        processed
            .add(
                "Trials",
                Box::new(TrialsInterface::load(&behavior, TrialsSchema::Task).unwrap()),
                InterfaceOptions::default(),
            )
            .unwrap();

        align_session(&mut [&mut raw, &mut processed]).unwrap();
        assert_eq!(processed.first_timestamp(), Some(0.0));
        assert_eq!(raw.first_timestamp(), Some(5.0));
    }

    #[test]
    fn test_no_sync_dir_keeps_clocks() {
        let mut converter = Converter::new(None);
        let mut recording = RecordingInterface::from_source(Arc::new(RampSource::new(1, 10, vec![1.0])), "vprobe0", "ElectricalSeriesVP0");
        recording.shift(3.0);
        converter.add("RecordingVP0", Box::new(recording), InterfaceOptions::default()).unwrap();

        converter.temporally_align().unwrap();
        assert_eq!(converter.first_timestamp(), Some(3.0));
    }

    #[test]
    fn test_run_conversion_writes_manifest() {
        let dir = TempDir::new().unwrap();
        let mut converter = Converter::new(None);
        converter
            .add("RecordingVP0", ramp_recording("vprobe0", "ElectricalSeriesVP0", 10), InterfaceOptions::stub(true))
            .unwrap();

        let mut metadata = converter.metadata().unwrap();
        assert_eq!(metadata.ecephys.devices[0].name, "vprobe0");
        metadata.nwbfile.session_start_time = test_metadata().nwbfile.session_start_time;

        let output = dir.path().join("out/session.json");
        converter.run_conversion(&metadata, &output, false).unwrap();
        assert!(output.exists());
        assert!(matches!(
            converter.run_conversion(&metadata, &output, false),
            Err(ConversionError::OutputExists(_))
        ));
    }

    #[test]
    fn test_plan_collects_raw_and_processed() {
        let mut plan = ConversionPlan::new();
        assert!(plan.is_empty());
        plan.add_raw(
            "EyePosition",
            InterfaceSpec::behavior(BehaviorKind::EyePosition, Path::new("/missing")),
            InterfaceOptions::default(),
        );
        plan.add_processed(
            "Display",
            InterfaceSpec::Display {
                folder: PathBuf::from("/missing"),
            },
            InterfaceOptions::default(),
        );
        assert_eq!(plan.raw.len(), 1);
        assert_eq!(plan.processed[0].0, "Display");
        assert!(plan.build(None).is_err());
    }
}
