/// Spike Sorting Output
///
/// Kilosort units are written as a `Units` table, either into `/units` or
/// into the `ecephys` processing module. Once registered to its recording, a
/// sorting reports spike times on the recording's aligned clock; before that,
/// spike times are `sample / sample_rate`.
///
/// A curated sorting keeps only the units listed in `manual_curation.json` and
/// adds their mean waveforms and per-trial stability.
use super::{DataInterface, InterfaceOptions, WriteAs};
use crate::error::{ConversionError, Result};
use crate::nwb::{Column, ColumnData, DynamicTable, NwbFile};
use crate::readers::json_series::read_json;
use crate::readers::KilosortFolder;
use crate::sync::trim_excess_spikes;
use crate::timebase::Timebase;
use serde_json::{Map, Value};
use std::path::Path;

pub const ECEPHYS_MODULE: &str = "ecephys";
pub const ECEPHYS_DESCRIPTION: &str =
    "Intermediate data from extracellular electrophysiology recordings, e.g., LFP.";
pub const UNITS_DESCRIPTION: &str = "Units from Kilosort spike sorting.";

/// Stub sortings keep spikes up to this factor times the latest first spike of any unit
const STUB_SPAN_FACTOR: f64 = 1.1;

fn property_description(name: &str) -> &'static str {
    match name {
        "KSLabel" => "Kilosort label of the unit.",
        "quality" => "Quality of the unit as defined by phy (good, mua, noise).",
        "unit_name" => "Unique reference for each unit.",
        _ => "no description",
    }
}

fn invalid_stability(path: &Path, value: &Value) -> ConversionError {
    ConversionError::parse(path, format!("invalid stability value {}", value))
}

/// Selection and annotations from `manual_curation.json` and `stability.json`
#[derive(Debug, Clone, PartialEq)]
pub struct Curation {
    /// Indices into the sorter's unit list, ascending
    pub unit_indices: Vec<usize>,
    /// Per-trial stability of every unit of the sorter
    pub stability: Vec<Vec<bool>>,
}

impl Curation {
    pub fn load(postprocessed: &Path) -> Result<Self> {
        let curation_path = postprocessed.join("manual_curation.json");
        let curation: Map<String, Value> = read_json(&curation_path)?;
        let mut unit_indices = curation
            .keys()
            .map(|key| {
                key.parse::<usize>()
                    .map_err(|_| ConversionError::parse(&curation_path, format!("invalid unit index '{}'", key)))
            })
            .collect::<Result<Vec<_>>>()?;
        unit_indices.sort_unstable();

        let stability_path = postprocessed.join("stability.json");
        let rows: Vec<Vec<Value>> = read_json(&stability_path)?;
        let stability = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Value::Bool(b) => Ok(*b),
                        Value::Number(n) => match n.as_f64() {
                            Some(x) if x.is_finite() => Ok(x != 0.0),
                            _ => Err(invalid_stability(&stability_path, cell)),
                        },
                        _ => Err(invalid_stability(&stability_path, cell)),
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            unit_indices,
            stability,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CuratedColumns {
    waveform_mean: Option<ColumnData>,
    stable_trials: Vec<Vec<bool>>,
}

pub struct SortingInterface {
    sorting: KilosortFolder,
    recording: Option<String>,
    unit_name_offset: i64,
    timebase: Option<Timebase>,
    recording_frames: Option<usize>,
    curated: Option<CuratedColumns>,
}

impl SortingInterface {
    pub fn load(folder: &Path, keep_good_only: bool) -> Result<Self> {
        Ok(Self::from_sorting(KilosortFolder::load(folder, keep_good_only)?))
    }

    pub fn from_sorting(sorting: KilosortFolder) -> Self {
        Self {
            sorting,
            recording: None,
            unit_name_offset: 0,
            timebase: None,
            recording_frames: None,
            curated: None,
        }
    }

    /// Keep the curated units of `folder`, with mean waveforms and stable trials
    pub fn curated(folder: &Path, curation: &Curation) -> Result<Self> {
        let mut sorting = KilosortFolder::load(folder, false)?;
        sorting.select_units(&curation.unit_indices)?;

        let stable_trials = curation
            .unit_indices
            .iter()
            .map(|&index| {
                curation.stability.get(index).cloned().ok_or_else(|| {
                    ConversionError::InvalidData(format!(
                        "no stability entry for curated unit index {} ({} entries)",
                        index,
                        curation.stability.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let waveform_mean = match sorting.mean_waveforms()? {
            Some(waveforms) => Some(ColumnData::Array(waveforms.into_dyn())),
            None => {
                log::warn!("{}: no templates.npy, skipping waveform_mean", folder.display());
                None
            }
        };

        log::info!(
            "Curated {} of the units in {}",
            curation.unit_indices.len(),
            folder.display()
        );

        let mut interface = Self::from_sorting(sorting);
        interface.curated = Some(CuratedColumns {
            waveform_mean,
            stable_trials,
        });
        Ok(interface)
    }

    /// Name of the recording interface this sorting was made from
    pub fn paired_with(mut self, recording: &str) -> Self {
        self.recording = Some(recording.to_string());
        self
    }

    pub fn recording_key(&self) -> Option<&str> {
        self.recording.as_deref()
    }

    pub fn sorting(&self) -> &KilosortFolder {
        &self.sorting
    }

    pub fn max_unit_id(&self) -> Option<i64> {
        self.sorting.unit_ids.iter().copied().max()
    }

    pub fn set_unit_name_offset(&mut self, offset: i64) {
        self.unit_name_offset = offset;
    }

    pub fn unit_name_offset(&self) -> i64 {
        self.unit_name_offset
    }

    /// Whether this is a curated subset of a sorter's units
    pub fn is_curated(&self) -> bool {
        self.curated.is_some()
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.sorting
            .unit_ids
            .iter()
            .map(|id| (id + self.unit_name_offset).to_string())
            .collect()
    }

    /// Trim spikes past the end of the recording and follow its clock
    pub fn register_recording(&mut self, name: &str, num_frames: usize, timebase: &Timebase) -> Result<()> {
        trim_excess_spikes(&mut self.sorting, num_frames, name)?;
        self.timebase = Some(timebase.clone());
        self.recording_frames = Some(num_frames);
        Ok(())
    }

    fn spike_time(&self, sample: u64) -> f64 {
        self.timebase
            .as_ref()
            .and_then(|t| t.at(sample as usize))
            .unwrap_or(sample as f64 / self.sorting.sampling_rate)
    }

    /// Last frame (exclusive) kept in stub mode
    fn stub_end_frame(&self) -> u64 {
        let latest_first = self
            .sorting
            .spike_trains
            .iter()
            .filter_map(|train| train.first().copied())
            .max()
            .unwrap_or(0);
        let end = (latest_first as f64 * STUB_SPAN_FACTOR).ceil() as u64 + 1;
        match self.recording_frames {
            Some(frames) => end.min(frames as u64),
            None => end,
        }
    }

    pub fn units_table(&self, stub_test: bool) -> Result<DynamicTable> {
        let end_frame = if stub_test { Some(self.stub_end_frame()) } else { None };

        let spike_times: Vec<Vec<f64>> = self
            .sorting
            .spike_trains
            .iter()
            .map(|train| {
                train
                    .iter()
                    .take_while(|&&s| end_frame.map_or(true, |end| s < end))
                    .map(|&s| self.spike_time(s))
                    .collect()
            })
            .collect();

        let mut table = DynamicTable::new("units", "Units", UNITS_DESCRIPTION);
        table.add_column(Column::new(
            "unit_name",
            property_description("unit_name"),
            ColumnData::Text(self.unit_names()),
        ))?;
        table.add_column(Column::new(
            "spike_times",
            "the spike times for each unit in seconds",
            ColumnData::ragged(spike_times),
        ))?;
        for (name, values) in &self.sorting.properties {
            table.add_column(Column::new(
                name,
                property_description(name),
                ColumnData::from_text(values.clone()),
            ))?;
        }

        if let Some(curated) = &self.curated {
            if let Some(waveforms) = &curated.waveform_mean {
                table.add_column(Column::new(
                    "waveform_mean",
                    "the spike waveform mean for each spike unit",
                    waveforms.clone(),
                ))?;
            }
            table.add_column(Column::new(
                "stable_trials",
                "For each trial, whether this unit was stable in the recording.",
                ColumnData::ragged_bool(curated.stable_trials.clone()),
            ))?;
        }
        Ok(table)
    }
}

impl DataInterface for SortingInterface {
    fn interface_name(&self) -> &str {
        if self.curated.is_some() {
            "CuratedSortingInterface"
        } else {
            "KiloSortSortingInterface"
        }
    }

    /// Sortings follow their recording and never set the session zero
    fn first_timestamp(&self) -> Option<f64> {
        None
    }

    fn shift(&mut self, offset: f64) {
        if let Some(timebase) = self.timebase.as_mut() {
            timebase.shift(offset);
        }
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, options: &InterfaceOptions) -> Result<()> {
        let table = self.units_table(options.stub_test)?;
        log::info!(
            "Adding {} units from {} ({:?})",
            table.num_rows(),
            self.sorting.folder.display(),
            options.write_as
        );
        match options.write_as {
            WriteAs::Units => file.add_units(table),
            WriteAs::Processing => file.add_processed_units(ECEPHYS_MODULE, ECEPHYS_DESCRIPTION, table),
        }
    }

    fn as_sorting(&self) -> Option<&SortingInterface> {
        Some(self)
    }

    fn as_sorting_mut(&mut self) -> Option<&mut SortingInterface> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwb::tests::test_metadata;
    use crate::nwb::Container;
    use crate::readers::kilosort::tests::write_sorting;
    use ndarray::Array3;
    use ndarray_npy::write_npy;
    use std::fs;
    use tempfile::TempDir;

    fn ragged_rows(data: &ColumnData) -> Vec<Vec<f64>> {
        match data {
            ColumnData::Ragged { values, index } => {
                let mut start = 0usize;
                index
                    .iter()
                    .map(|&end| {
                        let row = values[start..end as usize].to_vec();
                        start = end as usize;
                        row
                    })
                    .collect()
            }
            other => panic!("not ragged: {:?}", other),
        }
    }

    #[test]
    fn test_units_without_registration() {
        let dir = TempDir::new().unwrap();
        write_sorting(dir.path(), &[30000, 60000, 15000], &[0, 0, 3], &[(0, "good"), (3, "mua")]);

        let mut sorting = SortingInterface::load(dir.path(), false).unwrap();
        sorting.set_unit_name_offset(10);
        assert_eq!(sorting.unit_names(), vec!["10", "13"]);
        assert_eq!(sorting.max_unit_id(), Some(3));

        let table = sorting.units_table(false).unwrap();
        assert_eq!(table.name, "units");
        assert_eq!(table.num_rows(), 2);
        assert_eq!(
            ragged_rows(&table.column("spike_times").unwrap().data),
            vec![vec![1.0, 2.0], vec![0.5]]
        );
        assert_eq!(
            table.column("KSLabel").unwrap().data,
            ColumnData::Text(vec!["good".to_string(), "mua".to_string()])
        );
    }

    #[test]
    fn test_registered_sorting_follows_recording_clock() {
        let dir = TempDir::new().unwrap();
        write_sorting(dir.path(), &[0, 1000, 2050], &[0, 0, 1], &[]);

        let mut sorting = SortingInterface::load(dir.path(), false).unwrap().paired_with("RecordingVP0");
        assert_eq!(sorting.recording_key(), Some("RecordingVP0"));

        // last spike 2050 is 51 samples past a 2000-frame recording
        sorting
            .register_recording("SortingVP0", 2000, &Timebase::regular(5.0, 1000.0))
            .unwrap();
        sorting.shift(-5.0);

        let table = sorting.units_table(false).unwrap();
        assert_eq!(
            ragged_rows(&table.column("spike_times").unwrap().data),
            vec![vec![0.0, 1.0], vec![]]
        );
    }

    #[test]
    fn test_stub_keeps_early_spikes() {
        let dir = TempDir::new().unwrap();
        write_sorting(dir.path(), &[100, 200, 5000, 150, 9000], &[0, 0, 0, 1, 1], &[]);

        let sorting = SortingInterface::load(dir.path(), false).unwrap();
        // latest first spike is 150 → keep samples up to 165
        let table = sorting.units_table(true).unwrap();
        let rows = ragged_rows(&table.column("spike_times").unwrap().data);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_write_as_processing() {
        let dir = TempDir::new().unwrap();
        write_sorting(dir.path(), &[10, 20], &[0, 1], &[]);
        let sorting = SortingInterface::load(dir.path(), false).unwrap();

        let mut file = NwbFile::new(&test_metadata()).unwrap();
        let options = InterfaceOptions::default().write_as(WriteAs::Processing);
        sorting.add_to_nwbfile(&mut file, &options).unwrap();
        sorting.add_to_nwbfile(&mut file, &options).unwrap();

        assert!(file.units.is_none());
        let module = file.module(ECEPHYS_MODULE).unwrap();
        assert_eq!(module.description, ECEPHYS_DESCRIPTION);
        match module.get("units") {
            Some(Container::Table(units)) => assert_eq!(units.num_rows(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_curated_sorting() {
        let dir = TempDir::new().unwrap();
        let sorter = dir.path().join("sorter_output");
        write_sorting(&sorter, &[10, 20, 30, 40], &[0, 1, 2, 2], &[]);
        write_npy(sorter.join("templates.npy"), &Array3::<f32>::ones((3, 5, 2))).unwrap();

        let post = dir.path().join("postprocessed");
        fs::create_dir_all(&post).unwrap();
        fs::write(post.join("manual_curation.json"), r#"{"2": "good", "0": "good"}"#).unwrap();
        fs::write(post.join("stability.json"), r#"[[true, false], [1, 1], [0, 1, 1]]"#).unwrap();

        let curation = Curation::load(&post).unwrap();
        assert_eq!(curation.unit_indices, vec![0, 2]);

        let sorting = SortingInterface::curated(&sorter, &curation).unwrap();
        assert_eq!(sorting.sorting().unit_ids, vec![0, 2]);

        let mut file = NwbFile::new(&test_metadata()).unwrap();
        sorting.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();
        let units = file.units.as_ref().unwrap();
        assert_eq!(units.num_rows(), 2);
        assert_eq!(
            units.column("stable_trials").unwrap().data,
            ColumnData::ragged_bool(vec![vec![true, false], vec![false, true, true]])
        );
        match &units.column("waveform_mean").unwrap().data {
            ColumnData::Array(a) => assert_eq!(a.shape(), &[2, 5, 2]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stability_values_must_be_flags() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("manual_curation.json"), r#"{"0": "good"}"#).unwrap();

        fs::write(dir.path().join("stability.json"), r#"[[1, 0.0, true]]"#).unwrap();
        let curation = Curation::load(dir.path()).unwrap();
        assert_eq!(curation.stability, vec![vec![true, false, true]]);

        fs::write(dir.path().join("stability.json"), r#"[[1, "stable"]]"#).unwrap();
        assert!(matches!(Curation::load(dir.path()), Err(ConversionError::ParseError { .. })));

        fs::write(dir.path().join("stability.json"), r#"[[1e400]]"#).unwrap();
        assert!(matches!(Curation::load(dir.path()), Err(ConversionError::ParseError { .. })));
    }

    #[test]
    fn test_curation_index_out_of_range() {
        let dir = TempDir::new().unwrap();
        write_sorting(dir.path(), &[10], &[0], &[]);
        let curation = Curation {
            unit_indices: vec![0],
            stability: Vec::new(),
        };
        assert!(matches!(
            SortingInterface::curated(dir.path(), &curation),
            Err(ConversionError::InvalidData(_))
        ));
    }
}
