//! Locations of every input of a session for each supported data layout.

use crate::config::{ConversionConfig, Repository};
use crate::error::{ConversionError, Result};
use crate::metadata::{lookup_subject, WATTERS_SUBJECTS};
use serde::Serialize;
use std::path::{Path, PathBuf};

const WATTERS_OPENMIND_DATA: &str = "/om4/group/jazlab/nwatters/multi_prediction";
const WATTERS_OPENMIND_OUTPUT: &str = "/om/user/nwatters/nwb_data_multi_prediction";
const PICCATO_OPENMIND_DATA: &str = "/om2/user/apiccato/phys_preprocessing_open_source/phys_data";
const PICCATO_OPENMIND_OUTPUT: &str = "/om2/user/apiccato/nwb_data/staging";
const NEUPANE_OPENMIND_DATA: &str = "/om4/group/jazlab/sujay_backup/nwb_sessions";
const NEUPANE_OPENMIND_OUTPUT: &str = "/om2/user/apiccato/sujay_nwb/staging";
const RAMADAN_DATA: &str = "/Volumes/Portable/Kilosort";
const RAMADAN_OUTPUT: &str = "output";

pub const PICCATO_DANDISET_ID: &str = "000767";

/// Resolved input and output locations of one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionPaths {
    /// Directory NWB files are written to
    pub output: PathBuf,
    /// Raw electrophysiology (`v_probe_N/`, `spikeglx/`)
    pub raw_data: PathBuf,
    /// Task and behavior JSON files
    pub task_behavior: PathBuf,
    /// Clock transforms between acquisition systems
    pub sync_pulses: PathBuf,
    /// Spike sorter output
    pub spike_sorting: PathBuf,
    /// Probe placement metadata file, when the layout has one
    pub probe_metadata: Option<PathBuf>,
    /// Open-source release of the session (per-field trial files)
    pub data_open_source: Option<PathBuf>,
    /// Curation and stability results of the sorted units
    pub postprocessed: Option<PathBuf>,
}

fn output_root(config: &ConversionConfig, default: &str) -> PathBuf {
    config
        .output_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(default))
}

fn openmind_root(config: &ConversionConfig, default: &str) -> PathBuf {
    config
        .openmind_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(default))
}

fn with_stub(path: PathBuf, stub_test: bool) -> PathBuf {
    if stub_test {
        path.join("stub")
    } else {
        path
    }
}

pub fn watters_paths(config: &ConversionConfig, subject: &str, session: &str) -> Result<SessionPaths> {
    let subject_id = lookup_subject(WATTERS_SUBJECTS, subject)?.id;

    match config.repo {
        Repository::Openmind => {
            let data = openmind_root(config, WATTERS_OPENMIND_DATA);
            let output = output_root(config, WATTERS_OPENMIND_OUTPUT)
                .join(subject)
                .join(session);
            let phys = data.join("phys_data").join(subject).join(session);
            let open_source = data
                .join("datasets/data_open_source/Subjects")
                .join(subject_id)
                .join(session)
                .join("001");

            Ok(SessionPaths {
                output: with_stub(output, config.stub_test),
                raw_data: phys.join("raw_data"),
                task_behavior: data
                    .join("datasets/data_nwb_trials")
                    .join(subject)
                    .join(session),
                sync_pulses: data
                    .join("data_processed")
                    .join(subject)
                    .join(session)
                    .join("sync_pulses"),
                spike_sorting: phys.join("spike_sorting"),
                probe_metadata: Some(open_source.join("probes.metadata.json")),
                data_open_source: Some(open_source),
                postprocessed: None,
            })
        }
        Repository::Globus => {
            let base = config.globus_root.join(subject_id).join(session);
            let output = match &config.output_root {
                Some(root) => root.clone(),
                None => dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("conversion_nwb/jazayeri-lab-to-nwb"),
            }
            .join(subject)
            .join(session);

            Ok(SessionPaths {
                output: with_stub(output, config.stub_test),
                raw_data: base.join("raw_data"),
                task_behavior: base.join("processed_task_data"),
                sync_pulses: base.join("sync_pulses"),
                spike_sorting: base.join("spike_sorting"),
                probe_metadata: Some(base.join("data_open_source/probes.metadata.json")),
                data_open_source: Some(base.join("data_open_source")),
                postprocessed: None,
            })
        }
    }
}

pub fn piccato_paths(config: &ConversionConfig, subject: &str, session: &str) -> Result<SessionPaths> {
    require_openmind(config, "piccato")?;
    let base = openmind_root(config, PICCATO_OPENMIND_DATA)
        .join(subject)
        .join(session);

    Ok(SessionPaths {
        output: output_root(config, PICCATO_OPENMIND_OUTPUT)
            .join(PICCATO_DANDISET_ID)
            .join(format!("sub-{}", subject)),
        raw_data: base.join("raw_data"),
        task_behavior: base.join("behavior_task"),
        sync_pulses: base.join("sync_signals"),
        spike_sorting: base.join("spike_sorting"),
        probe_metadata: Some(base.join("phys_metadata.json")),
        data_open_source: None,
        postprocessed: Some(base.join("kilosort2_5_0")),
    })
}

pub fn neupane_paths(config: &ConversionConfig, subject: &str, session: &str) -> Result<SessionPaths> {
    require_openmind(config, "neupane")?;
    let base = openmind_root(config, NEUPANE_OPENMIND_DATA)
        .join(subject)
        .join(session);

    Ok(SessionPaths {
        output: output_root(config, NEUPANE_OPENMIND_OUTPUT).join(format!("sub-{}", subject)),
        raw_data: base.join("raw_data"),
        task_behavior: base.join("behavior"),
        sync_pulses: base.join("sync_pulses"),
        spike_sorting: base.join("spike_sorting"),
        probe_metadata: None,
        data_open_source: None,
        postprocessed: None,
    })
}

/// Ramadan sessions keep every `.mat` file in one folder named after the session
pub fn ramadan_paths(config: &ConversionConfig, session: &str) -> Result<SessionPaths> {
    require_openmind(config, "ramadan")?;
    let base = openmind_root(config, RAMADAN_DATA).join(session);

    Ok(SessionPaths {
        output: output_root(config, RAMADAN_OUTPUT),
        raw_data: base.join("raw_data"),
        task_behavior: base.clone(),
        sync_pulses: base.join("sync_pulses"),
        spike_sorting: base.join("spike_sorting"),
        probe_metadata: None,
        data_open_source: None,
        postprocessed: None,
    })
}

fn require_openmind(config: &ConversionConfig, dataset: &str) -> Result<()> {
    if config.repo == Repository::Openmind {
        Ok(())
    } else {
        Err(ConversionError::InvalidRepository {
            repo: config.repo.as_str().to_string(),
            dataset: dataset.to_string(),
        })
    }
}

/// Output file `sub-{subject}_ses-{session_id}_{suffix}.nwb`
pub fn nwb_file_path(output: &Path, subject: &str, session_id: &str, suffix: &str) -> PathBuf {
    output.join(format!("sub-{}_ses-{}_{}.nwb", subject, session_id, suffix))
}
