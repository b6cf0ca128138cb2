/// Session Conversion Entry Points
///
/// Each dataset turns a subject/session pair into a `ConversionPlan` and
/// writes its NWB files:
///
/// - Watters and Neupane: a raw ecephys file and a processed
///   behavior + sorted units file, aligned to one session zero.
/// - Piccato: one file per conversion type (`ecephys`, `behavior+task`,
///   `spikes`).
/// - Ramadan: a processed file of MATLAB trials and binned rates.
use crate::config::ConversionConfig;
use crate::converter::{align_session, ConversionPlan, Converter};
use crate::error::{ConversionError, Result};
use crate::metadata::{
    resolve_start_time, ProbeMetadata, SessionMetadata, SubjectInfo, NEUPANE_SUBJECTS, PICCATO_SUBJECTS,
    RAMADAN_SUBJECTS, WATTERS_SUBJECTS,
};
use crate::paths::SessionPaths;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod neupane;
pub mod piccato;
pub mod ramadan;
pub mod watters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Watters,
    Piccato,
    Neupane,
    Ramadan,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Watters => "watters",
            Dataset::Piccato => "piccato",
            Dataset::Neupane => "neupane",
            Dataset::Ramadan => "ramadan",
        }
    }

    pub fn all() -> [Dataset; 4] {
        [Dataset::Watters, Dataset::Piccato, Dataset::Neupane, Dataset::Ramadan]
    }

    /// Subjects the dataset knows
    pub fn subjects(&self) -> &'static [SubjectInfo] {
        match self {
            Dataset::Watters => WATTERS_SUBJECTS,
            Dataset::Piccato => PICCATO_SUBJECTS,
            Dataset::Neupane => NEUPANE_SUBJECTS,
            Dataset::Ramadan => RAMADAN_SUBJECTS,
        }
    }

    /// Input and output locations of a session
    pub fn session_paths(&self, config: &ConversionConfig, subject: &str, session: &str) -> Result<SessionPaths> {
        match self {
            Dataset::Watters => crate::paths::watters_paths(config, subject, session),
            Dataset::Piccato => crate::paths::piccato_paths(config, subject, session),
            Dataset::Neupane => crate::paths::neupane_paths(config, subject, session),
            Dataset::Ramadan => crate::paths::ramadan_paths(config, session),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "watters" => Ok(Dataset::Watters),
            "piccato" => Ok(Dataset::Piccato),
            "neupane" => Ok(Dataset::Neupane),
            "ramadan" => Ok(Dataset::Ramadan),
            other => Err(ConversionError::InvalidData(format!(
                "unknown dataset '{}' (expected watters, piccato, neupane or ramadan)",
                other
            ))),
        }
    }
}

/// Piccato output file kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionType {
    #[serde(rename = "ecephys")]
    Ecephys,
    #[serde(rename = "behavior+task")]
    BehaviorTask,
    #[serde(rename = "spikes")]
    Spikes,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::Ecephys => "ecephys",
            ConversionType::BehaviorTask => "behavior+task",
            ConversionType::Spikes => "spikes",
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecephys" => Ok(ConversionType::Ecephys),
            "behavior+task" => Ok(ConversionType::BehaviorTask),
            "spikes" => Ok(ConversionType::Spikes),
            other => Err(ConversionError::InvalidData(format!(
                "unknown conversion type '{}' (expected ecephys, behavior+task or spikes)",
                other
            ))),
        }
    }
}

/// One session to convert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub dataset: Dataset,
    pub subject: String,
    pub session: String,
    /// Piccato only; without it the ecephys and behavior+task files are written
    #[serde(default)]
    pub conversion_type: Option<ConversionType>,
    /// Overrides the start time derived from the session date
    #[serde(default)]
    pub session_start_time: Option<DateTime<FixedOffset>>,
    /// Output extension: `nwb`, or `json` for a layout manifest
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "nwb".to_string()
}

impl SessionRequest {
    pub fn new(dataset: Dataset, subject: &str, session: &str) -> Self {
        Self {
            dataset,
            subject: subject.to_string(),
            session: session.to_string(),
            conversion_type: None,
            session_start_time: None,
            extension: default_extension(),
        }
    }

    pub fn with_conversion_type(mut self, conversion_type: ConversionType) -> Self {
        self.conversion_type = Some(conversion_type);
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// `sub-{subject}_ses-{session_id}_{suffix}.{extension}` in `output`
    pub(crate) fn output_file(&self, output: &Path, session_id: &str, suffix: &str) -> PathBuf {
        crate::paths::nwb_file_path(output, &self.subject, session_id, suffix).with_extension(&self.extension)
    }
}

/// Convert one session; returns the written files
pub fn session_to_nwb(request: &SessionRequest, config: &ConversionConfig) -> Result<Vec<PathBuf>> {
    log::info!(
        "Converting {} session {}/{} (stub_test = {}, overwrite = {})",
        request.dataset,
        request.subject,
        request.session,
        config.stub_test,
        config.overwrite
    );

    let paths = request
        .dataset
        .session_paths(config, &request.subject, &request.session)?;
    log::debug!("Session paths: {:?}", paths);

    match request.dataset {
        Dataset::Watters => watters::session_to_nwb(request, config, &paths),
        Dataset::Piccato => piccato::session_to_nwb(request, config, &paths),
        Dataset::Neupane => neupane::session_to_nwb(request, config, &paths),
        Dataset::Ramadan => ramadan::session_to_nwb(request, config, &paths),
    }
}

/// Sync directory of a session, when it exists
pub(crate) fn sync_dir(paths: &SessionPaths) -> Option<&Path> {
    if paths.sync_pulses.is_dir() {
        Some(paths.sync_pulses.as_path())
    } else {
        log::warn!(
            "No sync directory at {}, timestamps stay on their acquisition clocks",
            paths.sync_pulses.display()
        );
        None
    }
}

/// Metadata shared by the files of one session
pub(crate) struct SessionInfo<'a> {
    pub subject: &'a SubjectInfo,
    pub session_id: String,
    pub description: &'static str,
    pub probe_metadata: Option<&'a Path>,
}

impl SessionInfo<'_> {
    /// Merge interface metadata with the session fields
    pub(crate) fn metadata(&self, converter: &Converter, request: &SessionRequest, config: &ConversionConfig) -> Result<SessionMetadata> {
        let mut metadata = converter.metadata()?;
        metadata.update_session(self.subject, &self.session_id);
        metadata.nwbfile.session_description = self.description.to_string();
        metadata.nwbfile.session_start_time = Some(resolve_start_time(
            request.session_start_time,
            &request.session,
            config.utc_offset(),
        )?);
        if let Some(path) = self.probe_metadata {
            ProbeMetadata::load(path)?.apply(&mut metadata.ecephys)?;
        }
        Ok(metadata)
    }
}

/// Write the raw and processed files of a two-file session.
///
/// The processed file's metadata is built first; the raw file reuses it with
/// a fresh identifier.
pub(crate) fn write_raw_and_processed(
    plan: &ConversionPlan,
    info: &SessionInfo<'_>,
    request: &SessionRequest,
    config: &ConversionConfig,
    paths: &SessionPaths,
    raw_path: PathBuf,
    processed_path: PathBuf,
) -> Result<Vec<PathBuf>> {
    let (mut raw, mut processed) = plan.build(sync_dir(paths))?;
    align_session(&mut [&mut raw, &mut processed])?;

    let mut metadata = info.metadata(&processed, request, config)?;

    log::info!("Running processed conversion to {}", processed_path.display());
    processed.run_conversion(&metadata, &processed_path, config.overwrite)?;

    log::info!("Running raw data conversion to {}", raw_path.display());
    metadata.regenerate_identifier();
    raw.run_conversion(&metadata, &raw_path, config.overwrite)?;

    Ok(vec![raw_path, processed_path])
}

pub(crate) fn stub_session_id(session: &str, stub_test: bool) -> String {
    if stub_test {
        format!("{}-stub", session)
    } else {
        session.to_string()
    }
}
