//! Ramadan sessions: trials reduced from the `save_all_data` struct of a
//! MATLAB session file, and optionally the trial-aligned firing rates.
//! Only a processed file is written.

use super::{stub_session_id, sync_dir, SessionInfo, SessionRequest};
use crate::config::ConversionConfig;
use crate::converter::{align_session, ConversionPlan, InterfaceSpec};
use crate::error::{ConversionError, Result};
use crate::interfaces::binned::WHOLE_TRIAL_FR_SUFFIX;
use crate::interfaces::{InterfaceOptions, TrialsSchema};
use crate::metadata::{lookup_subject, resolve_start_time, RAMADAN_SUBJECTS};
use crate::paths::SessionPaths;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use std::path::PathBuf;

const DESCRIPTION: &str = "Macaque reporting the path of a moving geometric stimulus.";

/// Used when the session name carries no date
fn fallback_start(offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let start = NaiveDate::from_ymd_opt(2024, 10, 23)?.and_hms_opt(14, 30, 0)?;
    offset.from_local_datetime(&start).single()
}

/// Explicit start, else the date prefix of the session, else a fixed default
pub fn session_start_time(request: &SessionRequest, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    match resolve_start_time(request.session_start_time, &request.session, offset) {
        Err(ConversionError::MissingStartTime(session)) => {
            log::warn!("Session {} has no date, using the default start time", session);
            fallback_start(offset).ok_or(ConversionError::MissingStartTime(session))
        }
        resolved => resolved,
    }
}

pub fn conversion_plan(paths: &SessionPaths, session: &str) -> ConversionPlan {
    let folder = &paths.task_behavior;
    let mut plan = ConversionPlan::new();

    log::info!("Adding trials data");
    plan.add_processed(
        "Trials",
        InterfaceSpec::Trials {
            folder: folder.clone(),
            schema: TrialsSchema::SaveAllData,
        },
        InterfaceOptions::default(),
    );

    let rates = folder.join(format!("{}{}", session, WHOLE_TRIAL_FR_SUFFIX));
    if rates.exists() {
        log::info!("Adding binned firing rates");
        plan.add_processed(
            "BinnedSpikes",
            InterfaceSpec::BinnedSpikes { folder: folder.clone() },
            InterfaceOptions::default(),
        );
    } else {
        log::info!("No binned firing rates at {}", rates.display());
    }
    plan
}

pub fn session_to_nwb(request: &SessionRequest, config: &ConversionConfig, paths: &SessionPaths) -> Result<Vec<PathBuf>> {
    let info = SessionInfo {
        subject: lookup_subject(RAMADAN_SUBJECTS, &request.subject)?,
        session_id: stub_session_id(&request.session, config.stub_test),
        description: DESCRIPTION,
        probe_metadata: None,
    };
    let processed_path = request.output_file(&paths.output, &info.session_id, "behavior+ecephys");
    log::info!("processed_nwb_path = {}", processed_path.display());

    let (_, mut processed) = conversion_plan(paths, &request.session).build(sync_dir(paths))?;
    align_session(&mut [&mut processed])?;

    let request = SessionRequest {
        session_start_time: Some(session_start_time(request, config.utc_offset())?),
        ..request.clone()
    };
    let metadata = info.metadata(&processed, &request, config)?;
    log::info!("Running processed conversion");
    processed.run_conversion(&metadata, &processed_path, config.overwrite)?;
    Ok(vec![processed_path])
}
