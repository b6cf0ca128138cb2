//! Neupane joystick navigation sessions: one 32-channel V-Probe stored as
//! float64, its Kilosort output, behavior and navigation trials.

use super::{stub_session_id, write_raw_and_processed, SessionInfo, SessionRequest};
use crate::config::ConversionConfig;
use crate::converter::{BehaviorKind, ConversionPlan, InterfaceSpec};
use crate::discovery::get_single_file;
use crate::error::Result;
use crate::interfaces::{InterfaceOptions, TrialsSchema, VProbeConfig, WriteAs};
use crate::metadata::{lookup_subject, NEUPANE_SUBJECTS};
use crate::paths::SessionPaths;
use crate::readers::SampleType;
use std::path::PathBuf;

const DESCRIPTION: &str = "Macaque navigating a visual display with a joystick.";
const MODULE_DESCRIPTION: &str = "Contains behavior, audio, and reward data from experiment.";
const HAND_POSITION_FILE: &str = "hand_position.json";

pub fn v_probe_config() -> VProbeConfig {
    VProbeConfig {
        channel_count: 32,
        sample_type: SampleType::Float64,
        ypitch: 100.0,
        ..VProbeConfig::new(0)
    }
}

fn add_v_probe(plan: &mut ConversionPlan, paths: &SessionPaths, stub_test: bool) -> Result<()> {
    let probe_dir = paths.raw_data.join("v_probe_0");
    if !probe_dir.exists() {
        log::info!("Ecephys data directory {} does not exist", probe_dir.display());
        return Ok(());
    }
    log::info!("Adding V-probe session data");

    let recording = InterfaceSpec::VProbe {
        file_path: get_single_file(&probe_dir, ".dat")?,
        config: v_probe_config(),
    };
    plan.add_raw("RecordingVP0", recording.clone(), InterfaceOptions::stub(stub_test));
    plan.add_processed(
        "RecordingVP0",
        recording,
        InterfaceOptions::stub(stub_test).without_electrical_series(),
    );
    plan.add_processed(
        "SortingVP0",
        InterfaceSpec::Kilosort {
            folder: paths.spike_sorting.join("kilosorted2"),
            keep_good_only: false,
            recording: Some("RecordingVP0".to_string()),
        },
        InterfaceOptions::stub(stub_test).write_as(WriteAs::Processing),
    );
    Ok(())
}

pub fn conversion_plan(paths: &SessionPaths, stub_test: bool) -> Result<ConversionPlan> {
    let mut plan = ConversionPlan::new();
    add_v_probe(&mut plan, paths, stub_test)?;

    log::info!("Adding behavior data");
    let folder = &paths.task_behavior;
    let mut behavior = vec![
        ("EyePosition", BehaviorKind::EyePosition),
        ("PupilSize", BehaviorKind::PupilSize),
        ("RewardLine", BehaviorKind::RewardLine),
        ("Audio", BehaviorKind::Audio),
    ];
    if folder.join(HAND_POSITION_FILE).exists() {
        behavior.push(("HandPosition", BehaviorKind::HandPosition));
    }
    for (key, kind) in behavior {
        plan.add_raw(
            key,
            InterfaceSpec::Behavior {
                kind,
                folder: folder.clone(),
                module_description: Some(MODULE_DESCRIPTION.to_string()),
            },
            InterfaceOptions::default(),
        );
    }

    log::info!("Adding trials and display data");
    plan.add_processed(
        "Trials",
        InterfaceSpec::Trials {
            folder: folder.clone(),
            schema: TrialsSchema::Navigation,
        },
        InterfaceOptions::default(),
    );
    plan.add_processed(
        "Display",
        InterfaceSpec::Display { folder: folder.clone() },
        InterfaceOptions::default(),
    );
    Ok(plan)
}

pub fn session_to_nwb(request: &SessionRequest, config: &ConversionConfig, paths: &SessionPaths) -> Result<Vec<PathBuf>> {
    let subject = lookup_subject(NEUPANE_SUBJECTS, &request.subject)?;
    let session_id = stub_session_id(&request.session, config.stub_test);

    let raw_path = request.output_file(&paths.output, &session_id, "ecephys");
    let processed_path = request.output_file(&paths.output, &session_id, "behavior+ecephys");
    log::info!("raw_nwb_path = {}", raw_path.display());
    log::info!("processed_nwb_path = {}", processed_path.display());

    let plan = conversion_plan(paths, config.stub_test)?;
    let info = SessionInfo {
        subject,
        session_id,
        description: DESCRIPTION,
        probe_metadata: None,
    };
    write_raw_and_processed(&plan, &info, request, config, paths, raw_path, processed_path)
}
