//! Watters multi-prediction sessions: up to two V-Probes, an optional
//! Neuropixels probe recorded with SpikeGLX, behavior and task trials.

use super::{stub_session_id, write_raw_and_processed, SessionInfo, SessionRequest};
use crate::config::ConversionConfig;
use crate::converter::{BehaviorKind, ConversionPlan, InterfaceSpec};
use crate::discovery::{get_single_file, spikeglx_run_dir, spikeglx_streams};
use crate::error::Result;
use crate::interfaces::trials::{has_open_source_trials, TRIALS_FILE};
use crate::interfaces::{InterfaceOptions, TrialsSchema, VProbeConfig, WriteAs};
use crate::metadata::{lookup_subject, WATTERS_SUBJECTS};
use crate::paths::SessionPaths;
use std::path::PathBuf;

const V_PROBE_COUNT: usize = 2;
const DESCRIPTION: &str = "Macaque performing a multi-object working memory task with eye tracking.";

fn add_v_probe(plan: &mut ConversionPlan, paths: &SessionPaths, probe_num: usize, stub_test: bool) -> Result<()> {
    let probe_dir = paths.raw_data.join(format!("v_probe_{}", probe_num));
    if !probe_dir.exists() {
        return Ok(());
    }
    log::info!("Adding V-probe {} session data", probe_num);

    let recording_key = format!("RecordingVP{}", probe_num);
    let recording = InterfaceSpec::VProbe {
        file_path: get_single_file(&probe_dir, ".dat")?,
        config: VProbeConfig {
            probe_metadata: paths.probe_metadata.clone().filter(|p| p.exists()),
            ..VProbeConfig::new(probe_num)
        },
    };
    plan.add_raw(&recording_key, recording.clone(), InterfaceOptions::stub(stub_test));
    plan.add_processed(
        &recording_key,
        recording,
        InterfaceOptions::stub(stub_test).without_electrical_series(),
    );

    plan.add_processed(
        &format!("SortingVP{}", probe_num),
        InterfaceSpec::Kilosort {
            folder: paths
                .spike_sorting
                .join(format!("v_probe_{}", probe_num))
                .join("ks_3_output_pre_v6_curated"),
            keep_good_only: false,
            recording: Some(recording_key),
        },
        InterfaceOptions::stub(stub_test).write_as(WriteAs::Processing),
    );
    Ok(())
}

fn add_spikeglx(plan: &mut ConversionPlan, paths: &SessionPaths, stub_test: bool) -> Result<()> {
    log::info!("Adding SpikeGLX data");
    let run_dir = match spikeglx_run_dir(&paths.raw_data.join("spikeglx"))? {
        Some(dir) => dir,
        None => {
            log::info!("Found no SpikeGLX data");
            return Ok(());
        }
    };
    let (ap_file, lf_file) = spikeglx_streams(&run_dir)?;

    // The processed file keeps both streams with their series, as the raw one does
    for (key, file_path) in [("RecordingNP", ap_file), ("LF", lf_file)] {
        let spec = InterfaceSpec::SpikeGlx { file_path };
        plan.add_raw(key, spec.clone(), InterfaceOptions::stub(stub_test));
        plan.add_processed(key, spec, InterfaceOptions::stub(stub_test));
    }

    plan.add_processed(
        "SortingNP",
        InterfaceSpec::Kilosort {
            folder: paths.spike_sorting.join("np_0").join("ks_3_output_v2"),
            keep_good_only: false,
            recording: Some("RecordingNP".to_string()),
        },
        InterfaceOptions::stub(stub_test).write_as(WriteAs::Processing),
    );
    Ok(())
}

fn add_behavior(plan: &mut ConversionPlan, paths: &SessionPaths) {
    log::info!("Adding behavior data");
    let folder = &paths.task_behavior;
    for (key, kind) in [
        ("EyePosition", BehaviorKind::EyePosition),
        ("PupilSize", BehaviorKind::PupilSize),
        ("RewardLine", BehaviorKind::RewardLine),
        ("Audio", BehaviorKind::Audio),
    ] {
        plan.add_processed(key, InterfaceSpec::behavior(kind, folder), InterfaceOptions::default());
    }

    // Sessions without task-engine trials fall back to the open-source release
    let open_source = paths
        .data_open_source
        .as_deref()
        .filter(|dir| !folder.join(TRIALS_FILE).exists() && has_open_source_trials(dir));
    if let Some(dir) = open_source {
        log::info!("Adding open-source trials from {}", dir.display());
        plan.add_processed(
            "Trials",
            InterfaceSpec::Trials {
                folder: dir.to_path_buf(),
                schema: TrialsSchema::OpenSource,
            },
            InterfaceOptions::default(),
        );
        return;
    }

    log::info!("Adding trials and display data");
    plan.add_processed(
        "Trials",
        InterfaceSpec::Trials {
            folder: folder.clone(),
            schema: TrialsSchema::Task,
        },
        InterfaceOptions::default(),
    );
    plan.add_processed(
        "Display",
        InterfaceSpec::Display {
            folder: folder.clone(),
        },
        InterfaceOptions::default(),
    );
}

pub fn conversion_plan(paths: &SessionPaths, stub_test: bool) -> Result<ConversionPlan> {
    let mut plan = ConversionPlan::new();
    for probe_num in 0..V_PROBE_COUNT {
        add_v_probe(&mut plan, paths, probe_num, stub_test)?;
    }
    add_spikeglx(&mut plan, paths, stub_test)?;
    add_behavior(&mut plan, paths);
    Ok(plan)
}

pub fn session_to_nwb(request: &SessionRequest, config: &ConversionConfig, paths: &SessionPaths) -> Result<Vec<PathBuf>> {
    let subject = lookup_subject(WATTERS_SUBJECTS, &request.subject)?;
    let session_id = stub_session_id(&request.session, config.stub_test);

    let raw_path = request.output_file(&paths.output, &session_id, "ecephys");
    let processed_path = request.output_file(&paths.output, &session_id, "behavior+ecephys");
    log::info!("raw_nwb_path = {}", raw_path.display());
    log::info!("processed_nwb_path = {}", processed_path.display());

    let plan = conversion_plan(paths, config.stub_test)?;
    let probe_metadata = paths.probe_metadata.as_deref().filter(|p| {
        let exists = p.exists();
        if !exists {
            log::warn!("No probe metadata at {}", p.display());
        }
        exists
    });
    let info = SessionInfo {
        subject,
        session_id,
        description: DESCRIPTION,
        probe_metadata,
    };

    write_raw_and_processed(&plan, &info, request, config, paths, raw_path, processed_path)
}
