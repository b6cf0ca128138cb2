//! Piccato sessions: one Neuropixels probe recorded with SpikeGLX, behavior,
//! task trials and a manually curated sorting. Each conversion type is its
//! own file.

use super::{sync_dir, write_raw_and_processed, ConversionType, SessionInfo, SessionRequest};
use crate::config::ConversionConfig;
use crate::converter::{align_session, BehaviorKind, ConversionPlan, InterfaceSpec};
use crate::discovery::get_single_file;
use crate::error::{ConversionError, Result};
use crate::interfaces::{InterfaceOptions, TrialsSchema, WriteAs};
use crate::metadata::{lookup_subject, PICCATO_SUBJECTS};
use crate::paths::SessionPaths;
use std::path::PathBuf;

const DESCRIPTION: &str = "Macaque performing a multi-object working memory task with Neuropixels recordings.";

/// Kilosort output of the Neuropixels probe, relative to the spike sorting directory
const SORTER_OUTPUT: &str = "spikeglx/kilosort2_5_0/sorter_output";

pub fn session_id(session: &str, stub_test: bool) -> String {
    if stub_test {
        format!("{}-stub", session)
    } else {
        format!("{}-full", session)
    }
}

/// Kilosort folder both the full and the curated sortings are read from
fn sorter_output(paths: &SessionPaths) -> PathBuf {
    paths.spike_sorting.join(SORTER_OUTPUT)
}

/// AP and LF binaries of the single `*imec0` run
fn spikeglx_files(paths: &SessionPaths) -> Result<(PathBuf, PathBuf)> {
    let run_dir = get_single_file(&paths.raw_data.join("spikeglx"), "imec0")?;
    Ok((
        get_single_file(&run_dir, ".ap.bin")?,
        get_single_file(&run_dir, ".lf.bin")?,
    ))
}

/// Interfaces of one conversion type, as `(key, spec, options)`
pub fn interfaces(
    conversion_type: ConversionType,
    paths: &SessionPaths,
    stub_test: bool,
) -> Result<Vec<(String, InterfaceSpec, InterfaceOptions)>> {
    log::info!("Adding SpikeGLX data");
    let (ap_file, lf_file) = spikeglx_files(paths)?;
    let recording_options = match conversion_type {
        ConversionType::Ecephys => InterfaceOptions::stub(stub_test),
        _ => InterfaceOptions::stub(stub_test).without_electrical_series(),
    };

    let mut specs = vec![
        (
            "RecordingNP".to_string(),
            InterfaceSpec::SpikeGlx { file_path: ap_file },
            recording_options.clone(),
        ),
        (
            "LF".to_string(),
            InterfaceSpec::SpikeGlx { file_path: lf_file },
            recording_options,
        ),
    ];

    match conversion_type {
        ConversionType::Ecephys => {}
        ConversionType::BehaviorTask => {
            log::info!("Adding behavior data");
            let folder = &paths.task_behavior;
            for (key, kind) in [
                ("EyePosition", BehaviorKind::EyePosition),
                ("PupilSize", BehaviorKind::PupilSize),
                ("RewardLine", BehaviorKind::RewardLine),
                ("Audio", BehaviorKind::Audio),
            ] {
                specs.push((key.to_string(), InterfaceSpec::behavior(kind, folder), InterfaceOptions::default()));
            }
            log::info!("Adding trials and display data");
            specs.push((
                "Trials".to_string(),
                InterfaceSpec::Trials {
                    folder: folder.clone(),
                    schema: TrialsSchema::Task,
                },
                InterfaceOptions::default(),
            ));
            specs.push((
                "Display".to_string(),
                InterfaceSpec::Display { folder: folder.clone() },
                InterfaceOptions::default(),
            ));
        }
        ConversionType::Spikes => {
            let sorter = sorter_output(paths);
            if sorter.exists() {
                log::info!("Adding spike sorted data");
                specs.push((
                    "SortingNP".to_string(),
                    InterfaceSpec::Kilosort {
                        folder: sorter.clone(),
                        keep_good_only: false,
                        recording: Some("RecordingNP".to_string()),
                    },
                    InterfaceOptions::stub(stub_test).write_as(WriteAs::Processing),
                ));
            }
            let postprocessed = paths.postprocessed.clone().ok_or_else(|| {
                ConversionError::InvalidData("no postprocessed directory for curated units".to_string())
            })?;
            log::info!("Adding curated sorting from {}", postprocessed.display());
            specs.push((
                "CuratedSortingNP".to_string(),
                InterfaceSpec::CuratedSorting {
                    folder: sorter,
                    postprocessed,
                    recording: Some("RecordingNP".to_string()),
                },
                InterfaceOptions::default(),
            ));
        }
    }
    Ok(specs)
}

fn session_info<'a>(request: &SessionRequest, paths: &'a SessionPaths, stub_test: bool) -> Result<SessionInfo<'a>> {
    Ok(SessionInfo {
        subject: lookup_subject(PICCATO_SUBJECTS, &request.subject)?,
        session_id: session_id(&request.session, stub_test),
        description: DESCRIPTION,
        probe_metadata: paths.probe_metadata.as_deref(),
    })
}

fn convert_one(
    conversion_type: ConversionType,
    request: &SessionRequest,
    config: &ConversionConfig,
    paths: &SessionPaths,
) -> Result<PathBuf> {
    let info = session_info(request, paths, config.stub_test)?;
    let nwb_path = request.output_file(&paths.output, &info.session_id, conversion_type.as_str());
    log::info!("Running {} conversion to {}", conversion_type, nwb_path.display());

    let mut plan = ConversionPlan::new();
    for (key, spec, options) in interfaces(conversion_type, paths, config.stub_test)? {
        plan.add_processed(&key, spec, options);
    }
    let (_, mut converter) = plan.build(sync_dir(paths))?;
    align_session(&mut [&mut converter])?;

    let metadata = info.metadata(&converter, request, config)?;
    converter.run_conversion(&metadata, &nwb_path, config.overwrite)?;
    Ok(nwb_path)
}

pub fn session_to_nwb(request: &SessionRequest, config: &ConversionConfig, paths: &SessionPaths) -> Result<Vec<PathBuf>> {
    if let Some(conversion_type) = request.conversion_type {
        return Ok(vec![convert_one(conversion_type, request, config, paths)?]);
    }

    // Without a type, write the ecephys and behavior+task pair on one session zero
    let info = session_info(request, paths, config.stub_test)?;
    let mut plan = ConversionPlan::new();
    for (key, spec, options) in interfaces(ConversionType::Ecephys, paths, config.stub_test)? {
        plan.add_raw(&key, spec, options);
    }
    for (key, spec, options) in interfaces(ConversionType::BehaviorTask, paths, config.stub_test)? {
        plan.add_processed(&key, spec, options);
    }

    let raw_path = request.output_file(&paths.output, &info.session_id, ConversionType::Ecephys.as_str());
    let processed_path = request.output_file(&paths.output, &info.session_id, ConversionType::BehaviorTask.as_str());
    write_raw_and_processed(&plan, &info, request, config, paths, raw_path, processed_path)
}
