use byteorder::{LittleEndian, WriteBytesExt};
use jazlab_nwb::nwb::LayoutManifest;
use jazlab_nwb::{
    session_to_nwb, ConversionConfig, ConversionError, ConversionType, Dataset, NwbWriter, Repository,
    SessionRequest,
};
use ndarray::Array1;
use ndarray_npy::write_npy;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SUBJECT: &str = "amadeus";
const SESSION: &str = "2019-08-29";
const CHANNELS: usize = 32;
const FRAMES: usize = 300;

/// Lay out a small Neupane session under `root/data/amadeus/2019-08-29`
fn write_neupane_session(root: &Path) -> PathBuf {
    let base = root.join("data").join(SUBJECT).join(SESSION);

    let probe = base.join("raw_data/v_probe_0");
    fs::create_dir_all(&probe).unwrap();
    let mut samples = Vec::with_capacity(FRAMES * CHANNELS * 8);
    for frame in 0..FRAMES {
        for channel in 0..CHANNELS {
            samples
                .write_f64::<LittleEndian>((frame * CHANNELS + channel) as f64 * 1e-6)
                .unwrap();
        }
    }
    fs::write(probe.join("amadeus08292019_a.dat"), samples).unwrap();

    let sorting = base.join("spike_sorting/kilosorted2");
    fs::create_dir_all(&sorting).unwrap();
    fs::write(sorting.join("params.py"), "n_channels_dat = 32\nsample_rate = 30000.0\n").unwrap();
    write_npy(sorting.join("spike_times.npy"), &Array1::from(vec![10u64, 200, 250])).unwrap();
    write_npy(sorting.join("spike_clusters.npy"), &Array1::from(vec![0u32, 1, 1])).unwrap();

    let sync = base.join("sync_pulses/open_ephys");
    fs::create_dir_all(&sync).unwrap();
    fs::write(sync.join("transform"), r#"{"intercept": 100.0, "coef": 1.0}"#).unwrap();
    fs::write(sync.join("recording_start_time"), "0.5\n").unwrap();

    let behavior = base.join("behavior");
    fs::create_dir_all(&behavior).unwrap();
    let files = [
        ("eye_h_calibrated.json", json!({"times": [100.2, 100.3], "values": [0.0, 2.0]})),
        ("eye_v_calibrated.json", json!({"times": [100.2, 100.3], "values": [0.0, -2.0]})),
        ("pupil_size_r.json", json!({"times": [100.2, 100.3], "values": [500.0, 510.0]})),
        ("reward_line.json", json!({"times": [101.0, 101.2], "values": [1, 0]})),
        ("sound.json", json!({"times": [101.0], "values": ["success_sound"]})),
        (
            "trials.json",
            json!([
                {
                    "stim1onttl": 100.4,
                    "gocuettl": 100.9,
                    "succ": 1,
                    "frame_closed_loop_gaze_position": [[0.5, 0.5]],
                    "frame_task_phase": ["fixation"],
                    "frame_display_times": [100.4]
                },
                {
                    "stim1onttl": 101.4,
                    "gocuettl": 101.8,
                    "succ": 0,
                    "frame_closed_loop_gaze_position": [[0.1, 0.2], [0.3, 0.4]],
                    "frame_task_phase": ["fixation", "response"],
                    "frame_display_times": [101.4, 101.6]
                }
            ]),
        ),
    ];
    for (name, value) in files {
        fs::write(behavior.join(name), value.to_string()).unwrap();
    }

    base
}

fn test_config(root: &Path) -> ConversionConfig {
    ConversionConfig {
        openmind_root: Some(root.join("data")),
        output_root: Some(root.join("out")),
        stub_test: true,
        ..ConversionConfig::default()
    }
}

fn request() -> SessionRequest {
    SessionRequest::new(Dataset::Neupane, SUBJECT, SESSION).with_extension("json")
}

fn floats(manifest: &LayoutManifest, path: &str) -> Vec<f64> {
    let node = manifest
        .node(path)
        .unwrap_or_else(|| panic!("missing {}", path));
    match node.values.as_ref() {
        Some(Value::Array(values)) => values.iter().map(|v| v.as_f64().unwrap()).collect(),
        Some(value) => vec![value.as_f64().unwrap()],
        None => panic!("{} has no inline values", path),
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
}

#[test]
fn test_neupane_session_writes_raw_and_processed_files() {
    let dir = TempDir::new().unwrap();
    write_neupane_session(dir.path());
    let config = test_config(dir.path());

    let written = session_to_nwb(&request(), &config).unwrap();
    let output = dir.path().join("out/sub-amadeus");
    assert_eq!(
        written,
        vec![
            output.join("sub-amadeus_ses-2019-08-29-stub_ecephys.json"),
            output.join("sub-amadeus_ses-2019-08-29-stub_behavior+ecephys.json"),
        ]
    );

    let raw = NwbWriter::inspect(&written[0]).unwrap();
    let processed = NwbWriter::inspect(&written[1]).unwrap();
    assert!(raw.validate().is_empty(), "{:?}", raw.validate());
    assert!(processed.validate().is_empty(), "{:?}", processed.validate());

    // Raw file: the stubbed series and the behavior streams
    let series = raw.node("/acquisition/ElectricalSeriesVP0/data").unwrap();
    assert_eq!(series.shape, Some(vec![100, CHANNELS]));
    assert_eq!(series.dtype.as_deref(), Some("float64"));
    assert_eq!(
        raw.children("/processing/behavior"),
        vec![
            "/processing/behavior/audio",
            "/processing/behavior/eye_position",
            "/processing/behavior/pupil_size",
            "/processing/behavior/reward_line",
        ]
    );
    assert_eq!(
        raw.attr_text("/processing/behavior", "description"),
        Some("Contains behavior, audio, and reward data from experiment.")
    );
    assert!(raw.node("/units").is_none());
    assert!(raw.node("/intervals/trials").is_none());

    // Processed file: no series, sorted units, trials and display frames
    assert!(processed.children("/acquisition").is_empty());
    assert!(processed.node("/processing/behavior").is_none());
    assert_eq!(processed.node("/processing/ecephys/units/id").unwrap().len(), Some(2));
    assert_eq!(processed.node("/intervals/trials/id").unwrap().len(), Some(2));
    assert_eq!(processed.node("/intervals/display/id").unwrap().len(), Some(3));

    // Both files share the zero of the earliest eye sample
    let raw_start = floats(&raw, "/acquisition/ElectricalSeriesVP0/starting_time");
    assert_close(raw_start[0], 0.3);
    let eye = floats(&raw, "/processing/behavior/eye_position/timestamps");
    assert_close(eye[0], 0.0);
    let trial_starts = floats(&processed, "/intervals/trials/start_time");
    assert_close(trial_starts[0], 0.2);
    assert_close(trial_starts[1], 1.2);
    let display_starts = floats(&processed, "/intervals/display/start_time");
    assert_close(display_starts[2], 1.4);

    let spikes = floats(&processed, "/processing/ecephys/units/spike_times");
    assert_close(spikes[0], 0.3 + 10.0 / 30000.0);

    // The raw file gets its own identifier
    assert_ne!(floats_or_text(&raw, "/identifier"), floats_or_text(&processed, "/identifier"));
    assert_eq!(
        raw.node("/general/session_id").unwrap().values,
        Some(json!("2019-08-29-stub"))
    );
    assert_eq!(
        raw.node("/general/subject/subject_id").unwrap().values,
        Some(json!("amadeus"))
    );
}

fn floats_or_text(manifest: &LayoutManifest, path: &str) -> Value {
    manifest.node(path).and_then(|n| n.values.clone()).unwrap_or(Value::Null)
}

#[test]
fn test_hand_position_is_added_when_present() {
    let dir = TempDir::new().unwrap();
    let base = write_neupane_session(dir.path());
    fs::write(
        base.join("behavior/hand_position.json"),
        json!({"times": [100.25, 100.35], "values": [[0.1, 0.2], [0.3, 0.4]]}).to_string(),
    )
    .unwrap();

    let written = session_to_nwb(&request(), &test_config(dir.path())).unwrap();
    let raw = NwbWriter::inspect(&written[0]).unwrap();
    assert!(raw.node("/processing/behavior/hand_position").is_some());
}

#[test]
fn test_existing_output_is_kept_without_overwrite() {
    let dir = TempDir::new().unwrap();
    write_neupane_session(dir.path());
    let mut config = test_config(dir.path());
    session_to_nwb(&request(), &config).unwrap();

    config.overwrite = false;
    match session_to_nwb(&request(), &config) {
        Err(ConversionError::OutputExists(path)) => {
            assert!(path.ends_with("sub-amadeus_ses-2019-08-29-stub_behavior+ecephys.json"))
        }
        other => panic!("expected OutputExists, got {:?}", other),
    }
}

#[test]
fn test_session_without_ecephys_or_sync() {
    let dir = TempDir::new().unwrap();
    let base = write_neupane_session(dir.path());
    fs::remove_dir_all(base.join("raw_data")).unwrap();
    fs::remove_dir_all(base.join("sync_pulses")).unwrap();

    let written = session_to_nwb(&request(), &test_config(dir.path())).unwrap();
    let raw = NwbWriter::inspect(&written[0]).unwrap();
    let processed = NwbWriter::inspect(&written[1]).unwrap();
    assert!(raw.children("/acquisition").is_empty());
    assert!(processed.node("/processing/ecephys").is_none());

    // Timestamps stay on the behavioral clock
    let trial_starts = floats(&processed, "/intervals/trials/start_time");
    assert_close(trial_starts[0], 100.4);
}

#[test]
fn test_request_errors() {
    let dir = TempDir::new().unwrap();
    write_neupane_session(dir.path());
    let config = test_config(dir.path());

    let unknown = SessionRequest::new(Dataset::Neupane, "perle", SESSION).with_extension("json");
    assert!(matches!(
        session_to_nwb(&unknown, &config),
        Err(ConversionError::UnknownSubject(name)) if name == "perle"
    ));

    let globus = ConversionConfig {
        repo: Repository::Globus,
        ..config.clone()
    };
    assert!(matches!(
        session_to_nwb(&request(), &globus),
        Err(ConversionError::InvalidRepository { .. })
    ));

    let missing = SessionRequest::new(Dataset::Neupane, SUBJECT, "2019-09-01").with_extension("json");
    assert!(session_to_nwb(&missing, &config).is_err());
}

fn write_kilosort(folder: &Path, times: &[u64], clusters: &[u32]) {
    fs::create_dir_all(folder).unwrap();
    fs::write(folder.join("params.py"), "sample_rate = 30000.\n").unwrap();
    write_npy(folder.join("spike_times.npy"), &Array1::from(times.to_vec())).unwrap();
    write_npy(folder.join("spike_clusters.npy"), &Array1::from(clusters.to_vec())).unwrap();
}

/// Two neural channels and a trailing sync channel of int16 frames
fn write_spikeglx_stream(dir: &Path, stem: &str, lf: bool, frames: usize) {
    fs::create_dir_all(dir).unwrap();
    let (suffix, rate, counts) = if lf { ("lf", 2500, "0,2,1") } else { ("ap", 30000, "2,0,1") };
    let mut bytes = Vec::with_capacity(frames * 6);
    for frame in 0..frames {
        bytes.write_i16::<LittleEndian>(frame as i16).unwrap();
        bytes.write_i16::<LittleEndian>(-(frame as i16)).unwrap();
        bytes.write_i16::<LittleEndian>(0).unwrap();
    }
    fs::write(dir.join(format!("{}.{}.bin", stem, suffix)), bytes).unwrap();
    let meta = format!(
        "imSampRate={}\nnSavedChans=3\nsnsApLfSy={}\nimAiRangeMax=0.6\nimMaxInt=512\nimDatPrb_type=0\n\
         ~imroTbl=(0,2)(0 0 0 500 250 1)(1 1 0 250 125 1)\n",
        rate, counts
    );
    fs::write(dir.join(format!("{}.{}.meta", stem, suffix)), meta).unwrap();
}

fn write_json_files(folder: &Path, files: &[(&str, Value)]) {
    fs::create_dir_all(folder).unwrap();
    for (name, value) in files {
        fs::write(folder.join(name), value.to_string()).unwrap();
    }
}

fn task_record(start: f64) -> Value {
    json!({
        "background_indices": [0],
        "broke_fixation": false,
        "stimulus_object_identities": ["a", "b"],
        "stimulus_object_positions": [[0.25, 0.5], [0.75, 0.5]],
        "stimulus_object_velocities": [[0.0, 0.01], [0.0, -0.01]],
        "stimulus_object_target": [true, false],
        "delay_object_blanks": false,
        "closed_loop_response_position": [0.25, 0.5],
        "closed_loop_response_time": start + 2.5,
        "time_start": start,
        "time_phase_fixation": start + 0.1,
        "time_phase_stimulus": start + 0.6,
        "time_phase_delay": start + 1.6,
        "time_phase_cue": start + 2.1,
        "time_phase_response": start + 2.2,
        "time_phase_reveal": start + 2.8,
        "time_phase_iti": start + 3.0,
        "reward_time": start + 2.9,
        "reward_duration": 0.25,
        "response_position": [0.26, 0.5],
        "response_time": start + 2.45,
        "frame_closed_loop_gaze_position": [[0.5, 0.5]],
        "frame_task_phase": ["fixation"],
        "frame_display_times": [start]
    })
}

/// Lay out a Watters session with a V-Probe, a SpikeGLX run and task trials
fn write_watters_session(root: &Path) {
    let data = root.join("data");
    let phys = data.join("phys_data/Perle/2022-06-01");

    let probe = phys.join("raw_data/v_probe_0");
    fs::create_dir_all(&probe).unwrap();
    let mut samples = Vec::with_capacity(FRAMES * 64 * 2);
    for frame in 0..FRAMES {
        for channel in 0..64 {
            samples.write_i16::<LittleEndian>((frame + channel) as i16).unwrap();
        }
    }
    fs::write(probe.join("raw.dat"), samples).unwrap();

    let run = phys.join("raw_data/spikeglx/run_g0/run_g0_imec0");
    write_spikeglx_stream(&run, "run_g0_t0.imec0", false, FRAMES);
    write_spikeglx_stream(&run, "run_g0_t0.imec0", true, 25);

    let sorting = phys.join("spike_sorting");
    write_kilosort(&sorting.join("v_probe_0/ks_3_output_pre_v6_curated"), &[10, 200, 250], &[0, 1, 1]);
    write_kilosort(&sorting.join("np_0/ks_3_output_v2"), &[30, 90], &[0, 1]);

    let sync = data.join("data_processed/Perle/2022-06-01/sync_pulses");
    fs::create_dir_all(sync.join("open_ephys")).unwrap();
    fs::create_dir_all(sync.join("spikeglx")).unwrap();
    fs::write(sync.join("open_ephys/transform"), r#"{"intercept": 100.0, "coef": 1.0}"#).unwrap();
    fs::write(sync.join("open_ephys/recording_start_time"), "0.5\n").unwrap();
    fs::write(sync.join("spikeglx/transform"), r#"{"intercept": 100.1, "coef": 1.0}"#).unwrap();

    write_json_files(
        &data.join("datasets/data_nwb_trials/Perle/2022-06-01"),
        &[
            ("eye_h_calibrated.json", json!({"times": [100.2, 100.3], "values": [0.0, 2.0]})),
            ("eye_v_calibrated.json", json!({"times": [100.2, 100.3], "values": [0.0, -2.0]})),
            ("pupil_size_r.json", json!({"times": [100.2, 100.3], "values": [500.0, 510.0]})),
            ("reward_line.json", json!({"times": [103.2, 103.45], "values": [1, 0]})),
            ("sound.json", json!({"times": [103.2], "values": ["reward"]})),
            ("trials.json", json!([task_record(100.3), task_record(104.3)])),
        ],
    );
}

fn texts(manifest: &LayoutManifest, path: &str) -> Vec<String> {
    match floats_or_text(manifest, path) {
        Value::Array(values) => values.iter().map(|v| v.as_str().unwrap().to_string()).collect(),
        other => panic!("{} is not a text column: {}", path, other),
    }
}

#[test]
fn test_watters_session_shares_zero_across_clocks() {
    let dir = TempDir::new().unwrap();
    write_watters_session(dir.path());
    let config = test_config(dir.path());

    let request = SessionRequest::new(Dataset::Watters, "Perle", "2022-06-01").with_extension("json");
    let written = session_to_nwb(&request, &config).unwrap();
    let output = dir.path().join("out/Perle/2022-06-01/stub");
    assert_eq!(
        written,
        vec![
            output.join("sub-Perle_ses-2022-06-01-stub_ecephys.json"),
            output.join("sub-Perle_ses-2022-06-01-stub_behavior+ecephys.json"),
        ]
    );

    let raw = NwbWriter::inspect(&written[0]).unwrap();
    let processed = NwbWriter::inspect(&written[1]).unwrap();
    assert!(raw.validate().is_empty(), "{:?}", raw.validate());
    assert!(processed.validate().is_empty(), "{:?}", processed.validate());

    // The SpikeGLX clock starts first; the Open Ephys one 0.4 s later
    for manifest in [&raw, &processed] {
        assert_close(floats(manifest, "/acquisition/ElectricalSeriesAP/starting_time")[0], 0.0);
        assert_close(floats(manifest, "/acquisition/ElectricalSeriesLF/starting_time")[0], 0.0);
    }
    assert_close(floats(&raw, "/acquisition/ElectricalSeriesVP0/starting_time")[0], 0.4);
    assert_eq!(
        raw.node("/acquisition/ElectricalSeriesVP0/data").unwrap().shape,
        Some(vec![100, 64])
    );
    assert!(processed.node("/acquisition/ElectricalSeriesVP0").is_none());

    let eye = floats(&processed, "/processing/behavior/eye_position/timestamps");
    assert_close(eye[0], 0.1);
    let trial_starts = floats(&processed, "/intervals/trials/start_time");
    assert_close(trial_starts[0], 0.2);
    assert_close(trial_starts[1], 4.2);
    let stops = floats(&processed, "/intervals/trials/stop_time");
    assert_close(stops[0], 4.2);
    let rewards = floats(&processed, "/intervals/trials/reward_time");
    assert_close(rewards[1], 7.1);

    // V-Probe units come first, Neuropixels names continue after them
    assert_eq!(
        texts(&processed, "/processing/ecephys/units/unit_name"),
        vec!["0", "1", "2", "3"]
    );
    let spikes = floats(&processed, "/processing/ecephys/units/spike_times");
    assert_close(spikes[0], 0.4 + 10.0 / 30000.0);
    assert_close(spikes[1], 0.4 + 200.0 / 30000.0);
    assert_close(spikes[2], 30.0 / 30000.0);
    assert!(raw.node("/processing/ecephys").is_none());
}

/// Lay out a Piccato session with a curated Kilosort run
fn write_piccato_session(root: &Path, session: &str) {
    let base = root.join("data/elgar").join(session);
    let run = base.join("raw_data/spikeglx/elgar_g0_imec0");
    write_spikeglx_stream(&run, "elgar_g0_t0.imec0", false, FRAMES);
    write_spikeglx_stream(&run, "elgar_g0_t0.imec0", true, 25);

    write_kilosort(
        &base.join("spike_sorting/spikeglx/kilosort2_5_0/sorter_output"),
        &[30, 60, 90, 120],
        &[0, 1, 2, 2],
    );
    write_json_files(
        &base.join("kilosort2_5_0"),
        &[
            ("manual_curation.json", json!({"2": "good", "0": "good"})),
            ("stability.json", json!([[true, false], [true], [0, 1, 1]])),
        ],
    );

    fs::create_dir_all(base.join("sync_signals/spikeglx")).unwrap();
    fs::write(
        base.join("sync_signals/spikeglx/transform"),
        r#"{"intercept": 5.0, "coef": 1.0}"#,
    )
    .unwrap();
    fs::write(
        base.join("phys_metadata.json"),
        json!({"coordinate_system": "AP/ML", "coordinates": [1.25, -2.5], "depth_from_surface": 3.5}).to_string(),
    )
    .unwrap();
}

#[test]
fn test_piccato_spikes_file_keeps_curated_units() {
    let dir = TempDir::new().unwrap();
    write_piccato_session(dir.path(), "2023-11-03");
    let config = test_config(dir.path());

    let request = SessionRequest::new(Dataset::Piccato, "elgar", "2023-11-03")
        .with_conversion_type(ConversionType::Spikes)
        .with_extension("json");
    let written = session_to_nwb(&request, &config).unwrap();
    assert_eq!(
        written,
        vec![dir.path().join("out/000767/sub-elgar/sub-elgar_ses-2023-11-03-stub_spikes.json")]
    );

    let spikes = NwbWriter::inspect(&written[0]).unwrap();
    assert!(spikes.validate().is_empty(), "{:?}", spikes.validate());
    assert!(spikes.children("/acquisition").is_empty());
    assert_eq!(
        floats(&spikes, "/general/extracellular_ephys/Imec/position"),
        vec![1.25, -2.5, 3.5]
    );

    // The curated units keep the names they have in the full sorting
    assert_eq!(
        texts(&spikes, "/processing/ecephys/units/unit_name"),
        vec!["0", "1", "2"]
    );
    assert_eq!(texts(&spikes, "/units/unit_name"), vec!["0", "2"]);
    assert_eq!(
        floats_or_text(&spikes, "/units/stable_trials"),
        json!([true, false, false, true, true])
    );
    assert_eq!(floats_or_text(&spikes, "/units/stable_trials_index"), json!([2, 5]));

    // The SpikeGLX clock is the only one, so its first frame is zero
    let unit_spikes = floats(&spikes, "/units/spike_times");
    assert_close(unit_spikes[0], 30.0 / 30000.0);
}

/// `june_24_g0_good_trials_concat.mat` with units 5 and 9 on trial 1 and
/// unit 5 alone on trial 2, plus the matching binned rates
#[cfg(feature = "nwb-support")]
fn write_ramadan_session(root: &Path) {
    use jazlab_nwb::interfaces::trials::SAVE_ALL_DATA_FIELDS;
    use ndarray::{arr2, Array2};

    let folder = root.join("data/june_24_g0");
    fs::create_dir_all(&folder).unwrap();

    let trial_ids = [1.0, 1.0, 2.0];
    let row_vector = |values: Vec<f64>| Array2::from_shape_vec((values.len(), 1), values).unwrap();
    let file = hdf5::File::create(folder.join("june_24_g0_good_trials_concat.mat")).unwrap();
    let group = file.create_group("save_all_data").unwrap();
    let mut columns: Vec<(&str, Vec<f64>)> = SAVE_ALL_DATA_FIELDS
        .iter()
        .map(|&name| (name, trial_ids.iter().map(|id| id * 10.0).collect()))
        .collect();
    for (name, values) in columns.iter_mut() {
        match *name {
            "trial_indices_all" => *values = trial_ids.to_vec(),
            "geo_present" => *values = vec![2.5, 2.5, 6.0],
            _ => {}
        }
    }
    columns.push(("nrns", vec![5.0, 9.0, 5.0]));
    for (name, values) in columns {
        let data = row_vector(values);
        group
            .new_dataset::<f64>()
            .shape(data.dim())
            .create(name)
            .unwrap()
            .write(&data)
            .unwrap();
    }

    // three rows of two bins, stored column-major
    let rates = arr2(&[[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]);
    let rates_file = hdf5::File::create(folder.join("june_24_g0_whole_trial_FR.mat")).unwrap();
    rates_file
        .new_dataset::<f64>()
        .shape(rates.dim())
        .create("smooth_session")
        .unwrap()
        .write(&rates)
        .unwrap();
}

#[cfg(feature = "nwb-support")]
#[test]
fn test_ramadan_session_writes_trials_and_rates() {
    let dir = TempDir::new().unwrap();
    write_ramadan_session(dir.path());
    let config = ConversionConfig {
        stub_test: false,
        ..test_config(dir.path())
    };

    let request = SessionRequest::new(Dataset::Ramadan, "Faure", "june_24_g0").with_extension("json");
    let written = session_to_nwb(&request, &config).unwrap();
    assert_eq!(written, vec![dir.path().join("out/sub-Faure_ses-june_24_g0_behavior+ecephys.json")]);

    let processed = NwbWriter::inspect(&written[0]).unwrap();
    assert!(processed.validate().is_empty(), "{:?}", processed.validate());
    assert!(processed.node("/general/subject/age").is_none());
    assert_eq!(
        processed.node("/session_start_time").unwrap().values.as_ref().and_then(Value::as_str).map(|s| &s[..16]),
        Some("2024-10-23T14:30")
    );

    assert_eq!(floats(&processed, "/intervals/trials/start_time"), vec![2.5, 6.0]);
    assert_eq!(floats(&processed, "/intervals/trials/stop_time"), vec![6.0, 6.0]);
    assert_eq!(floats(&processed, "/intervals/trials/LR"), vec![10.0, 20.0]);

    let binned = "/processing/ecephys/BinnedAlignedSpikes";
    assert_eq!(floats(&processed, &format!("{}/event_timestamps", binned)), vec![2.5, 6.0]);
    assert_eq!(
        floats_or_text(&processed, &format!("{}/data", binned)),
        json!([[[1.0, 3.0], [5.0, null]], [[2.0, 4.0], [6.0, null]]])
    );
}

#[cfg(not(feature = "nwb-support"))]
#[test]
fn test_ramadan_session_needs_hdf5() {
    let dir = TempDir::new().unwrap();
    let folder = dir.path().join("data/june_24_g0");
    fs::create_dir_all(&folder).unwrap();
    fs::write(folder.join("june_24_g0_good_trials_concat.mat"), b"").unwrap();

    let request = SessionRequest::new(Dataset::Ramadan, "Nielsen", "june_24_g0").with_extension("json");
    assert!(matches!(
        session_to_nwb(&request, &test_config(dir.path())),
        Err(ConversionError::UnsupportedFormat(_))
    ));
}
