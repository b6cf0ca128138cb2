//! Trial and display-frame tables built from `trials.json`, from the
//! per-field files of the open-source release, or from the `save_all_data`
//! struct of a MATLAB session file.
//!
//! Every event that happens once per trial goes into the `trials` table;
//! per-frame lists are flattened across trials into the `display` table.
//! Both are time-interval tables whose `stop_time` is the next row's
//! `start_time`, unless the layout records when each trial ended.

use super::{DataInterface, InterfaceOptions};
use crate::discovery::get_single_file;
use crate::error::{ConversionError, Result};
use crate::nwb::{Column, ColumnData, DynamicTable, NwbFile};
use crate::readers::json_series::read_json;
use crate::readers::mat::{read_struct_fields, unique_values, MatFields};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io;
use std::path::Path;

pub const TRIALS_FILE: &str = "trials.json";
const NO_DESCRIPTION: &str = "no description";

/// Source key, column name and description of the task-engine trials table
const TASK_COLUMNS: &[(&str, &str, &str)] = &[
    (
        "background_indices",
        "background_indices",
        "For each trial, the indices of the background noise pattern patch.",
    ),
    (
        "broke_fixation",
        "broke_fixation",
        "For each trial, whether the subject broke fixation and the trial was aborted",
    ),
    (
        "stimulus_object_identities",
        "stimulus_object_identities",
        "For each trial, a serialized list with one element for each object. Each element is the \
         identity symbol (e.g. \"a\", \"b\", \"c\", ...) of the corresponding object.",
    ),
    (
        "stimulus_object_positions",
        "stimulus_object_positions",
        "For each trial, a serialized list with one element for each object. Each element is the \
         initial (x, y) position of the corresponding object, in coordinates of arena width.",
    ),
    (
        "stimulus_object_velocities",
        "stimulus_object_velocities",
        "For each trial, a serialized list with one element for each object. Each element is the \
         initial (dx/dt, dy/dt) velocity of the corresponding object, in units of arena width per \
         display update.",
    ),
    (
        "stimulus_object_target",
        "stimulus_object_target",
        "For each trial, a serialized list with one element for each object. Each element is a \
         boolean indicating whether the corresponding object is ultimately the cued target.",
    ),
    (
        "delay_object_blanks",
        "delay_object_blanks",
        "For each trial, a boolean indicating whether the objects were rendered as blank discs \
         during the delay phase.",
    ),
    (
        "closed_loop_response_position",
        "closed_loop_response_position",
        "For each trial, the position of the response saccade used by the closed-loop game engine. \
         This is used for determining reward.",
    ),
    (
        "closed_loop_response_time",
        "closed_loop_response_time",
        "For each trial, the time of the response saccade used by the closed-loop game engine. \
         This is used for the timing of reward delivery.",
    ),
    ("time_start", "start_time", "Start time of each trial."),
    (
        "time_phase_fixation",
        "phase_fixation_time",
        "Time of fixation phase onset for each trial.",
    ),
    (
        "time_phase_stimulus",
        "phase_stimulus_time",
        "Time of stimulus phase onset for each trial.",
    ),
    ("time_phase_delay", "phase_delay_time", "Time of delay phase onset for each trial."),
    ("time_phase_cue", "phase_cue_time", "Time of cue phase onset for each trial."),
    (
        "time_phase_response",
        "phase_response_time",
        "Time of response phase onset for each trial.",
    ),
    ("time_phase_reveal", "phase_reveal_time", "Time of reveal phase onset for each trial."),
    ("time_phase_iti", "phase_iti_time", "Time of inter-trial interval onset for each trial."),
    ("reward_time", "reward_time", "Time of reward delivery onset for each trial."),
    ("reward_duration", "reward_duration", "Reward duration for each trial"),
    (
        "response_position",
        "response_position",
        "Response position for each trial. This differs from closed_loop_response_position in \
         that this is calculated post-hoc from high-resolution eye tracking data, hence is more \
         accurate.",
    ),
    (
        "response_time",
        "response_time",
        "Response time for each trial. This differs from closed_loop_response_time in that this \
         is calculated post-hoc from high-resolution eye tracking data, hence is more accurate.",
    ),
];

/// Columns holding variable-length object lists, stored as JSON text
const SERIALIZED_COLUMNS: &[&str] = &[
    "stimulus_object_identities",
    "stimulus_object_positions",
    "stimulus_object_velocities",
    "stimulus_object_target",
];

/// Position columns whose missing entries become `[NaN, NaN]`
const POSITION_COLUMNS: &[&str] = &["closed_loop_response_position", "response_position"];

const TASK_TIME_COLUMNS: &[&str] = &[
    "closed_loop_response_time",
    "start_time",
    "phase_fixation_time",
    "phase_stimulus_time",
    "phase_delay_time",
    "phase_cue_time",
    "phase_response_time",
    "phase_reveal_time",
    "phase_iti_time",
    "reward_time",
    "response_time",
];

const NAVIGATION_DESCRIPTIONS: &[(&str, &str)] = &[
    ("gocuettl", "Time of go cue."),
    ("joy1offttl", "Time of joystick release"),
    ("joy1onttl", "Time of joystick press"),
    ("stim1onttl", "Time of stimulus onset"),
    ("start_time", "Time of trial start, equal to stimulus onset"),
    ("ta", "Actual vector (seconds)"),
    ("tp", "Produced vector (seconds)"),
    ("curr", "Start landmark"),
    ("target", "Target landmark"),
    ("rt", "Response time = joystick press time - go cue time"),
    ("delay", ".4-1.4s delay for go cue. Drawn from an exponential distribution"),
    (
        "trial_type",
        "1=linear map visible (NTS), 2=centre visible, periphery occluded, 3=fully occluded (MNAV)",
    ),
    ("seqq", "which sequence: 1,2,3 or 4"),
    ("attempt", "# of attempts to perform the trial"),
    ("succ", "binary: successful trial or not"),
    (
        "numrepeat",
        "# of times the same condition was repeated, sometimes implemented to prevent deliberate aborts",
    ),
    (
        "validtrials_mm",
        "binary: trial labeled as valid or lapse based on Gaussian Mixture Model fit to tp distrbutions",
    ),
];

const NAVIGATION_TIME_COLUMNS: &[&str] = &["start_time", "gocuettl", "joy1offttl", "joy1onttl", "stim1onttl"];

/// Trial fields of the open-source release, one JSON list per file
const OS_START_TIMES: &str = "task/trials.start_times.json";
const OS_PHASE_TIMES: &str = "task/trials.relative_phase_times.json";
const OS_OBJECT_BLANKS: &str = "task/trials.object_blanks.json";
const OS_REWARD_DURATION: &str = "task/trials.reward.duration.json";
const OS_REWARD_TIME: &str = "task/trials.reward.time.json";
const OS_STIMULI: &str = "task/trials.stimuli_init.json";
const OS_BROKE_FIXATION: &str = "behavior/trials.broke_fixation.json";
const OS_RESPONSE_ERROR: &str = "behavior/trials.response.error.json";
const OS_RESPONSE_LOCATION: &str = "behavior/trials.response.location.json";
const OS_RESPONSE_OBJECT: &str = "behavior/trials.response.object.json";

/// Phase onsets, in order of `relative_phase_times`
const OS_PHASE_COLUMNS: &[(&str, &str)] = &[
    ("stimulus_time", "Time of stimulus presentation."),
    ("delay_start_time", "Time of the beginning of the delay period."),
    ("cue_time", "Time of cue object presentation."),
    ("response_time", "Time of subject's response."),
    ("reveal_time", "Time of reveal of correct object position."),
];

const OS_OBJECT_IDS: &[(&str, &str)] = &[("a", "Apple"), ("b", "Blueberry"), ("c", "Orange")];

const OS_TIME_COLUMNS: &[&str] = &[
    "start_time",
    "stop_time",
    "stimulus_time",
    "delay_start_time",
    "cue_time",
    "response_time",
    "reveal_time",
    "reward_time",
];

/// Struct variable of the MATLAB session file
const SAVE_ALL_DATA: &str = "save_all_data";

/// File name suffix of the MATLAB session file
pub const GOOD_TRIALS_SUFFIX: &str = "_good_trials_concat.mat";

/// Per-row fields of `save_all_data`, each constant within a trial
pub const SAVE_ALL_DATA_FIELDS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "vel",
    "LR",
    "LR2",
    "trial_answer1",
    "trial_answer2",
    "trial_answer3",
    "trial_answer4",
    "geo_present",
    "fixation_cue_present",
    "fix_start",
    "flash_one",
    "flash_two",
    "flash_three",
    "fixation_off",
    "saccade_init",
    "answer_time",
    "trial_end",
    "geo_type",
    "path_type",
    "rand_geo",
    "trial_fade",
    "trial_indices_all",
];

const SAVE_ALL_DATA_TIME_COLUMNS: &[&str] = &[
    "start_time",
    "geo_present",
    "fixation_cue_present",
    "fix_start",
    "flash_one",
    "flash_two",
    "flash_three",
    "fixation_off",
    "saccade_init",
    "answer_time",
    "trial_end",
];

/// Per-frame lists flattened into the display table
const DISPLAY_COLUMNS: &[(&str, &str, &str)] = &[
    (
        "frame_closed_loop_gaze_position",
        "closed_loop_eye_position",
        "For each frame, the eye position in the close-loop task engine. This was used to for \
         real-time eye position computations, such as saccade detection and reward delivery.",
    ),
    ("frame_task_phase", "task_phase", "The phase of the task for each frame."),
    ("frame_display_times", "start_time", "Time of display update for each frame."),
];

/// Layout of `trials.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialsSchema {
    /// Task-engine records with a fixed key map (Watters, Piccato)
    Task,
    /// Navigation task columns (Neupane)
    Navigation,
    /// Per-field `task/` and `behavior/` files of the open-source Watters release
    #[serde(rename = "open_source")]
    OpenSource,
    /// `save_all_data` struct of a `*_good_trials_concat.mat` file (Ramadan)
    #[serde(rename = "save_all_data")]
    SaveAllData,
}

/// `json.dumps` spacing: `", "` between items and `": "` after keys
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn serialize_value(value: &Value) -> Result<String> {
    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| ConversionError::InvalidData(format!("cannot serialize {}: {}", value, e)))?;
    String::from_utf8(buffer).map_err(|e| ConversionError::InvalidData(e.to_string()))
}

/// Column from JSON cells; all-null cells give a NaN column
fn infer_column(values: &[Value]) -> ColumnData {
    if !values.is_empty() && values.iter().all(Value::is_null) {
        return ColumnData::Float(vec![f64::NAN; values.len()]);
    }
    ColumnData::from_json(values)
}

/// Replace null rows by NaN rows as wide as the other rows
fn fill_missing_rows(values: &mut [Value]) {
    let width = values
        .iter()
        .find_map(|v| v.as_array().map(Vec::len))
        .unwrap_or(2);
    let nan_row = Value::Array(vec![Value::Null; width]);
    values
        .iter_mut()
        .filter(|v| v.is_null())
        .for_each(|v| *v = nan_row.clone());
}

fn load_trials(path: &Path) -> Result<Value> {
    read_json(path)
}

fn as_records<'a>(path: &Path, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| ConversionError::parse(path, "expected a list of trials"))
}

fn record_field<'a>(path: &Path, index: usize, record: &'a Value, key: &str) -> Result<&'a Value> {
    record.get(key).ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} has no '{}'", path.display(), index, key))
    })
}

/// Per-trial values of `key` from record- or column-oriented trials
fn trial_cells(path: &Path, trials: &Value, key: &str) -> Result<Vec<Value>> {
    match trials {
        Value::Object(columns) => columns
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ConversionError::InvalidData(format!("{}: no '{}' column", path.display(), key))),
        _ => as_records(path, trials)?
            .iter()
            .enumerate()
            .map(|(i, record)| record_field(path, i, record, key).cloned())
            .collect(),
    }
}

fn task_table(path: &Path, trials: &Value) -> Result<DynamicTable> {
    let records = as_records(path, trials)?;
    let mut table = DynamicTable::new("trials", "TimeIntervals", "data about each trial");

    for (key, name, description) in TASK_COLUMNS {
        let mut values = records
            .iter()
            .enumerate()
            .map(|(i, record)| record_field(path, i, record, key).cloned())
            .collect::<Result<Vec<_>>>()?;

        let data = if SERIALIZED_COLUMNS.contains(name) {
            ColumnData::Text(values.iter().map(serialize_value).collect::<Result<Vec<_>>>()?)
        } else {
            if POSITION_COLUMNS.contains(name) {
                fill_missing_rows(&mut values);
            }
            infer_column(&values)
        };
        table.add_column(Column::new(name, description, data))?;
    }
    Ok(table)
}

/// Column-oriented (`{"column": [...]}`) or record-oriented trials
fn navigation_columns(path: &Path, trials: &Value) -> Result<Map<String, Value>> {
    match trials {
        Value::Object(columns) => Ok(columns.clone()),
        Value::Array(records) => {
            let mut columns: Map<String, Value> = Map::new();
            for (i, record) in records.iter().enumerate() {
                let fields = record
                    .as_object()
                    .ok_or_else(|| ConversionError::parse(path, format!("trial {} is not an object", i)))?;
                for (key, value) in fields {
                    let column = columns
                        .entry(key.clone())
                        .or_insert_with(|| Value::Array(vec![Value::Null; i]));
                    if let Value::Array(cells) = column {
                        cells.push(value.clone());
                    }
                }
                for column in columns.values_mut() {
                    if let Value::Array(cells) = column {
                        cells.resize(i + 1, Value::Null);
                    }
                }
            }
            Ok(columns)
        }
        _ => Err(ConversionError::parse(path, "expected trial records or columns")),
    }
}

fn navigation_table(path: &Path, trials: &Value) -> Result<DynamicTable> {
    let mut columns = navigation_columns(path, trials)?;
    if !columns.contains_key("start_time") {
        let onset = columns.get("stim1onttl").cloned().ok_or_else(|| {
            ConversionError::InvalidData(format!("{}: trials need start_time or stim1onttl", path.display()))
        })?;
        columns.insert("start_time".to_string(), onset);
    }

    let mut table = DynamicTable::new("trials", "TimeIntervals", "data about each trial");
    let start = columns.remove("start_time").unwrap_or(Value::Null);
    let ordered = std::iter::once(("start_time".to_string(), start)).chain(columns);

    for (name, cells) in ordered {
        let cells = match cells {
            Value::Array(cells) => cells,
            other => vec![other],
        };
        let description = NAVIGATION_DESCRIPTIONS
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, d)| *d)
            .unwrap_or(NO_DESCRIPTION);
        table.add_column(Column::new(&name, description, infer_column(&cells)))?;
    }
    Ok(table)
}

/// One open-source field file, checked to hold one entry per trial
fn open_source_field(folder: &Path, name: &str, trials: usize) -> Result<Vec<Value>> {
    let path = folder.join(name);
    let values: Vec<Value> = read_json(&path)?;
    if values.len() != trials {
        return Err(ConversionError::InvalidData(format!(
            "{}: {} entries for {} trials",
            path.display(),
            values.len(),
            trials
        )));
    }
    Ok(values)
}

/// A number, or NaN for `null`
fn number_or_nan(name: &str, trial: usize, value: &Value) -> Result<f64> {
    match value {
        Value::Null => Ok(f64::NAN),
        other => other.as_f64().ok_or_else(|| {
            ConversionError::InvalidData(format!("{}: trial {} is not a number: {}", name, trial, other))
        }),
    }
}

/// `[x, y]`, or `[NaN, NaN]` for `null` and empty lists
fn location_or_nan(trial: usize, value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::Null => Ok(vec![f64::NAN; 2]),
        Value::Array(cells) if cells.is_empty() => Ok(vec![f64::NAN; 2]),
        Value::Array(cells) => cells
            .iter()
            .map(|cell| number_or_nan(OS_RESPONSE_LOCATION, trial, cell))
            .collect(),
        other => Err(ConversionError::InvalidData(format!(
            "{}: trial {} is not a location: {}",
            OS_RESPONSE_LOCATION, trial, other
        ))),
    }
}

/// Initial state of one stimulus object
#[derive(Debug, Clone, Default)]
struct StimulusObject {
    position: Vec<f64>,
    velocity: Vec<f64>,
}

fn object_number(trial: usize, object: &Value, key: &str) -> Result<f64> {
    object.get(key).and_then(Value::as_f64).ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} object has no numeric '{}'", OS_STIMULI, trial, key))
    })
}

fn object_id(trial: usize, object: &Value) -> Result<&str> {
    object.get("id").and_then(Value::as_str).ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} object has no id", OS_STIMULI, trial))
    })
}

/// Objects of one trial keyed by id, and the id of the target
fn trial_objects(trial: usize, stimuli: &Value) -> Result<([StimulusObject; 3], String)> {
    let objects = stimuli.as_array().ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} is not a list of objects", OS_STIMULI, trial))
    })?;

    let mut slots: [StimulusObject; 3] = Default::default();
    let mut target = None;
    for object in objects {
        let id = object_id(trial, object)?;
        let slot = OS_OBJECT_IDS.iter().position(|(known, _)| *known == id).ok_or_else(|| {
            ConversionError::InvalidData(format!("{}: trial {} has unknown object '{}'", OS_STIMULI, trial, id))
        })?;
        slots[slot] = StimulusObject {
            position: vec![object_number(trial, object, "x")?, object_number(trial, object, "y")?],
            velocity: vec![object_number(trial, object, "x_vel")?, object_number(trial, object, "y_vel")?],
        };
        if object.get("target").and_then(Value::as_bool).unwrap_or(false) {
            target = Some(id.to_string());
        }
    }

    let target = target.ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} has no target object", OS_STIMULI, trial))
    })?;
    Ok((slots, target))
}

/// Id of the object the response landed on, `""` without a response
fn response_object(trial: usize, response: &Value, stimuli: &Value) -> Result<String> {
    let index = match response {
        Value::Null => return Ok(String::new()),
        other => other.as_u64().ok_or_else(|| {
            ConversionError::InvalidData(format!("{}: trial {} is not an object index: {}", OS_RESPONSE_OBJECT, trial, other))
        })?,
    };
    let object = stimuli.get(index as usize).ok_or_else(|| {
        ConversionError::InvalidData(format!("{}: trial {} has no object {}", OS_STIMULI, trial, index))
    })?;
    object_id(trial, object).map(str::to_string)
}

fn open_source_table(folder: &Path) -> Result<DynamicTable> {
    let starts_path = folder.join(OS_START_TIMES);
    let starts: Vec<f64> = read_json(&starts_path)?;
    let trials = starts.len();

    let phase_times = open_source_field(folder, OS_PHASE_TIMES, trials)?;
    let stimuli = open_source_field(folder, OS_STIMULI, trials)?;
    let response_objects = open_source_field(folder, OS_RESPONSE_OBJECT, trials)?;
    let response_errors = open_source_field(folder, OS_RESPONSE_ERROR, trials)?;
    let response_locations = open_source_field(folder, OS_RESPONSE_LOCATION, trials)?;
    let reward_durations = open_source_field(folder, OS_REWARD_DURATION, trials)?;
    let reward_times = open_source_field(folder, OS_REWARD_TIME, trials)?;

    let mut stops = Vec::with_capacity(trials);
    let mut phases = vec![Vec::with_capacity(trials); OS_PHASE_COLUMNS.len()];
    for (i, (start, relative)) in starts.iter().zip(&phase_times).enumerate() {
        let relative = relative
            .as_array()
            .map(|cells| cells.iter().map(|c| number_or_nan(OS_PHASE_TIMES, i, c)).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();
        let last = relative.last().ok_or_else(|| {
            ConversionError::InvalidData(format!("{}: trial {} has no phase times", OS_PHASE_TIMES, i))
        })?;
        stops.push(start + last);
        for (column, onsets) in phases.iter_mut().enumerate() {
            onsets.push(start + relative.get(column).copied().unwrap_or(f64::NAN));
        }
    }

    let mut targets = Vec::with_capacity(trials);
    let mut responses = Vec::with_capacity(trials);
    let mut objects: Vec<[StimulusObject; 3]> = Vec::with_capacity(trials);
    for (i, trial_stimuli) in stimuli.iter().enumerate() {
        let (slots, target) = trial_objects(i, trial_stimuli)?;
        objects.push(slots);
        targets.push(target);
        responses.push(response_object(i, &response_objects[i], trial_stimuli)?);
    }

    let numbers = |name: &str, values: &[Value]| -> Result<Vec<f64>> {
        values.iter().enumerate().map(|(i, v)| number_or_nan(name, i, v)).collect()
    };
    let reward_time: Vec<f64> = numbers(OS_REWARD_TIME, &reward_times)?
        .iter()
        .zip(&starts)
        .map(|(relative, start)| start + relative)
        .collect();

    let mut table = DynamicTable::new("trials", "TimeIntervals", "data about each trial");
    table.add_column(Column::new("start_time", "Start time of each trial.", ColumnData::Float(starts.clone())))?;
    table.add_column(Column::new("stop_time", "Stop time of each trial.", ColumnData::Float(stops)))?;
    table.add_column(Column::new(
        "broke_fixation",
        "Whether the subject broke fixation before the response period.",
        infer_column(&open_source_field(folder, OS_BROKE_FIXATION, trials)?),
    ))?;
    table.add_column(Column::new(
        "response_error",
        "Euclidean distance between subject's response fixation position and the true target object's \
         position, in units of display sidelength.",
        ColumnData::Float(numbers(OS_RESPONSE_ERROR, &response_errors)?),
    ))?;
    let locations = response_locations
        .iter()
        .enumerate()
        .map(|(i, v)| location_or_nan(i, v).map(Value::from))
        .collect::<Result<Vec<_>>>()?;
    table.add_column(Column::new(
        "response_location",
        "Position of the subject's response fixation, in units of display sidelength, with (0,0) being \
         the bottom left corner of the display.",
        ColumnData::from_json(&locations),
    ))?;
    table.add_column(Column::new(
        "response_object",
        "The ID of the stimulus object nearest to the subject's response, one of 'a' for Apple, 'b' for \
         Blueberry, or 'c' for Orange. If the trial ended prematurely, the field is left blank.",
        ColumnData::Text(responses),
    ))?;
    table.add_column(Column::new(
        "object_blank",
        "Whether the object locations were visible in the delay phase as blank disks.",
        infer_column(&open_source_field(folder, OS_OBJECT_BLANKS, trials)?),
    ))?;
    for ((name, description), onsets) in OS_PHASE_COLUMNS.iter().zip(phases) {
        table.add_column(Column::new(name, description, ColumnData::Float(onsets)))?;
    }
    table.add_column(Column::new(
        "reward_duration",
        "Duration of juice reward, in seconds.",
        ColumnData::Float(numbers(OS_REWARD_DURATION, &reward_durations)?),
    ))?;
    table.add_column(Column::new("reward_time", "Time of reward delivery.", ColumnData::Float(reward_time)))?;
    table.add_column(Column::new(
        "target_object",
        "ID of the stimulus object that is the target object, one of 'a' for Apple, 'b' for Blueberry, \
         or 'c' for Orange.",
        ColumnData::Text(targets),
    ))?;

    for (slot, (id, fruit)) in OS_OBJECT_IDS.iter().enumerate() {
        let positions = objects.iter().map(|o| o[slot].position.clone()).collect();
        let velocities = objects.iter().map(|o| o[slot].velocity.clone()).collect();
        table.add_column(Column::new(
            &format!("object_{}_position", id),
            &format!(
                "Position of stimulus object '{}', or {}. Values are (x,y) coordinates in units of screen \
                 sidelength, with (0,0) being the bottom left corner. If the object is not presented in a \
                 particular trial, the position is empty.",
                id, fruit
            ),
            ColumnData::ragged(positions),
        ))?;
        table.add_column(Column::new(
            &format!("object_{}_velocity", id),
            &format!(
                "Velocity of stimulus object '{}', or {}. Values are (x,y) velocity vectors, in units of \
                 screen sidelength per simulation timestep. If the object is not presented in a particular \
                 trial, the velocity is empty.",
                id, fruit
            ),
            ColumnData::ragged(velocities),
        ))?;
    }
    Ok(table)
}

/// Value of `field` shared by every row of each trial in `trials`
pub(crate) fn per_trial_values(field: &str, values: &[f64], trial_ids: &[f64], trials: &[f64]) -> Result<Vec<f64>> {
    if values.len() != trial_ids.len() {
        return Err(ConversionError::InvalidData(format!(
            "{}: {} rows but {} trial indices",
            field,
            values.len(),
            trial_ids.len()
        )));
    }
    trials
        .iter()
        .map(|trial| {
            let cells: Vec<f64> = values
                .iter()
                .zip(trial_ids)
                .filter(|(_, id)| *id == trial)
                .map(|(value, _)| *value)
                .collect();
            match unique_values(&cells).as_slice() {
                [value] => Ok(*value),
                found => Err(ConversionError::InvalidData(format!(
                    "{} unique values of '{}' found for trial {}",
                    found.len(),
                    field,
                    trial
                ))),
            }
        })
        .collect()
}

/// One row per distinct `trial_indices_all`, in ascending order; trials start
/// at `geo_present`
pub fn save_all_data_table(fields: &MatFields) -> Result<DynamicTable> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| ConversionError::InvalidData(format!("{} has no field '{}'", SAVE_ALL_DATA, name)))
    };
    let trial_ids = field("trial_indices_all")?;
    let trials = unique_values(trial_ids);

    let mut table = DynamicTable::new("trials", "TimeIntervals", "data about each trial");
    let geo_present = per_trial_values("geo_present", field("geo_present")?, trial_ids, &trials)?;
    table.add_column(Column::new(
        "start_time",
        "Time of trial start, equal to geo_present",
        ColumnData::Float(geo_present),
    ))?;
    for name in SAVE_ALL_DATA_FIELDS {
        let values = per_trial_values(name, field(name)?, trial_ids, &trials)?;
        table.add_column(Column::new(name, NO_DESCRIPTION, ColumnData::Float(values)))?;
    }
    log::debug!("Reduced {} rows of {} to {} trials", trial_ids.len(), SAVE_ALL_DATA, trials.len());
    Ok(table)
}

fn mat_trials_table(folder: &Path) -> Result<DynamicTable> {
    let path = get_single_file(folder, GOOD_TRIALS_SUFFIX)?;
    log::info!("Reading trials from {}", path.display());
    save_all_data_table(&read_struct_fields(&path, SAVE_ALL_DATA, SAVE_ALL_DATA_FIELDS)?)
}

/// Whether `folder` holds the open-source trial files
pub fn has_open_source_trials(folder: &Path) -> bool {
    folder.join(OS_START_TIMES).is_file()
}

fn shift_columns(table: &mut DynamicTable, names: &[&str], offset: f64) {
    for name in names {
        if let Some(column) = table.column_mut(name) {
            column.data.shift(offset);
        }
    }
}

fn first_start(table: &DynamicTable) -> Option<f64> {
    table
        .column("start_time")
        .and_then(|c| c.data.as_floats())
        .and_then(|starts| starts.into_iter().find(|t| !t.is_nan()))
}

fn add_intervals(file: &mut NwbFile, table: &DynamicTable) -> Result<()> {
    let mut table = table.clone();
    table.fill_stop_times()?;
    log::debug!("Adding {} rows to /intervals/{}", table.num_rows(), table.name);
    file.add_time_intervals(table)
}

pub struct TrialsInterface {
    schema: TrialsSchema,
    table: DynamicTable,
}

impl TrialsInterface {
    /// Load the trials of `folder` in the layout `schema` names
    pub fn load(folder: &Path, schema: TrialsSchema) -> Result<Self> {
        let path = folder.join(TRIALS_FILE);
        let table = match schema {
            TrialsSchema::Task => task_table(&path, &load_trials(&path)?)?,
            TrialsSchema::Navigation => navigation_table(&path, &load_trials(&path)?)?,
            TrialsSchema::OpenSource => open_source_table(folder)?,
            TrialsSchema::SaveAllData => mat_trials_table(folder)?,
        };
        Ok(Self { schema, table })
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }

    fn time_columns(&self) -> &'static [&'static str] {
        match self.schema {
            TrialsSchema::Task => TASK_TIME_COLUMNS,
            TrialsSchema::Navigation => NAVIGATION_TIME_COLUMNS,
            TrialsSchema::OpenSource => OS_TIME_COLUMNS,
            TrialsSchema::SaveAllData => SAVE_ALL_DATA_TIME_COLUMNS,
        }
    }
}

impl DataInterface for TrialsInterface {
    fn interface_name(&self) -> &str {
        "TrialsInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        first_start(&self.table)
    }

    fn shift(&mut self, offset: f64) {
        let columns = self.time_columns();
        shift_columns(&mut self.table, columns, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        add_intervals(file, &self.table)
    }
}

pub struct DisplayInterface {
    table: DynamicTable,
}

impl DisplayInterface {
    /// Flatten the per-frame lists of every trial in `folder/trials.json`
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join(TRIALS_FILE);
        let trials = load_trials(&path)?;

        let mut table = DynamicTable::new("display", "TimeIntervals", "data about each displayed frame");
        for (key, name, description) in DISPLAY_COLUMNS {
            let mut frames = Vec::new();
            for (i, cell) in trial_cells(&path, &trials, key)?.iter().enumerate() {
                match cell {
                    Value::Array(values) => frames.extend(values.iter().cloned()),
                    other => {
                        return Err(ConversionError::InvalidData(format!(
                            "{}: trial {} '{}' is not a list: {}",
                            path.display(),
                            i,
                            key,
                            other
                        )))
                    }
                }
            }
            if *name == "closed_loop_eye_position" {
                fill_missing_rows(&mut frames);
            }
            table.add_column(Column::new(name, description, infer_column(&frames)))?;
        }

        Ok(Self { table })
    }

    pub fn table(&self) -> &DynamicTable {
        &self.table
    }
}

impl DataInterface for DisplayInterface {
    fn interface_name(&self) -> &str {
        "DisplayInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        first_start(&self.table)
    }

    fn shift(&mut self, offset: f64) {
        shift_columns(&mut self.table, &["start_time"], offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        add_intervals(file, &self.table)
    }
}
