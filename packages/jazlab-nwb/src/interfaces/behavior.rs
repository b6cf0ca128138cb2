//! Behavioral streams that are not tied to the trial structure.
//!
//! Eye position, pupil size, reward line, audio and hand position are all
//! recorded on the behavioral clock with explicit timestamps, and all land in
//! the `behavior` processing module.

use super::{DataInterface, InterfaceOptions, BEHAVIOR_DESCRIPTION, BEHAVIOR_MODULE, EVENTS_DESCRIPTION};
use crate::error::{ConversionError, Result};
use crate::nwb::{ColumnData, Container, LabeledEvents, NwbFile, TimeSeries};
use crate::readers::npy::{read_f64_vector, squeeze};
use crate::readers::JsonSeries;
use ndarray::{Array1, Array2, ArrayD, Axis};
use serde_json::Value;
use std::path::Path;

/// Horizontal and vertical eye samples must agree to within this many seconds
const EYE_TIME_TOLERANCE: f64 = 0.0005;

pub const SCREEN_REFERENCE_FRAME: &str = "(0,0) is bottom left corner of screen";
pub const EYE_CONVERSION: f64 = 0.257;
pub const SOUNDS: [&str; 2] = ["failure_sound", "success_sound"];
pub const REWARD_LABELS: [&str; 2] = ["closed", "open"];

fn shift_all(timestamps: &mut [f64], offset: f64) {
    timestamps.iter_mut().for_each(|t| *t += offset);
}

fn require(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConversionError::FileNotFound(path.display().to_string()))
    }
}

fn add_to_behavior(file: &mut NwbFile, description: &str, container: Container) -> Result<()> {
    file.processing_module(BEHAVIOR_MODULE, description).add(container)
}

/// Convert raw eye coordinates (degrees from screen center, ±10) to screen units
fn screen_units(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| 0.5 + v / 20.0).collect()
}

fn times_agree(a: &[f64], b: &[f64]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= EYE_TIME_TOLERANCE + 1e-5 * y.abs())
}

pub struct EyePositionInterface {
    timestamps: Vec<f64>,
    /// `(samples, 2)`: horizontal, vertical
    positions: ArrayD<f64>,
    module_description: String,
}

impl EyePositionInterface {
    /// Load `eye_h_calibrated.json`/`eye_v_calibrated.json`, falling back to
    /// the `eye.{h,v}.{values,times}.npy` layout
    pub fn load(folder: &Path) -> Result<Self> {
        let h_json = folder.join("eye_h_calibrated.json");
        let (h_times, h_values, v_times, v_values) = if h_json.exists() {
            let h: JsonSeries<f64> = JsonSeries::load(&h_json)?;
            let v: JsonSeries<f64> = JsonSeries::load(&folder.join("eye_v_calibrated.json"))?;
            (h.times, h.values, v.times, v.values)
        } else if folder.join("eye.h.values.npy").exists() {
            (
                read_f64_vector(&folder.join("eye.h.times.npy"))?,
                read_f64_vector(&folder.join("eye.h.values.npy"))?,
                read_f64_vector(&folder.join("eye.v.times.npy"))?,
                read_f64_vector(&folder.join("eye.v.values.npy"))?,
            )
        } else {
            return Err(ConversionError::FileNotFound(h_json.display().to_string()));
        };

        if h_times.len() != v_times.len() {
            return Err(ConversionError::InvalidData(format!(
                "{} horizontal eye samples but {} vertical",
                h_times.len(),
                v_times.len()
            )));
        }
        if h_values.len() != h_times.len() || v_values.len() != v_times.len() {
            return Err(ConversionError::InvalidData(
                "eye position values and times differ in length".into(),
            ));
        }
        if !times_agree(&h_times, &v_times) {
            return Err(ConversionError::InvalidData(
                "horizontal and vertical eye timestamps are not sufficiently similar".into(),
            ));
        }

        let h = screen_units(&h_values);
        let v = screen_units(&v_values);
        let positions = Array2::from_shape_fn((h.len(), 2), |(i, axis)| if axis == 0 { h[i] } else { v[i] });

        Ok(Self {
            timestamps: h_times,
            positions: positions.into_dyn(),
            module_description: BEHAVIOR_DESCRIPTION.to_string(),
        })
    }

    pub fn with_module_description(mut self, description: &str) -> Self {
        self.module_description = description.to_string();
        self
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn positions(&self) -> &ArrayD<f64> {
        &self.positions
    }
}

impl DataInterface for EyePositionInterface {
    fn interface_name(&self) -> &str {
        "EyePositionInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    fn shift(&mut self, offset: f64) {
        shift_all(&mut self.timestamps, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        let series = TimeSeries {
            name: "eye_position".to_string(),
            neurodata_type: "SpatialSeries",
            description: "Eye position data recorded by EyeLink camera".to_string(),
            data: self.positions.clone(),
            unit: "meters".to_string(),
            conversion: EYE_CONVERSION,
            reference_frame: Some(SCREEN_REFERENCE_FRAME.to_string()),
            timestamps: self.timestamps.clone(),
            compress: true,
        };
        add_to_behavior(file, &self.module_description, Container::TimeSeries(series))
    }
}

pub struct PupilSizeInterface {
    timestamps: Vec<f64>,
    values: Vec<f64>,
    module_description: String,
}

impl PupilSizeInterface {
    /// Load `pupil_size_r.json`, falling back to `eye.pupil.{values,times}.npy`
    pub fn load(folder: &Path) -> Result<Self> {
        let json = folder.join("pupil_size_r.json");
        let (timestamps, values) = if json.exists() {
            let series: JsonSeries<f64> = JsonSeries::load(&json)?;
            (series.times, series.values)
        } else if folder.join("eye.pupil.values.npy").exists() {
            let times = read_f64_vector(&folder.join("eye.pupil.times.npy"))?;
            let values = read_f64_vector(&folder.join("eye.pupil.values.npy"))?;
            if times.len() != values.len() {
                return Err(ConversionError::InvalidData(format!(
                    "{} pupil timestamps but {} values",
                    times.len(),
                    values.len()
                )));
            }
            (times, values)
        } else {
            return Err(ConversionError::FileNotFound(json.display().to_string()));
        };

        Ok(Self {
            timestamps,
            values,
            module_description: BEHAVIOR_DESCRIPTION.to_string(),
        })
    }

    pub fn with_module_description(mut self, description: &str) -> Self {
        self.module_description = description.to_string();
        self
    }
}

impl DataInterface for PupilSizeInterface {
    fn interface_name(&self) -> &str {
        "PupilSizeInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    fn shift(&mut self, offset: f64) {
        shift_all(&mut self.timestamps, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        let series = TimeSeries {
            name: "pupil_size".to_string(),
            neurodata_type: "TimeSeries",
            description: "Pupil size data recorded by EyeLink camera".to_string(),
            data: Array1::from(self.values.clone()).into_dyn(),
            unit: "pixels".to_string(),
            conversion: 1.0,
            reference_frame: None,
            timestamps: self.timestamps.clone(),
            compress: true,
        };
        add_to_behavior(file, &self.module_description, Container::TimeSeries(series))
    }
}

pub struct RewardLineInterface {
    timestamps: Vec<f64>,
    states: Vec<u8>,
    module_description: String,
}

impl RewardLineInterface {
    /// Load `reward_line.json`; values are 0/1 or booleans
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join("reward_line.json");
        require(&path)?;
        let series: JsonSeries<Value> = JsonSeries::load(&path)?;

        let states = series
            .values
            .iter()
            .map(|value| match value {
                Value::Bool(open) => Ok(u8::from(*open)),
                Value::Number(n) => match n.as_u64() {
                    Some(code) if (code as usize) < REWARD_LABELS.len() => Ok(code as u8),
                    _ => Err(ConversionError::InvalidData(format!(
                        "{}: invalid reward line state {}",
                        path.display(),
                        n
                    ))),
                },
                other => Err(ConversionError::InvalidData(format!(
                    "{}: invalid reward line state {}",
                    path.display(),
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            timestamps: series.times,
            states,
            module_description: EVENTS_DESCRIPTION.to_string(),
        })
    }

    pub fn with_module_description(mut self, description: &str) -> Self {
        self.module_description = description.to_string();
        self
    }
}

impl DataInterface for RewardLineInterface {
    fn interface_name(&self) -> &str {
        "RewardLineInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    fn shift(&mut self, offset: f64) {
        shift_all(&mut self.timestamps, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        let events = LabeledEvents {
            name: "reward_line".to_string(),
            description: "Reward line data representing events of reward dispenser".to_string(),
            timestamps: self.timestamps.clone(),
            data: self.states.clone(),
            labels: REWARD_LABELS.iter().map(|s| s.to_string()).collect(),
        };
        add_to_behavior(file, &self.module_description, Container::LabeledEvents(events))
    }
}

pub struct AudioInterface {
    timestamps: Vec<f64>,
    sound_codes: Vec<u8>,
    module_description: String,
}

impl AudioInterface {
    /// Load `sound.json`, coding each sound by its index in `SOUNDS`
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join("sound.json");
        require(&path)?;
        let series: JsonSeries<String> = JsonSeries::load(&path)?;

        let sound_codes = series
            .values
            .iter()
            .map(|sound| {
                SOUNDS
                    .iter()
                    .position(|s| s == sound)
                    .map(|code| code as u8)
                    .ok_or_else(|| {
                        ConversionError::InvalidData(format!("{}: unknown sound '{}'", path.display(), sound))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            timestamps: series.times,
            sound_codes,
            module_description: EVENTS_DESCRIPTION.to_string(),
        })
    }

    pub fn with_module_description(mut self, description: &str) -> Self {
        self.module_description = description.to_string();
        self
    }
}

impl DataInterface for AudioInterface {
    fn interface_name(&self) -> &str {
        "AudioInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    fn shift(&mut self, offset: f64) {
        shift_all(&mut self.timestamps, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        let events = LabeledEvents {
            name: "audio".to_string(),
            description: "Audio data representing auditory stimuli events".to_string(),
            timestamps: self.timestamps.clone(),
            data: self.sound_codes.clone(),
            labels: SOUNDS.iter().map(|s| s.to_string()).collect(),
        };
        add_to_behavior(file, &self.module_description, Container::LabeledEvents(events))
    }
}

/// Joystick potentiometer voltage
pub struct HandPositionInterface {
    timestamps: Vec<f64>,
    voltages: ArrayD<f64>,
    module_description: String,
}

impl HandPositionInterface {
    /// Load `hand_position.json`; singleton dimensions of the values are dropped
    pub fn load(folder: &Path) -> Result<Self> {
        let path = folder.join("hand_position.json");
        require(&path)?;
        let series: JsonSeries<Value> = JsonSeries::load(&path)?;

        let voltages = match ColumnData::from_json(&series.values) {
            ColumnData::Float(v) => Array1::from(v).into_dyn(),
            ColumnData::Int(v) => Array1::from_iter(v.into_iter().map(|x| x as f64)).into_dyn(),
            ColumnData::Array(a) => a,
            other => {
                return Err(ConversionError::InvalidData(format!(
                    "{}: expected numeric hand positions, got {}",
                    path.display(),
                    other.kind()
                )))
            }
        };
        let mut voltages = squeeze(voltages);
        if voltages.ndim() == 0 {
            voltages = voltages.insert_axis(Axis(0));
        }

        Ok(Self {
            timestamps: series.times,
            voltages,
            module_description: BEHAVIOR_DESCRIPTION.to_string(),
        })
    }

    pub fn with_module_description(mut self, description: &str) -> Self {
        self.module_description = description.to_string();
        self
    }
}

impl DataInterface for HandPositionInterface {
    fn interface_name(&self) -> &str {
        "HandPositionInterface"
    }

    fn first_timestamp(&self) -> Option<f64> {
        self.timestamps.first().copied()
    }

    fn shift(&mut self, offset: f64) {
        shift_all(&mut self.timestamps, offset);
    }

    fn add_to_nwbfile(&self, file: &mut NwbFile, _options: &InterfaceOptions) -> Result<()> {
        let series = TimeSeries {
            name: "hand_position".to_string(),
            neurodata_type: "SpatialSeries",
            description: "Hand position data recorded by joystick potentiometer".to_string(),
            data: self.voltages.clone(),
            unit: "voltage".to_string(),
            conversion: 1.0,
            reference_frame: Some("0 is maximum left deflection, 5 is maximum right deflection".to_string()),
            timestamps: self.timestamps.clone(),
            compress: true,
        };
        add_to_behavior(file, &self.module_description, Container::TimeSeries(series))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwb::tests::test_metadata;
    use ndarray_npy::write_npy;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn behavior(file: &NwbFile, name: &str) -> Container {
        file.module(BEHAVIOR_MODULE).unwrap().get(name).unwrap().clone()
    }

    #[test]
    fn test_eye_position_from_json() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "eye_h_calibrated.json", r#"{"times": [1.0, 2.0], "values": [0.0, 10.0]}"#);
        write(dir.path(), "eye_v_calibrated.json", r#"{"times": [1.0002, 2.0], "values": [-10.0, 2.0]}"#);

        let mut eye = EyePositionInterface::load(dir.path()).unwrap();
        assert_eq!(eye.first_timestamp(), Some(1.0));
        assert_eq!(eye.positions().shape(), &[2, 2]);
        assert!((eye.positions()[[0, 1]] - 0.0).abs() < 1e-12);
        assert!((eye.positions()[[1, 0]] - 1.0).abs() < 1e-12);
        assert!((eye.positions()[[1, 1]] - 0.6).abs() < 1e-12);

        eye.shift(-1.0);
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        eye.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();

        match behavior(&file, "eye_position") {
            Container::TimeSeries(series) => {
                assert_eq!(series.neurodata_type, "SpatialSeries");
                assert_eq!(series.conversion, 0.257);
                assert_eq!(series.timestamps, vec![0.0, 1.0]);
                assert_eq!(series.reference_frame.as_deref(), Some(SCREEN_REFERENCE_FRAME));
            }
            other => panic!("unexpected container {:?}", other),
        }
        assert_eq!(file.module(BEHAVIOR_MODULE).unwrap().description, BEHAVIOR_DESCRIPTION);
    }

    #[test]
    fn test_eye_position_time_mismatch() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "eye_h_calibrated.json", r#"{"times": [1.0, 2.0], "values": [0.0, 1.0]}"#);
        write(dir.path(), "eye_v_calibrated.json", r#"{"times": [1.0, 2.01], "values": [0.0, 1.0]}"#);
        assert!(matches!(
            EyePositionInterface::load(dir.path()),
            Err(ConversionError::InvalidData(_))
        ));

        write(dir.path(), "eye_v_calibrated.json", r#"{"times": [1.0], "values": [0.0]}"#);
        assert!(matches!(
            EyePositionInterface::load(dir.path()),
            Err(ConversionError::InvalidData(_))
        ));
    }

    #[test]
    fn test_eye_position_from_npy() {
        let dir = TempDir::new().unwrap();
        let times = Array1::from(vec![0.5, 1.5, 2.5]);
        write_npy(dir.path().join("eye.h.times.npy"), &times).unwrap();
        write_npy(dir.path().join("eye.v.times.npy"), &times).unwrap();
        write_npy(dir.path().join("eye.h.values.npy"), &Array1::from(vec![-10.0, 0.0, 10.0])).unwrap();
        write_npy(dir.path().join("eye.v.values.npy"), &Array1::from(vec![0.0, 0.0, 0.0])).unwrap();

        let eye = EyePositionInterface::load(dir.path()).unwrap();
        assert_eq!(eye.timestamps(), &[0.5, 1.5, 2.5]);
        assert_eq!(eye.positions()[[0, 0]], 0.0);
        assert_eq!(eye.positions()[[2, 0]], 1.0);
    }

    #[test]
    fn test_missing_eye_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            EyePositionInterface::load(dir.path()),
            Err(ConversionError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_pupil_size() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pupil_size_r.json", r#"{"times": [3.0, 4.0], "values": [812.0, 790.5]}"#);

        let pupil = PupilSizeInterface::load(dir.path()).unwrap();
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        pupil.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();

        match behavior(&file, "pupil_size") {
            Container::TimeSeries(series) => {
                assert_eq!(series.unit, "pixels");
                assert_eq!(series.data.len(), 2);
                assert!(series.reference_frame.is_none());
            }
            other => panic!("unexpected container {:?}", other),
        }
    }

    #[test]
    fn test_reward_line_accepts_bools_and_codes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "reward_line.json", r#"{"times": [1.0, 1.2, 1.4], "values": [true, false, 1]}"#);

        let reward = RewardLineInterface::load(dir.path()).unwrap();
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        reward.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();

        match behavior(&file, "reward_line") {
            Container::LabeledEvents(events) => {
                assert_eq!(events.data, vec![1, 0, 1]);
                assert_eq!(events.labels, vec!["closed", "open"]);
            }
            other => panic!("unexpected container {:?}", other),
        }
        assert_eq!(file.module(BEHAVIOR_MODULE).unwrap().description, EVENTS_DESCRIPTION);

        write(dir.path(), "reward_line.json", r#"{"times": [1.0], "values": [2]}"#);
        assert!(RewardLineInterface::load(dir.path()).is_err());
    }

    #[test]
    fn test_audio_codes() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "sound.json",
            r#"{"times": [5.0, 6.0], "values": ["success_sound", "failure_sound"]}"#,
        );

        let audio = AudioInterface::load(dir.path()).unwrap();
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        audio.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();
        match behavior(&file, "audio") {
            Container::LabeledEvents(events) => assert_eq!(events.data, vec![1, 0]),
            other => panic!("unexpected container {:?}", other),
        }

        write(dir.path(), "sound.json", r#"{"times": [5.0], "values": ["beep"]}"#);
        assert!(matches!(
            AudioInterface::load(dir.path()),
            Err(ConversionError::InvalidData(_))
        ));
    }

    #[test]
    fn test_hand_position_is_squeezed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "hand_position.json", r#"{"times": [0.0, 0.1, 0.2], "values": [[2.5], [2.6], [4.9]]}"#);

        let hand = HandPositionInterface::load(dir.path())
            .unwrap()
            .with_module_description("Contains behavior, audio, and reward data from experiment.");
        let mut file = NwbFile::new(&test_metadata()).unwrap();
        hand.add_to_nwbfile(&mut file, &InterfaceOptions::default()).unwrap();

        match behavior(&file, "hand_position") {
            Container::TimeSeries(series) => {
                assert_eq!(series.data.shape(), &[3]);
                assert_eq!(series.unit, "voltage");
            }
            other => panic!("unexpected container {:?}", other),
        }
        assert_eq!(
            file.module(BEHAVIOR_MODULE).unwrap().description,
            "Contains behavior, audio, and reward data from experiment."
        );
    }
}
