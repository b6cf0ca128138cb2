//! Session level metadata: subjects, devices, electrode groups and the
//! file-level NWB fields.

use crate::error::{ConversionError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

pub const SPECIES: &str = "Macaca mulatta";

/// Registry entry mapping a subject name to its public identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectInfo {
    pub name: &'static str,
    pub id: &'static str,
    pub sex: &'static str,
    pub age: &'static str,
}

pub const WATTERS_SUBJECTS: &[SubjectInfo] = &[
    SubjectInfo { name: "Perle", id: "monkey0", sex: "F", age: "P10Y" },
    SubjectInfo { name: "Elgar", id: "monkey1", sex: "M", age: "P11Y" },
];

pub const PICCATO_SUBJECTS: &[SubjectInfo] = &[
    SubjectInfo { name: "elgar", id: "elgar", sex: "M", age: "P10Y" },
];

pub const NEUPANE_SUBJECTS: &[SubjectInfo] = &[
    SubjectInfo { name: "amadeus", id: "amadeus", sex: "M", age: "P10Y" },
];

/// Sex and age of these subjects are not recorded
pub const RAMADAN_SUBJECTS: &[SubjectInfo] = &[
    SubjectInfo { name: "Faure", id: "Faure", sex: "U", age: "" },
    SubjectInfo { name: "Nielsen", id: "Nielsen", sex: "U", age: "" },
];

pub fn lookup_subject(registry: &'static [SubjectInfo], name: &str) -> Result<&'static SubjectInfo> {
    registry
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| ConversionError::UnknownSubject(name.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NwbFileMetadata {
    pub session_description: String,
    pub identifier: String,
    pub session_start_time: Option<DateTime<FixedOffset>>,
    pub session_id: Option<String>,
    pub institution: String,
    pub lab: String,
    pub experimenter: Vec<String>,
}

impl Default for NwbFileMetadata {
    fn default() -> Self {
        Self {
            session_description: String::new(),
            identifier: new_identifier(),
            session_start_time: None,
            session_id: None,
            institution: "MIT".to_string(),
            lab: "Jazayeri".to_string(),
            experimenter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub subject_id: String,
    pub sex: String,
    pub age: String,
    pub species: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub name: String,
    pub description: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeGroupMetadata {
    pub name: String,
    pub description: String,
    pub location: String,
    pub device: String,
    pub position: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EcephysMetadata {
    pub devices: Vec<DeviceMetadata>,
    pub electrode_groups: Vec<ElectrodeGroupMetadata>,
}

impl EcephysMetadata {
    /// Add a device unless one with the same name is already present
    pub fn add_device(&mut self, device: DeviceMetadata) {
        if !self.devices.iter().any(|d| d.name == device.name) {
            self.devices.push(device);
        }
    }

    pub fn add_electrode_group(&mut self, group: ElectrodeGroupMetadata) {
        if !self.electrode_groups.iter().any(|g| g.name == group.name) {
            self.electrode_groups.push(group);
        }
    }
}

/// Metadata merged from every interface of a converter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub nwbfile: NwbFileMetadata,
    pub subject: Option<SubjectMetadata>,
    pub ecephys: EcephysMetadata,
}

impl SessionMetadata {
    /// Fill in session and subject fields
    pub fn update_session(&mut self, subject: &SubjectInfo, session_id: &str) {
        self.nwbfile.session_id = Some(session_id.to_string());
        self.subject = Some(SubjectMetadata {
            subject_id: subject.name.to_string(),
            sex: subject.sex.to_string(),
            age: subject.age.to_string(),
            species: SPECIES.to_string(),
        });
    }

    /// Replace the identifier with a fresh one, used for the second file of a session
    pub fn regenerate_identifier(&mut self) {
        self.nwbfile.identifier = new_identifier();
    }
}

pub fn new_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Session start: an explicit value wins, otherwise the `YYYY-MM-DD` prefix of
/// the session name at local midnight.
pub fn resolve_start_time(
    explicit: Option<DateTime<FixedOffset>>,
    session: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>> {
    if let Some(start) = explicit {
        return Ok(start);
    }

    let date = session
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .ok_or_else(|| ConversionError::MissingStartTime(session.to_string()))?;

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ConversionError::MissingStartTime(session.to_string()))?;

    offset
        .from_local_datetime(&midnight)
        .single()
        .ok_or_else(|| ConversionError::MissingStartTime(session.to_string()))
}

/// One entry of a probe metadata file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeEntry {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub probe_type: Option<String>,
    #[serde(default)]
    pub coordinate_system: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Value>,
    #[serde(default)]
    pub depth_from_surface: Option<f64>,
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub electrodes_locations: Option<Vec<Vec<f64>>>,
}

/// Probe placement information.
///
/// `probes.metadata.json` holds a list with one entry per probe, while
/// `phys_metadata.json` holds a single object describing the Neuropixels probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeMetadata {
    List(Vec<ProbeEntry>),
    Single(ProbeEntry),
}

impl ProbeMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ConversionError::parse(path, e))?;

        match value {
            Value::Array(_) => serde_json::from_value(value)
                .map(ProbeMetadata::List)
                .map_err(|e| ConversionError::parse(path, e)),
            Value::Object(_) => serde_json::from_value(value)
                .map(ProbeMetadata::Single)
                .map_err(|e| ConversionError::parse(path, e)),
            _ => Err(ConversionError::parse(path, "expected a list or an object")),
        }
    }

    pub fn entry_by_label(&self, label: &str) -> Option<&ProbeEntry> {
        match self {
            ProbeMetadata::List(entries) => {
                entries.iter().find(|e| e.label.as_deref() == Some(label))
            }
            ProbeMetadata::Single(entry) => {
                (entry.label.as_deref() == Some(label)).then_some(entry)
            }
        }
    }

    fn neuropixels(&self) -> Option<&ProbeEntry> {
        match self {
            ProbeMetadata::List(entries) => entries
                .iter()
                .find(|e| e.probe_type.as_deref() == Some("Neuropixels")),
            ProbeMetadata::Single(entry) => Some(entry),
        }
    }

    fn v_probe(&self, index: usize) -> Option<&ProbeEntry> {
        match self {
            ProbeMetadata::List(entries) => entries
                .iter()
                .filter(|e| e.probe_type.as_deref() == Some("V-Probe 64"))
                .nth(index),
            ProbeMetadata::Single(_) => None,
        }
    }

    /// Extend electrode group descriptions and positions with probe placement
    pub fn apply(&self, ecephys: &mut EcephysMetadata) -> Result<()> {
        for group in ecephys.electrode_groups.iter_mut() {
            if group.device == NEUROPIXELS_DEVICE {
                let entry = self.neuropixels().ok_or_else(|| {
                    ConversionError::InvalidData("no Neuropixels entry in probe metadata".into())
                })?;
                self.apply_neuropixels(group, entry)?;
            } else if let Some(index) = group.device.strip_prefix("vprobe") {
                let index: usize = index.parse().map_err(|_| {
                    ConversionError::InvalidData(format!("invalid V-Probe device {}", group.device))
                })?;
                let entry = self.v_probe(index).ok_or_else(|| {
                    ConversionError::InvalidData(format!(
                        "no V-Probe 64 entry {} in probe metadata",
                        index
                    ))
                })?;
                apply_v_probe(group, entry)?;
            }
        }
        Ok(())
    }

    fn apply_neuropixels(&self, group: &mut ElectrodeGroupMetadata, entry: &ProbeEntry) -> Result<()> {
        let mut coordinates = entry
            .coordinates
            .as_ref()
            .map(value_to_floats)
            .transpose()?
            .unwrap_or_default();
        let depth = entry
            .depth_from_surface
            .or(entry.depth)
            .ok_or_else(|| ConversionError::InvalidData("probe depth missing".into()))?;

        if matches!(self, ProbeMetadata::Single(_)) {
            coordinates.truncate(2);
            coordinates.iter_mut().for_each(|c| *c = (*c * 100.0).round() / 100.0);
        }
        if coordinates.len() < 2 {
            return Err(ConversionError::InvalidData(
                "Neuropixels coordinates need at least two values".into(),
            ));
        }

        group.description = format!(
            "{}\n{}\ncoordinates = {}\ndepth_from_surface = {}",
            group.description,
            entry.coordinate_system.as_deref().unwrap_or_default(),
            format_floats(&coordinates),
            depth
        );
        group.position = Some(vec![coordinates[0], coordinates[1], depth]);
        Ok(())
    }
}

pub const NEUROPIXELS_DEVICE: &str = "Neuropixel-Imec";

fn apply_v_probe(group: &mut ElectrodeGroupMetadata, entry: &ProbeEntry) -> Result<()> {
    let coordinates = entry
        .coordinates
        .as_ref()
        .ok_or_else(|| ConversionError::InvalidData("V-Probe coordinates missing".into()))?;
    let first = coordinates
        .get("first_channel")
        .map(value_to_floats)
        .transpose()?
        .ok_or_else(|| ConversionError::InvalidData("first_channel missing".into()))?;
    let last = coordinates
        .get("last_channel")
        .map(value_to_floats)
        .transpose()?
        .ok_or_else(|| ConversionError::InvalidData("last_channel missing".into()))?;

    group.description = format!(
        "{}\n{}\nfirst_channel = {}\nlast_channel = {}",
        group.description,
        entry.coordinate_system.as_deref().unwrap_or_default(),
        format_floats(&first),
        format_floats(&last)
    );
    group.position = Some(first);
    Ok(())
}

fn value_to_floats(value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(|v| vec![v])
            .ok_or_else(|| ConversionError::InvalidData(format!("invalid coordinate {}", n))),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_f64().ok_or_else(|| {
                    ConversionError::InvalidData(format!("invalid coordinate {}", item))
                })
            })
            .collect(),
        other => Err(ConversionError::InvalidData(format!(
            "invalid coordinates {}",
            other
        ))),
    }
}

fn format_floats(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn group(name: &str, device: &str) -> ElectrodeGroupMetadata {
        ElectrodeGroupMetadata {
            name: name.to_string(),
            description: format!("a group representing electrodes on {}", name),
            location: "unknown".to_string(),
            device: device.to_string(),
            position: None,
        }
    }

    #[test]
    fn test_lookup_subject() {
        let perle = lookup_subject(WATTERS_SUBJECTS, "Perle").unwrap();
        assert_eq!(perle.id, "monkey0");
        assert_eq!(perle.sex, "F");

        let err = lookup_subject(WATTERS_SUBJECTS, "elgar").unwrap_err();
        assert!(matches!(err, ConversionError::UnknownSubject(_)));
    }

    #[test]
    fn test_resolve_start_time_from_session_name() {
        let offset = FixedOffset::east_opt(-5 * 3600).unwrap();
        let start = resolve_start_time(None, "2022-06-01", offset).unwrap();
        assert_eq!(start.to_rfc3339(), "2022-06-01T00:00:00-05:00");

        let explicit = offset.with_ymd_and_hms(2022, 6, 1, 9, 30, 0).unwrap();
        assert_eq!(resolve_start_time(Some(explicit), "whatever", offset).unwrap(), explicit);

        assert!(matches!(
            resolve_start_time(None, "session_a", offset),
            Err(ConversionError::MissingStartTime(_))
        ));
    }

    #[test]
    fn test_apply_list_probe_metadata() {
        let file = write_json(
            r#"[
                {"label": "probe01", "probe_type": "V-Probe 64", "coordinate_system": "AP/ML",
                 "coordinates": {"first_channel": [1.0, 2.0, 3.0], "last_channel": [1.0, 2.0, 6.15]}},
                {"label": "probe03", "probe_type": "Neuropixels", "coordinate_system": "AP/ML/DV",
                 "coordinates": [4.5, -1.25], "depth_from_surface": 3.2}
            ]"#,
        );
        let probes = ProbeMetadata::load(file.path()).unwrap();

        let mut ecephys = EcephysMetadata::default();
        ecephys.add_electrode_group(group("vprobe0", "vprobe0"));
        ecephys.add_electrode_group(group("Imec", NEUROPIXELS_DEVICE));
        probes.apply(&mut ecephys).unwrap();

        let vprobe = &ecephys.electrode_groups[0];
        assert_eq!(vprobe.position, Some(vec![1.0, 2.0, 3.0]));
        assert!(vprobe.description.ends_with("first_channel = [1.0, 2.0, 3.0]\nlast_channel = [1.0, 2.0, 6.15]"));

        let imec = &ecephys.electrode_groups[1];
        assert_eq!(imec.position, Some(vec![4.5, -1.25, 3.2]));
        assert!(imec.description.contains("AP/ML/DV\ncoordinates = [4.5, -1.25]\ndepth_from_surface = 3.2"));
    }

    #[test]
    fn test_single_probe_metadata_rounds_coordinates() {
        let file = write_json(
            r#"{"coordinate_system": "stereotaxic", "coordinates": [1.23456, 7.891, 0.5], "depth": 4.0}"#,
        );
        let probes = ProbeMetadata::load(file.path()).unwrap();

        let mut ecephys = EcephysMetadata::default();
        ecephys.add_electrode_group(group("Imec", NEUROPIXELS_DEVICE));
        probes.apply(&mut ecephys).unwrap();

        assert_eq!(ecephys.electrode_groups[0].position, Some(vec![1.23, 7.89, 4.0]));
    }

    #[test]
    fn test_missing_v_probe_entry() {
        let file = write_json(r#"[{"label": "probe01", "probe_type": "V-Probe 64", "coordinates": {}}]"#);
        let probes = ProbeMetadata::load(file.path()).unwrap();

        let mut ecephys = EcephysMetadata::default();
        ecephys.add_electrode_group(group("vprobe1", "vprobe1"));
        assert!(matches!(probes.apply(&mut ecephys), Err(ConversionError::InvalidData(_))));
    }

    #[test]
    fn test_update_session_and_identifier() {
        let mut metadata = SessionMetadata::default();
        let first = metadata.nwbfile.identifier.clone();
        metadata.update_session(&NEUPANE_SUBJECTS[0], "2019-08-29-stub");
        metadata.regenerate_identifier();

        assert_ne!(metadata.nwbfile.identifier, first);
        assert_eq!(metadata.nwbfile.session_id.as_deref(), Some("2019-08-29-stub"));
        let subject = metadata.subject.unwrap();
        assert_eq!(subject.species, SPECIES);
        assert_eq!(subject.subject_id, "amadeus");
    }
}
