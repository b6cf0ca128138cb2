use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Storage location the raw session data is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repository {
    Openmind,
    Globus,
}

impl Repository {
    pub fn as_str(&self) -> &'static str {
        match self {
            Repository::Openmind => "openmind",
            Repository::Globus => "globus",
        }
    }
}

impl FromStr for Repository {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openmind" => Ok(Repository::Openmind),
            "globus" => Ok(Repository::Globus),
            other => Err(ConfigError::InvalidValue(format!(
                "JAZLAB_NWB_REPO must be 'openmind' or 'globus', got '{}'",
                other
            ))),
        }
    }
}

/// Conversion configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    /// Data repository the session paths are resolved against
    pub repo: Repository,
    /// Root replacing the cluster prefixes of the openmind layouts
    pub openmind_root: Option<PathBuf>,
    /// Root of the globus mirror
    pub globus_root: PathBuf,
    /// Override for the directory NWB files are written to
    pub output_root: Option<PathBuf>,
    /// Only write a small preview of the raw data
    pub stub_test: bool,
    /// Replace existing output files
    pub overwrite: bool,
    /// Offset used when a session start time is derived from the session date
    pub utc_offset_hours: i32,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            repo: Repository::Openmind,
            openmind_root: None,
            globus_root: PathBuf::from("/shared/catalystneuro/JazLab"),
            output_root: None,
            stub_test: false,
            overwrite: true,
            utc_offset_hours: -5,
        }
    }
}

impl ConversionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let repo = match lookup("JAZLAB_NWB_REPO") {
            Some(value) => value.parse()?,
            None => defaults.repo,
        };

        let utc_offset_hours = match lookup("JAZLAB_NWB_UTC_OFFSET_HOURS") {
            Some(value) => value.trim().parse::<i32>().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "JAZLAB_NWB_UTC_OFFSET_HOURS must be an integer, got '{}'",
                    value
                ))
            })?,
            None => defaults.utc_offset_hours,
        };
        if !(-12..=14).contains(&utc_offset_hours) {
            return Err(ConfigError::InvalidValue(format!(
                "JAZLAB_NWB_UTC_OFFSET_HOURS out of range: {}",
                utc_offset_hours
            )));
        }

        Ok(Self {
            repo,
            openmind_root: lookup("JAZLAB_NWB_OPENMIND_ROOT").map(PathBuf::from),
            globus_root: lookup("JAZLAB_NWB_GLOBUS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.globus_root),
            output_root: lookup("JAZLAB_NWB_OUTPUT_ROOT").map(PathBuf::from),
            stub_test: parse_bool_var(&lookup, "JAZLAB_NWB_STUB_TEST", defaults.stub_test)?,
            overwrite: parse_bool_var(&lookup, "JAZLAB_NWB_OVERWRITE", defaults.overwrite)?,
            utc_offset_hours,
        })
    }

    /// Fixed UTC offset for session dates
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_bool_var<F>(lookup: &F, name: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!(
                "{} must be true or false, got '{}'",
                name, value
            ))),
        },
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_repository_from_str() {
        assert_eq!("openmind".parse::<Repository>().unwrap(), Repository::Openmind);
        assert_eq!("Globus".parse::<Repository>().unwrap(), Repository::Globus);
        assert!("dandi".parse::<Repository>().is_err());
    }

    fn config_from(vars: &[(&str, &str)]) -> Result<ConversionConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConversionConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.repo, Repository::Openmind);
        assert_eq!(config.globus_root, PathBuf::from("/shared/catalystneuro/JazLab"));
        assert_eq!(config.utc_offset_hours, -5);
        assert!(config.openmind_root.is_none());
    }

    #[test]
    fn test_from_vars_reads_every_setting() {
        let config = config_from(&[
            ("JAZLAB_NWB_REPO", "Globus"),
            ("JAZLAB_NWB_GLOBUS_ROOT", "/mnt/globus"),
            ("JAZLAB_NWB_OPENMIND_ROOT", "/mnt/om"),
            ("JAZLAB_NWB_OUTPUT_ROOT", "/mnt/out"),
            ("JAZLAB_NWB_STUB_TEST", "yes"),
            ("JAZLAB_NWB_OVERWRITE", "0"),
            ("JAZLAB_NWB_UTC_OFFSET_HOURS", " 14 "),
        ])
        .unwrap();
        assert_eq!(config.repo, Repository::Globus);
        assert_eq!(config.globus_root, PathBuf::from("/mnt/globus"));
        assert_eq!(config.openmind_root, Some(PathBuf::from("/mnt/om")));
        assert_eq!(config.output_root, Some(PathBuf::from("/mnt/out")));
        assert!(config.stub_test);
        assert!(!config.overwrite);
        assert_eq!(config.utc_offset().local_minus_utc(), 14 * 3600);
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        assert!(config_from(&[("JAZLAB_NWB_REPO", "dandi")]).is_err());
        assert!(config_from(&[("JAZLAB_NWB_STUB_TEST", "maybe")]).is_err());
        assert!(config_from(&[("JAZLAB_NWB_UTC_OFFSET_HOURS", "-12")]).is_ok());
        assert!(config_from(&[("JAZLAB_NWB_UTC_OFFSET_HOURS", "-13")]).is_err());
        assert!(config_from(&[("JAZLAB_NWB_UTC_OFFSET_HOURS", "15")]).is_err());

        match config_from(&[("JAZLAB_NWB_UTC_OFFSET_HOURS", "5.5")]) {
            Err(ConfigError::InvalidValue(msg)) => assert!(msg.contains("must be an integer")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ConversionConfig::default();
        assert_eq!(config.repo, Repository::Openmind);
        assert!(config.overwrite);
        assert!(!config.stub_test);
        assert_eq!(config.utc_offset().local_minus_utc(), -5 * 3600);
    }
}
