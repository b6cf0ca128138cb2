use chrono::{DateTime, FixedOffset};
use clap::{Args, Parser, Subcommand};
use jazlab_nwb::{ConversionConfig, ConversionType, Dataset, Repository, SessionRequest};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "jazlab-nwb",
    version,
    about = "Convert Jazayeri lab sessions to Neurodata Without Borders (NWB)",
    long_about = "Convert Jazayeri lab behavior and electrophysiology sessions to NWB.\n\
                  Data roots come from $JAZLAB_NWB_* variables (a .env file is honoured) \
                  and can be overridden with flags."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Convert one session
    Convert(ConvertArgs),
    /// Convert several sessions in parallel
    Batch(BatchArgs),
    /// Show where a session is read from and written to
    Paths(PathsArgs),
    /// Check the structure of a written file
    Validate(ValidateArgs),
    /// Show datasets, subjects and supported output formats
    Info(InfoArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Data repository: openmind or globus
    #[arg(long, env = "JAZLAB_NWB_REPO")]
    pub repo: Option<String>,

    /// Root replacing the openmind data prefixes
    #[arg(long, env = "JAZLAB_NWB_OPENMIND_ROOT")]
    pub openmind_root: Option<PathBuf>,

    /// Root of the globus mirror
    #[arg(long, env = "JAZLAB_NWB_GLOBUS_ROOT")]
    pub globus_root: Option<PathBuf>,

    /// Directory root NWB files are written under
    #[arg(long, env = "JAZLAB_NWB_OUTPUT_ROOT")]
    pub output_root: Option<PathBuf>,

    /// Only write a preview of the raw data
    #[arg(long, default_value_t = false)]
    pub stub: bool,

    /// Fail instead of replacing existing output files
    #[arg(long, default_value_t = false)]
    pub no_overwrite: bool,

    /// UTC offset in hours for start times derived from session dates
    #[arg(long, allow_negative_numbers = true)]
    pub utc_offset_hours: Option<i32>,
}

impl ConfigArgs {
    /// Environment configuration with the flags applied on top
    pub fn to_config(&self) -> Result<ConversionConfig, String> {
        let mut config = ConversionConfig::from_env().map_err(|e| e.to_string())?;

        if let Some(ref repo) = self.repo {
            config.repo = repo.parse::<Repository>().map_err(|e| e.to_string())?;
        }
        if let Some(ref root) = self.openmind_root {
            config.openmind_root = Some(root.clone());
        }
        if let Some(ref root) = self.globus_root {
            config.globus_root = root.clone();
        }
        if let Some(ref root) = self.output_root {
            config.output_root = Some(root.clone());
        }
        if self.stub {
            config.stub_test = true;
        }
        if self.no_overwrite {
            config.overwrite = false;
        }
        if let Some(hours) = self.utc_offset_hours {
            if !(-12..=14).contains(&hours) {
                return Err(format!("UTC offset out of range: {}", hours));
            }
            config.utc_offset_hours = hours;
        }
        Ok(config)
    }
}

#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Dataset: watters, piccato, neupane or ramadan
    #[arg(long, value_parser = parse_dataset)]
    pub dataset: Dataset,

    /// Subject name (e.g. Perle, elgar, amadeus, Faure)
    #[arg(long)]
    pub subject: String,

    /// Session date, YYYY-MM-DD
    #[arg(long)]
    pub session: String,
}

#[derive(Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Piccato file kind: ecephys, behavior+task or spikes (default: ecephys and behavior+task)
    #[arg(long, value_parser = parse_conversion_type)]
    pub conversion_type: Option<ConversionType>,

    /// Session start time (RFC 3339), instead of the session date
    #[arg(long, value_parser = parse_start_time)]
    pub start_time: Option<DateTime<FixedOffset>>,

    /// Output format: nwb, or json for a layout manifest
    #[arg(long, default_value = "nwb")]
    pub format: String,

    /// Print the written files as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl ConvertArgs {
    pub fn request(&self) -> SessionRequest {
        let mut request = SessionRequest::new(self.session.dataset, &self.session.subject, &self.session.session)
            .with_extension(&self.format);
        request.conversion_type = self.conversion_type;
        request.session_start_time = self.start_time;
        request
    }
}

#[derive(Args)]
pub struct BatchArgs {
    /// JSON file with a list of session requests
    #[arg(long, conflicts_with_all = ["dataset", "sessions"])]
    pub requests: Option<PathBuf>,

    /// Dataset of the sessions listed with --sessions
    #[arg(long, value_parser = parse_dataset, requires = "subject")]
    pub dataset: Option<Dataset>,

    /// Subject of the sessions listed with --sessions
    #[arg(long)]
    pub subject: Option<String>,

    /// Session dates
    #[arg(long, num_args = 1.., requires = "dataset")]
    pub sessions: Option<Vec<String>>,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format for --sessions: nwb, or json for a layout manifest
    #[arg(long, default_value = "nwb")]
    pub format: String,

    /// Worker threads (default: one per core)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print the sessions without converting them
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct PathsArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Written file (.json layout manifest, or .nwb with NWB support)
    #[arg(long)]
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn parse_dataset(s: &str) -> Result<Dataset, String> {
    s.parse::<Dataset>().map_err(|e| e.to_string())
}

pub fn parse_conversion_type(s: &str) -> Result<ConversionType, String> {
    s.parse::<ConversionType>().map_err(|e| e.to_string())
}

pub fn parse_start_time(s: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(s).map_err(|e| format!("Invalid start time '{}': {}", s, e))
}
