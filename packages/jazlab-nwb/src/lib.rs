pub mod config;
pub mod converter;
pub mod datasets;
pub mod discovery;
pub mod error;
pub mod interfaces;
pub mod metadata;
pub mod nwb;
pub mod paths;
pub mod readers;
pub mod sync;
pub mod timebase;

pub use config::{ConfigError, ConversionConfig, Repository};
pub use converter::{ConversionPlan, Converter, InterfaceOptions};
pub use datasets::{session_to_nwb, ConversionType, Dataset, SessionRequest};
pub use error::{ConversionError, Result};
pub use metadata::SessionMetadata;
pub use nwb::{NwbFile, NwbWriter};
pub use paths::SessionPaths;
pub use timebase::Timebase;
