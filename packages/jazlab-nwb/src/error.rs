use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Multiple {pattern} files found in {dir}")]
    MultipleFiles { pattern: String, dir: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    #[error("Invalid repository '{repo}' for dataset {dataset}")]
    InvalidRepository { repo: String, dataset: String },

    #[error("Session start time was not provided and could not be derived from session '{0}'")]
    MissingStartTime(String),

    #[error("Output file already exists: {0}")]
    OutputExists(PathBuf),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("NWB write failed: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConversionError {
    pub fn parse(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        ConversionError::ParseError {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(feature = "nwb-support")]
impl From<hdf5::Error> for ConversionError {
    fn from(err: hdf5::Error) -> Self {
        ConversionError::WriteError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
