use jazlab_nwb::ConversionError;

pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 1;
pub const EXECUTION_ERROR: i32 = 2;
pub const PARTIAL_FAILURE: i32 = 3;

/// Bad requests and missing inputs are input errors; everything else failed while running
pub fn for_error(err: &ConversionError) -> i32 {
    match err {
        ConversionError::FileNotFound(_)
        | ConversionError::MultipleFiles { .. }
        | ConversionError::ParseError { .. }
        | ConversionError::UnknownSubject(_)
        | ConversionError::InvalidRepository { .. }
        | ConversionError::MissingStartTime(_)
        | ConversionError::UnsupportedFormat(_)
        | ConversionError::OutputExists(_) => INPUT_ERROR,
        _ => EXECUTION_ERROR,
    }
}
