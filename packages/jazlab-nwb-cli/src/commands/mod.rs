pub mod batch;
pub mod convert;
pub mod info;
pub mod paths;
pub mod validate;

use jazlab_nwb::NwbWriter;

/// Reject output formats this build cannot write
pub fn check_format(format: &str) -> Result<(), String> {
    let format = format.trim_start_matches('.').to_lowercase();
    let supported = NwbWriter::supported_extensions();
    if supported.contains(&format.as_str()) {
        Ok(())
    } else if format == "nwb" {
        Err("NWB support not enabled. Rebuild with --features nwb-support, or use --format json".to_string())
    } else {
        Err(format!(
            "Unsupported output format '{}'. Supported: {}",
            format,
            supported.join(", ")
        ))
    }
}
