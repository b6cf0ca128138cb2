use crate::error::{ConversionError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Find the single entry of `dir` matching `*{pattern}`.
///
/// `pattern` may contain further glob components, e.g. `/*.ap.bin`.
pub fn get_single_file(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.display().to_string());
    let full = format!("{}/*{}", escaped.trim_end_matches('/'), pattern);

    let matches: Vec<PathBuf> = glob::glob(&full)
        .map_err(|e| ConversionError::InvalidData(format!("invalid pattern {}: {}", full, e)))?
        .filter_map(|entry| entry.ok())
        .collect();

    match matches.len() {
        0 => Err(ConversionError::FileNotFound(format!(
            "no {} files found in {}",
            pattern,
            dir.display()
        ))),
        1 => Ok(matches.into_iter().next().unwrap_or_default()),
        _ => Err(ConversionError::MultipleFiles {
            pattern: pattern.to_string(),
            dir: dir.display().to_string(),
        }),
    }
}

/// The SpikeGLX run directory under `spikeglx_root`, ignoring settling runs.
///
/// Returns `None` when the directory holds no run.
pub fn spikeglx_run_dir(spikeglx_root: &Path) -> Result<Option<PathBuf>> {
    if !spikeglx_root.is_dir() {
        return Ok(None);
    }

    let mut runs: Vec<PathBuf> = fs::read_dir(spikeglx_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| !path.to_string_lossy().contains("settling"))
        .collect();
    runs.sort();

    match runs.len() {
        0 => Ok(None),
        1 => Ok(runs.pop()),
        _ => Err(ConversionError::MultipleFiles {
            pattern: "SpikeGLX run".to_string(),
            dir: spikeglx_root.display().to_string(),
        }),
    }
}

/// Paths of the AP and LF binaries of a SpikeGLX run
pub fn spikeglx_streams(run_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let ap = get_single_file(run_dir, "/*.ap.bin")?;
    let lf = get_single_file(run_dir, "/*.lf.bin")?;
    Ok((ap, lf))
}
