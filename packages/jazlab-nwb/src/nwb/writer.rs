use super::layout::emit;
use super::sink::{LayoutManifest, LayoutSink};
use super::NwbFile;
use crate::error::{ConversionError, Result};
use std::fs;
use std::path::Path;

/// Output backend for a finished document
pub trait NwbBackend: Send + Sync {
    fn write(&self, file: &NwbFile, output_path: &Path) -> Result<()>;

    fn format_name(&self) -> &str;

    fn default_extension(&self) -> &str;
}

/// Writes the JSON layout manifest instead of an HDF5 file
pub struct LayoutBackend;

impl NwbBackend for LayoutBackend {
    fn write(&self, file: &NwbFile, output_path: &Path) -> Result<()> {
        let mut sink = LayoutSink::new();
        emit(file, &mut sink)?;
        sink.manifest().save(output_path)
    }

    fn format_name(&self) -> &str {
        "NWB layout manifest"
    }

    fn default_extension(&self) -> &str {
        "json"
    }
}

#[cfg(feature = "nwb-support")]
pub struct Hdf5Backend;

#[cfg(feature = "nwb-support")]
impl NwbBackend for Hdf5Backend {
    fn write(&self, file: &NwbFile, output_path: &Path) -> Result<()> {
        let mut sink = super::hdf5_sink::Hdf5Sink::create(output_path)?;
        emit(file, &mut sink)
    }

    fn format_name(&self) -> &str {
        "NWB"
    }

    fn default_extension(&self) -> &str {
        "nwb"
    }
}

/// Factory selecting the backend by output extension
pub struct NwbWriter;

impl NwbWriter {
    pub fn create_writer(path: &Path) -> Result<Box<dyn NwbBackend>> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            #[cfg(feature = "nwb-support")]
            "nwb" => Ok(Box::new(Hdf5Backend)),
            #[cfg(not(feature = "nwb-support"))]
            "nwb" => Err(ConversionError::UnsupportedFormat(
                "NWB support not enabled. Rebuild with --features nwb-support".to_string(),
            )),
            "json" => Ok(Box::new(LayoutBackend)),
            _ => Err(ConversionError::UnsupportedFormat(format!(
                "Unsupported output extension: {}",
                extension
            ))),
        }
    }

    pub fn supported_extensions() -> Vec<&'static str> {
        let mut exts = vec!["json"];
        #[cfg(feature = "nwb-support")]
        exts.push("nwb");
        exts
    }

    /// Read back the layout of a written file
    pub fn inspect(path: &Path) -> Result<LayoutManifest> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match extension.to_lowercase().as_str() {
            "json" => LayoutManifest::load(path),
            #[cfg(feature = "nwb-support")]
            "nwb" => super::hdf5_sink::inspect(path),
            _ => Err(ConversionError::UnsupportedFormat(format!(
                "Cannot inspect .{} files",
                extension
            ))),
        }
    }

    /// Write `file` to `output_path`, replacing an existing file only when `overwrite` is set
    pub fn write_file(file: &NwbFile, output_path: &Path, overwrite: bool) -> Result<()> {
        let writer = Self::create_writer(output_path)?;

        if output_path.exists() {
            if !overwrite {
                return Err(ConversionError::OutputExists(output_path.to_path_buf()));
            }
            fs::remove_file(output_path)?;
        }
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        log::info!("Writing {} to {}", writer.format_name(), output_path.display());
        writer.write(file, output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nwb::tests::test_metadata;
    use tempfile::TempDir;

    #[test]
    fn test_factory_by_extension() {
        assert!(NwbWriter::create_writer(Path::new("out.json")).is_ok());
        assert!(matches!(
            NwbWriter::create_writer(Path::new("out.txt")),
            Err(ConversionError::UnsupportedFormat(_))
        ));
        assert!(NwbWriter::supported_extensions().contains(&"json"));
    }

    #[cfg(not(feature = "nwb-support"))]
    #[test]
    fn test_nwb_requires_feature() {
        match NwbWriter::create_writer(Path::new("out.nwb")) {
            Err(ConversionError::UnsupportedFormat(msg)) => assert!(msg.contains("nwb-support")),
            _ => panic!("expected UnsupportedFormat"),
        }
    }

    #[test]
    fn test_write_file_respects_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub-x").join("session.json");
        let file = NwbFile::new(&test_metadata()).unwrap();

        NwbWriter::write_file(&file, &path, false).unwrap();
        let manifest = NwbWriter::inspect(&path).unwrap();
        assert_eq!(manifest.attr_text("/", "neurodata_type"), Some("NWBFile"));

        assert!(matches!(
            NwbWriter::write_file(&file, &path, false),
            Err(ConversionError::OutputExists(_))
        ));
        NwbWriter::write_file(&file, &path, true).unwrap();
    }
}
