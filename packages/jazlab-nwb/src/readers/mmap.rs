use crate::error::{ConversionError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Open a file and map it into memory (read-only)
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)
        .map_err(|_| ConversionError::FileNotFound(path.display().to_string()))?;
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}
