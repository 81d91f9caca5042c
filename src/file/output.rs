//! Atomic memory-mapped output files.
//!
//! [`Output`] writes into a temporary sibling of the target path and only renames it into place
//! on [`Output::finalize`]. An output that is dropped without being finalized deletes its
//! temporary file, so an interrupted or failed save never leaves a partial file at the target.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotmend::file::Output;
//!
//! let mut output = Output::create("Game_obf.dll", 4)?;
//! output.write_at(0, b"MZ\x90\x00")?;
//! output.finalize()?;
//! # Ok::<(), dotmend::Error>(())
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file that supports atomic finalization.
pub struct Output {
    /// The memory mapping of the temporary file
    mmap: MmapMut,

    /// The temporary sibling that receives the writes
    temp_path: PathBuf,

    /// The target path
    target_path: PathBuf,

    /// Whether the file has been finalized
    finalized: bool,
}

impl Output {
    /// Creates a temporary sibling of `target_path` of `size` bytes and maps it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Save`] if the temporary file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();
        let temp_path = temp_sibling(&target_path);
        let save_error = |message: String| Error::Save {
            path: target_path.clone(),
            message,
        };

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| save_error(format!("Failed to create temporary file: {e}")))?;

        if let Err(e) = file.set_len(size) {
            let _ = fs::remove_file(&temp_path);
            return Err(save_error(format!("Failed to set file size: {e}")));
        }

        let mmap = match unsafe { MmapOptions::new().map_mut(&file) } {
            Ok(mmap) => mmap,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(save_error(format!("Failed to create memory mapping: {e}")));
            }
        };

        Ok(Self {
            mmap,
            temp_path,
            target_path,
            finalized: false,
        })
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Save`] if the write would run past the end of the file.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| self.error("Offset exceeds usize"))?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= self.mmap.len())
            .ok_or_else(|| {
                self.error(&format!(
                    "Write of {} bytes at {} exceeds file size {}",
                    data.len(),
                    start,
                    self.mmap.len()
                ))
            })?;

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Gets the total size of the file.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Flushes the mapping and renames the temporary file onto the target path.
    ///
    /// # Errors
    /// Returns [`crate::Error::Save`] if the flush or the rename fails. The temporary file is
    /// removed in that case.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| self.error(&format!("Failed to flush memory mapping: {e}")))?;

        fs::rename(&self.temp_path, &self.target_path)
            .map_err(|e| self.error(&format!("Failed to move output into place: {e}")))?;

        self.finalized = true;
        Ok(())
    }

    /// Gets the target path where the file will be created.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    fn error(&self, message: &str) -> Error {
        Error::Save {
            path: self.target_path.clone(),
            message: message.to_string(),
        }
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// `dir/.name.partial` next to `target`.
fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    target.with_file_name(format!(".{name}.partial"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_finalization() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        let mut output = Output::create(&target_path, 12).unwrap();
        output.write_at(0, b"Test content").unwrap();
        assert!(!target_path.exists());
        output.finalize().unwrap();

        assert_eq!(fs::read(&target_path).unwrap(), b"Test content");
        assert!(!temp_sibling(&target_path).exists());
    }

    #[test]
    fn test_drop_without_finalize_cleans_up() {
        let temp_dir = tempdir().unwrap();
        let target_path = temp_dir.path().join("test.bin");

        {
            let mut output = Output::create(&target_path, 16).unwrap();
            output.write_at(0, b"partial").unwrap();
        }

        assert!(!target_path.exists());
        assert!(!temp_sibling(&target_path).exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_bounds_checking() {
        let temp_dir = tempdir().unwrap();
        let mut output = Output::create(temp_dir.path().join("test.bin"), 4).unwrap();

        assert!(output.write_at(0, b"1234").is_ok());
        assert!(output.write_at(2, b"345").is_err());
        assert!(output.write_at(u64::MAX, b"1").is_err());
        assert_eq!(output.size(), 4);
    }

    #[test]
    fn test_missing_directory_is_save_error() {
        let temp_dir = tempdir().unwrap();
        let target = temp_dir.path().join("missing").join("out.bin");
        assert!(matches!(
            Output::create(&target, 4),
            Err(Error::Save { .. })
        ));
    }
}
