//! Physical file backend for memory-mapped input.
//!
//! [`Physical`] maps an input file into the process's address space so a format can parse it
//! straight from the mapping without reading it into an owned buffer first.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotmend::file::Physical;
//! use std::path::Path;
//!
//! let physical = Physical::new(Path::new("Game.image.json"))?;
//! println!("File size: {} bytes", physical.len());
//! # Ok::<(), dotmend::Error>(())
//! ```

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{
    Error::{Error, FileError},
    Result,
};

/// A read-only memory mapping of a file on disk.
#[derive(Debug)]
pub struct Physical {
    data: Option<Mmap>,
}

impl Physical {
    /// Opens and maps the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and
    /// [`crate::Error::Error`] if mapping it fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let len = file.metadata().map_err(FileError)?.len();
        if len == 0 {
            // Zero-length mappings are rejected by some platforms.
            return Ok(Physical { data: None });
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: Some(mmap) })
    }

    /// The complete file contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Size of the file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` for an empty file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
