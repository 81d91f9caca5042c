//! Binary-format seam: loading and persisting the module graph.
//!
//! The deobfuscation layer never touches bytes directly. It talks to a [`ModuleFormat`], which
//! turns a file into a [`Module`], persists a transformed module, and owns the branch-form
//! passes that run after a body was repaired (expanding short branches before any length
//! changes, then re-shrinking once offsets are final).
//!
//! # Key Components
//!
//! - [`ModuleFormat`] - The collaborator contract
//! - [`WriterOptions`] - Persistence options
//! - [`ImageFormat`] - JSON image implementation of the contract
//! - [`Physical`] - Memory-mapped input
//! - [`Output`] - Atomic memory-mapped output
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotmend::file::{ImageFormat, ModuleFormat, WriterOptions};
//! use std::path::Path;
//!
//! let format = ImageFormat::new();
//! let module = format.load(Path::new("Game.json"))?;
//! format.save(&module, Path::new("Game_obf.json"), &WriterOptions::default())?;
//! # Ok::<(), dotmend::Error>(())
//! ```

mod image;
mod output;
mod physical;

pub use image::{ImageFormat, IMAGE_FORMAT, IMAGE_VERSION};
pub use output::Output;
pub use physical::Physical;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    metadata::{method::MethodBody, module::Module},
    Result,
};

/// Options controlling how a module is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Keep each body's declared `max_stack` instead of recomputing it
    pub keep_max_stack: bool,
    /// Emit human-readable output where the format supports it
    pub pretty: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            keep_max_stack: true,
            pretty: false,
        }
    }
}

/// A binary format the pipeline can load modules from and save them to.
pub trait ModuleFormat {
    /// The `--type` name this format answers to.
    fn name(&self) -> &'static str;

    /// Loads the module stored at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Load`] if the file cannot be read or parsed.
    fn load(&self, path: &Path) -> Result<Module>;

    /// Persists `module` at `path`.
    ///
    /// Implementations must not leave a partial file at `path` on failure.
    ///
    /// # Errors
    /// Returns [`crate::Error::Save`] if the module cannot be written.
    fn save(&self, module: &Module, path: &Path, options: &WriterOptions) -> Result<()>;

    /// Expands short branch forms so later length changes cannot overflow them.
    fn simplify_branches(&self, body: &mut MethodBody) {
        body.simplify_branches();
    }

    /// Re-shrinks branches whose displacement fits a signed byte.
    fn optimize_branches(&self, body: &mut MethodBody) {
        body.optimize_branches();
    }
}

/// Resolves a `--type` name to a format. Matching is case-insensitive.
#[must_use]
pub fn format_for_type(name: &str) -> Option<Box<dyn ModuleFormat>> {
    let format = ImageFormat::new();
    if name.trim().eq_ignore_ascii_case(format.name()) {
        Some(Box::new(format))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lookup() {
        assert!(format_for_type("dotnet").is_some());
        assert!(format_for_type(" DotNet ").is_some());
        assert!(format_for_type("java").is_none());
        assert!(format_for_type("").is_none());
    }

    #[test]
    fn test_writer_defaults() {
        let options = WriterOptions::default();
        assert!(options.keep_max_stack);
        assert!(!options.pretty);
    }
}
