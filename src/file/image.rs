//! JSON image persistence of the module graph.
//!
//! An image is a JSON document wrapping a [`Module`] together with a format marker and version:
//!
//! ```json
//! { "format": "dotmend-image", "version": 1, "module": { "name": "Game.dll", "types": [] } }
//! ```
//!
//! Loading maps the file with [`Physical`] and parses straight from the mapping. Saving
//! serializes the whole document in memory first and then writes it through an [`Output`], so a
//! failed save never leaves a partial file behind.

use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    file::{ModuleFormat, Output, Physical, WriterOptions},
    metadata::module::Module,
    Error, Result,
};

/// Format marker every image carries.
pub const IMAGE_FORMAT: &str = "dotmend-image";
/// Image version this build reads and writes.
pub const IMAGE_VERSION: u32 = 1;

#[derive(Serialize)]
struct ImageDocumentRef<'a> {
    format: &'a str,
    version: u32,
    module: &'a Module,
}

#[derive(Deserialize)]
struct ImageDocument {
    format: String,
    version: u32,
    module: Module,
}

/// The JSON image [`ModuleFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFormat;

impl ImageFormat {
    /// Creates the format.
    #[must_use]
    pub fn new() -> Self {
        ImageFormat
    }

    /// Parses an image from bytes.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] for invalid JSON, a foreign format marker, an unsupported
    /// version, or a body whose live sequence does not match its arena.
    pub fn parse(&self, data: &[u8]) -> Result<Module> {
        let document: ImageDocument = serde_json::from_slice(data)
            .map_err(|e| malformed_error!("Invalid image document: {}", e))?;

        if document.format != IMAGE_FORMAT {
            return Err(malformed_error!(
                "Unknown image format '{}', expected '{}'",
                document.format,
                IMAGE_FORMAT
            ));
        }
        if document.version != IMAGE_VERSION {
            return Err(malformed_error!(
                "Unsupported image version {}, expected {}",
                document.version,
                IMAGE_VERSION
            ));
        }

        for (ty, method) in document.module.methods() {
            if let Some(body) = &method.body {
                body.check_arena().map_err(|e| {
                    malformed_error!("{}::{}: {}", ty.full_name(), method.name, e)
                })?;
            }
        }

        Ok(document.module)
    }

    /// Serializes `module` into image bytes.
    ///
    /// # Errors
    /// Returns [`Error::Error`] if serialization fails.
    pub fn encode(&self, module: &Module, options: &WriterOptions) -> Result<Vec<u8>> {
        let recomputed;
        let module = if options.keep_max_stack {
            module
        } else {
            let mut copy = module.clone();
            for ty in &mut copy.types {
                for method in &mut ty.methods {
                    if let Some(body) = method.body.as_mut() {
                        body.max_stack = body.compute_max_stack();
                    }
                }
            }
            recomputed = copy;
            &recomputed
        };

        let document = ImageDocumentRef {
            format: IMAGE_FORMAT,
            version: IMAGE_VERSION,
            module,
        };

        let encoded = if options.pretty {
            serde_json::to_vec_pretty(&document)
        } else {
            serde_json::to_vec(&document)
        };
        encoded.map_err(|e| Error::Error(format!("Failed to encode image: {e}")))
    }
}

impl ModuleFormat for ImageFormat {
    fn name(&self) -> &'static str {
        "dotnet"
    }

    fn load(&self, path: &Path) -> Result<Module> {
        let load_error = |message: String| Error::Load {
            path: path.to_path_buf(),
            message,
        };

        let physical = Physical::new(path).map_err(|e| load_error(e.to_string()))?;
        let module = self
            .parse(physical.data())
            .map_err(|e| load_error(e.to_string()))?;

        info!(
            "Loaded '{}' with {} types and {} methods",
            module.name,
            module.types.len(),
            module.method_count()
        );
        Ok(module)
    }

    fn save(&self, module: &Module, path: &Path, options: &WriterOptions) -> Result<()> {
        let bytes = self.encode(module, options).map_err(|e| Error::Save {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut output = Output::create(path, bytes.len() as u64)?;
        output.write_at(0, &bytes)?;
        output.finalize()?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}
