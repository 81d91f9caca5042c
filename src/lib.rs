// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'file/output.rs' uses a writable mmap for the temporary output file

//! # dotmend
//!
//! The substrate of a .NET CIL deobfuscator. Scheme-specific passes (string decryption, call
//! resolution, control-flow normalization) rewrite method bodies and routinely leave them
//! structurally invalid; `dotmend` provides what surrounds such passes:
//!
//! - **Integrity repair** - dangling branch, switch and exception-handler references are
//!   retargeted or removed, missing terminators and locals are added
//! - **Safety classification** - predicates that decide whether mutating a method or a literal
//!   risks externally observable behaviour (engine callbacks, serialization, interop, exports)
//! - **Partial evaluation** - a bounded stack-machine interpreter that recovers constants hidden
//!   behind arithmetic and buffer indirection
//! - **Orchestration** - an ordered stage pipeline that always repairs before persisting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotmend::prelude::*;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default().with_stages("rename,nops");
//! let mut pipeline =
//!     Pipeline::from_config(Box::new(ImageFormat::new()), &StageRegistry::default(), config)?;
//! let report = pipeline.run(Path::new("Assembly-CSharp.json"), None)?;
//! println!("{report}");
//! # Ok::<(), dotmend::Error>(())
//! ```
//!
//! ### Repairing a Body Directly
//!
//! ```rust
//! use dotmend::prelude::*;
//!
//! let mut asm = InstructionAssembler::new();
//! asm.ldc_i4(1)?.brtrue("done")?.ldc_i4(2)?.pop()?.label("done")?.ret()?;
//! let mut body = asm.finish()?;
//!
//! // A stage deletes the branch target.
//! let ret = body.last().unwrap();
//! body.remove(ret);
//!
//! let report = repair_body(&mut body);
//! assert!(report.changed());
//! assert!(body.ends_with_terminator());
//! # Ok::<(), dotmend::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`prelude`] - Convenient re-exports of commonly used types and traits
//! - [`assembly`] - Opcodes, instructions and the label-based assembler
//! - [`metadata`] - The module graph: types, methods, bodies, handlers
//! - [`file`] - The binary-format seam and the JSON image format
//! - [`emulation`] - The partial evaluator
//! - [`deobfuscation`] - Classifier, repairer, name registry, stages and the pipeline
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench
//! ```

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dotmend::prelude::*;
///
/// let registry = StageRegistry::default();
/// assert!(registry.names().any(|name| name == "rename"));
/// ```
pub mod prelude;

pub mod assembly;

pub mod deobfuscation;

pub mod emulation;

pub mod file;

pub mod metadata;

/// `dotmend` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotmend::{file::ImageFormat, file::ModuleFormat, metadata::module::Module, Result};
///
/// fn load(path: &str) -> Result<Module> {
///     ImageFormat::new().load(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dotmend` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use dotmend::{file::ImageFormat, file::ModuleFormat, Error};
///
/// match ImageFormat::new().load(std::path::Path::new("Assembly-CSharp.json")) {
///     Ok(module) => println!("Loaded {}", module.name),
///     Err(Error::Load { path, message }) => println!("{}: {message}", path.display()),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;
