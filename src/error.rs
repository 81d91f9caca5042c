use std::path::PathBuf;

use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants map onto the failure taxonomy of the repair pipeline:
///
/// ## Fatal
/// - [`Error::Load`] - The module could not be loaded; no stage has run
/// - [`Error::Save`] - The module could not be persisted; no output was produced
///
/// ## Non-fatal
/// - [`Error::Stage`] - A stage signalled a failure; the orchestrator logs it and continues
///
/// ## Misuse and malformed input
/// - [`Error::Malformed`] - Structurally invalid input (e.g. a broken image arena)
/// - [`Error::DuplicateLabel`] / [`Error::UndefinedLabel`] - Assembler label misuse
/// - [`Error::InvalidState`] - A pipeline operation was invoked out of order
/// - [`Error::NoStages`] / [`Error::UnknownStage`] - Stage selection problems
///
/// Repair, classification and partial evaluation never produce an error: an unrecoverable
/// exception handler is dropped and counted, ambiguous classifications resolve to "exclude",
/// and the evaluator reports [`crate::emulation::Evaluated::Unknown`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotmend::{Error, file::{ImageFormat, ModuleFormat}};
/// use std::path::Path;
///
/// match ImageFormat::new().load(Path::new("app.json")) {
///     Ok(module) => println!("{} types", module.types.len()),
///     Err(Error::Load { path, message }) => eprintln!("{}: {}", path.display(), message),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input module could not be loaded.
    ///
    /// Loading happens before any stage runs, so this error always aborts the run.
    #[error("Failed to load '{}': {message}", path.display())]
    Load {
        /// The path that was being loaded
        path: PathBuf,
        /// Why loading failed
        message: String,
    },

    /// The transformed module could not be persisted.
    ///
    /// Saving is all-or-nothing: when this error is returned no output file exists.
    #[error("Failed to save '{}': {message}", path.display())]
    Save {
        /// The requested output path
        path: PathBuf,
        /// Why saving failed
        message: String,
    },

    /// A transformation stage failed.
    ///
    /// The orchestrator catches this, logs it and continues with whatever partial state the
    /// stage left behind.
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// Name of the failing stage
        stage: String,
        /// The stage-provided failure description
        message: String,
    },

    /// The input is damaged and could not be processed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A pipeline operation was requested in the wrong lifecycle state.
    #[error("Invalid pipeline state: expected {expected}, found {found}")]
    InvalidState {
        /// The state the operation requires
        expected: &'static str,
        /// The state the pipeline was actually in
        found: &'static str,
    },

    /// A label was defined twice while assembling a body.
    #[error("Duplicate label '{0}'")]
    DuplicateLabel(String),

    /// A branch, switch or handler refers to a label that was never defined.
    #[error("Undefined label '{0}'")]
    UndefinedLabel(String),

    /// Stage selection resolved to an empty pipeline.
    #[error("No valid deobfuscation stages were selected")]
    NoStages,

    /// A stage name could not be resolved by the registry.
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors that must abort the run.
    ///
    /// Only load and save failures are fatal; everything else is logged and bypassed by the
    /// orchestrator.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Load { .. } | Error::Save { .. })
    }

    /// Convenience constructor for stage failures.
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let load = Error::Load {
            path: PathBuf::from("a.dll"),
            message: "missing".into(),
        };
        let save = Error::Save {
            path: PathBuf::from("a_obf.dll"),
            message: "read-only".into(),
        };

        assert!(load.is_fatal());
        assert!(save.is_fatal());
        assert!(!Error::stage("fold", "boom").is_fatal());
        assert!(!Error::NoStages.is_fatal());
    }

    #[test]
    fn test_malformed_macro_records_location() {
        let err = malformed_error!("label '{}' never defined", "exit");
        match err {
            Error::Malformed { message, file, line } => {
                assert_eq!(message, "label 'exit' never defined");
                assert!(file.ends_with("error.rs"));
                assert!(line > 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = Error::stage("rename", "registry exhausted");
        assert_eq!(err.to_string(), "Stage 'rename' failed: registry exhausted");

        let err = Error::Load {
            path: PathBuf::from("x.dll"),
            message: "bad image".into(),
        };
        assert_eq!(err.to_string(), "Failed to load 'x.dll': bad image");
    }
}
