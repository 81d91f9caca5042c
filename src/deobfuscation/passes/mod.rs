//! Built-in stages.
//!
//! These stages exercise the substrate end to end. Scheme-specific passes (string decryption,
//! call resolution, control-flow normalization) are expected to live outside this crate and
//! register through [`crate::deobfuscation::StageRegistry::register`].
//!
//! | Stage | Name | Description |
//! |-------|------|-------------|
//! | [`RenameStage`] | `rename` | Gives eligible types and methods generated names |
//! | [`FoldStage`] | `fold` | Folds literal integer arithmetic into a single literal |
//! | [`NopStage`] | `nops` | Removes `nop`s, redirecting references past them |

mod fold;
mod nops;
mod rename;

pub use fold::{fold_binary, FoldStage};
pub use nops::NopStage;
pub use rename::RenameStage;
