//! Deobfuscation substrate for .NET modules.
//!
//! Scheme-specific passes rewrite method bodies aggressively and routinely leave them
//! structurally broken. This module provides what every such pass needs around it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Stage Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ModuleFormat::load                                              │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  Stages, in selection order                                │  │
//! │  │  • consult the classifier before touching a method         │  │
//! │  │  • recover hidden constants with the partial evaluator     │  │
//! │  │  • draw fresh identifiers from the name registry           │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             ▼                                    │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  Repair (always): targets, handlers, terminators, locals,  │  │
//! │  │  then branch canonicalization through the format           │  │
//! │  └──────────────────────────┬─────────────────────────────────┘  │
//! │                             ▼                                    │
//! │  ModuleFormat::save (temporary sibling + rename)                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! - [`Pipeline`] - Lifecycle state machine driving stages, repair and persistence
//! - [`Stage`] / [`StageContext`] - The transformation contract and its shared state
//! - [`StageRegistry`] / [`PipelineConfig`] - Stage selection and run configuration
//! - [`classifier`] - Predicates deciding what is safe to mutate
//! - [`repair`] - Restores branch, switch and handler references after mutation
//! - [`NameRegistry`] - Collision-free identifier generation
//! - [`passes`] - Built-in stages

pub mod classifier;
mod config;
mod context;
mod engine;
mod naming;
mod pass;
pub mod passes;
pub mod repair;

pub use classifier::ClassifierConfig;
pub use config::{
    expand_preset, output_path_for, PipelineConfig, StageConstructor, StageRegistry,
    DEFAULT_STAGE, FULL_SELECTION, OUTPUT_SUFFIX,
};
pub use context::StageContext;
pub use engine::{Pipeline, PipelineReport, PipelineState, StageFailure};
pub use naming::{NameRegistry, DEFAULT_NAME_ATTEMPTS, DEFAULT_NAME_LENGTH};
pub use pass::Stage;
pub use repair::{
    is_referenced, remap_references, remove_nops_preserving_targets, repair_body,
    repair_body_with, repair_module, ModuleRepairReport, RepairReport,
};
