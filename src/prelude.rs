//! # dotmend Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotmend library.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotmend operations
pub use crate::Error;

/// The result type used throughout dotmend
pub use crate::Result;

// ================================================================================================
// Instructions and Bodies
// ================================================================================================

/// Label-based builder for method bodies
pub use crate::assembly::InstructionAssembler;

/// Instruction model
pub use crate::assembly::{FlowType, Immediate, InstrId, Instruction, OpCode, Operand};

/// Module graph
pub use crate::metadata::{
    method::{ExceptionHandler, ExceptionHandlerFlags, Local, MethodBody, MethodDef, Param},
    module::{MethodLocation, Module},
    token::Token,
    typesystem::{CustomAttribute, TypeAttributes, TypeDef, TypeSig},
};

// ================================================================================================
// Persistence
// ================================================================================================

/// The binary-format seam and its JSON image implementation
pub use crate::file::{format_for_type, ImageFormat, ModuleFormat, WriterOptions};

// ================================================================================================
// Deobfuscation Substrate
// ================================================================================================

/// Partial evaluation
pub use crate::emulation::{Evaluated, PartialEvaluator, UnknownReason};

/// Classification, repair and naming
pub use crate::deobfuscation::{
    repair_body, repair_module, ClassifierConfig, ModuleRepairReport, NameRegistry, RepairReport,
};

/// Stages and the pipeline
pub use crate::deobfuscation::{
    Pipeline, PipelineConfig, PipelineReport, PipelineState, Stage, StageContext, StageRegistry,
};
