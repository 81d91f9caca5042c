//! Partial evaluation of CIL method prefixes.
//!
//! Obfuscated methods often hide simple constants behind arithmetic, local shuffling and reads
//! from an embedded data blob. This module replays such a method from its entry up to a chosen
//! instruction and reports the concrete value found there, or why no value could be found.
//!
//! # Key Components
//!
//! - [`PartialEvaluator`] - Bounded interpreter over one method body
//! - [`Evaluated`] - Known value or unknown-with-reason
//! - [`UnknownReason`] - Why a run produced no value
//! - [`detect_offset_shift_local`] - Locates the blob base-pointer local

mod evaluator;

pub use evaluator::{
    detect_offset_shift_local, Evaluated, PartialEvaluator, UnknownReason, DEFAULT_OFFSET_SHIFT,
    DEFAULT_STEP_BUDGET,
};
