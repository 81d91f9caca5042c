//! The stage contract.
//!
//! Stages are the pluggable transformation units of the pipeline. Each one receives the loaded
//! module through a [`StageContext`] and mutates it in place.

use crate::{deobfuscation::context::StageContext, Result};

/// A named transformation over the loaded module.
///
/// # Error Semantics
///
/// An error returned from [`Stage::apply`] is not fatal: the pipeline logs it, records it in
/// the report and moves on to the next stage with the module in whatever state the failing stage
/// left it. The final repair runs regardless, so a stage may leave dangling references behind.
///
/// # Example
///
/// ```rust
/// use dotmend::deobfuscation::{Stage, StageContext};
///
/// struct CountMethods;
///
/// impl Stage for CountMethods {
///     fn name(&self) -> &'static str {
///         "count"
///     }
///
///     fn apply(&self, ctx: &mut StageContext) -> dotmend::Result<()> {
///         log::info!("{} methods", ctx.module.method_count());
///         Ok(())
///     }
/// }
/// ```
pub trait Stage {
    /// Unique name, as used in the stage selection string.
    fn name(&self) -> &'static str;

    /// Applies the stage to the module held by `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage could not complete. Partial changes are kept.
    fn apply(&self, ctx: &mut StageContext) -> Result<()>;

    /// Get a description of what this stage does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
