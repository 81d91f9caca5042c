use log::info;

use crate::{
    deobfuscation::{context::StageContext, pass::Stage, repair::remove_nops_preserving_targets},
    Result,
};

/// Deletes `nop` padding from every body.
///
/// References to a removed `nop` move to the next instruction that is not a `nop`. A `nop` that
/// stays referenced is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopStage;

impl NopStage {
    /// Selection name.
    pub const NAME: &'static str = "nops";

    /// Boxed constructor for the stage registry.
    #[must_use]
    pub fn boxed() -> Box<dyn Stage> {
        Box::new(NopStage)
    }
}

impl Stage for NopStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Removes nop padding while preserving branch and handler targets"
    }

    fn apply(&self, ctx: &mut StageContext) -> Result<()> {
        let mut removed = 0;
        let mut methods = 0;

        for ty in &mut ctx.module.types {
            for body in ty.methods.iter_mut().filter_map(|method| method.body.as_mut()) {
                let count = remove_nops_preserving_targets(body);
                if count > 0 {
                    removed += count;
                    methods += 1;
                }
            }
        }

        info!("Removed {removed} nop(s) from {methods} method(s)");
        Ok(())
    }
}
