//! Shared mutable state handed to every stage.
//!
//! The [`StageContext`] owns the loaded module for the duration of the stage sequence, together
//! with the run's name registry and the tuning knobs stages need to consult the classifier and
//! the partial evaluator consistently.

use crate::{
    deobfuscation::{classifier::ClassifierConfig, config::PipelineConfig, naming::NameRegistry},
    emulation::PartialEvaluator,
    metadata::{method::MethodBody, module::Module},
};

/// State shared by the stages of one run.
#[derive(Debug)]
pub struct StageContext {
    /// The module being transformed.
    pub module: Module,

    /// Unique-name registry for this run.
    pub names: NameRegistry,

    /// Classifier thresholds.
    pub classifier: ClassifierConfig,

    /// Step budget of evaluators created through [`StageContext::evaluator`].
    pub eval_step_budget: usize,

    /// Offset shift of evaluators created through [`StageContext::evaluator`].
    pub offset_shift: i32,
}

impl StageContext {
    /// Creates a context around `module` configured from `config`.
    #[must_use]
    pub fn new(module: Module, config: &PipelineConfig) -> Self {
        let names = match config.name_seed {
            Some(seed) => NameRegistry::with_seed(seed),
            None => NameRegistry::new(),
        }
        .with_length(config.name_length)
        .with_attempts(config.name_attempts);

        StageContext {
            module,
            names,
            classifier: config.classifier,
            eval_step_budget: config.eval_step_budget,
            offset_shift: config.offset_shift,
        }
    }

    /// A partial evaluator over `body` using the run's limits.
    #[must_use]
    pub fn evaluator<'a>(&self, body: &'a MethodBody) -> PartialEvaluator<'a> {
        PartialEvaluator::new(body)
            .with_step_budget(self.eval_step_budget)
            .with_offset_shift(self.offset_shift)
    }

    /// Gives the module back, ending the stage phase.
    #[must_use]
    pub fn into_module(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::InstructionAssembler, emulation::Evaluated, Result};

    #[test]
    fn test_context_uses_config() -> Result<()> {
        let config = PipelineConfig {
            eval_step_budget: 5,
            name_length: 12,
            ..PipelineConfig::default().with_seed(1)
        };
        let mut ctx = StageContext::new(Module::new("Game.dll"), &config);
        assert_eq!(ctx.names.generate().len(), 12);

        let mut asm = InstructionAssembler::new();
        asm.label("top")?.br("top")?.ret()?;
        let body = asm.finish()?;
        assert!(matches!(
            ctx.evaluator(&body).peek_stack_at(body.last().unwrap()),
            Evaluated::Unknown(_)
        ));

        assert_eq!(ctx.into_module().name, "Game.dll");
        Ok(())
    }
}
