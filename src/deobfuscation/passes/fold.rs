use log::info;

use crate::{
    assembly::{Instruction, OpCode},
    deobfuscation::{context::StageContext, pass::Stage, repair::referenced_ids},
    metadata::method::MethodBody,
    Result,
};

/// Folds `ldc.i4 a; ldc.i4 b; <op>` into a single `ldc.i4`.
///
/// Only eligible methods are touched. A triple is left alone when a branch or handler points
/// into its second or third instruction, and when the operation would trap at run time
/// (division by zero, `i32::MIN / -1`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FoldStage;

impl FoldStage {
    /// Selection name.
    pub const NAME: &'static str = "fold";

    /// Boxed constructor for the stage registry.
    #[must_use]
    pub fn boxed() -> Box<dyn Stage> {
        Box::new(FoldStage)
    }
}

impl Stage for FoldStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Folds constant integer arithmetic"
    }

    fn apply(&self, ctx: &mut StageContext) -> Result<()> {
        let mut folded = 0;

        for location in ctx.module.method_locations() {
            let eligible = ctx.module.at(location).is_some_and(|(ty, method)| {
                ctx.classifier.method_eligible(method, ty, &ctx.module)
            });
            if !eligible {
                continue;
            }

            if let Some(body) = ctx
                .module
                .method_at_mut(location)
                .and_then(|method| method.body.as_mut())
            {
                folded += fold_body(body);
            }
        }

        info!("Folded {folded} constant expression(s)");
        Ok(())
    }
}

/// Folds every literal triple in `body` until none is left. Returns the number of folds.
fn fold_body(body: &mut MethodBody) -> usize {
    let mut folded = 0;
    while fold_once(body) {
        folded += 1;
    }
    folded
}

fn fold_once(body: &mut MethodBody) -> bool {
    let referenced = referenced_ids(body);

    for position in 0..body.len().saturating_sub(2) {
        let (Some(first), Some(second), Some(third)) = (
            body.id_at(position),
            body.id_at(position + 1),
            body.id_at(position + 2),
        ) else {
            return false;
        };
        if referenced.contains(&second) || referenced.contains(&third) {
            continue;
        }

        let value = match (body.get(first), body.get(second), body.get(third)) {
            (Some(a), Some(b), Some(op)) => match (a.i4_value(), b.i4_value()) {
                (Some(a), Some(b)) => fold_binary(op.opcode, a, b),
                _ => None,
            },
            _ => None,
        };
        let Some(value) = value else {
            continue;
        };

        if let Some(instruction) = body.get_mut(first) {
            *instruction = Instruction::ldc_i4(value);
        }
        body.remove(second);
        body.remove(third);
        return true;
    }

    false
}

/// Evaluates a binary integer opcode over two literals with CLR semantics.
///
/// Returns `None` for opcodes that are not foldable binary operations and for operations that
/// throw at run time.
#[must_use]
pub fn fold_binary(opcode: OpCode, a: i32, b: i32) -> Option<i32> {
    match opcode {
        OpCode::Add => Some(a.wrapping_add(b)),
        OpCode::Sub => Some(a.wrapping_sub(b)),
        OpCode::Mul => Some(a.wrapping_mul(b)),
        OpCode::Div => a.checked_div(b),
        OpCode::Rem => a.checked_rem(b),
        OpCode::And => Some(a & b),
        OpCode::Or => Some(a | b),
        OpCode::Xor => Some(a ^ b),
        OpCode::Shl => Some(a.wrapping_shl(b as u32)),
        OpCode::Shr => Some(a.wrapping_shr(b as u32)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        deobfuscation::config::PipelineConfig,
        metadata::{method::MethodDef, module::Module, token::Token, typesystem::TypeDef},
    };

    fn run(body: MethodBody) -> Result<MethodBody> {
        let mut ty = TypeDef::new(Token(0x02000002), "Game", "Player");
        ty.methods
            .push(MethodDef::new(Token(0x06000001), "Compute").with_body(body));
        let mut module = Module::new("Game.dll");
        module.types.push(ty);

        let mut ctx = StageContext::new(module, &PipelineConfig::default());
        FoldStage.apply(&mut ctx)?;
        Ok(ctx.module.types[0].methods[0]
            .body
            .take()
            .unwrap_or_default())
    }

    #[test]
    fn test_nested_arithmetic_folds_to_literal() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(6)?.ldc_i4(7)?.mul()?.ldc_i4(2)?.sub()?.stloc(0)?.ret()?;
        let body = run(asm.finish()?)?;

        assert_eq!(body.len(), 3);
        assert_eq!(body.at(0).unwrap().i4_value(), Some(40));
        Ok(())
    }

    #[test]
    fn test_division_by_zero_is_never_folded() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(9)?.ldc_i4(0)?.div()?.stloc(0)?.ret()?;
        let body = run(asm.finish()?)?;
        assert_eq!(body.len(), 5);
        assert_eq!(body.at(2).unwrap().opcode, OpCode::Div);

        assert_eq!(fold_binary(OpCode::Div, i32::MIN, -1), None);
        assert_eq!(fold_binary(OpCode::Rem, 1, 0), None);
        assert_eq!(fold_binary(OpCode::Add, i32::MAX, 1), Some(i32::MIN));
        assert_eq!(fold_binary(OpCode::Xor, 0x5A, 0x0F), Some(0x55));
        assert_eq!(fold_binary(OpCode::Ceq, 1, 1), None);
        Ok(())
    }

    #[test]
    fn test_branch_into_triple_blocks_fold() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(1)?
            .brtrue("mid")?
            .ldc_i4(3)?
            .label("mid")?
            .ldc_i4(4)?
            .add()?
            .stloc(0)?
            .ret()?;
        let body = run(asm.finish()?)?;
        assert_eq!(body.len(), 7);
        Ok(())
    }

    #[test]
    fn test_ineligible_methods_untouched() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(2)?.ldc_i4(3)?.add()?.pop()?.ret()?;
        let mut method = MethodDef::new(Token(0x06000001), "Update").with_body(asm.finish()?);
        let before = method.body.clone();

        let mut ty = TypeDef::new(Token(0x02000002), "Game", "Player");
        ty.methods.push(method.clone());
        let mut module = Module::new("Game.dll");
        module.types.push(ty);
        let mut ctx = StageContext::new(module, &PipelineConfig::default());
        FoldStage.apply(&mut ctx)?;

        method = ctx.module.types[0].methods[0].clone();
        assert_eq!(method.body, before);
        Ok(())
    }
}
