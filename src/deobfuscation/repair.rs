//! Structural repair of mutated method bodies.
//!
//! Stages delete, reorder and rewrite instructions without keeping every reference in sync. The
//! repairer runs once after all stages and restores these invariants for every body:
//!
//! 1. Every branch target, switch target and handler boundary names a live instruction.
//! 2. The last instruction never falls through.
//! 3. Every surviving handler satisfies `try_start < try_end <= handler_start < handler_end`.
//! 4. Every referenced local slot is declared.
//!
//! Dangling references are retargeted to a structural neighbour rather than guessed: by the time
//! a target is gone its original intent is unrecoverable. Handlers that cannot be made valid are
//! dropped. Repair is idempotent; a valid body is left untouched.
//!
//! # Examples
//!
//! ```rust
//! use dotmend::assembly::InstructionAssembler;
//! use dotmend::deobfuscation::repair_body;
//!
//! let mut asm = InstructionAssembler::new();
//! asm.br("gone")?.label("gone")?.nop()?.ldc_i4(1)?.ret()?;
//! let mut body = asm.finish()?;
//! let gone = body.id_at(1).unwrap();
//! body.remove(gone);
//!
//! let report = repair_body(&mut body);
//! assert_eq!(report.retargeted_branches, 1);
//! assert!(!repair_body(&mut body).changed());
//! # Ok::<(), dotmend::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    ops::AddAssign,
};

use log::{debug, warn};

use crate::{
    assembly::{FlowType, InstrId, Instruction, OpCode, Operand},
    file::ModuleFormat,
    metadata::{
        method::{ExceptionHandler, Local, MethodBody},
        module::Module,
        typesystem::TypeSig,
    },
};

/// What [`repair_body`] changed in one body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Branch operands moved off a dead instruction
    pub retargeted_branches: usize,
    /// Switch table entries moved off a dead instruction
    pub retargeted_switch_targets: usize,
    /// Operand-less branches turned into `nop` (or an empty switch table)
    pub degraded_branches: usize,
    /// Handler boundaries moved off a dead instruction
    pub repaired_boundaries: usize,
    /// Handlers removed because they could not be made valid
    pub dropped_handlers: usize,
    /// `ret` instructions appended to close the body
    pub appended_returns: usize,
    /// Local slots declared for undeclared references
    pub added_locals: usize,
}

impl RepairReport {
    /// Returns `true` if the body was modified.
    #[must_use]
    pub fn changed(&self) -> bool {
        *self != RepairReport::default()
    }
}

impl AddAssign for RepairReport {
    fn add_assign(&mut self, other: Self) {
        self.retargeted_branches += other.retargeted_branches;
        self.retargeted_switch_targets += other.retargeted_switch_targets;
        self.degraded_branches += other.degraded_branches;
        self.repaired_boundaries += other.repaired_boundaries;
        self.dropped_handlers += other.dropped_handlers;
        self.appended_returns += other.appended_returns;
        self.added_locals += other.added_locals;
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} branches, {} switch targets, {} degraded, {} boundaries, {} handlers dropped, {} returns, {} locals",
            self.retargeted_branches,
            self.retargeted_switch_targets,
            self.degraded_branches,
            self.repaired_boundaries,
            self.dropped_handlers,
            self.appended_returns,
            self.added_locals
        )
    }
}

/// Totals of [`repair_module`] over every method body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleRepairReport {
    /// Bodies inspected
    pub methods_checked: usize,
    /// Bodies that needed at least one fix
    pub methods_repaired: usize,
    /// Sum of the per-body reports
    pub totals: RepairReport,
}

/// Restores the structural invariants of `body`.
///
/// Branch canonicalization is not performed here; see [`repair_body_with`].
pub fn repair_body(body: &mut MethodBody) -> RepairReport {
    let mut report = RepairReport::default();

    if body.is_empty() {
        report.dropped_handlers = body.exception_handlers.len();
        body.exception_handlers.clear();
    } else {
        repair_targets(body, &mut report);
        repair_handlers(body, &mut report);
    }

    if !body.ends_with_terminator() {
        body.push(Instruction::ret());
        report.appended_returns = 1;
    }

    report.added_locals = declare_referenced_locals(body);
    report
}

/// [`repair_body`], followed by the format's branch canonicalization if anything changed.
///
/// Short branches are expanded first and re-shrunk after, so the canonical form never depends
/// on how stages left the branch encodings.
pub fn repair_body_with(body: &mut MethodBody, format: &dyn ModuleFormat) -> RepairReport {
    let report = repair_body(body);
    if report.changed() {
        format.simplify_branches(body);
        format.optimize_branches(body);
    }
    report
}

/// Repairs every method body of `module`.
pub fn repair_module(module: &mut Module, format: &dyn ModuleFormat) -> ModuleRepairReport {
    let mut summary = ModuleRepairReport::default();

    for ty in &mut module.types {
        let type_name = ty.full_name();
        for method in &mut ty.methods {
            let Some(body) = method.body.as_mut() else {
                continue;
            };

            summary.methods_checked += 1;
            let report = repair_body_with(body, format);
            if !report.changed() {
                continue;
            }

            if report.dropped_handlers > 0 {
                warn!(
                    "Dropped {} unrecoverable exception handler(s) in {}::{}",
                    report.dropped_handlers, type_name, method.name
                );
            }
            debug!("Repaired {}::{}: {}", type_name, method.name, report);

            summary.methods_repaired += 1;
            summary.totals += report;
        }
    }

    summary
}

fn repair_targets(body: &mut MethodBody, report: &mut RepairReport) {
    let live = body.live_set();
    let Some(last) = body.last() else {
        return;
    };

    for position in 0..body.len() {
        let Some(id) = body.id_at(position) else {
            continue;
        };
        let fallback = body.id_at(position + 1).unwrap_or(last);
        let Some(instruction) = body.get_mut(id) else {
            continue;
        };
        let is_switch = instruction.is_switch();
        let is_branch = instruction.is_branch();
        let unconditional = matches!(
            instruction.flow_type(),
            FlowType::UnconditionalBranch | FlowType::Leave
        );

        match &mut instruction.operand {
            Operand::Target(target) => {
                if !live.contains(&*target) {
                    *target = fallback;
                    report.retargeted_branches += 1;
                }
            }
            Operand::Switch(targets) => {
                for target in targets.iter_mut().filter(|target| !live.contains(&**target)) {
                    *target = fallback;
                    report.retargeted_switch_targets += 1;
                }
            }
            operand if is_switch => {
                *operand = Operand::Switch(Vec::new());
                report.degraded_branches += 1;
            }
            operand if is_branch && unconditional => {
                *operand = Operand::None;
                instruction.opcode = OpCode::Nop;
                report.degraded_branches += 1;
            }
            operand if is_branch => {
                *operand = Operand::Target(fallback);
                report.retargeted_branches += 1;
            }
            _ => {}
        }
    }
}

fn repair_handlers(body: &mut MethodBody, report: &mut RepairReport) {
    let live = body.live_set();
    let (Some(first), Some(last)) = (body.first(), body.last()) else {
        report.dropped_handlers += body.exception_handlers.len();
        body.exception_handlers.clear();
        return;
    };

    let mut handlers = std::mem::take(&mut body.exception_handlers);
    for handler in &mut handlers {
        report.repaired_boundaries += retarget_boundaries(handler, &live, first, last);
    }

    let positions = body.positions();
    let end = body.len();
    let before = handlers.len();
    handlers.retain(|handler| is_well_ordered(handler, &positions, end));
    report.dropped_handlers += before - handlers.len();

    body.exception_handlers = handlers;
}

fn retarget_boundaries(
    handler: &mut ExceptionHandler,
    live: &HashSet<InstrId>,
    first: InstrId,
    last: InstrId,
) -> usize {
    let mut repaired = 0;
    let mut retarget = |boundary: &mut InstrId, replacement: InstrId| {
        if !live.contains(&*boundary) {
            *boundary = replacement;
            repaired += 1;
        }
    };

    retarget(&mut handler.try_start, first);
    retarget(&mut handler.try_end, last);
    let try_end = handler.try_end;
    retarget(&mut handler.handler_start, try_end);
    if let Some(handler_end) = handler.handler_end.as_mut() {
        retarget(handler_end, last);
    }
    if let Some(filter_start) = handler.filter_start.as_mut() {
        retarget(filter_start, try_end);
    }

    repaired
}

/// `try_start < try_end <= handler_start < handler_end`, an open `handler_end` meaning `end`.
fn is_well_ordered(
    handler: &ExceptionHandler,
    positions: &HashMap<InstrId, usize>,
    end: usize,
) -> bool {
    let position = |id: InstrId| positions.get(&id).copied();
    let (Some(try_start), Some(try_end), Some(handler_start)) = (
        position(handler.try_start),
        position(handler.try_end),
        position(handler.handler_start),
    ) else {
        return false;
    };
    let handler_end = match handler.handler_end {
        Some(id) => match position(id) {
            Some(index) => index,
            None => return false,
        },
        None => end,
    };
    if handler.filter_start.is_some_and(|id| position(id).is_none()) {
        return false;
    }

    try_start < try_end && try_end <= handler_start && handler_start < handler_end
}

fn declare_referenced_locals(body: &mut MethodBody) -> usize {
    let Some(highest) = body.instructions().filter_map(Instruction::local_index).max() else {
        return 0;
    };

    let required = usize::from(highest) + 1;
    let added = required.saturating_sub(body.locals.len());
    for _ in 0..added {
        body.locals.push(Local::new(TypeSig::Object));
    }
    added
}

/// Rewrites every branch, switch and handler reference according to `mapping`.
///
/// Returns the number of references rewritten.
pub fn remap_references(body: &mut MethodBody, mapping: &HashMap<InstrId, InstrId>) -> usize {
    if mapping.is_empty() {
        return 0;
    }

    let mut rewritten = 0;
    let mut remap = |reference: &mut InstrId| {
        if let Some(replacement) = mapping.get(reference) {
            *reference = *replacement;
            rewritten += 1;
        }
    };

    let ids = body.ids().to_vec();
    for id in ids {
        let Some(instruction) = body.get_mut(id) else {
            continue;
        };
        match &mut instruction.operand {
            Operand::Target(target) => remap(target),
            Operand::Switch(targets) => targets.iter_mut().for_each(&mut remap),
            _ => {}
        }
    }

    for handler in &mut body.exception_handlers {
        remap(&mut handler.try_start);
        remap(&mut handler.try_end);
        remap(&mut handler.handler_start);
        if let Some(handler_end) = handler.handler_end.as_mut() {
            remap(handler_end);
        }
        if let Some(filter_start) = handler.filter_start.as_mut() {
            remap(filter_start);
        }
    }

    rewritten
}

/// Every instruction id referenced by a live branch, switch or handler boundary.
#[must_use]
pub fn referenced_ids(body: &MethodBody) -> HashSet<InstrId> {
    body.instructions()
        .flat_map(Instruction::targets)
        .chain(
            body.exception_handlers
                .iter()
                .flat_map(ExceptionHandler::boundaries),
        )
        .collect()
}

/// Returns `true` if any live instruction or handler references `id`.
#[must_use]
pub fn is_referenced(body: &MethodBody, id: InstrId) -> bool {
    body.instructions().any(|instruction| instruction.references(id))
        || body
            .exception_handlers
            .iter()
            .any(|handler| handler.boundaries().any(|boundary| boundary == id))
}

/// Deletes `nop`s after redirecting references to the next non-`nop`.
///
/// A `nop` that is still referenced afterwards (a trailing one with no successor to redirect
/// to) is kept. Returns the number of instructions removed.
pub fn remove_nops_preserving_targets(body: &mut MethodBody) -> usize {
    let mut redirects = HashMap::new();
    let mut successor = None;
    for (id, instruction) in body.iter().collect::<Vec<_>>().into_iter().rev() {
        if instruction.is_nop() {
            if let Some(next) = successor {
                redirects.insert(id, next);
            }
        } else {
            successor = Some(id);
        }
    }

    remap_references(body, &redirects);

    let referenced = referenced_ids(body);
    body.remove_where(|id, instruction| instruction.is_nop() && !referenced.contains(&id))
}

/// Replaces `old` with `replacement`, moving every reference to the first new instruction.
///
/// Returns the new ids, or `None` if `old` is not live or `replacement` is empty.
pub fn replace_instruction(
    body: &mut MethodBody,
    old: InstrId,
    replacement: Vec<Instruction>,
) -> Option<Vec<InstrId>> {
    if replacement.is_empty() {
        return None;
    }
    let position = body.position_of(old)?;

    let ids: Vec<InstrId> = replacement
        .into_iter()
        .enumerate()
        .map(|(offset, instruction)| body.insert(position + offset, instruction))
        .collect();

    let mapping = HashMap::from([(old, ids[0])]);
    remap_references(body, &mapping);
    body.remove(old);
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        file::ImageFormat,
        metadata::{method::MethodDef, token::Token, typesystem::TypeDef},
        Result,
    };

    fn assert_valid(body: &MethodBody) {
        let live = body.live_set();
        for instruction in body.instructions() {
            for target in instruction.targets() {
                assert!(live.contains(&target), "dangling target {target}");
            }
        }
        let positions = body.positions();
        for handler in &body.exception_handlers {
            assert!(handler.boundaries().all(|id| live.contains(&id)));
            assert!(is_well_ordered(handler, &positions, body.len()));
        }
        assert!(body.ends_with_terminator());
        for index in body.instructions().filter_map(Instruction::local_index) {
            assert!(usize::from(index) < body.locals.len());
        }
    }

    #[test]
    fn test_valid_body_untouched() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(3)?
            .stloc(0)?
            .label("loop")?
            .ldloc(0)?
            .brfalse("exit")?
            .br("loop")?
            .label("exit")?
            .ret()?;
        let mut body = asm.finish()?;
        let before = body.clone();

        assert!(!repair_body(&mut body).changed());
        assert_eq!(body, before);
        Ok(())
    }

    #[test]
    fn test_dangling_branch_retargets_to_successor() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(1)?
            .brtrue("target")?
            .ldc_i4(2)?
            .pop()?
            .label("target")?
            .nop()?
            .ret()?;
        let mut body = asm.finish()?;
        let branch = body.id_at(1).unwrap();
        let successor = body.id_at(2).unwrap();
        body.remove(body.id_at(4).unwrap());

        let report = repair_body(&mut body);
        assert_eq!(report.retargeted_branches, 1);
        assert_eq!(body.get(branch).unwrap().targets(), vec![successor]);
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_trailing_dangling_branch_targets_itself() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.nop()?.label("gone")?.nop()?;
        let mut body = asm.finish()?;
        let gone = body.id_at(1).unwrap();
        body.push(Instruction::new(OpCode::Br, Operand::Target(gone)));
        body.remove(gone);

        let report = repair_body(&mut body);
        assert_eq!(report.retargeted_branches, 1);
        assert_eq!(report.appended_returns, 0);
        let last = body.last().unwrap();
        assert_eq!(body.get(last).unwrap().targets(), vec![last]);
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_operandless_branches() -> Result<()> {
        let mut body = MethodBody::new();
        let br = body.push(Instruction::simple(OpCode::Br));
        let leave = body.push(Instruction::simple(OpCode::LeaveS));
        let brtrue = body.push(Instruction::simple(OpCode::Brtrue));
        let switch = body.push(Instruction::simple(OpCode::Switch));
        let ret = body.push(Instruction::ret());

        let report = repair_body(&mut body);
        assert_eq!(report.degraded_branches, 3);
        assert_eq!(report.retargeted_branches, 1);
        assert!(body.get(br).unwrap().is_nop());
        assert!(body.get(leave).unwrap().is_nop());
        assert_eq!(body.get(brtrue).unwrap().targets(), vec![switch]);
        assert_eq!(body.get(switch).unwrap().operand, Operand::Switch(vec![]));
        assert_eq!(body.last(), Some(ret));
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_switch_targets() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(0)?
            .switch(&["a", "b"])?
            .label("a")?
            .nop()?
            .label("b")?
            .ldc_i4(7)?
            .pop()?
            .ret()?;
        let mut body = asm.finish()?;
        let a = body.id_at(2).unwrap();
        let b = body.id_at(3).unwrap();
        body.remove(a);

        let report = repair_body(&mut body);
        assert_eq!(report.retargeted_switch_targets, 1);
        assert_eq!(body.at(1).unwrap().targets(), vec![b, b]);
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_handlers_repaired_or_dropped() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.label("try")?
            .nop()?
            .ldc_i4(5)?
            .pop()?
            .leave("exit")?
            .label("catch")?
            .pop()?
            .leave("exit")?
            .label("exit")?
            .ret()?;
        asm.try_catch("try", "catch", "catch", Some("exit"), "System.Exception");
        let mut body = asm.finish()?;

        let mut repaired = body.clone();
        repaired.remove(repaired.id_at(0).unwrap());
        let report = repair_body(&mut repaired);
        assert_eq!(report.repaired_boundaries, 1);
        assert_eq!(report.dropped_handlers, 0);
        assert_eq!(
            repaired.exception_handlers[0].try_start,
            repaired.first().unwrap()
        );
        assert_valid(&repaired);

        // Losing the handler start leaves an empty handler once it collapses onto try_end.
        let catch = body.id_at(4).unwrap();
        let exit = body.id_at(6).unwrap();
        body.exception_handlers[0].handler_end = Some(catch);
        body.remove(catch);
        body.exception_handlers[0].try_end = exit;
        let report = repair_body(&mut body);
        assert_eq!(report.dropped_handlers, 1);
        assert!(body.exception_handlers.is_empty());
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_empty_body() {
        let mut body = MethodBody::new();
        body.exception_handlers.push(ExceptionHandler::finally(
            InstrId(0),
            InstrId(1),
            InstrId(2),
            None,
        ));

        let report = repair_body(&mut body);
        assert_eq!(report.appended_returns, 1);
        assert_eq!(report.dropped_handlers, 1);
        assert_eq!(body.len(), 1);
        assert_eq!(body.at(0).unwrap().opcode, OpCode::Ret);
        assert_valid(&body);
        assert!(!repair_body(&mut body).changed());
    }

    #[test]
    fn test_missing_terminator_and_locals() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.without_auto_locals();
        asm.ldc_i4(4)?.stloc(2)?;
        let mut body = asm.finish()?;

        let report = repair_body(&mut body);
        assert_eq!(report.appended_returns, 1);
        assert_eq!(report.added_locals, 3);
        assert_eq!(body.locals[2].sig, TypeSig::Object);
        assert_valid(&body);
        Ok(())
    }

    #[test]
    fn test_repair_is_idempotent() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.label("try")?
            .ldc_i4(1)?
            .brtrue("a")?
            .label("a")?
            .nop()?
            .leave("b")?
            .label("h")?
            .endfinally()?
            .label("b")?
            .ldc_i4(2)?;
        asm.try_finally("try", "h", "h", Some("b"));
        let mut body = asm.finish()?;
        body.remove(body.id_at(2).unwrap());
        body.remove(body.id_at(3).unwrap());

        repair_body(&mut body);
        assert_valid(&body);
        let once = body.clone();
        assert!(!repair_body(&mut body).changed());
        assert_eq!(body, once);
        Ok(())
    }

    #[test]
    fn test_repair_module_canonicalizes_changed_bodies() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.br("end")?.label("end")?.nop()?.ret()?;
        let mut broken = asm.finish()?;
        broken.remove(broken.id_at(1).unwrap());

        let mut asm = InstructionAssembler::new();
        asm.br("end")?.label("end")?.ret()?;
        let intact = asm.finish()?;

        let mut ty = TypeDef::new(Token(0x02000002), "Game", "Player");
        ty.methods
            .push(MethodDef::new(Token(0x06000001), "Broken").with_body(broken));
        ty.methods
            .push(MethodDef::new(Token(0x06000002), "Intact").with_body(intact));
        ty.methods.push(MethodDef::new(Token(0x06000003), "Extern"));
        let mut module = Module::new("Game.dll");
        module.types.push(ty);

        let summary = repair_module(&mut module, &ImageFormat::new());
        assert_eq!(summary.methods_checked, 2);
        assert_eq!(summary.methods_repaired, 1);
        assert_eq!(summary.totals.retargeted_branches, 1);

        let broken = module.types[0].methods[0].body.as_ref().unwrap();
        assert_eq!(broken.at(0).unwrap().opcode, OpCode::BrS);
        let intact = module.types[0].methods[1].body.as_ref().unwrap();
        assert_eq!(intact.at(0).unwrap().opcode, OpCode::Br);
        Ok(())
    }

    #[test]
    fn test_remove_nops_preserving_targets() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.br("pad")?
            .nop()?
            .label("pad")?
            .nop()?
            .nop()?
            .ldc_i4(3)?
            .brtrue("end")?
            .label("end")?
            .nop()?;
        let mut body = asm.finish()?;
        let ldc = body.id_at(4).unwrap();
        let end = body.id_at(6).unwrap();

        let removed = remove_nops_preserving_targets(&mut body);
        assert_eq!(removed, 3);
        assert_eq!(body.len(), 4);
        assert_eq!(body.at(0).unwrap().targets(), vec![ldc]);
        assert!(is_referenced(&body, ldc));
        // A trailing nop has no successor to redirect to and is still referenced.
        assert!(body.is_live(end));
        assert!(is_referenced(&body, end));
        Ok(())
    }

    #[test]
    fn test_replace_instruction_moves_references() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.br("value")?
            .label("value")?
            .ldc_i4(12)?
            .pop()?
            .ret()?;
        let mut body = asm.finish()?;
        let old = body.id_at(1).unwrap();

        let ids = replace_instruction(
            &mut body,
            old,
            vec![
                Instruction::ldc_i4(3),
                Instruction::ldc_i4(4),
                Instruction::simple(OpCode::Mul),
            ],
        )
        .unwrap();

        assert!(!body.is_live(old));
        assert_eq!(body.len(), 6);
        assert_eq!(body.at(0).unwrap().targets(), vec![ids[0]]);
        assert!(replace_instruction(&mut body, old, vec![Instruction::nop()]).is_none());
        assert!(replace_instruction(&mut body, ids[0], Vec::new()).is_none());
        Ok(())
    }
}
