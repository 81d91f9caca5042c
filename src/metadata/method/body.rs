//! Arena representation of CIL method bodies.
//!
//! A [`MethodBody`] owns every instruction it ever contained in an append-only arena and keeps
//! the executable sequence as an ordered list of [`InstrId`]s. Removing an instruction drops its
//! id from the sequence but leaves the arena slot in place, so references held by branches, switch
//! tables and exception handlers stay comparable: a reference is dangling exactly when its id is
//! not in the live sequence.
//!
//! # Examples
//!
//! ```rust
//! use dotmend::assembly::{Instruction, OpCode, Operand};
//! use dotmend::metadata::method::MethodBody;
//!
//! let mut body = MethodBody::new();
//! let exit = body.push(Instruction::ret());
//! let jump = body.insert(0, Instruction::new(OpCode::Br, Operand::Target(exit)));
//!
//! assert_eq!(body.ids(), &[jump, exit]);
//! body.remove(exit);
//! assert!(!body.is_live(exit));
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    assembly::{FlowType, InstrId, Instruction, Operand},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags, Local},
    Result,
};

/// The executable code of one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    /// Every instruction ever added, indexed by [`InstrId`]
    arena: Vec<Instruction>,
    /// The live instruction sequence
    order: Vec<InstrId>,
    /// Declared local variable slots
    #[serde(default)]
    pub locals: Vec<Local>,
    /// A list of exception handlers this method has
    #[serde(default)]
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Maximum number of items on the operand stack
    #[serde(default)]
    pub max_stack: u16,
    /// Flag, indicating to call default constructor on all local variables
    #[serde(default)]
    pub init_locals: bool,
}

impl MethodBody {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a body whose live sequence is `instructions` in order.
    #[must_use]
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        let mut body = Self::new();
        for instruction in instructions {
            body.push(instruction);
        }
        body
    }

    /// Verifies that every id in the live sequence names an arena slot, exactly once.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for out-of-range or duplicated ids.
    pub fn check_arena(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.order.len());
        for id in &self.order {
            if id.index() >= self.arena.len() {
                return Err(malformed_error!(
                    "Instruction {} is outside the arena of {} entries",
                    id,
                    self.arena.len()
                ));
            }
            if !seen.insert(*id) {
                return Err(malformed_error!("Instruction {} appears twice in the body", id));
            }
        }
        Ok(())
    }

    fn allocate(&mut self, instruction: Instruction) -> InstrId {
        // Arena growth beyond u32::MAX ids is not a realistic method body.
        let id = InstrId(self.arena.len() as u32);
        self.arena.push(instruction);
        id
    }

    /// Appends an instruction to the end of the live sequence.
    pub fn push(&mut self, instruction: Instruction) -> InstrId {
        let id = self.allocate(instruction);
        self.order.push(id);
        id
    }

    /// Inserts an instruction at `position` in the live sequence (clamped to the end).
    pub fn insert(&mut self, position: usize, instruction: Instruction) -> InstrId {
        let id = self.allocate(instruction);
        let position = position.min(self.order.len());
        self.order.insert(position, id);
        id
    }

    /// Inserts an instruction right before `anchor`, or returns `None` if `anchor` is not live.
    pub fn insert_before(&mut self, anchor: InstrId, instruction: Instruction) -> Option<InstrId> {
        let position = self.position_of(anchor)?;
        Some(self.insert(position, instruction))
    }

    /// Inserts an instruction right after `anchor`, or returns `None` if `anchor` is not live.
    pub fn insert_after(&mut self, anchor: InstrId, instruction: Instruction) -> Option<InstrId> {
        let position = self.position_of(anchor)?;
        Some(self.insert(position + 1, instruction))
    }

    /// Removes an instruction from the live sequence.
    ///
    /// References to it are left untouched and become dangling. Returns `false` if it was not
    /// live.
    pub fn remove(&mut self, id: InstrId) -> bool {
        match self.position_of(id) {
            Some(position) => {
                self.order.remove(position);
                true
            }
            None => false,
        }
    }

    /// Removes every live instruction for which `predicate` holds, returning how many went.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(InstrId, &Instruction) -> bool,
    {
        let before = self.order.len();
        let arena = &self.arena;
        self.order.retain(|id| {
            arena
                .get(id.index())
                .is_none_or(|instruction| !predicate(*id, instruction))
        });
        before - self.order.len()
    }

    /// Removes every instruction from the live sequence.
    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// The instruction stored under `id`, live or not.
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.arena.get(id.index())
    }

    /// Mutable access to the instruction stored under `id`, live or not.
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.arena.get_mut(id.index())
    }

    /// The live instruction at `position` of the sequence.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&Instruction> {
        self.order.get(position).and_then(|id| self.get(*id))
    }

    /// The id at `position` of the sequence.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<InstrId> {
        self.order.get(position).copied()
    }

    /// The live sequence.
    #[must_use]
    pub fn ids(&self) -> &[InstrId] {
        &self.order
    }

    /// Iterates the live sequence.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.get(*id).map(|instr| (*id, instr)))
    }

    /// Iterates the live instructions without their ids.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.iter().map(|(_, instr)| instr)
    }

    /// Number of live instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no instruction is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of `id` in the live sequence.
    #[must_use]
    pub fn position_of(&self, id: InstrId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Position lookup table for every live instruction.
    #[must_use]
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(position, id)| (*id, position))
            .collect()
    }

    /// Returns `true` if `id` is part of the live sequence.
    #[must_use]
    pub fn is_live(&self, id: InstrId) -> bool {
        self.order.contains(&id)
    }

    /// The set of live ids.
    #[must_use]
    pub fn live_set(&self) -> HashSet<InstrId> {
        self.order.iter().copied().collect()
    }

    /// First live instruction.
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.order.first().copied()
    }

    /// Last live instruction.
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.order.last().copied()
    }

    /// The live instruction following `id`.
    #[must_use]
    pub fn next_after(&self, id: InstrId) -> Option<InstrId> {
        let position = self.position_of(id)?;
        self.id_at(position + 1)
    }

    /// Number of declared local slots.
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Recomputes the IL offset of every live instruction.
    ///
    /// Returns the total code size in bytes.
    pub fn update_offsets(&mut self) -> u32 {
        let mut offset = 0u32;
        for id in &self.order {
            if let Some(instruction) = self.arena.get_mut(id.index()) {
                instruction.offset = offset;
                offset += instruction.size();
            }
        }
        offset
    }

    /// Expands every short-form branch to its long form.
    pub fn simplify_branches(&mut self) {
        for id in &self.order {
            if let Some(instruction) = self.arena.get_mut(id.index()) {
                instruction.opcode = instruction.opcode.to_long_form();
            }
        }
    }

    /// Shrinks every branch whose displacement fits a signed byte to its short form.
    ///
    /// Shrinking only ever reduces distances, so once a branch fits it keeps fitting; the loop
    /// runs until no further branch can be shrunk. Offsets are current on return.
    pub fn optimize_branches(&mut self) {
        loop {
            self.update_offsets();
            let positions = self.positions();
            let mut changed = false;

            for (position, id) in self.order.iter().enumerate() {
                let Some(instruction) = self.arena.get(id.index()) else {
                    continue;
                };
                let short = instruction.opcode.to_short_form();
                if short == instruction.opcode {
                    continue;
                }
                let Operand::Target(target) = instruction.operand else {
                    continue;
                };
                let (Some(target_position), Some(target_instr)) =
                    (positions.get(&target), self.arena.get(target.index()))
                else {
                    continue;
                };

                // Displacement as measured after this branch shrinks by three bytes.
                let long_size = i64::from(instruction.size());
                let short_size = long_size - 3;
                let mut target_offset = i64::from(target_instr.offset);
                if *target_position > position {
                    target_offset -= 3;
                }
                let displacement = target_offset - (i64::from(instruction.offset) + short_size);

                if i8::try_from(displacement).is_ok() {
                    if let Some(instruction) = self.arena.get_mut(id.index()) {
                        instruction.opcode = short;
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Computes the maximum evaluation stack depth over every reachable path.
    ///
    /// Each position is visited once, with the first depth that reaches it. Handler blocks are
    /// entered with the exception object on the stack, finally and fault blocks with an empty one.
    #[must_use]
    pub fn compute_max_stack(&self) -> u16 {
        let positions = self.positions();
        let mut depths: Vec<Option<u32>> = vec![None; self.order.len()];
        let mut worklist: Vec<(usize, u32)> = Vec::new();
        if !self.order.is_empty() {
            worklist.push((0, 0));
        }
        for handler in &self.exception_handlers {
            let entry = if handler
                .flags
                .intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT)
            {
                0
            } else {
                1
            };
            if let Some(position) = positions.get(&handler.handler_start) {
                worklist.push((*position, entry));
            }
            if let Some(position) = handler.filter_start.and_then(|id| positions.get(&id)) {
                worklist.push((*position, 1));
            }
        }

        let mut max = 0u32;
        while let Some((position, depth)) = worklist.pop() {
            let Some(slot) = depths.get_mut(position) else {
                continue;
            };
            if slot.is_some() {
                continue;
            }
            *slot = Some(depth);

            let Some(instruction) = self.at(position) else {
                continue;
            };
            let (pops, pushes) = instruction.opcode.stack_effect();
            let after = depth.saturating_sub(u32::from(pops)) + u32::from(pushes);
            max = max.max(depth).max(after);

            let flow = instruction.flow_type();
            let after = if flow == FlowType::Leave { 0 } else { after };
            for target in instruction.targets() {
                if let Some(target_position) = positions.get(&target) {
                    worklist.push((*target_position, after));
                }
            }
            if !flow.is_terminal() {
                worklist.push((position + 1, after));
            }
        }

        u16::try_from(max).unwrap_or(u16::MAX)
    }

    /// Returns `true` if the last live instruction never falls through.
    #[must_use]
    pub fn ends_with_terminator(&self) -> bool {
        self.last()
            .and_then(|id| self.get(id))
            .is_some_and(|instr| instr.flow_type().is_terminal())
    }

    /// Number of live instructions that are branches (conditional, unconditional or `leave`).
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.instructions().filter(|instr| instr.is_branch()).count()
    }

    /// Returns `true` if any live instruction is a `switch`.
    #[must_use]
    pub fn has_switch(&self) -> bool {
        self.instructions().any(Instruction::is_switch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::OpCode;

    fn sample() -> (MethodBody, Vec<InstrId>) {
        let mut body = MethodBody::new();
        let a = body.push(Instruction::ldc_i4(1));
        let b = body.push(Instruction::simple(OpCode::Pop));
        let c = body.push(Instruction::ret());
        (body, vec![a, b, c])
    }

    #[test]
    fn test_push_insert_remove() {
        let (mut body, ids) = sample();
        assert_eq!(body.len(), 3);
        assert_eq!(body.first(), Some(ids[0]));
        assert_eq!(body.last(), Some(ids[2]));

        let nop = body.insert_after(ids[0], Instruction::nop()).unwrap();
        assert_eq!(body.ids(), &[ids[0], nop, ids[1], ids[2]]);
        assert_eq!(body.next_after(ids[0]), Some(nop));

        assert!(body.remove(nop));
        assert!(!body.remove(nop));
        assert!(!body.is_live(nop));
        assert!(body.get(nop).is_some());
        assert_eq!(body.position_of(ids[2]), Some(2));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let (mut body, ids) = sample();
        body.remove(ids[1]);
        let fresh = body.push(Instruction::nop());
        assert!(!ids.contains(&fresh));
    }

    #[test]
    fn test_remove_where() {
        let (mut body, ids) = sample();
        body.insert(0, Instruction::nop());
        body.insert(2, Instruction::nop());
        assert_eq!(body.remove_where(|_, instr| instr.is_nop()), 2);
        assert_eq!(body.ids(), ids.as_slice());
    }

    #[test]
    fn test_update_offsets() {
        let (mut body, ids) = sample();
        let size = body.update_offsets();
        assert_eq!(size, 3);
        assert_eq!(body.get(ids[2]).unwrap().offset, 2);
    }

    #[test]
    fn test_optimize_branches_shrinks_near_targets() {
        let mut body = MethodBody::new();
        let exit = body.push(Instruction::ret());
        let jump = body.insert(0, Instruction::new(OpCode::Br, Operand::Target(exit)));
        body.insert(1, Instruction::nop());

        body.optimize_branches();
        assert_eq!(body.get(jump).unwrap().opcode, OpCode::BrS);
        assert_eq!(body.get(exit).unwrap().offset, 3);

        body.simplify_branches();
        assert_eq!(body.get(jump).unwrap().opcode, OpCode::Br);
    }

    #[test]
    fn test_optimize_branches_keeps_far_targets_long() {
        let mut body = MethodBody::new();
        let exit = body.push(Instruction::ret());
        let jump = body.insert(0, Instruction::new(OpCode::Brtrue, Operand::Target(exit)));
        for _ in 0..200 {
            body.insert(1, Instruction::nop());
        }

        body.optimize_branches();
        assert_eq!(body.get(jump).unwrap().opcode, OpCode::Brtrue);
    }

    #[test]
    fn test_check_arena() {
        let (body, _) = sample();
        assert!(body.check_arena().is_ok());

        let json = r#"{"arena":[{"opcode":"ret"}],"order":[0,0],"max_stack":8,"init_locals":true}"#;
        let broken: MethodBody = serde_json::from_str(json).unwrap();
        assert!(broken.check_arena().is_err());

        let json = r#"{"arena":[{"opcode":"ret"}],"order":[3]}"#;
        let broken: MethodBody = serde_json::from_str(json).unwrap();
        assert!(broken.check_arena().is_err());
    }

    #[test]
    fn test_compute_max_stack() {
        let mut body = MethodBody::new();
        body.push(Instruction::ldc_i4(1));
        body.push(Instruction::ldc_i4(2));
        body.push(Instruction::simple(OpCode::Dup));
        body.push(Instruction::simple(OpCode::Add));
        body.push(Instruction::simple(OpCode::Add));
        body.push(Instruction::ret());
        assert_eq!(body.compute_max_stack(), 3);

        assert_eq!(MethodBody::new().compute_max_stack(), 0);
    }

    #[test]
    fn test_terminator_and_counts() {
        let (mut body, ids) = sample();
        assert!(body.ends_with_terminator());
        body.insert(0, Instruction::new(OpCode::BrS, Operand::Target(ids[2])));
        assert_eq!(body.branch_count(), 1);
        assert!(!body.has_switch());

        body.remove(ids[2]);
        assert!(!body.ends_with_terminator());
        body.clear();
        assert!(!body.ends_with_terminator());
    }
}
