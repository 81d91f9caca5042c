//! Bounded partial evaluation of method body prefixes.
//!
//! [`PartialEvaluator`] replays a method from its first instruction until control reaches a
//! target instruction and reports a concrete `i32` found there: the value of a local, or the top
//! of the evaluation stack. It understands the arithmetic and control idioms obfuscators use to
//! hide constants and treats every other opcode as a no-op.
//!
//! Every result is either [`Evaluated::Known`] or [`Evaluated::Unknown`] with the reason. Faults
//! are detected per step (an underflowing pop, a local slot outside the frame) and end the run;
//! they are never replaced by a guessed value.
//!
//! # Interpreted subset
//!
//! | Opcodes | Effect |
//! |---------|--------|
//! | `ldc.i4*` | push the literal |
//! | `ldloc*` / `stloc*` | load / store a local, explicit or implicit slot |
//! | `add` `sub` `mul` `div` | wrapping `i32` arithmetic, division by zero yields 0 |
//! | `dup` / `pop` | duplicate / discard the top of stack |
//! | `br` / `br.s` | jump, if the target is live in the same body |
//! | `beq*` / `bne.un*` | compare and jump, if the target is live in the same body |
//! | `ldind.i4` | little-endian read from the caller's buffer, 0 when out of range |
//! | `ldsflda` | push base address 0 |

use std::fmt;

use crate::{
    assembly::{InstrId, Instruction, OpCode, Operand},
    metadata::method::MethodBody,
};

/// Default number of instructions a run may visit.
pub const DEFAULT_STEP_BUDGET: usize = 20_000;

/// Default value the detected base-pointer local is pre-seeded with.
pub const DEFAULT_OFFSET_SHIFT: i32 = 4;

/// Why an evaluation produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    /// The target instruction is not part of the body's live sequence.
    TargetNotInBody,
    /// Execution ran off the end of the body without reaching the target.
    NotReached,
    /// The step budget ran out before the target was reached.
    BudgetExhausted {
        /// The budget that was exhausted.
        limit: usize,
    },
    /// An instruction popped more values than the stack held.
    StackUnderflow {
        /// The faulting instruction.
        at: InstrId,
    },
    /// A local slot outside the method's frame was accessed or requested.
    LocalOutOfRange {
        /// The requested slot.
        local: u16,
    },
    /// The evaluation stack was empty at the target.
    EmptyStack,
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::TargetNotInBody => write!(f, "target is not in the body"),
            UnknownReason::NotReached => write!(f, "target was never reached"),
            UnknownReason::BudgetExhausted { limit } => {
                write!(f, "step budget of {limit} exhausted")
            }
            UnknownReason::StackUnderflow { at } => write!(f, "stack underflow at {at}"),
            UnknownReason::LocalOutOfRange { local } => write!(f, "local {local} out of range"),
            UnknownReason::EmptyStack => write!(f, "stack empty at target"),
        }
    }
}

/// Outcome of a partial evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluated {
    /// The concrete value at the target.
    Known(i32),
    /// No value could be determined.
    Unknown(UnknownReason),
}

impl Evaluated {
    /// The value, if known.
    #[must_use]
    pub fn known(self) -> Option<i32> {
        match self {
            Evaluated::Known(value) => Some(value),
            Evaluated::Unknown(_) => None,
        }
    }

    /// Returns `true` if no value could be determined.
    #[must_use]
    pub fn is_unknown(self) -> bool {
        matches!(self, Evaluated::Unknown(_))
    }
}

impl From<Result<i32, UnknownReason>> for Evaluated {
    fn from(result: Result<i32, UnknownReason>) -> Self {
        match result {
            Ok(value) => Evaluated::Known(value),
            Err(reason) => Evaluated::Unknown(reason),
        }
    }
}

/// Machine state at the moment the target was reached.
struct Snapshot {
    stack: Vec<i32>,
    locals: Vec<i32>,
}

/// Bounded interpreter over one method body.
///
/// # Examples
///
/// ```rust
/// use dotmend::assembly::InstructionAssembler;
/// use dotmend::emulation::{Evaluated, PartialEvaluator};
///
/// let mut asm = InstructionAssembler::new();
/// asm.ldc_i4(5)?.stloc(0)?.ldc_i4(3)?.ldloc(0)?.add()?.stloc(0)?.label("target")?.ret()?;
/// let body = asm.finish()?;
/// let target = body.last().unwrap();
///
/// let evaluator = PartialEvaluator::new(&body);
/// assert_eq!(evaluator.resolve_local_at(target, 0), Evaluated::Known(8));
/// # Ok::<(), dotmend::Error>(())
/// ```
pub struct PartialEvaluator<'a> {
    body: &'a MethodBody,
    buffer: Option<&'a [u8]>,
    step_budget: usize,
    offset_shift: Option<i32>,
}

impl<'a> PartialEvaluator<'a> {
    /// An evaluator with the default budget and offset shift and no buffer.
    #[must_use]
    pub fn new(body: &'a MethodBody) -> Self {
        PartialEvaluator {
            body,
            buffer: None,
            step_budget: DEFAULT_STEP_BUDGET,
            offset_shift: Some(DEFAULT_OFFSET_SHIFT),
        }
    }

    /// Supplies the data `ldind.i4` reads from.
    #[must_use]
    pub fn with_buffer(mut self, buffer: &'a [u8]) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Sets the maximum number of instructions a run may visit.
    #[must_use]
    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    /// Sets the value the detected base-pointer local is pre-seeded with.
    #[must_use]
    pub fn with_offset_shift(mut self, offset_shift: i32) -> Self {
        self.offset_shift = Some(offset_shift);
        self
    }

    /// Disables base-pointer pre-seeding.
    #[must_use]
    pub fn without_offset_shift(mut self) -> Self {
        self.offset_shift = None;
        self
    }

    /// Value of local slot `local` when control reaches `target`.
    ///
    /// Before emulating, locals assigned by an `ldc.i4; stloc` pair laid out ahead of the target
    /// are seeded with those constants, and the local found by
    /// [`detect_offset_shift_local`] is seeded with the offset shift.
    #[must_use]
    pub fn resolve_local_at(&self, target: InstrId, local: u16) -> Evaluated {
        if usize::from(local) >= self.body.local_count() {
            return Evaluated::Unknown(UnknownReason::LocalOutOfRange { local });
        }

        self.run(target, self.seeded_locals(target))
            .and_then(|snapshot| {
                snapshot
                    .locals
                    .get(usize::from(local))
                    .copied()
                    .ok_or(UnknownReason::LocalOutOfRange { local })
            })
            .into()
    }

    /// Top of the evaluation stack when control reaches `target`.
    #[must_use]
    pub fn peek_stack_at(&self, target: InstrId) -> Evaluated {
        let locals = vec![0; self.body.local_count()];
        self.run(target, locals)
            .and_then(|snapshot| snapshot.stack.last().copied().ok_or(UnknownReason::EmptyStack))
            .into()
    }

    fn seeded_locals(&self, target: InstrId) -> Vec<i32> {
        let mut locals = vec![0; self.body.local_count()];

        let base_local = detect_offset_shift_local(self.body);
        if let (Some(shift), Some(index)) = (self.offset_shift, base_local) {
            if let Some(slot) = locals.get_mut(usize::from(index)) {
                *slot = shift;
            }
        }

        let mut previous: Option<&Instruction> = None;
        for (id, instruction) in self.body.iter() {
            if id == target {
                break;
            }
            if instruction.opcode.is_store_local() {
                if let (Some(index), Some(value)) = (
                    instruction.local_index(),
                    previous.and_then(Instruction::i4_value),
                ) {
                    if let Some(slot) = locals.get_mut(usize::from(index)) {
                        *slot = value;
                    }
                }
            }
            previous = Some(instruction);
        }

        locals
    }

    fn run(&self, target: InstrId, mut locals: Vec<i32>) -> Result<Snapshot, UnknownReason> {
        let positions = self.body.positions();
        if !positions.contains_key(&target) {
            return Err(UnknownReason::TargetNotInBody);
        }

        let mut stack: Vec<i32> = Vec::new();
        let mut ip = 0usize;
        let mut steps = 0usize;

        loop {
            let Some(id) = self.body.id_at(ip) else {
                return Err(UnknownReason::NotReached);
            };
            if steps >= self.step_budget {
                return Err(UnknownReason::BudgetExhausted {
                    limit: self.step_budget,
                });
            }
            steps += 1;

            if id == target {
                return Ok(Snapshot { stack, locals });
            }
            let Some(instruction) = self.body.get(id) else {
                return Err(UnknownReason::NotReached);
            };

            let jump = self.step(id, instruction, &mut stack, &mut locals)?;
            ip = match jump.and_then(|target| positions.get(&target)) {
                Some(position) => *position,
                None => ip + 1,
            };
        }
    }

    /// Executes one instruction, returning the branch target to continue at, if taken.
    fn step(
        &self,
        id: InstrId,
        instruction: &Instruction,
        stack: &mut Vec<i32>,
        locals: &mut [i32],
    ) -> Result<Option<InstrId>, UnknownReason> {
        let underflow = UnknownReason::StackUnderflow { at: id };

        if let Some(value) = instruction.i4_value() {
            stack.push(value);
            return Ok(None);
        }

        let opcode = instruction.opcode;
        if opcode.is_load_local() {
            let slot = local_slot(instruction, locals.len())?;
            stack.push(locals[slot]);
            return Ok(None);
        }
        if opcode.is_store_local() {
            let slot = local_slot(instruction, locals.len())?;
            locals[slot] = stack.pop().ok_or(underflow)?;
            return Ok(None);
        }

        match opcode {
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                let b = stack.pop().ok_or(underflow)?;
                let a = stack.pop().ok_or(underflow)?;
                stack.push(match opcode {
                    OpCode::Add => a.wrapping_add(b),
                    OpCode::Sub => a.wrapping_sub(b),
                    OpCode::Mul => a.wrapping_mul(b),
                    _ if b == 0 => 0,
                    _ => a.wrapping_div(b),
                });
            }
            OpCode::Dup => {
                let top = *stack.last().ok_or(underflow)?;
                stack.push(top);
            }
            OpCode::Pop => {
                stack.pop().ok_or(underflow)?;
            }
            OpCode::LdindI4 => {
                let address = stack.pop().ok_or(underflow)?;
                stack.push(self.read_i4(address));
            }
            OpCode::Ldsflda => stack.push(0),
            OpCode::Br | OpCode::BrS => return Ok(branch_target(instruction)),
            OpCode::Beq | OpCode::BeqS | OpCode::BneUn | OpCode::BneUnS => {
                let b = stack.pop().ok_or(underflow)?;
                let a = stack.pop().ok_or(underflow)?;
                let equal_branch = matches!(opcode, OpCode::Beq | OpCode::BeqS);
                if (a == b) == equal_branch {
                    return Ok(branch_target(instruction));
                }
            }
            _ => {}
        }

        Ok(None)
    }

    fn read_i4(&self, address: i32) -> i32 {
        let Some(buffer) = self.buffer else {
            return 0;
        };
        let Ok(start) = usize::try_from(address) else {
            return 0;
        };
        start
            .checked_add(4)
            .and_then(|end| buffer.get(start..end))
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .map_or(0, i32::from_le_bytes)
    }
}

fn local_slot(instruction: &Instruction, frame: usize) -> Result<usize, UnknownReason> {
    let Some(index) = instruction.local_index() else {
        // An explicit-slot form without its operand names no slot at all.
        return Err(UnknownReason::LocalOutOfRange { local: u16::MAX });
    };
    let slot = usize::from(index);
    if slot < frame {
        Ok(slot)
    } else {
        Err(UnknownReason::LocalOutOfRange { local: index })
    }
}

fn branch_target(instruction: &Instruction) -> Option<InstrId> {
    match instruction.operand {
        Operand::Target(target) => Some(target),
        _ => None,
    }
}

/// Finds the base-pointer local of the first `ldloc; add; ldind.i4` sequence in `body`.
///
/// Obfuscators that read constants out of a data blob shift the blob pointer by a fixed header
/// size through such a local.
#[must_use]
pub fn detect_offset_shift_local(body: &MethodBody) -> Option<u16> {
    let instructions: Vec<&Instruction> = body.instructions().collect();
    instructions.windows(3).find_map(|window| {
        let [load, add, read] = window else {
            return None;
        };
        if read.opcode == OpCode::LdindI4
            && add.opcode == OpCode::Add
            && load.opcode.is_load_local()
        {
            load.local_index()
        } else {
            None
        }
    })
}
