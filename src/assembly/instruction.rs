//! CIL instruction representation, operand types, and control flow classification.
//!
//! Instructions live inside a [`crate::metadata::method::MethodBody`] arena and refer to each
//! other through stable [`InstrId`]s rather than byte offsets. This keeps branch targets, switch
//! tables and exception-handler boundaries meaningful while stages insert, delete and reorder
//! instructions: a reference is valid exactly when its id is still part of the body's live
//! sequence.
//!
//! # Key Components
//!
//! - [`Instruction`] - Opcode plus typed operand
//! - [`Operand`] - Type-safe operand representation
//! - [`Immediate`] - Immediate value types
//! - [`FlowType`] - Control flow behavior classification
//! - [`InstrId`] - Stable arena handle of an instruction

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    assembly::opcodes::{OpCode, OperandType},
    metadata::token::Token,
};

/// Stable identity of an instruction within its body's arena.
///
/// Ids are never reused inside one body, so a dangling reference can always be detected by a
/// membership test against the live sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrId(pub u32);

impl InstrId {
    /// Returns the raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An immediate value embedded in a CIL instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl Immediate {
    /// Returns the value as an `i32` when it is a 32-bit-or-narrower integer.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Immediate::Int8(value) => Some(i32::from(*value)),
            Immediate::Int32(value) => Some(*value),
            Immediate::Int64(_) | Immediate::Float32(_) | Immediate::Float64(_) => None,
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(value) => write!(f, "{value}"),
            Immediate::Int32(value) => write!(f, "{value}"),
            Immediate::Int64(value) => write!(f, "{value}"),
            Immediate::Float32(value) => write!(f, "{value}"),
            Immediate::Float64(value) => write!(f, "{value}"),
        }
    }
}

/// The operand of an instruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Operand {
    /// No operand present
    #[default]
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Local variable index
    Local(u16),
    /// Method argument index
    Argument(u16),
    /// Branch target
    Target(InstrId),
    /// Switch table, in case order
    Switch(Vec<InstrId>),
    /// Metadata token reference
    Token(Token),
    /// User string literal (`ldstr`)
    String(String),
}

impl Operand {
    /// Returns `true` if no operand is present.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Operand::None)
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally or filter block
    EndFinally,
    /// Leave protected region (try/catch/finally)
    Leave,
}

impl FlowType {
    /// Returns `true` if control can never fall through past an instruction of this kind.
    ///
    /// This is the set a method body is allowed to end with: returns (including `endfinally` /
    /// `endfilter`), throws, and unconditional transfers (`br`, `leave`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowType::Return
                | FlowType::EndFinally
                | FlowType::Throw
                | FlowType::UnconditionalBranch
                | FlowType::Leave
        )
    }
}

/// A CIL instruction: opcode and operand, plus its most recently computed IL offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The operation
    pub opcode: OpCode,
    /// The operand data for this instruction
    #[serde(default, skip_serializing_if = "Operand::is_none")]
    pub operand: Operand,
    /// IL offset, valid after [`crate::metadata::method::MethodBody::update_offsets`]
    #[serde(default)]
    pub offset: u32,
}

impl Instruction {
    /// Creates an instruction with the given operand.
    #[must_use]
    pub fn new(opcode: OpCode, operand: Operand) -> Self {
        Instruction {
            opcode,
            operand,
            offset: 0,
        }
    }

    /// Creates an instruction without an operand.
    #[must_use]
    pub fn simple(opcode: OpCode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// Creates the shortest `ldc.i4` form that pushes `value`.
    #[must_use]
    pub fn ldc_i4(value: i32) -> Self {
        match value {
            -1 => Self::simple(OpCode::LdcI4M1),
            0 => Self::simple(OpCode::LdcI4_0),
            1 => Self::simple(OpCode::LdcI4_1),
            2 => Self::simple(OpCode::LdcI4_2),
            3 => Self::simple(OpCode::LdcI4_3),
            4 => Self::simple(OpCode::LdcI4_4),
            5 => Self::simple(OpCode::LdcI4_5),
            6 => Self::simple(OpCode::LdcI4_6),
            7 => Self::simple(OpCode::LdcI4_7),
            8 => Self::simple(OpCode::LdcI4_8),
            _ => match i8::try_from(value) {
                Ok(short) => Self::new(OpCode::LdcI4S, Operand::Immediate(Immediate::Int8(short))),
                Err(_) => Self::new(OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value))),
            },
        }
    }

    /// Creates a `ret`.
    #[must_use]
    pub fn ret() -> Self {
        Self::simple(OpCode::Ret)
    }

    /// Creates a `nop`.
    #[must_use]
    pub fn nop() -> Self {
        Self::simple(OpCode::Nop)
    }

    /// How this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Returns `true` for conditional and unconditional branches (not switch).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    /// Returns `true` for `switch`.
    #[must_use]
    pub fn is_switch(&self) -> bool {
        self.opcode == OpCode::Switch
    }

    /// Returns `true` for `nop`.
    #[must_use]
    pub fn is_nop(&self) -> bool {
        self.opcode == OpCode::Nop
    }

    /// Returns `true` if this is any `ldc.i4` form.
    #[must_use]
    pub fn is_i4_constant(&self) -> bool {
        self.i4_value().is_some()
    }

    /// The pushed value of an `ldc.i4` form.
    ///
    /// `ldc.i4.s` / `ldc.i4` with a missing or mistyped operand yield `None`.
    #[must_use]
    pub fn i4_value(&self) -> Option<i32> {
        if let Some(value) = self.opcode.implicit_i4() {
            return Some(value);
        }

        match (self.opcode, &self.operand) {
            (OpCode::LdcI4S | OpCode::LdcI4, Operand::Immediate(imm)) => imm.as_i32(),
            _ => None,
        }
    }

    /// The local slot a `ldloc` / `stloc` form refers to, explicit or implicit.
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        let addresses_local = self.opcode.is_load_local()
            || self.opcode.is_store_local()
            || self.opcode == OpCode::LdlocaS;
        if !addresses_local {
            return None;
        }

        if let Some(index) = self.opcode.implicit_local() {
            return Some(index);
        }

        match self.operand {
            Operand::Local(index) => Some(index),
            _ => None,
        }
    }

    /// All instructions this instruction can transfer control to.
    #[must_use]
    pub fn targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if this instruction's operand references `id`.
    #[must_use]
    pub fn references(&self, id: InstrId) -> bool {
        match &self.operand {
            Operand::Target(target) => *target == id,
            Operand::Switch(targets) => targets.contains(&id),
            _ => false,
        }
    }

    /// Encoded size in bytes for the current opcode and operand.
    #[must_use]
    pub fn size(&self) -> u32 {
        let operand = match self.opcode.operand_type() {
            OperandType::Switch => {
                let count = match &self.operand {
                    Operand::Switch(targets) => targets.len() as u32,
                    _ => 0,
                };
                4 + 4 * count
            }
            other => other.size().unwrap_or(0),
        };

        self.opcode.size() + operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04X}: {}", self.offset, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(imm) => write!(f, " {imm}"),
            Operand::Local(index) => write!(f, " V_{index}"),
            Operand::Argument(index) => write!(f, " A_{index}"),
            Operand::Target(target) => write!(f, " {target}"),
            Operand::Switch(targets) => {
                let list: Vec<String> = targets.iter().map(ToString::to_string).collect();
                write!(f, " ({})", list.join(", "))
            }
            Operand::Token(token) => write!(f, " {token}"),
            Operand::String(value) => write!(f, " \"{value}\""),
        }
    }
}
