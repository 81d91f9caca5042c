//! CIL instruction model and body construction.
//!
//! This module contains everything that describes individual instructions: the opcode table
//! subset the toolkit understands, typed operands whose branch targets are stable
//! [`InstrId`]s, control-flow classification, and the [`InstructionAssembler`] used to build
//! method bodies by hand.
//!
//! # Key Components
//!
//! - [`OpCode`] / [`OperandType`] - Opcode identity, encoding size and operand shape
//! - [`Instruction`] / [`Operand`] / [`Immediate`] - A single instruction and its operand
//! - [`FlowType`] - How an instruction affects control flow
//! - [`InstructionAssembler`] - Label-based fluent body builder
//!
//! # Examples
//!
//! ```rust
//! use dotmend::assembly::{FlowType, Instruction, OpCode};
//!
//! let instr = Instruction::ldc_i4(42);
//! assert_eq!(instr.opcode, OpCode::LdcI4S);
//! assert_eq!(instr.flow_type(), FlowType::Sequential);
//! ```

mod assembler;
mod instruction;
mod opcodes;

pub use assembler::InstructionAssembler;
pub use instruction::{FlowType, Immediate, InstrId, Instruction, Operand};
pub use opcodes::{OpCode, OperandType, FE_PREFIX};
