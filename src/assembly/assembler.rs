//! Label-based construction of method bodies.
//!
//! [`InstructionAssembler`] is the fluent way to write a [`MethodBody`] by hand: every emitting
//! method returns `Result<&mut Self>` so calls chain with `?`, branches and handler boundaries
//! name labels, and [`InstructionAssembler::finish`] resolves every label to the [`InstrId`] of
//! the instruction it precedes.
//!
//! # Examples
//!
//! ```rust
//! use dotmend::assembly::InstructionAssembler;
//!
//! let mut asm = InstructionAssembler::new();
//! asm.ldc_i4(5)?
//!     .stloc(0)?
//!     .ldloc(0)?
//!     .brtrue("done")?
//!     .nop()?
//!     .label("done")?
//!     .ret()?;
//!
//! let body = asm.finish()?;
//! assert_eq!(body.len(), 6);
//! assert_eq!(body.local_count(), 1);
//! # Ok::<(), dotmend::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{Immediate, InstrId, Instruction, OpCode, Operand, OperandType},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, Local, MethodBody},
        token::Token,
        typesystem::TypeSig,
    },
    Error, Result,
};

/// A handler whose boundaries are still label names.
struct HandlerFixup {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: Option<String>,
    filter_start: Option<String>,
    catch_type: Option<String>,
}

/// Fluent builder for [`MethodBody`] values.
///
/// Labels bind to the next instruction emitted after their definition. Local slots referenced by
/// `ldloc` / `stloc` are declared automatically as `object` unless declared first with
/// [`InstructionAssembler::local`].
pub struct InstructionAssembler {
    body: MethodBody,
    /// Defined labels (label_name -> instruction id)
    labels: HashMap<String, InstrId>,
    /// Labels defined since the last emitted instruction
    pending: Vec<String>,
    /// Branches awaiting label resolution
    fixups: Vec<(InstrId, String)>,
    /// Switches awaiting label resolution
    switch_fixups: Vec<(InstrId, Vec<String>)>,
    handlers: Vec<HandlerFixup>,
    auto_locals: bool,
}

impl Default for InstructionAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        let mut body = MethodBody::new();
        body.max_stack = 8;
        body.init_locals = true;

        InstructionAssembler {
            body,
            labels: HashMap::new(),
            pending: Vec::new(),
            fixups: Vec::new(),
            switch_fixups: Vec::new(),
            handlers: Vec::new(),
            auto_locals: true,
        }
    }

    /// Disables automatic declaration of referenced local slots.
    ///
    /// Useful to build bodies that reference undeclared locals on purpose.
    pub fn without_auto_locals(&mut self) -> &mut Self {
        self.auto_locals = false;
        self
    }

    /// Sets the declared maximum stack depth (default 8).
    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.body.max_stack = max_stack;
        self
    }

    /// Declares the next local slot with the given type.
    pub fn local(&mut self, sig: TypeSig) -> &mut Self {
        self.body.locals.push(Local::new(sig));
        self
    }

    /// Defines a label at the current position.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] if `name` was defined before.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.contains_key(name) || self.pending.iter().any(|pending| pending == name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        self.pending.push(name.to_string());
        Ok(self)
    }

    /// Emits an already constructed instruction.
    ///
    /// # Errors
    /// Currently infallible; returns `Result` to chain with the other emitters.
    pub fn emit(&mut self, instruction: Instruction) -> Result<&mut Self> {
        self.push(instruction);
        Ok(self)
    }

    fn push(&mut self, instruction: Instruction) -> InstrId {
        if let Some(index) = instruction.local_index() {
            self.touch_local(index);
        }

        let id = self.body.push(instruction);
        for name in self.pending.drain(..) {
            self.labels.insert(name, id);
        }
        id
    }

    fn touch_local(&mut self, index: u16) {
        if !self.auto_locals {
            return;
        }
        while self.body.locals.len() <= usize::from(index) {
            self.body.locals.push(Local::new(TypeSig::Object));
        }
    }

    /// Emits an instruction that takes no operand.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `opcode` requires an operand.
    pub fn op(&mut self, opcode: OpCode) -> Result<&mut Self> {
        if opcode.operand_type() != OperandType::None {
            return Err(malformed_error!("Opcode '{}' requires an operand", opcode));
        }
        self.emit(Instruction::simple(opcode))
    }

    /// Emits a branch to `label`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `opcode` is not a single-target branch.
    pub fn branch(&mut self, opcode: OpCode, label: &str) -> Result<&mut Self> {
        if !opcode.is_branch() {
            return Err(malformed_error!("Opcode '{}' is not a branch", opcode));
        }
        // Placeholder target; resolved in `finish`.
        let id = self.push(Instruction::new(opcode, Operand::Target(InstrId(u32::MAX))));
        self.fixups.push((id, label.to_string()));
        Ok(self)
    }

    /// Emits a `switch` over `labels`.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if `labels` is empty.
    pub fn switch(&mut self, labels: &[&str]) -> Result<&mut Self> {
        if labels.is_empty() {
            return Err(malformed_error!("Switch instruction requires at least one target"));
        }
        let id = self.push(Instruction::new(OpCode::Switch, Operand::Switch(Vec::new())));
        self.switch_fixups
            .push((id, labels.iter().map(|label| (*label).to_string()).collect()));
        Ok(self)
    }

    /// Registers a typed catch clause over labelled boundaries.
    ///
    /// `handler_end` of `None` means the handler runs to the end of the body.
    pub fn try_catch(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: Option<&str>,
        catch_type: &str,
    ) -> &mut Self {
        self.handlers.push(HandlerFixup {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.map(str::to_string),
            filter_start: None,
            catch_type: Some(catch_type.to_string()),
        });
        self
    }

    /// Registers a finally clause over labelled boundaries.
    pub fn try_finally(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: Option<&str>,
    ) -> &mut Self {
        self.handlers.push(HandlerFixup {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.map(str::to_string),
            filter_start: None,
            catch_type: None,
        });
        self
    }

    /// Registers a filter clause over labelled boundaries.
    pub fn try_filter(
        &mut self,
        try_start: &str,
        try_end: &str,
        filter_start: &str,
        handler_start: &str,
        handler_end: Option<&str>,
    ) -> &mut Self {
        self.handlers.push(HandlerFixup {
            flags: ExceptionHandlerFlags::FILTER,
            try_start: try_start.to_string(),
            try_end: try_end.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.map(str::to_string),
            filter_start: Some(filter_start.to_string()),
            catch_type: None,
        });
        self
    }

    /// Emits `nop`.
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Nop)
    }

    /// Emits `ret`.
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Ret)
    }

    /// Emits `add`.
    pub fn add(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Add)
    }

    /// Emits `sub`.
    pub fn sub(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Sub)
    }

    /// Emits `mul`.
    pub fn mul(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Mul)
    }

    /// Emits `div`.
    pub fn div(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Div)
    }

    /// Emits `dup`.
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Dup)
    }

    /// Emits `pop`.
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Pop)
    }

    /// Emits `ceq`.
    pub fn ceq(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Ceq)
    }

    /// Emits `throw`.
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Throw)
    }

    /// Emits `ldind.i4`.
    pub fn ldind_i4(&mut self) -> Result<&mut Self> {
        self.op(OpCode::LdindI4)
    }

    /// Emits `endfinally`.
    pub fn endfinally(&mut self) -> Result<&mut Self> {
        self.op(OpCode::Endfinally)
    }

    /// Emits the shortest `ldc.i4` form for `value`.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        self.emit(Instruction::ldc_i4(value))
    }

    /// Emits the shortest `ldloc` form for `index`.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        let instruction = match index {
            0 => Instruction::simple(OpCode::Ldloc0),
            1 => Instruction::simple(OpCode::Ldloc1),
            2 => Instruction::simple(OpCode::Ldloc2),
            3 => Instruction::simple(OpCode::Ldloc3),
            0..=255 => Instruction::new(OpCode::LdlocS, Operand::Local(index)),
            _ => Instruction::new(OpCode::Ldloc, Operand::Local(index)),
        };
        self.emit(instruction)
    }

    /// Emits the shortest `stloc` form for `index`.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        let instruction = match index {
            0 => Instruction::simple(OpCode::Stloc0),
            1 => Instruction::simple(OpCode::Stloc1),
            2 => Instruction::simple(OpCode::Stloc2),
            3 => Instruction::simple(OpCode::Stloc3),
            0..=255 => Instruction::new(OpCode::StlocS, Operand::Local(index)),
            _ => Instruction::new(OpCode::Stloc, Operand::Local(index)),
        };
        self.emit(instruction)
    }

    /// Emits the shortest `ldarg` form for `index`.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        let instruction = match index {
            0 => Instruction::simple(OpCode::Ldarg0),
            1 => Instruction::simple(OpCode::Ldarg1),
            2 => Instruction::simple(OpCode::Ldarg2),
            3 => Instruction::simple(OpCode::Ldarg3),
            0..=255 => Instruction::new(OpCode::LdargS, Operand::Argument(index)),
            _ => Instruction::new(OpCode::Ldarg, Operand::Argument(index)),
        };
        self.emit(instruction)
    }

    /// Emits `ldsflda` of the given field.
    pub fn ldsflda(&mut self, field: Token) -> Result<&mut Self> {
        self.emit(Instruction::new(OpCode::Ldsflda, Operand::Token(field)))
    }

    /// Emits `call` of the given method.
    pub fn call(&mut self, method: Token) -> Result<&mut Self> {
        self.emit(Instruction::new(OpCode::Call, Operand::Token(method)))
    }

    /// Emits `ldstr` of a literal.
    pub fn ldstr(&mut self, value: &str) -> Result<&mut Self> {
        self.emit(Instruction::new(OpCode::Ldstr, Operand::String(value.to_string())))
    }

    /// Emits `ldc.i8`.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit(Instruction::new(
            OpCode::LdcI8,
            Operand::Immediate(Immediate::Int64(value)),
        ))
    }

    /// Emits `br` to `label`.
    pub fn br(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Br, label)
    }

    /// Emits `brtrue` to `label`.
    pub fn brtrue(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Brtrue, label)
    }

    /// Emits `brfalse` to `label`.
    pub fn brfalse(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Brfalse, label)
    }

    /// Emits `beq` to `label`.
    pub fn beq(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Beq, label)
    }

    /// Emits `bne.un` to `label`.
    pub fn bne_un(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::BneUn, label)
    }

    /// Emits `leave` to `label`.
    pub fn leave(&mut self, label: &str) -> Result<&mut Self> {
        self.branch(OpCode::Leave, label)
    }

    fn resolve(&self, label: &str) -> Result<InstrId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::UndefinedLabel(label.to_string()))
    }

    /// Resolves every label and returns the finished body.
    ///
    /// # Errors
    /// Returns [`Error::UndefinedLabel`] for references to labels that were never defined and
    /// [`Error::Malformed`] for labels that are not followed by an instruction.
    pub fn finish(mut self) -> Result<MethodBody> {
        if let Some(name) = self.pending.first() {
            return Err(malformed_error!(
                "Label '{}' is not followed by an instruction",
                name
            ));
        }

        for (id, label) in &self.fixups {
            let target = self.resolve(label)?;
            if let Some(instruction) = self.body.get_mut(*id) {
                instruction.operand = Operand::Target(target);
            }
        }

        for (id, labels) in &self.switch_fixups {
            let targets = labels
                .iter()
                .map(|label| self.resolve(label))
                .collect::<Result<Vec<_>>>()?;
            if let Some(instruction) = self.body.get_mut(*id) {
                instruction.operand = Operand::Switch(targets);
            }
        }

        for handler in &self.handlers {
            let resolved = ExceptionHandler {
                flags: handler.flags,
                try_start: self.resolve(&handler.try_start)?,
                try_end: self.resolve(&handler.try_end)?,
                handler_start: self.resolve(&handler.handler_start)?,
                handler_end: handler
                    .handler_end
                    .as_deref()
                    .map(|label| self.resolve(label))
                    .transpose()?,
                filter_start: handler
                    .filter_start
                    .as_deref()
                    .map(|label| self.resolve(label))
                    .transpose()?,
                catch_type: handler.catch_type.clone(),
            };
            self.body.exception_handlers.push(resolved);
        }

        self.body.update_offsets();
        Ok(self.body)
    }
}
