//! CIL opcodes (ECMA-335) understood by the repair and evaluation layers.
//!
//! [`OpCode`] covers the subset of the instruction set that deobfuscation stages emit and
//! inspect: constants, locals, arguments, arithmetic, comparisons, every branch form, switch,
//! array element access, indirect loads, field/method references and the exception-handling
//! control transfers. Each opcode knows its encoded value, its mnemonic, how it affects control
//! flow and what kind of operand it carries.
//!
//! Single-byte opcodes encode as their byte value. Two-byte opcodes share the `0xFE` prefix and
//! are stored here as `0xFE00 | second_byte`.
#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString, IntoStaticStr};

use crate::assembly::instruction::FlowType;

/// Shared first byte of all two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

/// Kinds of inline operand an opcode expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit local/argument index
    UInt8,
    /// Unsigned 16-bit local/argument index
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference (or user string token)
    Token,
    /// Short (1-byte displacement) branch target
    ShortTarget,
    /// Long (4-byte displacement) branch target
    Target,
    /// Switch table operand
    Switch,
}

impl OperandType {
    /// Returns the encoded size in bytes of this operand type.
    ///
    /// Returns `None` for `Switch`, whose size depends on the number of targets.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortTarget => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Token
            | OperandType::Target => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// A CIL opcode.
///
/// The mnemonic is available through `Into<&'static str>` / [`OpCode::mnemonic`] and parsing
/// from a mnemonic through [`std::str::FromStr`], which image deserialization relies on. Both
/// are derived with `strum` so the spelling matches ILDasm output (`ldc.i4.s`, `bne.un.s`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(into = "&'static str", try_from = "String")]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "break")]
    Break,

    #[strum(serialize = "ldarg.0")]
    Ldarg0,
    #[strum(serialize = "ldarg.1")]
    Ldarg1,
    #[strum(serialize = "ldarg.2")]
    Ldarg2,
    #[strum(serialize = "ldarg.3")]
    Ldarg3,
    #[strum(serialize = "ldarg.s")]
    LdargS,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "starg.s")]
    StargS,

    #[strum(serialize = "ldloc.0")]
    Ldloc0,
    #[strum(serialize = "ldloc.1")]
    Ldloc1,
    #[strum(serialize = "ldloc.2")]
    Ldloc2,
    #[strum(serialize = "ldloc.3")]
    Ldloc3,
    #[strum(serialize = "ldloc.s")]
    LdlocS,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca.s")]
    LdlocaS,
    #[strum(serialize = "stloc.0")]
    Stloc0,
    #[strum(serialize = "stloc.1")]
    Stloc1,
    #[strum(serialize = "stloc.2")]
    Stloc2,
    #[strum(serialize = "stloc.3")]
    Stloc3,
    #[strum(serialize = "stloc.s")]
    StlocS,
    #[strum(serialize = "stloc")]
    Stloc,

    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(serialize = "ldc.i4.0")]
    LdcI4_0,
    #[strum(serialize = "ldc.i4.1")]
    LdcI4_1,
    #[strum(serialize = "ldc.i4.2")]
    LdcI4_2,
    #[strum(serialize = "ldc.i4.3")]
    LdcI4_3,
    #[strum(serialize = "ldc.i4.4")]
    LdcI4_4,
    #[strum(serialize = "ldc.i4.5")]
    LdcI4_5,
    #[strum(serialize = "ldc.i4.6")]
    LdcI4_6,
    #[strum(serialize = "ldc.i4.7")]
    LdcI4_7,
    #[strum(serialize = "ldc.i4.8")]
    LdcI4_8,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldstr")]
    Ldstr,

    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,

    #[strum(serialize = "jmp")]
    Jmp,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "calli")]
    Calli,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "ret")]
    Ret,

    #[strum(serialize = "br.s")]
    BrS,
    #[strum(serialize = "brfalse.s")]
    BrfalseS,
    #[strum(serialize = "brtrue.s")]
    BrtrueS,
    #[strum(serialize = "beq.s")]
    BeqS,
    #[strum(serialize = "bge.s")]
    BgeS,
    #[strum(serialize = "bgt.s")]
    BgtS,
    #[strum(serialize = "ble.s")]
    BleS,
    #[strum(serialize = "blt.s")]
    BltS,
    #[strum(serialize = "bne.un.s")]
    BneUnS,
    #[strum(serialize = "bge.un.s")]
    BgeUnS,
    #[strum(serialize = "bgt.un.s")]
    BgtUnS,
    #[strum(serialize = "ble.un.s")]
    BleUnS,
    #[strum(serialize = "blt.un.s")]
    BltUnS,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "bge.un")]
    BgeUn,
    #[strum(serialize = "bgt.un")]
    BgtUn,
    #[strum(serialize = "ble.un")]
    BleUn,
    #[strum(serialize = "blt.un")]
    BltUn,
    #[strum(serialize = "switch")]
    Switch,

    #[strum(serialize = "ldind.i4")]
    LdindI4,

    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "conv.i4")]
    ConvI4,

    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,

    #[strum(serialize = "ldelem.i1")]
    LdelemI1,
    #[strum(serialize = "ldelem.u1")]
    LdelemU1,
    #[strum(serialize = "ldelem.i2")]
    LdelemI2,
    #[strum(serialize = "ldelem.i4")]
    LdelemI4,
    #[strum(serialize = "ldelem.i8")]
    LdelemI8,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef,
    #[strum(serialize = "stelem.i1")]
    StelemI1,
    #[strum(serialize = "stelem.i2")]
    StelemI2,
    #[strum(serialize = "stelem.i4")]
    StelemI4,
    #[strum(serialize = "stelem.i8")]
    StelemI8,
    #[strum(serialize = "stelem.ref")]
    StelemRef,

    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "rethrow")]
    Rethrow,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "endfilter")]
    Endfilter,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "leave.s")]
    LeaveS,

    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "cgt.un")]
    CgtUn,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "clt.un")]
    CltUn,
}

impl TryFrom<String> for OpCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|_| format!("unknown opcode mnemonic '{value}'"))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl OpCode {
    /// The ILDasm spelling of this opcode.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Encoded opcode value; two-byte opcodes are `0xFE00 | second_byte`.
    #[must_use]
    pub const fn value(self) -> u16 {
        match self {
            OpCode::Nop => 0x00,
            OpCode::Break => 0x01,
            OpCode::Ldarg0 => 0x02,
            OpCode::Ldarg1 => 0x03,
            OpCode::Ldarg2 => 0x04,
            OpCode::Ldarg3 => 0x05,
            OpCode::Ldloc0 => 0x06,
            OpCode::Ldloc1 => 0x07,
            OpCode::Ldloc2 => 0x08,
            OpCode::Ldloc3 => 0x09,
            OpCode::Stloc0 => 0x0A,
            OpCode::Stloc1 => 0x0B,
            OpCode::Stloc2 => 0x0C,
            OpCode::Stloc3 => 0x0D,
            OpCode::LdargS => 0x0E,
            OpCode::StargS => 0x10,
            OpCode::LdlocS => 0x11,
            OpCode::LdlocaS => 0x12,
            OpCode::StlocS => 0x13,
            OpCode::Ldnull => 0x14,
            OpCode::LdcI4M1 => 0x15,
            OpCode::LdcI4_0 => 0x16,
            OpCode::LdcI4_1 => 0x17,
            OpCode::LdcI4_2 => 0x18,
            OpCode::LdcI4_3 => 0x19,
            OpCode::LdcI4_4 => 0x1A,
            OpCode::LdcI4_5 => 0x1B,
            OpCode::LdcI4_6 => 0x1C,
            OpCode::LdcI4_7 => 0x1D,
            OpCode::LdcI4_8 => 0x1E,
            OpCode::LdcI4S => 0x1F,
            OpCode::LdcI4 => 0x20,
            OpCode::LdcI8 => 0x21,
            OpCode::LdcR4 => 0x22,
            OpCode::LdcR8 => 0x23,
            OpCode::Dup => 0x25,
            OpCode::Pop => 0x26,
            OpCode::Jmp => 0x27,
            OpCode::Call => 0x28,
            OpCode::Calli => 0x29,
            OpCode::Ret => 0x2A,
            OpCode::BrS => 0x2B,
            OpCode::BrfalseS => 0x2C,
            OpCode::BrtrueS => 0x2D,
            OpCode::BeqS => 0x2E,
            OpCode::BgeS => 0x2F,
            OpCode::BgtS => 0x30,
            OpCode::BleS => 0x31,
            OpCode::BltS => 0x32,
            OpCode::BneUnS => 0x33,
            OpCode::BgeUnS => 0x34,
            OpCode::BgtUnS => 0x35,
            OpCode::BleUnS => 0x36,
            OpCode::BltUnS => 0x37,
            OpCode::Br => 0x38,
            OpCode::Brfalse => 0x39,
            OpCode::Brtrue => 0x3A,
            OpCode::Beq => 0x3B,
            OpCode::Bge => 0x3C,
            OpCode::Bgt => 0x3D,
            OpCode::Ble => 0x3E,
            OpCode::Blt => 0x3F,
            OpCode::BneUn => 0x40,
            OpCode::BgeUn => 0x41,
            OpCode::BgtUn => 0x42,
            OpCode::BleUn => 0x43,
            OpCode::BltUn => 0x44,
            OpCode::Switch => 0x45,
            OpCode::LdindI4 => 0x4A,
            OpCode::Add => 0x58,
            OpCode::Sub => 0x59,
            OpCode::Mul => 0x5A,
            OpCode::Div => 0x5B,
            OpCode::Rem => 0x5D,
            OpCode::And => 0x5F,
            OpCode::Or => 0x60,
            OpCode::Xor => 0x61,
            OpCode::Shl => 0x62,
            OpCode::Shr => 0x63,
            OpCode::Neg => 0x65,
            OpCode::Not => 0x66,
            OpCode::ConvI4 => 0x69,
            OpCode::Callvirt => 0x6F,
            OpCode::Ldstr => 0x72,
            OpCode::Newobj => 0x73,
            OpCode::Throw => 0x7A,
            OpCode::Ldfld => 0x7B,
            OpCode::Stfld => 0x7D,
            OpCode::Ldsfld => 0x7E,
            OpCode::Ldsflda => 0x7F,
            OpCode::Stsfld => 0x80,
            OpCode::Newarr => 0x8D,
            OpCode::Ldlen => 0x8E,
            OpCode::LdelemI1 => 0x90,
            OpCode::LdelemU1 => 0x91,
            OpCode::LdelemI2 => 0x92,
            OpCode::LdelemI4 => 0x94,
            OpCode::LdelemI8 => 0x96,
            OpCode::LdelemRef => 0x9A,
            OpCode::StelemI1 => 0x9C,
            OpCode::StelemI2 => 0x9D,
            OpCode::StelemI4 => 0x9E,
            OpCode::StelemI8 => 0x9F,
            OpCode::StelemRef => 0xA2,
            OpCode::Endfinally => 0xDC,
            OpCode::Leave => 0xDD,
            OpCode::LeaveS => 0xDE,
            OpCode::Ceq => 0xFE01,
            OpCode::Cgt => 0xFE02,
            OpCode::CgtUn => 0xFE03,
            OpCode::Clt => 0xFE04,
            OpCode::CltUn => 0xFE05,
            OpCode::Ldarg => 0xFE09,
            OpCode::Ldloc => 0xFE0C,
            OpCode::Stloc => 0xFE0E,
            OpCode::Endfilter => 0xFE11,
            OpCode::Rethrow => 0xFE1A,
        }
    }

    /// Encoded size of the opcode itself (1 or 2 bytes).
    #[must_use]
    pub const fn size(self) -> u32 {
        if self.value() > 0xFF {
            2
        } else {
            1
        }
    }

    /// How this opcode affects control flow.
    #[must_use]
    pub const fn flow_type(self) -> FlowType {
        match self {
            OpCode::Br | OpCode::BrS => FlowType::UnconditionalBranch,
            OpCode::Leave | OpCode::LeaveS => FlowType::Leave,
            OpCode::Brfalse
            | OpCode::BrfalseS
            | OpCode::Brtrue
            | OpCode::BrtrueS
            | OpCode::Beq
            | OpCode::BeqS
            | OpCode::Bge
            | OpCode::BgeS
            | OpCode::Bgt
            | OpCode::BgtS
            | OpCode::Ble
            | OpCode::BleS
            | OpCode::Blt
            | OpCode::BltS
            | OpCode::BneUn
            | OpCode::BneUnS
            | OpCode::BgeUn
            | OpCode::BgeUnS
            | OpCode::BgtUn
            | OpCode::BgtUnS
            | OpCode::BleUn
            | OpCode::BleUnS
            | OpCode::BltUn
            | OpCode::BltUnS => FlowType::ConditionalBranch,
            OpCode::Switch => FlowType::Switch,
            OpCode::Ret | OpCode::Jmp => FlowType::Return,
            OpCode::Endfinally | OpCode::Endfilter => FlowType::EndFinally,
            OpCode::Throw | OpCode::Rethrow => FlowType::Throw,
            OpCode::Call | OpCode::Calli | OpCode::Callvirt | OpCode::Newobj => FlowType::Call,
            _ => FlowType::Sequential,
        }
    }

    /// The operand encoding this opcode expects.
    #[must_use]
    pub const fn operand_type(self) -> OperandType {
        match self {
            OpCode::LdargS | OpCode::StargS | OpCode::LdlocS | OpCode::LdlocaS | OpCode::StlocS => {
                OperandType::UInt8
            }
            OpCode::Ldarg | OpCode::Ldloc | OpCode::Stloc => OperandType::UInt16,
            OpCode::LdcI4S => OperandType::Int8,
            OpCode::LdcI4 => OperandType::Int32,
            OpCode::LdcI8 => OperandType::Int64,
            OpCode::LdcR4 => OperandType::Float32,
            OpCode::LdcR8 => OperandType::Float64,
            OpCode::Ldstr
            | OpCode::Jmp
            | OpCode::Call
            | OpCode::Calli
            | OpCode::Callvirt
            | OpCode::Newobj
            | OpCode::Ldfld
            | OpCode::Stfld
            | OpCode::Ldsfld
            | OpCode::Ldsflda
            | OpCode::Stsfld
            | OpCode::Newarr => OperandType::Token,
            OpCode::BrS
            | OpCode::BrfalseS
            | OpCode::BrtrueS
            | OpCode::BeqS
            | OpCode::BgeS
            | OpCode::BgtS
            | OpCode::BleS
            | OpCode::BltS
            | OpCode::BneUnS
            | OpCode::BgeUnS
            | OpCode::BgtUnS
            | OpCode::BleUnS
            | OpCode::BltUnS
            | OpCode::LeaveS => OperandType::ShortTarget,
            OpCode::Br
            | OpCode::Brfalse
            | OpCode::Brtrue
            | OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn
            | OpCode::BgeUn
            | OpCode::BgtUn
            | OpCode::BleUn
            | OpCode::BltUn
            | OpCode::Leave => OperandType::Target,
            OpCode::Switch => OperandType::Switch,
            _ => OperandType::None,
        }
    }

    /// Returns `true` for opcodes whose operand is a single branch target.
    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(
            self.operand_type(),
            OperandType::ShortTarget | OperandType::Target
        )
    }

    /// The long-form equivalent of a short branch; other opcodes map to themselves.
    #[must_use]
    pub const fn to_long_form(self) -> OpCode {
        match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrfalseS => OpCode::Brfalse,
            OpCode::BrtrueS => OpCode::Brtrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            OpCode::BgeUnS => OpCode::BgeUn,
            OpCode::BgtUnS => OpCode::BgtUn,
            OpCode::BleUnS => OpCode::BleUn,
            OpCode::BltUnS => OpCode::BltUn,
            OpCode::LeaveS => OpCode::Leave,
            other => other,
        }
    }

    /// The short-form equivalent of a long branch; other opcodes map to themselves.
    #[must_use]
    pub const fn to_short_form(self) -> OpCode {
        match self {
            OpCode::Br => OpCode::BrS,
            OpCode::Brfalse => OpCode::BrfalseS,
            OpCode::Brtrue => OpCode::BrtrueS,
            OpCode::Beq => OpCode::BeqS,
            OpCode::Bge => OpCode::BgeS,
            OpCode::Bgt => OpCode::BgtS,
            OpCode::Ble => OpCode::BleS,
            OpCode::Blt => OpCode::BltS,
            OpCode::BneUn => OpCode::BneUnS,
            OpCode::BgeUn => OpCode::BgeUnS,
            OpCode::BgtUn => OpCode::BgtUnS,
            OpCode::BleUn => OpCode::BleUnS,
            OpCode::BltUn => OpCode::BltUnS,
            OpCode::Leave => OpCode::LeaveS,
            other => other,
        }
    }

    /// Returns `true` for the comparison opcodes (`ceq`, `cgt`, `cgt.un`, `clt`, `clt.un`).
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn
        )
    }

    /// Returns `true` for array element loads and stores.
    #[must_use]
    pub const fn is_array_element_access(self) -> bool {
        matches!(
            self,
            OpCode::LdelemI1
                | OpCode::LdelemU1
                | OpCode::LdelemI2
                | OpCode::LdelemI4
                | OpCode::LdelemI8
                | OpCode::LdelemRef
                | OpCode::StelemI1
                | OpCode::StelemI2
                | OpCode::StelemI4
                | OpCode::StelemI8
                | OpCode::StelemRef
        )
    }

    /// Returns `true` for every `ldloc` form.
    #[must_use]
    pub const fn is_load_local(self) -> bool {
        matches!(
            self,
            OpCode::Ldloc0
                | OpCode::Ldloc1
                | OpCode::Ldloc2
                | OpCode::Ldloc3
                | OpCode::LdlocS
                | OpCode::Ldloc
        )
    }

    /// Returns `true` for every `stloc` form.
    #[must_use]
    pub const fn is_store_local(self) -> bool {
        matches!(
            self,
            OpCode::Stloc0
                | OpCode::Stloc1
                | OpCode::Stloc2
                | OpCode::Stloc3
                | OpCode::StlocS
                | OpCode::Stloc
        )
    }

    /// Local slot encoded in the opcode itself (`ldloc.0` .. `stloc.3`).
    #[must_use]
    pub const fn implicit_local(self) -> Option<u16> {
        match self {
            OpCode::Ldloc0 | OpCode::Stloc0 => Some(0),
            OpCode::Ldloc1 | OpCode::Stloc1 => Some(1),
            OpCode::Ldloc2 | OpCode::Stloc2 => Some(2),
            OpCode::Ldloc3 | OpCode::Stloc3 => Some(3),
            _ => None,
        }
    }

    /// Evaluation stack effect as `(pops, pushes)`.
    ///
    /// Calls are approximated as popping nothing and pushing one value, since the real effect
    /// depends on the callee signature. The approximation never underestimates the depth.
    #[must_use]
    pub const fn stack_effect(self) -> (u8, u8) {
        match self {
            OpCode::Nop
            | OpCode::Break
            | OpCode::Jmp
            | OpCode::Ret
            | OpCode::Br
            | OpCode::BrS
            | OpCode::Leave
            | OpCode::LeaveS
            | OpCode::Rethrow
            | OpCode::Endfinally => (0, 0),
            OpCode::Ldarg0
            | OpCode::Ldarg1
            | OpCode::Ldarg2
            | OpCode::Ldarg3
            | OpCode::LdargS
            | OpCode::Ldarg
            | OpCode::Ldloc0
            | OpCode::Ldloc1
            | OpCode::Ldloc2
            | OpCode::Ldloc3
            | OpCode::LdlocS
            | OpCode::Ldloc
            | OpCode::LdlocaS
            | OpCode::Ldnull
            | OpCode::LdcI4M1
            | OpCode::LdcI4_0
            | OpCode::LdcI4_1
            | OpCode::LdcI4_2
            | OpCode::LdcI4_3
            | OpCode::LdcI4_4
            | OpCode::LdcI4_5
            | OpCode::LdcI4_6
            | OpCode::LdcI4_7
            | OpCode::LdcI4_8
            | OpCode::LdcI4S
            | OpCode::LdcI4
            | OpCode::LdcI8
            | OpCode::LdcR4
            | OpCode::LdcR8
            | OpCode::Ldstr
            | OpCode::Ldsfld
            | OpCode::Ldsflda
            | OpCode::Call
            | OpCode::Calli
            | OpCode::Callvirt
            | OpCode::Newobj => (0, 1),
            OpCode::StargS
            | OpCode::Stloc0
            | OpCode::Stloc1
            | OpCode::Stloc2
            | OpCode::Stloc3
            | OpCode::StlocS
            | OpCode::Stloc
            | OpCode::Pop
            | OpCode::Brfalse
            | OpCode::BrfalseS
            | OpCode::Brtrue
            | OpCode::BrtrueS
            | OpCode::Switch
            | OpCode::Stsfld
            | OpCode::Throw
            | OpCode::Endfilter => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::LdindI4
            | OpCode::Neg
            | OpCode::Not
            | OpCode::ConvI4
            | OpCode::Ldfld
            | OpCode::Newarr
            | OpCode::Ldlen => (1, 1),
            OpCode::Beq
            | OpCode::BeqS
            | OpCode::Bge
            | OpCode::BgeS
            | OpCode::Bgt
            | OpCode::BgtS
            | OpCode::Ble
            | OpCode::BleS
            | OpCode::Blt
            | OpCode::BltS
            | OpCode::BneUn
            | OpCode::BneUnS
            | OpCode::BgeUn
            | OpCode::BgeUnS
            | OpCode::BgtUn
            | OpCode::BgtUnS
            | OpCode::BleUn
            | OpCode::BleUnS
            | OpCode::BltUn
            | OpCode::BltUnS
            | OpCode::Stfld => (2, 0),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::Ceq
            | OpCode::Cgt
            | OpCode::CgtUn
            | OpCode::Clt
            | OpCode::CltUn
            | OpCode::LdelemI1
            | OpCode::LdelemU1
            | OpCode::LdelemI2
            | OpCode::LdelemI4
            | OpCode::LdelemI8
            | OpCode::LdelemRef => (2, 1),
            OpCode::StelemI1
            | OpCode::StelemI2
            | OpCode::StelemI4
            | OpCode::StelemI8
            | OpCode::StelemRef => (3, 0),
        }
    }

    /// Constant encoded in the opcode itself (`ldc.i4.m1` .. `ldc.i4.8`).
    #[must_use]
    pub const fn implicit_i4(self) -> Option<i32> {
        match self {
            OpCode::LdcI4M1 => Some(-1),
            OpCode::LdcI4_0 => Some(0),
            OpCode::LdcI4_1 => Some(1),
            OpCode::LdcI4_2 => Some(2),
            OpCode::LdcI4_3 => Some(3),
            OpCode::LdcI4_4 => Some(4),
            OpCode::LdcI4_5 => Some(5),
            OpCode::LdcI4_6 => Some(6),
            OpCode::LdcI4_7 => Some(7),
            OpCode::LdcI4_8 => Some(8),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_mnemonic_roundtrip() {
        for op in OpCode::iter() {
            let parsed: OpCode = op.mnemonic().parse().unwrap();
            assert_eq!(parsed, op, "mnemonic {} did not parse back", op.mnemonic());
        }
    }

    #[test]
    fn test_images_store_mnemonics() {
        assert_eq!(serde_json::to_string(&OpCode::BneUnS).unwrap(), "\"bne.un.s\"");
        let parsed: OpCode = serde_json::from_str("\"ldc.i4.s\"").unwrap();
        assert_eq!(parsed, OpCode::LdcI4S);
        assert!(serde_json::from_str::<OpCode>("\"ldc.i9\"").is_err());
    }

    #[test]
    fn test_values_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for op in OpCode::iter() {
            assert!(seen.insert(op.value()), "duplicate value for {op}");
        }
    }

    #[test]
    fn test_two_byte_sizes() {
        assert_eq!(OpCode::Ceq.size(), 2);
        assert_eq!(OpCode::Ldloc.size(), 2);
        assert_eq!(OpCode::Add.size(), 1);
        assert_eq!(OpCode::Ret.size(), 1);
    }

    #[test]
    fn test_branch_forms() {
        for op in OpCode::iter().filter(|op| op.is_branch()) {
            let long = op.to_long_form();
            let short = op.to_short_form();
            assert_eq!(long.operand_type(), OperandType::Target);
            assert_eq!(short.operand_type(), OperandType::ShortTarget);
            assert_eq!(long.to_short_form(), short);
            assert_eq!(short.to_long_form(), long);
            assert_eq!(long.flow_type(), short.flow_type());
        }
    }

    #[test]
    fn test_flow_types() {
        assert_eq!(OpCode::Br.flow_type(), FlowType::UnconditionalBranch);
        assert_eq!(OpCode::BneUnS.flow_type(), FlowType::ConditionalBranch);
        assert_eq!(OpCode::Switch.flow_type(), FlowType::Switch);
        assert_eq!(OpCode::Rethrow.flow_type(), FlowType::Throw);
        assert_eq!(OpCode::Leave.flow_type(), FlowType::Leave);
        assert_eq!(OpCode::Add.flow_type(), FlowType::Sequential);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(OpCode::Add.stack_effect(), (2, 1));
        assert_eq!(OpCode::Dup.stack_effect(), (1, 2));
        assert_eq!(OpCode::StelemRef.stack_effect(), (3, 0));
        assert_eq!(OpCode::BneUnS.stack_effect(), (2, 0));
        assert_eq!(OpCode::LdcI4S.stack_effect(), (0, 1));
    }

    #[test]
    fn test_implicit_operands() {
        assert_eq!(OpCode::Stloc2.implicit_local(), Some(2));
        assert_eq!(OpCode::StlocS.implicit_local(), None);
        assert_eq!(OpCode::LdcI4M1.implicit_i4(), Some(-1));
        assert_eq!(OpCode::LdcI4_8.implicit_i4(), Some(8));
        assert_eq!(OpCode::LdcI4S.implicit_i4(), None);
    }
}
