//! Method attribute flags and supporting types for CIL methods.
//!
//! # Key Types
//! - [`MethodAccessFlags`], [`MethodModifiers`]: Attribute flags
//! - [`Local`], [`Param`]: Local variable and parameter representations

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::metadata::typesystem::TypeSig;

/// Bitmask for `ACCESS` state extraction
pub const METHOD_ACCESS_MASK: u16 = 0x0007;

bitflags! {
    /// Method access flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MethodAccessFlags: u16 {
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this Assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessibly by anyone in the Assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessibly by sub-types anywhere, plus anyone in assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessibly by anyone who has visibility to this scope
        const PUBLIC = 0x0006;
    }
}

impl MethodAccessFlags {
    /// Extract access flags from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u16) -> Self {
        Self::from_bits_truncate(flags & METHOD_ACCESS_MASK)
    }
}

impl Default for MethodAccessFlags {
    fn default() -> Self {
        MethodAccessFlags::PRIVATE
    }
}

bitflags! {
    /// Method modifiers and properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MethodModifiers: u16 {
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method can only be overriden if also accessible
        const STRICT = 0x0200;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// CLI provides 'special' behavior, dpending upon the name of the method
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
        /// Method has security associate with it
        const HAS_SECURITY = 0x4000;
    }
}

impl MethodModifiers {
    /// Extract method modifiers from raw method attributes
    #[must_use]
    pub fn from_method_flags(flags: u16) -> Self {
        Self::from_bits_truncate(flags & !METHOD_ACCESS_MASK)
    }
}

/// A declared local variable slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Local {
    /// Debug name, when symbols provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The type of the slot
    pub sig: TypeSig,
}

impl Local {
    /// A local of the given type without a debug name.
    #[must_use]
    pub fn new(sig: TypeSig) -> Self {
        Local { name: None, sig }
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub sig: TypeSig,
}

impl Param {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, sig: TypeSig) -> Self {
        Param {
            name: name.into(),
            sig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_extraction() {
        let raw = 0x0006 | 0x0010 | 0x0080;
        assert_eq!(
            MethodAccessFlags::from_method_flags(raw),
            MethodAccessFlags::PUBLIC
        );
        let modifiers = MethodModifiers::from_method_flags(raw);
        assert!(modifiers.contains(MethodModifiers::STATIC));
        assert!(modifiers.contains(MethodModifiers::HIDE_BY_SIG));
        assert!(!modifiers.contains(MethodModifiers::VIRTUAL));
    }

    #[test]
    fn test_flags_roundtrip_json() {
        let modifiers = MethodModifiers::STATIC | MethodModifiers::SPECIAL_NAME;
        let json = serde_json::to_string(&modifiers).unwrap();
        let back: MethodModifiers = serde_json::from_str(&json).unwrap();
        assert_eq!(back, modifiers);

        let json = serde_json::to_string(&MethodAccessFlags::PUBLIC).unwrap();
        let back: MethodAccessFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MethodAccessFlags::PUBLIC);
    }
}
