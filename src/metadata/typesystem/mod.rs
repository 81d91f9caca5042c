//! Type definitions, type signatures and custom attributes of the module graph.
//!
//! # Key Components
//!
//! - [`TypeDef`]: A type declared by the module, owning its methods
//! - [`TypeSig`]: The subset of ECMA-335 type signatures the graph carries
//! - [`CustomAttribute`]: An attribute application, identified by its type's full name
//! - [`TypeAttributes`]: Visibility and layout flags of a type

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::metadata::{method::MethodDef, token::Token};

/// Bitmask for visibility extraction
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

bitflags! {
    /// Type attribute flags as defined in the `TypeDef` table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TypeAttributes: u32 {
        /// Class is not public scope
        const NOT_PUBLIC = 0x0000_0000;
        /// Class is public scope
        const PUBLIC = 0x0000_0001;
        /// Class is nested with public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Class is nested with private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Class is abstract
        const ABSTRACT = 0x0000_0080;
        /// Class cannot be extended
        const SEALED = 0x0000_0100;
        /// Class name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Class is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Runtime should check name encoding
        const RTSPECIAL_NAME = 0x0000_0800;
    }
}

impl TypeAttributes {
    /// Returns `true` for top-level public types.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.bits() & TYPE_VISIBILITY_MASK == TypeAttributes::PUBLIC.bits()
    }
}

/// A type signature.
///
/// Only the shapes the classifier and the built-in stages inspect get their own variant; every
/// other type is carried by full name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSig {
    /// `System.Void`
    #[default]
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Int32`
    I4,
    /// `System.Int64`
    I8,
    /// `System.Double`
    R8,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// Single-dimensional zero-based array of the element type
    SzArray(Box<TypeSig>),
    /// Any other type, by full name
    Named(String),
}

impl TypeSig {
    /// Full name of the type, arrays suffixed with `[]`.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self {
            TypeSig::Void => "System.Void".to_string(),
            TypeSig::Boolean => "System.Boolean".to_string(),
            TypeSig::I4 => "System.Int32".to_string(),
            TypeSig::I8 => "System.Int64".to_string(),
            TypeSig::R8 => "System.Double".to_string(),
            TypeSig::String => "System.String".to_string(),
            TypeSig::Object => "System.Object".to_string(),
            TypeSig::SzArray(element) => format!("{}[]", element.full_name()),
            TypeSig::Named(name) => name.clone(),
        }
    }

    /// Returns `true` for `string[]`.
    #[must_use]
    pub fn is_string_array(&self) -> bool {
        matches!(self, TypeSig::SzArray(element) if **element == TypeSig::String)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// A custom attribute application.
///
/// Constructor arguments are not modelled; the classifier only looks at the attribute type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomAttribute {
    /// Full name of the attribute type, e.g. `System.SerializableAttribute`
    pub type_name: String,
}

impl CustomAttribute {
    /// Creates an attribute application of the named type.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        CustomAttribute {
            type_name: type_name.into(),
        }
    }

    /// The attribute type name without its namespace.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.type_name
            .rsplit('.')
            .next()
            .unwrap_or(self.type_name.as_str())
    }
}

/// A type declared by the module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// `TypeDef` token of this type
    pub token: Token,
    /// Namespace, empty for the global namespace
    #[serde(default)]
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type attribute flags
    #[serde(default)]
    pub flags: TypeAttributes,
    /// Full name of the base type, if any
    #[serde(default)]
    pub base_type: Option<String>,
    /// Custom attributes applied to the type
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    /// Declared methods, in metadata order
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// A non-public type without base type, attributes or methods.
    #[must_use]
    pub fn new(token: Token, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeDef {
            token,
            namespace: namespace.into(),
            name: name.into(),
            flags: TypeAttributes::NOT_PUBLIC,
            base_type: None,
            custom_attributes: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// `Namespace.Name`, or just `Name` in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Returns `true` for top-level public types.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.flags.is_public()
    }

    /// Returns `true` if any custom attribute's short type name contains `fragment`.
    #[must_use]
    pub fn has_attribute_containing(&self, fragment: &str) -> bool {
        self.custom_attributes
            .iter()
            .any(|attribute| attribute.short_name().contains(fragment))
    }

    /// Returns `true` if any custom attribute's namespace-qualified type name contains
    /// `fragment`.
    #[must_use]
    pub fn has_attribute_type_containing(&self, fragment: &str) -> bool {
        self.custom_attributes
            .iter()
            .any(|attribute| attribute.type_name.contains(fragment))
    }

    /// Looks up a declared method by token.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_names() {
        let ty = TypeDef::new(Token(0x02000002), "Game.Core", "Player");
        assert_eq!(ty.full_name(), "Game.Core.Player");

        let global = TypeDef::new(Token(0x02000001), "", "<Module>");
        assert_eq!(global.full_name(), "<Module>");

        let sig = TypeSig::SzArray(Box::new(TypeSig::String));
        assert_eq!(sig.full_name(), "System.String[]");
        assert!(sig.is_string_array());
        assert!(!TypeSig::SzArray(Box::new(TypeSig::I4)).is_string_array());
    }

    #[test]
    fn test_visibility() {
        let mut ty = TypeDef::new(Token(0x02000002), "App", "Main");
        assert!(!ty.is_public());
        ty.flags = TypeAttributes::PUBLIC | TypeAttributes::SEALED;
        assert!(ty.is_public());
        ty.flags = TypeAttributes::NESTED_PUBLIC;
        assert!(!ty.is_public());
    }

    #[test]
    fn test_attribute_short_name() {
        let attr = CustomAttribute::new("System.Runtime.InteropServices.ComVisibleAttribute");
        assert_eq!(attr.short_name(), "ComVisibleAttribute");
        assert_eq!(CustomAttribute::new("Local").short_name(), "Local");
    }

    #[test]
    fn test_type_sig_json() {
        let sig = TypeSig::SzArray(Box::new(TypeSig::Named("Game.Item".into())));
        let json = serde_json::to_string(&sig).unwrap();
        let back: TypeSig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
        assert_eq!(serde_json::to_string(&TypeSig::I4).unwrap(), "\"i4\"");
    }
}
