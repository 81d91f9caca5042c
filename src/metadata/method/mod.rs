//! Method definitions and their executable bodies.
//!
//! # Key Components
//!
//! - [`MethodDef`] - A method declared by a type, with its optional body
//! - [`MethodBody`] - Arena of instructions plus the live sequence
//! - [`ExceptionHandler`] - Protected region and handler block
//! - [`Local`], [`Param`] - Local slots and parameters

mod body;
mod exceptions;
mod types;

pub use body::MethodBody;
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::{Local, MethodAccessFlags, MethodModifiers, Param, METHOD_ACCESS_MASK};

use serde::{Deserialize, Serialize};

use crate::metadata::{
    token::Token,
    typesystem::{CustomAttribute, TypeSig},
};

/// A method declared by a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    /// `MethodDef` token of this method
    pub token: Token,
    /// Simple name
    pub name: String,
    /// Accessibility
    #[serde(default)]
    pub access: MethodAccessFlags,
    /// Modifier flags
    #[serde(default)]
    pub modifiers: MethodModifiers,
    /// Declared parameters, excluding `this`
    #[serde(default)]
    pub params: Vec<Param>,
    /// Return type
    #[serde(default)]
    pub return_type: TypeSig,
    /// Custom attributes applied to the method
    #[serde(default)]
    pub custom_attributes: Vec<CustomAttribute>,
    /// Executable code; `None` for abstract, runtime or P/Invoke methods
    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// A private instance method returning `void` without a body.
    #[must_use]
    pub fn new(token: Token, name: impl Into<String>) -> Self {
        MethodDef {
            token,
            name: name.into(),
            access: MethodAccessFlags::PRIVATE,
            modifiers: MethodModifiers::empty(),
            params: Vec::new(),
            return_type: TypeSig::Void,
            custom_attributes: Vec::new(),
            body: None,
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns `true` if the method has executable code.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(MethodModifiers::STATIC)
    }

    /// Returns `true` for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.modifiers.contains(MethodModifiers::VIRTUAL)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(MethodModifiers::ABSTRACT)
    }

    /// Returns `true` if either the special-name or runtime-special-name flag is set.
    #[must_use]
    pub fn is_special_name(&self) -> bool {
        self.modifiers
            .intersects(MethodModifiers::SPECIAL_NAME | MethodModifiers::RTSPECIAL_NAME)
    }

    /// Returns `true` for instance constructors and static initializers.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    /// Returns `true` for public methods.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access == MethodAccessFlags::PUBLIC
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
}
