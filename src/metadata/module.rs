//! The root of the module graph.

use serde::{Deserialize, Serialize};

use crate::metadata::{method::MethodDef, token::Token, typesystem::TypeDef};

/// Position of a method inside a [`Module`]: type index, then method index within that type.
///
/// Stages collect locations while borrowing the module immutably, then revisit them mutably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodLocation {
    /// Index into [`Module::types`]
    pub type_index: usize,
    /// Index into [`TypeDef::methods`]
    pub method_index: usize,
}

/// A loaded .NET module: its types and the declared entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module name, e.g. `Game.dll`
    pub name: String,
    /// Declared types, in metadata order
    #[serde(default)]
    pub types: Vec<TypeDef>,
    /// Token of the declared entry point method
    #[serde(default)]
    pub entry_point: Option<Token>,
}

impl Module {
    /// An empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            types: Vec::new(),
            entry_point: None,
        }
    }

    /// Iterates every method together with its declaring type.
    pub fn methods(&self) -> impl Iterator<Item = (&TypeDef, &MethodDef)> + '_ {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter().map(move |method| (ty, method)))
    }

    /// Locations of every method, in declaration order.
    #[must_use]
    pub fn method_locations(&self) -> Vec<MethodLocation> {
        self.types
            .iter()
            .enumerate()
            .flat_map(|(type_index, ty)| {
                (0..ty.methods.len()).map(move |method_index| MethodLocation {
                    type_index,
                    method_index,
                })
            })
            .collect()
    }

    /// The type and method at `location`.
    #[must_use]
    pub fn at(&self, location: MethodLocation) -> Option<(&TypeDef, &MethodDef)> {
        let ty = self.types.get(location.type_index)?;
        let method = ty.methods.get(location.method_index)?;
        Some((ty, method))
    }

    /// Mutable access to the method at `location`.
    pub fn method_at_mut(&mut self, location: MethodLocation) -> Option<&mut MethodDef> {
        self.types
            .get_mut(location.type_index)?
            .methods
            .get_mut(location.method_index)
    }

    /// Total number of declared methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.types.iter().map(|ty| ty.methods.len()).sum()
    }

    /// Looks up a method by token.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<(&TypeDef, &MethodDef)> {
        self.methods().find(|(_, method)| method.token == token)
    }

    /// Looks up a type by full name.
    #[must_use]
    pub fn type_by_name(&self, full_name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|ty| ty.full_name() == full_name)
    }
}
