//! The module graph: Module, Types, Methods, Bodies.
//!
//! This is the in-memory model every component works on. It is produced by a
//! [`crate::file::ModuleFormat`], mutated in place by the deobfuscation stages, repaired, and
//! handed back to the format for persistence.
//!
//! # Key Components
//!
//! - [`module::Module`] - Root of the graph, owns the types and the entry point token
//! - [`typesystem`] - Type definitions, signatures and custom attributes
//! - [`method`] - Method definitions, arena bodies and exception handlers
//! - [`token`] - Metadata table row references used throughout .NET
//!
//! # Examples
//!
//! ```rust
//! use dotmend::metadata::{module::Module, token::Token, typesystem::TypeDef};
//!
//! let mut module = Module::new("Game.dll");
//! module.types.push(TypeDef::new(Token(0x02000002), "Game", "Player"));
//! assert!(module.type_by_name("Game.Player").is_some());
//! ```

/// Implementation of methods, bodies and exception handlers
pub mod method;
/// The root module type
pub mod module;
/// Commonly used metadata token type
pub mod token;
/// Implementation of the .NET type system subset
pub mod typesystem;
