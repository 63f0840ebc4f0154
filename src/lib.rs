// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Unsafe code should not be used.
// Hard to reason about correctness, and maintainability.
#![forbid(unsafe_code)]
// Ensure that all lint names are valid.
#![deny(unknown_lints)]
// Fail-fast lints: correctness, safety, and API surface
#![deny(
    clippy::panic, // forbid explicit panic! macro
    clippy::todo, // blocks remaining todo! placeholders
    clippy::unimplemented, // blocks unimplemented! placeholders
    clippy::unwrap_used, // reject Result/Option unwraps
    clippy::expect_used, // reject expect with panic messages
    deprecated, // prevent use of deprecated APIs
    invalid_doc_attributes, // ensure doc attributes are valid
    keyword_idents, // disallow identifiers that are keywords
    nonstandard_style, // enforce idiomatic naming/style
    noop_method_call, // catch no-op method calls
    trivial_casts, // block needless casts
    unreachable_code, // catch dead/unreachable code
    unreachable_patterns, // catch unreachable match arms
    unused_extern_crates, // remove unused extern crate declarations
    unused_import_braces, // avoid unused braces in imports
)]
// Advisory lints: useful, but not fatal
#![warn(
    clippy::match_like_matches_macro, // prefer matches! macro over verbose match
    clippy::needless_continue, // remove redundant continue statements
    clippy::dbg_macro, // forbid dbg! in production code
)]
// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

use serde::Serialize;

pub mod ast;
mod diag;
mod eval;
mod export;
mod expr;
mod number;
pub mod provider;
mod schema;
mod validate;
mod value;

pub use diag::{Diagnostic, Diagnostics, ErrorKind, Severity};
pub use eval::{eval_environment, ImportResolver, NoImports};
pub use export::{
    AccessExpr, Accessor, Builtin, Environment, Expr, ExprRepr, Interpolation, PropertyAccessor,
};
pub use expr::ExprId;
pub use number::Number;
pub use provider::CancelToken;
pub use schema::Schema;
pub use value::{Value, ValueRepr, ValueSource};

/// A position within an environment definition. Lines and columns start at 1;
/// `byte` is the zero-based offset into the document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    pub byte: u32,
}

impl Pos {
    pub const fn new(line: u32, column: u32, byte: u32) -> Self {
        Pos { line, column, byte }
    }
}

/// The source range of an expression. When an expression has no source
/// information of its own, the range names only the owning environment.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub environment: std::rc::Rc<str>,
    pub begin: Pos,
    pub end: Pos,
}

impl Range {
    pub fn new(environment: impl Into<std::rc::Rc<str>>, begin: Pos, end: Pos) -> Self {
        Range {
            environment: environment.into(),
            begin,
            end,
        }
    }

    /// A range that refers to the named environment as a whole.
    pub fn environment_only(environment: impl Into<std::rc::Rc<str>>) -> Self {
        Range {
            environment: environment.into(),
            begin: Pos::default(),
            end: Pos::default(),
        }
    }
}

impl core::fmt::Display for Range {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.environment, self.begin.line, self.begin.column
        )
    }
}
