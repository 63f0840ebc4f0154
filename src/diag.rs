// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::Range;

use core::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

/// The kind of failure a diagnostic reports.
///
/// Every kind except `Internal` is recoverable: the evaluator records the
/// diagnostic, substitutes an unknown value of the declared schema, and
/// continues so that a single pass reports all errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Malformed surface syntax, raised by the AST layer.
    #[error("syntax error")]
    Syntax,
    /// Unresolved symbol, out-of-range access, or cyclic reference.
    #[error("reference error")]
    Reference,
    /// Mismatch between an actual and an accepted schema.
    #[error("type error")]
    Type,
    /// A numeric, length, pattern, or required-property violation.
    #[error("constraint violation")]
    Constraint,
    /// A provider rejected its inputs or failed to produce a value.
    #[error("provider error")]
    Provider,
    /// An invariant violation inside the evaluator. Aborts evaluation.
    #[error("internal error")]
    Internal,
}

/// A single message at a source range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub range: Range,
    pub summary: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {severity}: {}", self.range, self.summary)
    }
}

/// The accumulated diagnostics of one evaluation.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, d: Diagnostic) {
        self.0.push(d);
    }

    pub fn error(&mut self, kind: ErrorKind, range: Range, summary: String) {
        self.push(Diagnostic {
            severity: Severity::Error,
            kind,
            range,
            summary,
        });
    }

    pub fn warning(&mut self, kind: ErrorKind, range: Range, summary: String) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            range,
            summary,
        });
    }

    /// True if any error-severity diagnostic was recorded. Drives the final
    /// exit status.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
