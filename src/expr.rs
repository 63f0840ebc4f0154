// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast;
use crate::number::Number;
use crate::schema::Schema;
use crate::value::Value;
use crate::Range;

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use indexmap::IndexMap;

/// The index of an expression in the evaluation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(usize);

/// The expression's evaluation state. `Evaluating` identifies the chain of
/// expressions currently being evaluated; encountering it in a descendant
/// means the graph is cyclic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalState {
    Declared,
    Evaluating,
    Done,
}

/// A literal value.
#[derive(Debug, Clone)]
pub enum LiteralRepr {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
}

/// One part of an interpolated string: a literal text chunk and an optional
/// reference, desugared into its own subgraph.
#[derive(Debug, Clone)]
pub struct InterpolatePart {
    pub text: Rc<str>,
    pub value: Option<ExprId>,
}

/// How an expression computes its value.
#[derive(Debug, Clone)]
pub enum ExprRepr {
    Literal(LiteralRepr),
    Interpolate(Vec<InterpolatePart>),
    /// The head of a reference path: a top-level binding name.
    Symbol { name: Rc<str> },
    /// A late-bound property access on the result of another expression.
    Access {
        receiver: ExprId,
        accessor: ast::Accessor,
    },
    List(Vec<ExprId>),
    Object(IndexMap<Rc<str>, ExprId>),
    Join {
        delimiter: ExprId,
        values: ExprId,
    },
    Open {
        provider: ExprId,
        inputs: ExprId,
        /// Resolved at construction; `None` if the provider expression was
        /// not a string literal or named an unregistered provider.
        provider_name: Option<Rc<str>>,
        input_schema: Rc<Schema>,
        output_schema: Rc<Schema>,
    },
    Secret { value: ExprId },
    ToBase64 { value: ExprId },
    ToJson { value: ExprId },
    ToString { value: ExprId },
}

/// A single expression in the evaluation graph.
///
/// Shared state lives here; variant-specific payload lives in `repr`. The
/// base is the imported value this expression overrides, if any. The value
/// slot memoizes the result of evaluation; every expression is evaluated at
/// most once.
#[derive(Debug)]
pub struct ExprNode {
    /// The dotted path of the expression within the document, if any. Used
    /// when reporting cyclic references.
    pub path: Rc<str>,
    pub repr: ExprRepr,
    pub base: Option<Rc<Value>>,
    /// The expression's schema. May not be fully determined until after
    /// evaluation.
    pub schema: Rc<Schema>,
    pub state: EvalState,
    /// Whether to treat the expression's value as secret.
    pub secret: bool,
    pub value: Option<Rc<Value>>,
    pub range: Range,
}

impl ExprNode {
    pub fn new(path: Rc<str>, repr: ExprRepr, schema: Rc<Schema>, range: Range) -> Self {
        ExprNode {
            path,
            repr,
            base: None,
            schema,
            state: EvalState::Declared,
            secret: false,
            value: None,
            range,
        }
    }

    pub fn with_base(mut self, base: Option<Rc<Value>>) -> Self {
        self.base = base;
        self
    }

    /// The source range of the expression, falling back to a range that only
    /// names the owning environment.
    pub fn def_range(&self, environment: &Rc<str>) -> Range {
        if self.range.environment.is_empty() {
            Range::environment_only(environment.clone())
        } else {
            self.range.clone()
        }
    }
}

/// The expression graph of one evaluation: an arena of nodes forming a DAG.
/// Values reference their defining expression by `ExprId`; the graph and its
/// values are discarded together after export.
#[derive(Debug, Default)]
pub struct ExprGraph {
    nodes: Vec<ExprNode>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Index<ExprId> for ExprGraph {
    type Output = ExprNode;

    fn index(&self, id: ExprId) -> &ExprNode {
        &self.nodes[id.0]
    }
}

impl IndexMut<ExprId> for ExprGraph {
    fn index_mut(&mut self, id: ExprId) -> &mut ExprNode {
        &mut self.nodes[id.0]
    }
}
