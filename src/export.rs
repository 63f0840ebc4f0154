// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The exported, serializable form of an evaluated environment.
///
/// This is the wire format between the evaluator and its consumers: each
/// expression becomes a record with its source range, schema, recursively
/// exported base, and a variant-specific payload. Builtins carry their
/// argument schema alongside the exported argument; chained property accesses
/// are flattened into a single `access` record with an accessor list.
use crate::expr::{ExprGraph, ExprId, ExprRepr as GraphRepr, LiteralRepr};
use crate::schema::Schema;
use crate::value::{Value, ValueRepr, ValueSource};
use crate::Range;

use std::rc::Rc;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;

/// An exported expression.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expr {
    pub range: Range,
    pub schema: Rc<Schema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<Box<Expr>>,
    #[serde(flatten)]
    pub repr: ExprRepr,
}

/// The variant-specific payload of an exported expression.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExprRepr {
    Literal(serde_json::Value),
    Interpolate(Vec<Interpolation>),
    Symbol(Vec<PropertyAccessor>),
    Access(AccessExpr),
    List(Vec<Expr>),
    Object(IndexMap<Rc<str>, Expr>),
    Builtin(Box<Builtin>),
}

/// One part of an exported interpolation: the literal text chunk and the
/// accessor path of the `${...}` reference that follows it, if any.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpolation {
    pub text: Rc<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<PropertyAccessor>>,
}

/// A single accessor, as exported.
#[derive(Debug, Clone, Serialize)]
pub enum Accessor {
    #[serde(rename = "key")]
    Key(Rc<str>),
    #[serde(rename = "index")]
    Index(isize),
}

/// An accessor together with the range of the value it resolved to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyAccessor {
    #[serde(flatten)]
    pub accessor: Accessor,
    pub value: Range,
}

/// A flattened chain of property accesses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessExpr {
    pub receiver: Range,
    pub accessors: Vec<Accessor>,
}

/// An exported builtin invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Builtin {
    pub name: Rc<str>,
    pub arg_schema: Rc<Schema>,
    pub arg: Expr,
}

/// The exported result of evaluating an environment definition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Rc<str>>,
    /// The exported expression for each top-level property.
    pub exprs: IndexMap<Rc<str>, Expr>,
    /// The evaluated value for each top-level property.
    pub properties: IndexMap<Rc<str>, Rc<Value>>,
    /// The schema of the evaluated top-level object.
    pub schema: Rc<Schema>,
}

fn literal_json(lit: &LiteralRepr) -> serde_json::Value {
    match lit {
        LiteralRepr::Null => serde_json::Value::Null,
        LiteralRepr::Bool(b) => serde_json::Value::Bool(*b),
        LiteralRepr::Number(n) => serde_json::Number::from_str(n.lexical())
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        LiteralRepr::String(s) => serde_json::Value::String(s.to_string()),
    }
}

fn export_accessor(accessor: &crate::ast::Accessor) -> Accessor {
    match accessor {
        crate::ast::Accessor::Key(k) => Accessor::Key(k.clone()),
        crate::ast::Accessor::Index(i) => Accessor::Index(*i),
    }
}

/// The range of the expression or import that defines `v`.
fn value_def_range(graph: &ExprGraph, environment: &Rc<str>, v: &Value) -> Range {
    match &v.def {
        ValueSource::Expr(id) => graph[*id].def_range(environment),
        ValueSource::Import(name) => Range::environment_only(name.clone()),
    }
}

/// Flattens a desugared reference chain (a `Symbol` head under zero or more
/// `Access` nodes) into an accessor list with per-accessor resolved ranges.
fn flatten_access(
    graph: &ExprGraph,
    environment: &Rc<str>,
    id: ExprId,
    out: &mut Vec<PropertyAccessor>,
) {
    let node = &graph[id];
    let resolved = match &node.value {
        Some(v) => value_def_range(graph, environment, v),
        None => Range::environment_only(environment.clone()),
    };
    match &node.repr {
        GraphRepr::Symbol { name } => out.push(PropertyAccessor {
            accessor: Accessor::Key(name.clone()),
            value: resolved,
        }),
        GraphRepr::Access { receiver, accessor } => {
            flatten_access(graph, environment, *receiver, out);
            out.push(PropertyAccessor {
                accessor: export_accessor(accessor),
                value: resolved,
            });
        }
        _ => {}
    }
}

/// Exports a base value structurally. Base values come from imports, so their
/// ranges name the supplying environment.
fn export_base(environment: &Rc<str>, v: &Rc<Value>) -> Expr {
    let range = match &v.def {
        ValueSource::Import(name) => Range::environment_only(name.clone()),
        ValueSource::Expr(_) => Range::environment_only(environment.clone()),
    };
    let repr = match &v.repr {
        ValueRepr::Null => ExprRepr::Literal(serde_json::Value::Null),
        ValueRepr::Bool(b) => ExprRepr::Literal(serde_json::Value::Bool(*b)),
        ValueRepr::Number(n) => ExprRepr::Literal(
            serde_json::Number::from_str(n.lexical())
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        ValueRepr::String(s) => ExprRepr::Literal(serde_json::Value::String(s.to_string())),
        ValueRepr::Array(a) => {
            ExprRepr::List(a.iter().map(|v| export_base(environment, v)).collect())
        }
        ValueRepr::Object(m) => ExprRepr::Object(
            m.iter()
                .map(|(k, v)| (k.clone(), export_base(environment, v)))
                .collect(),
        ),
    };
    Expr {
        range,
        schema: v.schema.clone(),
        base: None,
        repr,
    }
}

fn builtin(name: &str, arg_schema: Rc<Schema>, arg: Expr) -> ExprRepr {
    ExprRepr::Builtin(Box::new(Builtin {
        name: name.into(),
        arg_schema,
        arg,
    }))
}

/// A synthetic expression wrapping a builtin's composite argument.
fn synthetic(environment: &Rc<str>, repr: ExprRepr) -> Expr {
    Expr {
        range: Range::environment_only(environment.clone()),
        schema: Rc::new(Schema::always()),
        base: None,
        repr,
    }
}

/// Transforms an evaluated expression into its exported representation.
pub(crate) fn export_expr(graph: &ExprGraph, environment: &Rc<str>, id: ExprId) -> Expr {
    let node = &graph[id];
    let range = node.def_range(environment);
    let base = node.base.as_ref().map(|b| Box::new(export_base(environment, b)));

    let repr = match &node.repr {
        GraphRepr::Literal(lit) => ExprRepr::Literal(literal_json(lit)),
        GraphRepr::Interpolate(parts) => ExprRepr::Interpolate(
            parts
                .iter()
                .map(|p| Interpolation {
                    text: p.text.clone(),
                    value: p.value.map(|v| {
                        let mut accessors = Vec::new();
                        flatten_access(graph, environment, v, &mut accessors);
                        accessors
                    }),
                })
                .collect(),
        ),
        GraphRepr::Symbol { .. } => {
            let mut accessors = Vec::new();
            flatten_access(graph, environment, id, &mut accessors);
            ExprRepr::Symbol(accessors)
        }
        GraphRepr::Access { .. } => {
            // Flatten the chain; the head accessor stands for the receiver.
            let mut accessors = Vec::new();
            flatten_access(graph, environment, id, &mut accessors);
            let mut rest = accessors.into_iter();
            let receiver = rest
                .next()
                .map(|head| head.value)
                .unwrap_or_else(|| Range::environment_only(environment.clone()));
            ExprRepr::Access(AccessExpr {
                receiver,
                accessors: rest.map(|a| a.accessor).collect(),
            })
        }
        GraphRepr::List(elements) => ExprRepr::List(
            elements
                .iter()
                .map(|el| export_expr(graph, environment, *el))
                .collect(),
        ),
        GraphRepr::Object(properties) => ExprRepr::Object(
            properties
                .iter()
                .map(|(k, v)| (k.clone(), export_expr(graph, environment, *v)))
                .collect(),
        ),
        GraphRepr::Join { delimiter, values } => {
            let arg_schema = Rc::new(Schema::tuple(vec![
                Rc::new(Schema::string()),
                Rc::new(Schema::array().items(Schema::string())),
            ]));
            let arg = synthetic(
                environment,
                ExprRepr::List(vec![
                    export_expr(graph, environment, *delimiter),
                    export_expr(graph, environment, *values),
                ]),
            );
            builtin("fn::join", arg_schema, arg)
        }
        GraphRepr::Open {
            provider,
            inputs,
            input_schema,
            ..
        } => {
            let arg_schema = Rc::new(Schema::record(
                [
                    (Rc::from("provider"), Rc::new(Schema::string())),
                    (Rc::from("inputs"), input_schema.clone()),
                ]
                .into_iter()
                .collect(),
            ));
            let mut object = IndexMap::new();
            object.insert(
                Rc::from("provider"),
                export_expr(graph, environment, *provider),
            );
            object.insert(Rc::from("inputs"), export_expr(graph, environment, *inputs));
            let arg = synthetic(environment, ExprRepr::Object(object));
            builtin("fn::open", arg_schema, arg)
        }
        GraphRepr::Secret { value } => builtin(
            "fn::secret",
            Rc::new(Schema::always()),
            export_expr(graph, environment, *value),
        ),
        GraphRepr::ToBase64 { value } => builtin(
            "fn::toBase64",
            Rc::new(Schema::string()),
            export_expr(graph, environment, *value),
        ),
        GraphRepr::ToJson { value } => builtin(
            "fn::toJSON",
            Rc::new(Schema::always()),
            export_expr(graph, environment, *value),
        ),
        GraphRepr::ToString { value } => builtin(
            "fn::toString",
            Rc::new(Schema::always()),
            export_expr(graph, environment, *value),
        ),
    };

    Expr {
        range,
        schema: node.schema.clone(),
        base,
        repr,
    }
}
