// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The evaluator: a demand-driven traversal of the expression graph.
///
/// Evaluation is single-threaded and runs to completion; the only externally
/// observable suspension point is a provider call. Each expression is
/// evaluated at most once: results are memoized on the node, and the
/// tri-state evaluation marker distinguishes cycles from diamonds in O(1)
/// per node. Recoverable failures become diagnostics and yield unknown
/// values of the declared schema so that one pass reports every error.
use crate::ast;
use crate::diag::{Diagnostics, ErrorKind};
use crate::export::{self, Environment};
use crate::expr::{
    EvalState, ExprGraph, ExprId, ExprNode, ExprRepr, InterpolatePart, LiteralRepr,
};
use crate::provider::{CancelToken, ProviderOutput, ProviderRegistry};
use crate::schema::Schema;
use crate::validate::{join_key, ValidationLoc, Validator};
use crate::value::{Value, ValueRepr, ValueSource};
use crate::Range;

use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use data_encoding::BASE64;
use indexmap::IndexMap;
use log::debug;
use thiserror::Error;

/// Supplies pre-evaluated top-level values for imported environments.
///
/// Implementations typically evaluate the named environment themselves and
/// hand back its top-level object, built with [`Value::from_json`] or
/// equivalent, with every node's source set to the import's name.
pub trait ImportResolver {
    fn resolve(&self, name: &str) -> Result<Rc<Value>>;
}

/// The import resolver for documents without imports.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImports;

impl ImportResolver for NoImports {
    fn resolve(&self, name: &str) -> Result<Rc<Value>> {
        Err(anyhow!("unknown environment {name:?}"))
    }
}

/// Why evaluation stopped before completion. Everything recoverable is a
/// diagnostic instead.
#[derive(Debug, Error)]
enum Abort {
    #[error("evaluation cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

type EvalResult<T> = Result<T, Abort>;

/// Evaluates an environment definition into its exported form.
///
/// `name` names the document for diagnostics and ranges; `imports` supplies
/// the values of imported environments; `providers` backs `fn::open`. The
/// evaluator honors `cancel` before descending into a child expression and
/// before each provider call.
///
/// Returns `None` only when evaluation aborts (cancellation or an internal
/// error); recoverable failures are reported through the returned
/// diagnostics, and the exported result is still produced.
pub fn eval_environment(
    name: &str,
    env: &ast::Environment,
    imports: &dyn ImportResolver,
    providers: &ProviderRegistry,
    cancel: CancelToken,
) -> (Option<Environment>, Diagnostics) {
    let mut ctx = EvalContext {
        environment: name.into(),
        graph: ExprGraph::new(),
        bindings: IndexMap::new(),
        base: None,
        providers,
        cancel,
        stack: Vec::new(),
        diags: Diagnostics::new(),
    };

    ctx.base = ctx.resolve_imports(env, imports);
    let root = ctx.build_object(&env.values, "", ctx.base.clone());
    if let ExprRepr::Object(properties) = &ctx.graph[root].repr {
        ctx.bindings = properties.clone();
    }

    debug!(
        "evaluating environment {name} ({} expressions, {} imports)",
        ctx.graph.len(),
        env.imports.len()
    );

    match ctx.evaluate(root) {
        Ok(value) => {
            let exported = ctx.export(env, root, &value);
            (Some(exported), ctx.diags)
        }
        Err(abort) => {
            let kind = ErrorKind::Internal;
            let range = Range::environment_only(ctx.environment.clone());
            ctx.diags.error(kind, range, abort.to_string());
            (None, ctx.diags)
        }
    }
}

struct EvalContext<'a> {
    environment: Rc<str>,
    graph: ExprGraph,
    /// The top-level binding environment: the document's own properties.
    bindings: IndexMap<Rc<str>, ExprId>,
    /// The merged import tree, if any. Supplies base values and the bindings
    /// not defined by the document itself.
    base: Option<Rc<Value>>,
    providers: &'a ProviderRegistry,
    cancel: CancelToken,
    /// The chain of expressions currently being evaluated. Used only to name
    /// the participants of a cycle; detection itself is by node state.
    stack: Vec<ExprId>,
    diags: Diagnostics,
}

impl EvalContext<'_> {
    fn resolve_imports(
        &mut self,
        env: &ast::Environment,
        imports: &dyn ImportResolver,
    ) -> Option<Rc<Value>> {
        let mut merged: Option<Rc<Value>> = None;
        for import in &env.imports {
            let range = if import.range.environment.is_empty() {
                Range::environment_only(self.environment.clone())
            } else {
                import.range.clone()
            };
            match imports.resolve(&import.name) {
                Ok(v) if v.as_object().is_some() => {
                    merged = Some(match merged {
                        Some(m) => Value::merged(&m, &v),
                        None => v,
                    });
                }
                Ok(v) => {
                    self.diags.error(
                        ErrorKind::Type,
                        range,
                        format!(
                            "import {:?} must be an object, got {}",
                            import.name,
                            v.type_name()
                        ),
                    );
                }
                Err(e) => {
                    self.diags
                        .error(ErrorKind::Reference, range, format!("{e}"));
                }
            }
        }
        merged
    }

    fn range_or(&self, range: &Range, fallback: &Range) -> Range {
        if range.environment.is_empty() {
            fallback.clone()
        } else {
            range.clone()
        }
    }

    fn literal_schema(lit: &LiteralRepr) -> Schema {
        match lit {
            LiteralRepr::Null => Schema::const_of(serde_json::Value::Null),
            LiteralRepr::Bool(b) => Schema::const_of(serde_json::Value::Bool(*b)),
            LiteralRepr::Number(n) => serde_json::Number::from_str(n.lexical())
                .map(|n| Schema::const_of(serde_json::Value::Number(n)))
                .unwrap_or_else(|_| Schema::number()),
            LiteralRepr::String(s) => {
                Schema::const_of(serde_json::Value::String(s.to_string()))
            }
        }
    }

    fn alloc_literal(
        &mut self,
        lit: LiteralRepr,
        path: &str,
        range: &Range,
        base: Option<Rc<Value>>,
    ) -> ExprId {
        let schema = Rc::new(Self::literal_schema(&lit));
        let node = ExprNode::new(path.into(), ExprRepr::Literal(lit), schema, range.clone())
            .with_base(base);
        self.graph.alloc(node)
    }

    /// Builds the subgraph of a reference path: a symbol node for the head
    /// binding and one access node per remaining accessor.
    fn build_access(&mut self, access: &ast::PropertyAccess, path: &str, range: &Range) -> ExprId {
        let mut accessors = access.accessors.iter();

        let mut id = match accessors.next() {
            Some(pa) => match &pa.accessor {
                ast::Accessor::Key(name) => {
                    let node = ExprNode::new(
                        path.into(),
                        ExprRepr::Symbol { name: name.clone() },
                        Rc::new(Schema::always()),
                        self.range_or(&pa.range, range),
                    );
                    self.graph.alloc(node)
                }
                ast::Accessor::Index(_) => {
                    self.diags.error(
                        ErrorKind::Syntax,
                        self.range_or(&pa.range, range),
                        "a reference must begin with a name".to_string(),
                    );
                    self.alloc_literal(LiteralRepr::Null, path, range, None)
                }
            },
            None => {
                self.diags.error(
                    ErrorKind::Syntax,
                    range.clone(),
                    "empty reference".to_string(),
                );
                return self.alloc_literal(LiteralRepr::Null, path, range, None);
            }
        };

        for pa in accessors {
            let node = ExprNode::new(
                path.into(),
                ExprRepr::Access {
                    receiver: id,
                    accessor: pa.accessor.clone(),
                },
                Rc::new(Schema::always()),
                self.range_or(&pa.range, range),
            );
            id = self.graph.alloc(node);
        }
        id
    }

    fn build_object(
        &mut self,
        x: &ast::ObjectExpr,
        path: &str,
        base: Option<Rc<Value>>,
    ) -> ExprId {
        let mut properties = IndexMap::with_capacity(x.entries.len());
        for entry in &x.entries {
            let child_base = base.as_ref().and_then(|b| b.property(&entry.key)).cloned();
            let child_path = join_key(path, &entry.key);
            let child = self.build_expr(&entry.value, &child_path, child_base);
            properties.insert(entry.key.clone(), child);
        }
        let node = ExprNode::new(
            path.into(),
            ExprRepr::Object(properties),
            Rc::new(Schema::object()),
            x.range.clone(),
        )
        .with_base(base);
        self.graph.alloc(node)
    }

    /// Translates one AST node into graph form. Allocates one expression per
    /// node; literal objects and lists capture their children so that
    /// validation can blame the exact inner node.
    fn build_expr(&mut self, x: &ast::Expr, path: &str, base: Option<Rc<Value>>) -> ExprId {
        match x {
            ast::Expr::Null(n) => self.alloc_literal(LiteralRepr::Null, path, &n.range, base),
            ast::Expr::Boolean(b) => {
                self.alloc_literal(LiteralRepr::Bool(b.value), path, &b.range, base)
            }
            ast::Expr::Number(n) => match crate::number::Number::from_str(&n.value) {
                Ok(num) => self.alloc_literal(LiteralRepr::Number(num), path, &n.range, base),
                Err(_) => {
                    self.diags.error(
                        ErrorKind::Syntax,
                        self.range_or(&n.range, &Range::environment_only(self.environment.clone())),
                        format!("invalid number {:?}", n.value),
                    );
                    self.alloc_literal(LiteralRepr::Null, path, &n.range, base)
                }
            },
            ast::Expr::String(s) => {
                self.alloc_literal(LiteralRepr::String(s.value.clone()), path, &s.range, base)
            }
            ast::Expr::Interpolate(interp) => {
                let parts = interp
                    .parts
                    .iter()
                    .map(|p| InterpolatePart {
                        text: p.text.clone(),
                        value: p
                            .access
                            .as_ref()
                            .map(|access| self.build_access(access, path, &interp.range)),
                    })
                    .collect();
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::Interpolate(parts),
                    Rc::new(Schema::string()),
                    interp.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::Symbol(s) => {
                let id = self.build_access(&s.access, path, &s.range);
                self.graph[id].base = base;
                id
            }
            ast::Expr::List(l) => {
                let elements: Vec<ExprId> = l
                    .elements
                    .iter()
                    .enumerate()
                    .map(|(i, el)| self.build_expr(el, &format!("{path}[{i}]"), None))
                    .collect();
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::List(elements),
                    Rc::new(Schema::array()),
                    l.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::Object(o) => self.build_object(o, path, base),
            ast::Expr::Join(j) => {
                let delimiter = self.build_expr(&j.delimiter, path, None);
                let values = self.build_expr(&j.values, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::Join { delimiter, values },
                    Rc::new(Schema::string()),
                    j.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::Open(o) => {
                let literal_name = match o.provider.as_ref() {
                    ast::Expr::String(s) => Some(s.value.clone()),
                    _ => None,
                };
                let (provider_name, input_schema, output_schema) = match &literal_name {
                    Some(name) => match self.providers.get(name) {
                        Some(p) => {
                            let (input, output) = p.schema();
                            (Some(name.clone()), input, output)
                        }
                        None => {
                            self.diags.error(
                                ErrorKind::Provider,
                                self.range_or(o.provider.range(), &o.range),
                                format!("unknown provider {name:?}"),
                            );
                            (None, Rc::new(Schema::always()), Rc::new(Schema::always()))
                        }
                    },
                    None => {
                        self.diags.error(
                            ErrorKind::Provider,
                            self.range_or(o.provider.range(), &o.range),
                            "provider must be a string literal".to_string(),
                        );
                        (None, Rc::new(Schema::always()), Rc::new(Schema::always()))
                    }
                };
                let provider = self.build_expr(&o.provider, path, None);
                let inputs = self.build_expr(&o.inputs, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::Open {
                        provider,
                        inputs,
                        provider_name,
                        input_schema,
                        output_schema: output_schema.clone(),
                    },
                    output_schema,
                    o.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::Secret(s) => {
                let value = self.build_expr(&s.value, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::Secret { value },
                    Rc::new(Schema::always()),
                    s.range.clone(),
                )
                .with_base(base);
                let id = self.graph.alloc(node);
                self.graph[id].secret = true;
                id
            }
            ast::Expr::ToBase64(b) => {
                let value = self.build_expr(&b.value, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::ToBase64 { value },
                    Rc::new(Schema::string()),
                    b.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::ToJson(j) => {
                let value = self.build_expr(&j.value, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::ToJson { value },
                    Rc::new(Schema::string()),
                    j.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
            ast::Expr::ToString(t) => {
                let value = self.build_expr(&t.value, path, None);
                let node = ExprNode::new(
                    path.into(),
                    ExprRepr::ToString { value },
                    Rc::new(Schema::string()),
                    t.range.clone(),
                )
                .with_base(base);
                self.graph.alloc(node)
            }
        }
    }

    /// Reports a cycle closed at `id`: one reference diagnostic per document
    /// path on the cycle, each naming the full chain.
    fn cyclic_reference(&mut self, id: ExprId) {
        let pos = self.stack.iter().position(|x| *x == id).unwrap_or(0);
        let cycle: Vec<ExprId> = self.stack[pos..].to_vec();

        let mut chain: Vec<Rc<str>> = Vec::new();
        for p in cycle.iter().chain([&id]) {
            let path = self.graph[*p].path.clone();
            if chain.last() != Some(&path) {
                chain.push(path);
            }
        }
        let summary = format!(
            "cyclic reference: {}",
            chain
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let mut seen: Vec<Rc<str>> = Vec::new();
        for p in cycle {
            let path = self.graph[p].path.clone();
            if seen.contains(&path) {
                continue;
            }
            seen.push(path);
            let range = self.graph[p].def_range(&self.environment);
            self.diags.error(ErrorKind::Reference, range, summary.clone());
        }
    }

    fn evaluate(&mut self, id: ExprId) -> EvalResult<Rc<Value>> {
        match self.graph[id].state {
            EvalState::Done => {
                return self.graph[id]
                    .value
                    .clone()
                    .ok_or_else(|| Abort::Internal(anyhow!("expression is done but has no value")));
            }
            EvalState::Evaluating => {
                self.cyclic_reference(id);
                let node = &mut self.graph[id];
                let v = Rc::new(Value::unknown(ValueSource::Expr(id), node.schema.clone()));
                node.value = Some(v.clone());
                node.state = EvalState::Done;
                return Ok(v);
            }
            EvalState::Declared => {}
        }
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }

        self.graph[id].state = EvalState::Evaluating;
        self.stack.push(id);
        let result = self.evaluate_repr(id);
        self.stack.pop();

        let node = &mut self.graph[id];
        match result {
            Ok(v) => {
                // A cycle through this expression may already have produced
                // its value; re-evaluation must not produce a second one.
                if let Some(existing) = &node.value {
                    return Ok(existing.clone());
                }
                node.schema = v.schema.clone();
                node.value = Some(v.clone());
                node.state = EvalState::Done;
                Ok(v)
            }
            Err(abort) => {
                if node.value.is_none() {
                    node.value = Some(Rc::new(Value::unknown(
                        ValueSource::Expr(id),
                        node.schema.clone(),
                    )));
                }
                node.state = EvalState::Done;
                Err(abort)
            }
        }
    }

    fn unknown_of(&self, id: ExprId, schema: Rc<Schema>, secret: bool) -> Rc<Value> {
        Rc::new(Value {
            repr: ValueRepr::Null,
            def: ValueSource::Expr(id),
            schema,
            secret,
            unknown: true,
        })
    }

    fn validate_value(&mut self, v: &Value, accept: &Schema, at: ExprId) -> bool {
        let mut validator = Validator {
            graph: &self.graph,
            environment: &self.environment,
            diags: &mut self.diags,
        };
        validator.validate_value(v, accept, &ValidationLoc::new(at))
    }

    fn evaluate_repr(&mut self, id: ExprId) -> EvalResult<Rc<Value>> {
        let repr = self.graph[id].repr.clone();
        let base = self.graph[id].base.clone();
        let declared = self.graph[id].schema.clone();
        let marked_secret = self.graph[id].secret;
        let def = ValueSource::Expr(id);

        match repr {
            ExprRepr::Literal(lit) => {
                let repr = match lit {
                    LiteralRepr::Null => ValueRepr::Null,
                    LiteralRepr::Bool(b) => ValueRepr::Bool(b),
                    LiteralRepr::Number(n) => ValueRepr::Number(n),
                    LiteralRepr::String(s) => ValueRepr::String(s),
                };
                Ok(Rc::new(
                    Value::new(repr, def, declared).with_secret(marked_secret),
                ))
            }

            ExprRepr::List(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for el in elements {
                    values.push(self.evaluate(el)?);
                }
                let secret = marked_secret || values.iter().any(|v| v.secret);
                let schema = Rc::new(Schema::tuple_of(&values));
                Ok(Rc::new(
                    Value::new(ValueRepr::Array(values), def, schema).with_secret(secret),
                ))
            }

            ExprRepr::Object(properties) => {
                let mut children = IndexMap::with_capacity(properties.len());
                for (k, child) in properties {
                    children.insert(k, self.evaluate(child)?);
                }

                // Deep merge with the base: keys present in the literal win
                // (each child already merged its own base); keys only in the
                // base flow through.
                let mut merged: IndexMap<Rc<str>, Rc<Value>> = IndexMap::new();
                if let Some(base_map) = base.as_ref().and_then(|b| b.as_object()) {
                    for (k, bv) in base_map {
                        let v = children.get(k).cloned().unwrap_or_else(|| bv.clone());
                        merged.insert(k.clone(), v);
                    }
                }
                for (k, v) in children {
                    if !merged.contains_key(&k) {
                        merged.insert(k, v);
                    }
                }

                let secret = marked_secret || merged.values().any(|v| v.secret);
                let schema = Rc::new(Schema::record_of(&merged));
                Ok(Rc::new(
                    Value::new(ValueRepr::Object(merged), def, schema).with_secret(secret),
                ))
            }

            ExprRepr::Interpolate(parts) => {
                // A single bare reference preserves the referenced value's
                // type; any surrounding text forces a string.
                if let [part] = parts.as_slice() {
                    if part.text.is_empty() {
                        if let Some(pid) = part.value {
                            let v = self.evaluate(pid)?;
                            return Ok(Rc::new(Value {
                                repr: v.repr.clone(),
                                def,
                                schema: v.schema.clone(),
                                secret: v.secret || marked_secret,
                                unknown: v.unknown,
                            }));
                        }
                    }
                }

                let mut out = String::new();
                let mut secret = marked_secret;
                let mut unknown = false;
                for part in &parts {
                    out.push_str(&part.text);
                    if let Some(pid) = part.value {
                        let v = self.evaluate(pid)?;
                        secret = secret || v.secret;
                        unknown = unknown || v.contains_unknown();
                        out.push_str(&v.to_canonical_string());
                    }
                }
                if unknown {
                    return Ok(self.unknown_of(id, Rc::new(Schema::string()), secret));
                }
                Ok(Rc::new(
                    Value::new(
                        ValueRepr::String(out.into()),
                        def,
                        Rc::new(Schema::string()),
                    )
                    .with_secret(secret),
                ))
            }

            ExprRepr::Symbol { name } => {
                if let Some(target) = self.bindings.get(&name).copied() {
                    let v = self.evaluate(target)?;
                    return Ok(Rc::new((*v).clone().with_secret(marked_secret)));
                }
                if let Some(v) = self.base.as_ref().and_then(|b| b.property(&name)) {
                    return Ok(Rc::new((**v).clone().with_secret(marked_secret)));
                }
                let range = self.graph[id].def_range(&self.environment);
                self.diags.error(
                    ErrorKind::Reference,
                    range,
                    format!("unknown property {name:?}"),
                );
                Ok(self.unknown_of(id, Rc::new(Schema::always()), marked_secret))
            }

            ExprRepr::Access { receiver, accessor } => {
                let recv = self.evaluate(receiver)?;
                self.access(id, &recv, &accessor, marked_secret)
            }

            ExprRepr::Join { delimiter, values } => {
                let d = self.evaluate(delimiter)?;
                let vs = self.evaluate(values)?;

                let delimiter_ok = self.validate_value(&d, &Schema::string(), delimiter);
                let values_ok = self.validate_value(
                    &vs,
                    &Schema::array().items(Schema::string()),
                    values,
                );

                let secret = marked_secret || d.secret || vs.secret;
                if !delimiter_ok || !values_ok || d.unknown || vs.contains_unknown() {
                    return Ok(self.unknown_of(id, Rc::new(Schema::string()), secret));
                }

                let parts: Vec<String> = vs
                    .as_array()
                    .map(|a| a.iter().map(|v| v.to_canonical_string()).collect())
                    .unwrap_or_default();
                let delim = d.as_str().unwrap_or_default();
                Ok(Rc::new(
                    Value::new(
                        ValueRepr::String(parts.join(delim).into()),
                        def,
                        Rc::new(Schema::string()),
                    )
                    .with_secret(secret),
                ))
            }

            ExprRepr::ToBase64 { value } => {
                let v = self.evaluate(value)?;
                let secret = marked_secret || v.secret;
                let ok = self.validate_value(&v, &Schema::string(), value);
                if !ok || v.unknown {
                    return Ok(self.unknown_of(id, Rc::new(Schema::string()), secret));
                }
                let encoded = BASE64.encode(v.as_str().unwrap_or_default().as_bytes());
                Ok(Rc::new(
                    Value::new(
                        ValueRepr::String(encoded.into()),
                        def,
                        Rc::new(Schema::string()),
                    )
                    .with_secret(secret),
                ))
            }

            ExprRepr::ToJson { value } => {
                let v = self.evaluate(value)?;
                let secret = marked_secret || v.secret;
                if v.contains_unknown() {
                    return Ok(self.unknown_of(id, Rc::new(Schema::string()), secret));
                }
                Ok(Rc::new(
                    Value::new(
                        ValueRepr::String(v.to_canonical_json().into()),
                        def,
                        Rc::new(Schema::string()),
                    )
                    .with_secret(secret),
                ))
            }

            ExprRepr::ToString { value } => {
                let v = self.evaluate(value)?;
                let secret = marked_secret || v.secret;
                if v.contains_unknown() {
                    return Ok(self.unknown_of(id, Rc::new(Schema::string()), secret));
                }
                Ok(Rc::new(
                    Value::new(
                        ValueRepr::String(v.to_canonical_string().into()),
                        def,
                        Rc::new(Schema::string()),
                    )
                    .with_secret(secret),
                ))
            }

            ExprRepr::Secret { value } => {
                let v = self.evaluate(value)?;
                Ok(Rc::new((*v).clone().with_secret(true)))
            }

            ExprRepr::Open {
                provider,
                inputs,
                provider_name,
                input_schema,
                output_schema,
            } => {
                self.evaluate(provider)?;
                let iv = self.evaluate(inputs)?;

                let Some(name) = provider_name else {
                    // The provider was already diagnosed during construction.
                    return Ok(self.unknown_of(id, output_schema, marked_secret || iv.secret));
                };

                let inputs_ok = self.validate_value(&iv, &input_schema, inputs);
                let secret = marked_secret || iv.secret;
                if !inputs_ok || iv.contains_unknown() {
                    return Ok(self.unknown_of(id, output_schema, secret));
                }

                if self.cancel.is_cancelled() {
                    return Err(Abort::Cancelled);
                }

                let Some(p) = self.providers.get(&name) else {
                    return Err(anyhow!("provider {name:?} disappeared from the registry").into());
                };
                debug!("opening provider {name}");
                match p.clone().open(&iv, &self.cancel) {
                    Ok(ProviderOutput::Value {
                        value,
                        secret: secret_hint,
                    }) => {
                        let v = Value::from_json(&value, &def, secret || secret_hint)
                            .map_err(Abort::Internal)?;
                        // The result inherits the provider's declared output
                        // schema.
                        let mut v = (*v).clone();
                        v.schema = output_schema;
                        Ok(Rc::new(v))
                    }
                    Ok(ProviderOutput::Unknown) => Ok(self.unknown_of(id, output_schema, secret)),
                    Err(e) => {
                        let range = self.graph[id].def_range(&self.environment);
                        self.diags
                            .error(ErrorKind::Provider, range, format!("{e}"));
                        Ok(self.unknown_of(id, output_schema, secret))
                    }
                }
            }
        }
    }

    /// Applies one accessor to an evaluated receiver. Accessor errors are
    /// recoverable: they yield a diagnostic and an unknown value.
    fn access(
        &mut self,
        id: ExprId,
        recv: &Rc<Value>,
        accessor: &ast::Accessor,
        marked_secret: bool,
    ) -> EvalResult<Rc<Value>> {
        let secret = marked_secret || recv.secret;

        if recv.unknown {
            // Project the receiver's schema through the accessor so the
            // unknown result is still typed.
            let schema = match accessor {
                ast::Accessor::Key(k) => recv
                    .schema
                    .properties
                    .as_ref()
                    .and_then(|p| p.get(k.as_ref()).cloned())
                    .or_else(|| recv.schema.additional_properties.clone())
                    .unwrap_or_else(|| Rc::new(Schema::always())),
                ast::Accessor::Index(i) => {
                    let prefix = recv.schema.prefix_items.as_deref().unwrap_or(&[]);
                    usize::try_from(*i)
                        .ok()
                        .and_then(|i| prefix.get(i).cloned())
                        .or_else(|| recv.schema.items.clone())
                        .unwrap_or_else(|| Rc::new(Schema::always()))
                }
            };
            return Ok(self.unknown_of(id, schema, secret));
        }

        let range = self.graph[id].def_range(&self.environment);
        match accessor {
            ast::Accessor::Key(k) => match recv.as_object() {
                Some(m) => match m.get(k.as_ref()) {
                    Some(v) => Ok(Rc::new((**v).clone().with_secret(marked_secret))),
                    None => {
                        self.diags.error(
                            ErrorKind::Reference,
                            range,
                            format!("unknown property {k:?}"),
                        );
                        Ok(self.unknown_of(id, Rc::new(Schema::always()), secret))
                    }
                },
                None => {
                    self.diags.error(
                        ErrorKind::Type,
                        range,
                        format!("expected an object, got {}", recv.type_name()),
                    );
                    Ok(self.unknown_of(id, Rc::new(Schema::always()), secret))
                }
            },
            ast::Accessor::Index(i) => match recv.as_array() {
                Some(a) => {
                    let index = if *i < 0 { a.len() as isize + i } else { *i };
                    match usize::try_from(index).ok().and_then(|i| a.get(i)) {
                        Some(v) => Ok(Rc::new((**v).clone().with_secret(marked_secret))),
                        None => {
                            self.diags.error(
                                ErrorKind::Reference,
                                range,
                                format!("index {i} out of range"),
                            );
                            Ok(self.unknown_of(id, Rc::new(Schema::always()), secret))
                        }
                    }
                }
                None => {
                    self.diags.error(
                        ErrorKind::Type,
                        range,
                        format!("expected an array, got {}", recv.type_name()),
                    );
                    Ok(self.unknown_of(id, Rc::new(Schema::always()), secret))
                }
            },
        }
    }

    fn export(&self, env: &ast::Environment, root: ExprId, value: &Rc<Value>) -> Environment {
        let mut exprs = IndexMap::new();
        if let ExprRepr::Object(properties) = &self.graph[root].repr {
            for (k, id) in properties {
                exprs.insert(
                    k.clone(),
                    export::export_expr(&self.graph, &self.environment, *id),
                );
            }
        }
        let properties = value.as_object().cloned().unwrap_or_default();
        Environment {
            description: env.description.clone(),
            exprs,
            properties,
            schema: value.schema.clone(),
        }
    }
}
