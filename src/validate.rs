// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Schema validation for builtin arguments.
///
/// Two checkers live here. The value checker decides whether a concrete value
/// conforms to a schema; the schema checker decides whether one schema admits
/// another, and is the fallback for unknown values, whose representation is
/// unavailable but whose schema is not. Both accumulate diagnostics instead
/// of short-circuiting so that a single validation reports every violation.
use crate::diag::{Diagnostics, ErrorKind};
use crate::expr::{ExprGraph, ExprId, ExprRepr};
use crate::number::Number;
use crate::schema::Schema;
use crate::value::{Value, ValueRepr};

use std::collections::BTreeSet;
use std::rc::Rc;

/// Joins a path and a key into a dotted path, quoting keys that are not
/// simple identifiers.
pub(crate) fn join_key(path: &str, key: &str) -> String {
    let simple = !key.is_empty()
        && key
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    if !simple {
        format!("{path}[{key:?}]")
    } else if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// The location to blame for a validation failure.
///
/// When the value under validation is defined by a literal, descending into
/// it moves the location to the inner child so that errors point at the
/// narrowest source span. When it is not, the location keeps the outer
/// expression and accumulates a relative path that is prefixed onto error
/// messages.
///
/// Descent intentionally does not traverse an object literal's base: this
/// keeps validation errors local to the value being validated.
#[derive(Debug, Clone)]
pub(crate) struct ValidationLoc {
    id: ExprId,
    path: String,
    prefix: bool,
}

impl ValidationLoc {
    pub(crate) fn new(id: ExprId) -> Self {
        ValidationLoc {
            id,
            path: String::new(),
            prefix: false,
        }
    }

    fn index(&self, graph: &ExprGraph, i: usize) -> ValidationLoc {
        if let ExprRepr::List(elements) = &graph[self.id].repr {
            if let Some(el) = elements.get(i) {
                return ValidationLoc {
                    id: *el,
                    path: format!("[{i}]"),
                    prefix: false,
                };
            }
        }
        ValidationLoc {
            id: self.id,
            path: format!("{}[{i}]", self.path),
            prefix: true,
        }
    }

    fn property(&self, graph: &ExprGraph, key: &str) -> ValidationLoc {
        if let ExprRepr::Object(properties) = &graph[self.id].repr {
            if let Some(child) = properties.get(key) {
                return ValidationLoc {
                    id: *child,
                    path: join_key("", key),
                    prefix: false,
                };
            }
        }
        ValidationLoc {
            id: self.id,
            path: join_key(&self.path, key),
            prefix: true,
        }
    }
}

fn is_any(s: Option<&Schema>) -> bool {
    s.map_or(true, |s| s.always)
}

fn json_repr(v: &serde_json::Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|e| format!("<error formatting constant: {e}>"))
}

/// True if the JSON value of `v` equals `c`. Numbers compare by the lexical
/// form of their JSON representation, preserving precision.
fn equals_const(v: &Value, c: &serde_json::Value) -> bool {
    if v.unknown {
        return false;
    }
    match (&v.repr, c) {
        (ValueRepr::Null, serde_json::Value::Null) => true,
        (ValueRepr::Bool(b), serde_json::Value::Bool(c)) => b == c,
        (ValueRepr::Number(n), serde_json::Value::Number(c)) => n.lexical() == c.to_string(),
        (ValueRepr::String(s), serde_json::Value::String(c)) => s.as_ref() == c,
        (ValueRepr::Array(a), serde_json::Value::Array(c)) => {
            a.len() == c.len() && a.iter().zip(c.iter()).all(|(v, c)| equals_const(v, c))
        }
        (ValueRepr::Object(m), serde_json::Value::Object(c)) => {
            m.len() == c.len()
                && c.iter().all(|(k, c)| match m.get(k.as_str()) {
                    Some(v) => equals_const(v, c),
                    None => false,
                })
        }
        _ => false,
    }
}

/// The validation engine for one evaluation: borrows the expression graph for
/// blame tracking and the diagnostics sink for reporting.
pub(crate) struct Validator<'a> {
    pub graph: &'a ExprGraph,
    pub environment: &'a Rc<str>,
    pub diags: &'a mut Diagnostics,
}

impl Validator<'_> {
    /// Issues a validation error at the given location.
    fn validation_error(&mut self, kind: ErrorKind, loc: &ValidationLoc, message: String) -> bool {
        let message = if loc.prefix {
            format!("{}: {message}", loc.path)
        } else {
            message
        };
        let range = self.graph[loc.id].def_range(self.environment);
        self.diags.error(kind, range, message);
        false
    }

    fn const_error(&mut self, loc: &ValidationLoc, expected: &serde_json::Value) -> bool {
        self.validation_error(
            ErrorKind::Constraint,
            loc,
            format!("expected {}", json_repr(expected)),
        )
    }

    fn type_error(&mut self, loc: &ValidationLoc, expected: &str, got: &str) -> bool {
        self.validation_error(
            ErrorKind::Type,
            loc,
            format!("expected {expected}, got {got}"),
        )
    }

    fn check_type(&mut self, actual: &str, accept: &Schema, loc: &ValidationLoc) -> bool {
        match accept.ty.as_deref() {
            Some(expected) if expected != actual => self.type_error(loc, expected, actual),
            _ => true,
        }
    }

    /// Checks that `accept` admits every value admitted by `x`.
    pub(crate) fn validate_schema(
        &mut self,
        x: Option<&Schema>,
        accept: Option<&Schema>,
        loc: &ValidationLoc,
    ) -> bool {
        if is_any(accept) {
            return true;
        }
        let Some(accept) = accept else { return true };
        if accept.never {
            return false;
        }
        if is_any(x) {
            return true;
        }
        let Some(x) = x else { return true };

        let actual = x.ty.as_deref().unwrap_or("unknown");
        if !self.check_type(actual, accept, loc) {
            return false;
        }

        match actual {
            "array" => self.validate_schema_array(x, accept, loc),
            "object" => self.validate_schema_object(x, accept, loc),
            _ => true,
        }
    }

    /// Array rules: common prefix positions align pairwise; surplus positions
    /// on either side fall back to the other side's items; finally the tails
    /// are compared.
    fn validate_schema_array(&mut self, x: &Schema, accept: &Schema, loc: &ValidationLoc) -> bool {
        let mut all_ok = true;

        let xprefix = x.prefix_items.as_deref().unwrap_or(&[]);
        let aprefix = accept.prefix_items.as_deref().unwrap_or(&[]);

        let mut i = 0;
        while i < xprefix.len() && i < aprefix.len() {
            let ok = self.validate_schema(
                Some(&xprefix[i]),
                Some(&aprefix[i]),
                &loc.index(self.graph, i),
            );
            all_ok = all_ok && ok;
            i += 1;
        }
        while i < xprefix.len() {
            let ok = self.validate_schema(
                Some(&xprefix[i]),
                accept.items.as_deref(),
                &loc.index(self.graph, i),
            );
            all_ok = all_ok && ok;
            i += 1;
        }
        while i < aprefix.len() {
            let ok = self.validate_schema(
                x.items.as_deref(),
                Some(&aprefix[i]),
                &loc.index(self.graph, i),
            );
            all_ok = all_ok && ok;
            i += 1;
        }

        if let Some(items) = &x.items {
            if !items.never {
                let ok = self.validate_schema(Some(items), accept.items.as_deref(), loc);
                all_ok = all_ok && ok;
            }
        }
        all_ok
    }

    /// Object rules: every property of `x` must be admitted by a same-named
    /// property of `accept` or by `accept`'s additional properties. When `x`
    /// leaves additional properties unspecified it is a closed record, and
    /// `accept`'s required and dependent-required clauses must already hold
    /// in `x`; when `x` allows additional properties, `accept` must admit
    /// them.
    fn validate_schema_object(&mut self, x: &Schema, accept: &Schema, loc: &ValidationLoc) -> bool {
        let mut all_ok = true;

        let empty = std::collections::BTreeMap::new();
        let xprops = x.properties.as_ref().unwrap_or(&empty);
        let aprops = accept.properties.as_ref().unwrap_or(&empty);

        for (name, px) in xprops {
            let ploc = loc.property(self.graph, name);
            let ok = match aprops.get(name) {
                Some(pa) => self.validate_schema(Some(px), Some(pa), &ploc),
                None => {
                    self.validate_schema(Some(px), accept.additional_properties.as_deref(), &ploc)
                }
            };
            all_ok = all_ok && ok;
        }

        match &x.additional_properties {
            None => {
                let xreq: BTreeSet<&str> = x
                    .required
                    .iter()
                    .flatten()
                    .map(|k| k.as_ref())
                    .collect();

                for name in accept.required.iter().flatten() {
                    if !xreq.contains(name.as_ref()) {
                        self.validation_error(
                            ErrorKind::Constraint,
                            &loc.property(self.graph, name),
                            "missing required property".to_string(),
                        );
                        all_ok = false;
                    }
                }

                for (name, required) in accept.dependent_required.iter().flatten() {
                    if xreq.contains(name.as_ref()) {
                        for name in required {
                            if !xreq.contains(name.as_ref()) {
                                self.validation_error(
                                    ErrorKind::Constraint,
                                    &loc.property(self.graph, name),
                                    "missing required property".to_string(),
                                );
                                all_ok = false;
                            }
                        }
                    }
                }
            }
            Some(xa) if !xa.never => {
                let ok =
                    self.validate_schema(Some(xa), accept.additional_properties.as_deref(), loc);
                all_ok = all_ok && ok;
            }
            Some(_) => {}
        }

        all_ok
    }

    /// Checks that `accept` validates `v`, blaming `loc` for failures.
    pub(crate) fn validate_value(
        &mut self,
        v: &Value,
        accept: &Schema,
        loc: &ValidationLoc,
    ) -> bool {
        if let Err(e) = accept.compile() {
            return self.validation_error(
                ErrorKind::Internal,
                loc,
                format!("internal error: invalid schema: {e}"),
            );
        }

        if accept.always {
            return true;
        }
        if accept.never {
            return false;
        }
        if v.unknown {
            return self.validate_schema(Some(&v.schema), Some(accept), loc);
        }

        let cok = self.validate_const(v, accept, loc);
        let eok = self.validate_enum(v, accept, loc);
        let tok = self.validate_type(v, accept, loc);
        cok && eok && tok
    }

    fn validate_const(&mut self, v: &Value, accept: &Schema, loc: &ValidationLoc) -> bool {
        match &accept.constant {
            Some(c) if !equals_const(v, c) => self.const_error(loc, c),
            _ => true,
        }
    }

    fn validate_enum(&mut self, v: &Value, accept: &Schema, loc: &ValidationLoc) -> bool {
        let Some(values) = &accept.enum_values else {
            return true;
        };
        if values.is_empty() || values.iter().any(|c| equals_const(v, c)) {
            return true;
        }
        if let [only] = values.as_slice() {
            return self.const_error(loc, only);
        }
        self.validation_error(
            ErrorKind::Constraint,
            loc,
            format!(
                "expected one of {}",
                json_repr(&serde_json::Value::Array(values.clone()))
            ),
        )
    }

    fn validate_type(&mut self, v: &Value, accept: &Schema, loc: &ValidationLoc) -> bool {
        if !self.check_type(v.type_name(), accept, loc) {
            return false;
        }
        match &v.repr {
            ValueRepr::Null | ValueRepr::Bool(_) => true,
            ValueRepr::Number(n) => self.validate_number(n, accept, loc),
            ValueRepr::String(s) => self.validate_string(s, accept, loc),
            ValueRepr::Array(a) => self.validate_array(a, accept, loc),
            ValueRepr::Object(_) => self.validate_object(v, accept, loc),
        }
    }

    fn validate_number(&mut self, n: &Number, accept: &Schema, loc: &ValidationLoc) -> bool {
        let mut ok = true;
        if let Some(m) = &accept.multiple_of {
            if !n.is_multiple_of(m) {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a multiple of {m}"),
                );
                ok = false;
            }
        }
        if let Some(m) = &accept.minimum {
            if n < m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a number greater than or equal to {m}"),
                );
                ok = false;
            }
        }
        if let Some(m) = &accept.exclusive_minimum {
            if n <= m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a number greater than {m}"),
                );
                ok = false;
            }
        }
        if let Some(m) = &accept.maximum {
            if n > m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a number less than or equal to {m}"),
                );
                ok = false;
            }
        }
        if let Some(m) = &accept.exclusive_maximum {
            if n >= m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a number less than {m}"),
                );
                ok = false;
            }
        }
        ok
    }

    fn validate_string(&mut self, s: &str, accept: &Schema, loc: &ValidationLoc) -> bool {
        let mut ok = true;
        let len = s.chars().count();
        if let Some(m) = accept.min_length {
            if len < m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a string of at least length {m}"),
                );
                ok = false;
            }
        }
        if let Some(m) = accept.max_length {
            if len > m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected a string of at most length {m}"),
                );
                ok = false;
            }
        }
        if let Some(p) = accept.pattern_regex() {
            if !p.is_match(s) {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("string must match the pattern {:?}", p.as_str()),
                );
                ok = false;
            }
        }
        ok
    }

    fn validate_array(&mut self, a: &[Rc<Value>], accept: &Schema, loc: &ValidationLoc) -> bool {
        let mut ok = true;
        if let Some(m) = accept.min_items {
            if a.len() < m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected an array with at least {m} items"),
                );
                ok = false;
            }
        }
        if let Some(m) = accept.max_items {
            if a.len() > m {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected an array with at most {m} items"),
                );
                ok = false;
            }
        }

        let prefix = accept.prefix_items.as_deref().unwrap_or(&[]);
        for (i, v) in a.iter().enumerate() {
            let vloc = loc.index(self.graph, i);
            let accept = match prefix.get(i) {
                Some(p) => Some(p.as_ref()),
                None => accept.items.as_deref(),
            };
            if let Some(accept) = accept {
                if !self.validate_value(v, accept, &vloc) {
                    ok = false;
                }
            }
        }
        ok
    }

    fn validate_object(&mut self, v: &Value, accept: &Schema, loc: &ValidationLoc) -> bool {
        let Some(m) = v.as_object() else {
            return true;
        };

        let mut ok = true;
        if let Some(min) = accept.min_properties {
            if m.len() < min {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected an object with at least {min} properties"),
                );
                ok = false;
            }
        }
        if let Some(max) = accept.max_properties {
            if m.len() > max {
                self.validation_error(
                    ErrorKind::Constraint,
                    loc,
                    format!("expected an object with at most {max} properties"),
                );
                ok = false;
            }
        }

        for (k, kv) in m {
            let vloc = loc.property(self.graph, k);
            let prop = accept.properties.as_ref().and_then(|p| p.get(k.as_ref()));
            let accept = match prop {
                Some(p) => Some(p.as_ref()),
                None => accept.additional_properties.as_deref(),
            };
            if let Some(accept) = accept {
                if !self.validate_value(kv, accept, &vloc) {
                    ok = false;
                }
            }
        }

        let mut missing: Vec<&str> = Vec::new();
        for k in accept.required.iter().flatten() {
            if !m.contains_key(k.as_ref()) {
                missing.push(k.as_ref());
            }
        }
        for (k, required) in accept.dependent_required.iter().flatten() {
            if m.contains_key(k.as_ref()) {
                for rk in required {
                    if !m.contains_key(rk.as_ref()) {
                        missing.push(rk.as_ref());
                    }
                }
            }
        }
        if !missing.is_empty() {
            self.validation_error(
                ErrorKind::Constraint,
                loc,
                format!("missing required properties: {}", missing.join(", ")),
            );
            ok = false;
        }

        ok
    }
}
