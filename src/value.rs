// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::expr::ExprId;
use crate::number::Number;
use crate::schema::Schema;

use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

/// Where a value came from: the expression in the current graph that defines
/// it, or the named import that supplied it as a base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Expr(ExprId),
    Import(Rc<str>),
}

/// The concrete representation of a value.
///
/// Objects preserve insertion order so that iteration and export are
/// deterministic.
#[derive(Debug, Clone)]
pub enum ValueRepr {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Array(Vec<Rc<Value>>),
    Object(IndexMap<Rc<str>, Rc<Value>>),
}

/// An evaluated value together with its tracked attributes: the defining
/// expression, the effective schema, and the secret and unknown flags.
///
/// An unknown value is one whose concrete representation is unavailable but
/// whose schema is known, typically because a provider deferred its output.
/// Its `repr` is `Null` and must not be interpreted.
#[derive(Debug, Clone)]
pub struct Value {
    pub repr: ValueRepr,
    pub def: ValueSource,
    pub schema: Rc<Schema>,
    pub secret: bool,
    pub unknown: bool,
}

impl Value {
    pub fn new(repr: ValueRepr, def: ValueSource, schema: Rc<Schema>) -> Self {
        Value {
            repr,
            def,
            schema,
            secret: false,
            unknown: false,
        }
    }

    /// An unknown value of the given schema.
    pub fn unknown(def: ValueSource, schema: Rc<Schema>) -> Self {
        Value {
            repr: ValueRepr::Null,
            def,
            schema,
            secret: false,
            unknown: true,
        }
    }

    pub fn with_secret(mut self, secret: bool) -> Self {
        self.secret = self.secret || secret;
        self
    }

    pub fn type_name(&self) -> &'static str {
        match &self.repr {
            ValueRepr::Null => "null",
            ValueRepr::Bool(_) => "boolean",
            ValueRepr::Number(_) => "number",
            ValueRepr::String(_) => "string",
            ValueRepr::Array(_) => "array",
            ValueRepr::Object(_) => "object",
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<Rc<str>, Rc<Value>>> {
        match &self.repr {
            ValueRepr::Object(m) if !self.unknown => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Rc<Value>>> {
        match &self.repr {
            ValueRepr::Array(a) if !self.unknown => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.repr {
            ValueRepr::String(s) if !self.unknown => Some(s),
            _ => None,
        }
    }

    /// Looks up a property on an object value.
    pub fn property(&self, key: &str) -> Option<&Rc<Value>> {
        self.as_object().and_then(|m| m.get(key))
    }

    /// True if this value or any value nested within it is unknown. Builtins
    /// that need the full concrete representation defer when this holds.
    pub fn contains_unknown(&self) -> bool {
        if self.unknown {
            return true;
        }
        match &self.repr {
            ValueRepr::Array(a) => a.iter().any(|v| v.contains_unknown()),
            ValueRepr::Object(m) => m.values().any(|v| v.contains_unknown()),
            _ => false,
        }
    }

    /// Builds a value tree from a JSON document. Every node carries the given
    /// source and secret flag; schemas are inferred structurally.
    pub fn from_json(
        json: &serde_json::Value,
        def: &ValueSource,
        secret: bool,
    ) -> anyhow::Result<Rc<Value>> {
        use std::str::FromStr as _;
        let repr = match json {
            serde_json::Value::Null => ValueRepr::Null,
            serde_json::Value::Bool(b) => ValueRepr::Bool(*b),
            serde_json::Value::Number(n) => ValueRepr::Number(
                Number::from_str(&n.to_string())
                    .map_err(|_| anyhow::anyhow!("invalid number {n}"))?,
            ),
            serde_json::Value::String(s) => ValueRepr::String(s.as_str().into()),
            serde_json::Value::Array(a) => ValueRepr::Array(
                a.iter()
                    .map(|v| Self::from_json(v, def, secret))
                    .collect::<anyhow::Result<_>>()?,
            ),
            serde_json::Value::Object(m) => {
                let mut map = IndexMap::with_capacity(m.len());
                for (k, v) in m {
                    map.insert(Rc::from(k.as_str()), Self::from_json(v, def, secret)?);
                }
                ValueRepr::Object(map)
            }
        };
        Ok(Rc::new(Value {
            repr,
            def: def.clone(),
            schema: Rc::new(Schema::of_json(json)),
            secret,
            unknown: false,
        }))
    }

    /// Deep key-wise merge of `over` on top of `base`.
    ///
    /// Keys present in `over` win; keys only in `base` are preserved; values
    /// present in both are merged recursively. Non-object values are replaced
    /// by `over`. Base keys precede override-only keys, which makes the merge
    /// associative with respect to insertion order.
    pub fn merged(base: &Rc<Value>, over: &Rc<Value>) -> Rc<Value> {
        let (base_map, over_map) = match (base.as_object(), over.as_object()) {
            (Some(b), Some(o)) => (b, o),
            _ => return over.clone(),
        };

        let mut merged = IndexMap::with_capacity(base_map.len() + over_map.len());
        for (k, bv) in base_map {
            match over_map.get(k) {
                Some(ov) => merged.insert(k.clone(), Value::merged(bv, ov)),
                None => merged.insert(k.clone(), bv.clone()),
            };
        }
        for (k, ov) in over_map {
            if !merged.contains_key(k) {
                merged.insert(k.clone(), ov.clone());
            }
        }

        let schema = Rc::new(Schema::record_of(&merged));
        let secret = merged.values().any(|v| v.secret);
        Rc::new(Value {
            repr: ValueRepr::Object(merged),
            def: over.def.clone(),
            schema,
            secret,
            unknown: false,
        })
    }

    /// The canonical string form: strings verbatim, numbers by their lexical
    /// form, booleans and null by their JSON spellings, containers as
    /// canonical compact JSON.
    pub fn to_canonical_string(&self) -> String {
        if self.unknown {
            return String::new();
        }
        match &self.repr {
            ValueRepr::Null => "null".to_string(),
            ValueRepr::Bool(b) => b.to_string(),
            ValueRepr::Number(n) => n.lexical().to_string(),
            ValueRepr::String(s) => s.to_string(),
            ValueRepr::Array(_) | ValueRepr::Object(_) => self.to_canonical_json(),
        }
    }

    /// The canonical JSON text of the value: object keys sorted, numbers
    /// verbatim, secret values as their underlying representation, unknown
    /// values as null.
    pub fn to_canonical_json(&self) -> String {
        let mut out = String::new();
        self.write_canonical_json(&mut out);
        out
    }

    fn write_canonical_json(&self, out: &mut String) {
        if self.unknown {
            out.push_str("null");
            return;
        }
        match &self.repr {
            ValueRepr::Null => out.push_str("null"),
            ValueRepr::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            ValueRepr::Number(n) => out.push_str(n.lexical()),
            ValueRepr::String(s) => out.push_str(&quote_json_string(s)),
            ValueRepr::Array(a) => {
                out.push('[');
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    v.write_canonical_json(out);
                }
                out.push(']');
            }
            ValueRepr::Object(m) => {
                let mut keys: Vec<&Rc<str>> = m.keys().collect();
                keys.sort();
                out.push('{');
                for (i, k) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote_json_string(k));
                    out.push(':');
                    if let Some(v) = m.get(k) {
                        v.write_canonical_json(out);
                    }
                }
                out.push('}');
            }
        }
    }
}

fn quote_json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.unknown {
            return serializer.serialize_none();
        }
        match &self.repr {
            ValueRepr::Null => serializer.serialize_none(),
            ValueRepr::Bool(b) => serializer.serialize_bool(*b),
            ValueRepr::Number(n) => n.serialize(serializer),
            ValueRepr::String(s) => serializer.serialize_str(s),
            ValueRepr::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            ValueRepr::Object(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m.iter() {
                    map.serialize_entry(k.as_ref(), v)?;
                }
                map.end()
            }
        }
    }
}
