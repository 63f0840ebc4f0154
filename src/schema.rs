// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The schema algebra for environment definitions.
///
/// Schemas are a subset of JSON Schema: the six primitive types, `const` and
/// `enum`, numeric bounds and `multipleOf`, string length and `pattern`,
/// array `prefixItems`/`items`, and object `properties`/
/// `additionalProperties`/`required`/`dependentRequired`. The boolean schema
/// forms are also supported: `true` admits anything and `false` admits
/// nothing.
///
/// A schema is a single flat record rather than a tagged union: builtins and
/// literal inference compose constraints freely, and the validators consult
/// only the fields relevant to the value at hand. Unspecified
/// `additionalProperties` and `items` admit anything when validating values;
/// schema-versus-schema comparison distinguishes unspecified from an explicit
/// `never` (see `validate`).
///
/// Schemas are immutable after [`Schema::compile`], which is idempotent and
/// resolves `pattern` fields to compiled regular expressions.
use crate::number::Number;
use crate::value::Value;

use core::cell::OnceCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

type String = Rc<str>;

#[derive(Debug, Default, Clone)]
pub struct Schema {
    /// The `true` schema: admits any value.
    pub always: bool,
    /// The `false` schema: admits no value.
    pub never: bool,

    /// One of "null", "boolean", "number", "string", "array", "object".
    pub ty: Option<String>,

    /// A concrete literal the value must equal.
    pub constant: Option<serde_json::Value>,
    /// A finite set of admissible literals.
    pub enum_values: Option<Vec<serde_json::Value>>,

    pub multiple_of: Option<Number>,
    pub minimum: Option<Number>,
    pub exclusive_minimum: Option<Number>,
    pub maximum: Option<Number>,
    pub exclusive_maximum: Option<Number>,

    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    compiled_pattern: OnceCell<Regex>,

    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Per-position schemas for the leading elements of an array.
    pub prefix_items: Option<Vec<Rc<Schema>>>,
    /// The schema for elements past the prefix. Unspecified admits anything.
    pub items: Option<Rc<Schema>>,

    pub min_properties: Option<usize>,
    pub max_properties: Option<usize>,
    pub properties: Option<BTreeMap<String, Rc<Schema>>>,
    /// The schema for properties not named in `properties`. Unspecified
    /// admits anything when validating values.
    pub additional_properties: Option<Rc<Schema>>,
    pub required: Option<Vec<String>>,
    /// Keys that become required when the map key is present.
    pub dependent_required: Option<BTreeMap<String, Vec<String>>>,
}

impl Schema {
    pub fn always() -> Schema {
        Schema {
            always: true,
            ..Default::default()
        }
    }

    pub fn never() -> Schema {
        Schema {
            never: true,
            ..Default::default()
        }
    }

    fn typed(ty: &str) -> Schema {
        Schema {
            ty: Some(ty.into()),
            ..Default::default()
        }
    }

    pub fn null() -> Schema {
        Self::typed("null")
    }

    pub fn boolean() -> Schema {
        Self::typed("boolean")
    }

    pub fn number() -> Schema {
        Self::typed("number")
    }

    pub fn string() -> Schema {
        Self::typed("string")
    }

    pub fn array() -> Schema {
        Self::typed("array")
    }

    pub fn object() -> Schema {
        Self::typed("object")
    }

    /// The singleton schema admitting exactly the given literal.
    pub fn const_of(v: serde_json::Value) -> Schema {
        let ty = match &v {
            serde_json::Value::Null => "null",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::String(_) => "string",
            serde_json::Value::Array(_) => "array",
            serde_json::Value::Object(_) => "object",
        };
        Schema {
            constant: Some(v),
            ..Self::typed(ty)
        }
    }

    /// An array schema with fixed per-position element schemas and no tail.
    pub fn tuple(prefix: Vec<Rc<Schema>>) -> Schema {
        Schema {
            prefix_items: Some(prefix),
            items: Some(Rc::new(Schema::never())),
            ..Self::typed("array")
        }
    }

    /// An object schema with the given properties, all required.
    pub fn record(properties: BTreeMap<String, Rc<Schema>>) -> Schema {
        let required = properties.keys().cloned().collect();
        Schema {
            properties: Some(properties),
            required: Some(required),
            ..Self::typed("object")
        }
    }

    /// The structural schema of an evaluated object: one property per child,
    /// all required.
    pub fn record_of(children: &IndexMap<String, Rc<Value>>) -> Schema {
        let properties = children
            .iter()
            .map(|(k, v)| (k.clone(), v.schema.clone()))
            .collect();
        Self::record(properties)
    }

    /// The structural schema of an evaluated array: one prefix position per
    /// element.
    pub fn tuple_of(elements: &[Rc<Value>]) -> Schema {
        Self::tuple(elements.iter().map(|v| v.schema.clone()).collect())
    }

    /// The singleton schema of a JSON document, built structurally.
    pub fn of_json(v: &serde_json::Value) -> Schema {
        match v {
            serde_json::Value::Array(a) => {
                Schema::tuple(a.iter().map(|v| Rc::new(Schema::of_json(v))).collect())
            }
            serde_json::Value::Object(m) => Schema::record(
                m.iter()
                    .map(|(k, v)| (String::from(k.as_str()), Rc::new(Schema::of_json(v))))
                    .collect(),
            ),
            _ => Schema::const_of(v.clone()),
        }
    }

    pub fn items(mut self, items: Schema) -> Schema {
        self.items = Some(Rc::new(items));
        self
    }

    pub fn additional_properties(mut self, s: Schema) -> Schema {
        self.additional_properties = Some(Rc::new(s));
        self
    }

    pub fn required(mut self, keys: impl IntoIterator<Item = &'static str>) -> Schema {
        self.required = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn dependent_required(
        mut self,
        deps: impl IntoIterator<Item = (&'static str, std::vec::Vec<&'static str>)>,
    ) -> Schema {
        self.dependent_required = Some(
            deps.into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
        );
        self
    }

    pub fn enum_of(mut self, values: impl IntoIterator<Item = serde_json::Value>) -> Schema {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Schema {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn min_length(mut self, n: usize) -> Schema {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Schema {
        self.max_length = Some(n);
        self
    }

    pub fn min_items(mut self, n: usize) -> Schema {
        self.min_items = Some(n);
        self
    }

    pub fn max_items(mut self, n: usize) -> Schema {
        self.max_items = Some(n);
        self
    }

    pub fn min_properties(mut self, n: usize) -> Schema {
        self.min_properties = Some(n);
        self
    }

    pub fn max_properties(mut self, n: usize) -> Schema {
        self.max_properties = Some(n);
        self
    }

    pub fn multiple_of(mut self, n: Number) -> Schema {
        self.multiple_of = Some(n);
        self
    }

    pub fn minimum(mut self, n: Number) -> Schema {
        self.minimum = Some(n);
        self
    }

    pub fn exclusive_minimum(mut self, n: Number) -> Schema {
        self.exclusive_minimum = Some(n);
        self
    }

    pub fn maximum(mut self, n: Number) -> Schema {
        self.maximum = Some(n);
        self
    }

    pub fn exclusive_maximum(mut self, n: Number) -> Schema {
        self.exclusive_maximum = Some(n);
        self
    }

    /// Compiles the schema: resolves `pattern` fields to regular expressions,
    /// recursively. Idempotent; may fail on an invalid pattern.
    pub fn compile(&self) -> Result<()> {
        if let Some(p) = &self.pattern {
            if self.compiled_pattern.get().is_none() {
                let re =
                    Regex::new(p).map_err(|e| anyhow!("invalid pattern {p:?}: {e}"))?;
                let _ = self.compiled_pattern.set(re);
            }
        }
        for s in self.prefix_items.iter().flatten() {
            s.compile()?;
        }
        if let Some(s) = &self.items {
            s.compile()?;
        }
        for s in self.properties.iter().flat_map(|m| m.values()) {
            s.compile()?;
        }
        if let Some(s) = &self.additional_properties {
            s.compile()?;
        }
        Ok(())
    }

    /// The compiled form of `pattern`, available after `compile`.
    pub fn pattern_regex(&self) -> Option<&Regex> {
        self.compiled_pattern.get()
    }
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.always {
            return serializer.serialize_bool(true);
        }
        if self.never {
            return serializer.serialize_bool(false);
        }

        let mut map = serializer.serialize_map(None)?;
        if let Some(v) = &self.ty {
            map.serialize_entry("type", v.as_ref())?;
        }
        if let Some(v) = &self.constant {
            map.serialize_entry("const", v)?;
        }
        if let Some(v) = &self.enum_values {
            map.serialize_entry("enum", v)?;
        }
        if let Some(v) = &self.multiple_of {
            map.serialize_entry("multipleOf", v)?;
        }
        if let Some(v) = &self.minimum {
            map.serialize_entry("minimum", v)?;
        }
        if let Some(v) = &self.exclusive_minimum {
            map.serialize_entry("exclusiveMinimum", v)?;
        }
        if let Some(v) = &self.maximum {
            map.serialize_entry("maximum", v)?;
        }
        if let Some(v) = &self.exclusive_maximum {
            map.serialize_entry("exclusiveMaximum", v)?;
        }
        if let Some(v) = &self.min_length {
            map.serialize_entry("minLength", v)?;
        }
        if let Some(v) = &self.max_length {
            map.serialize_entry("maxLength", v)?;
        }
        if let Some(v) = &self.pattern {
            map.serialize_entry("pattern", v.as_ref())?;
        }
        if let Some(v) = &self.min_items {
            map.serialize_entry("minItems", v)?;
        }
        if let Some(v) = &self.max_items {
            map.serialize_entry("maxItems", v)?;
        }
        if let Some(v) = &self.prefix_items {
            map.serialize_entry("prefixItems", v)?;
        }
        if let Some(v) = &self.items {
            map.serialize_entry("items", v)?;
        }
        if let Some(v) = &self.min_properties {
            map.serialize_entry("minProperties", v)?;
        }
        if let Some(v) = &self.max_properties {
            map.serialize_entry("maxProperties", v)?;
        }
        if let Some(v) = &self.properties {
            map.serialize_entry("properties", v)?;
        }
        if let Some(v) = &self.additional_properties {
            map.serialize_entry("additionalProperties", v)?;
        }
        if let Some(v) = &self.required {
            map.serialize_entry("required", v)?;
        }
        if let Some(v) = &self.dependent_required {
            map.serialize_entry("dependentRequired", v)?;
        }
        map.end()
    }
}

fn json_number(v: &serde_json::Value, field: &str) -> Result<Number, std::string::String> {
    match v {
        serde_json::Value::Number(n) => {
            Number::from_str(&n.to_string()).map_err(|_| format!("invalid number in {field}"))
        }
        _ => Err(format!("expected a number for {field}")),
    }
}

fn json_usize(v: &serde_json::Value, field: &str) -> Result<usize, std::string::String> {
    v.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| format!("expected a non-negative integer for {field}"))
}

fn json_string(v: &serde_json::Value, field: &str) -> Result<String, std::string::String> {
    v.as_str()
        .map(Into::into)
        .ok_or_else(|| format!("expected a string for {field}"))
}

fn json_string_list(
    v: &serde_json::Value,
    field: &str,
) -> Result<Vec<String>, std::string::String> {
    let list = v
        .as_array()
        .ok_or_else(|| format!("expected a list of strings for {field}"))?;
    list.iter().map(|v| json_string(v, field)).collect()
}

fn json_schema(v: serde_json::Value, field: &str) -> Result<Rc<Schema>, std::string::String> {
    let schema: Schema =
        Deserialize::deserialize(v).map_err(|e| format!("invalid schema in {field}: {e}"))?;
    Ok(Rc::new(schema))
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v: serde_json::Value = Deserialize::deserialize(deserializer)?;
        match v {
            serde_json::Value::Bool(true) => Ok(Schema::always()),
            serde_json::Value::Bool(false) => Ok(Schema::never()),
            serde_json::Value::Object(fields) => {
                let mut s = Schema::default();
                for (k, v) in fields {
                    match k.as_str() {
                        "type" => s.ty = Some(json_string(&v, "type").map_err(de::Error::custom)?),
                        "const" => s.constant = Some(v),
                        "enum" => {
                            let list = v
                                .as_array()
                                .ok_or_else(|| de::Error::custom("expected a list for enum"))?;
                            s.enum_values = Some(list.clone());
                        }
                        "multipleOf" => {
                            s.multiple_of =
                                Some(json_number(&v, &k).map_err(de::Error::custom)?);
                        }
                        "minimum" => {
                            s.minimum = Some(json_number(&v, &k).map_err(de::Error::custom)?);
                        }
                        "exclusiveMinimum" => {
                            s.exclusive_minimum =
                                Some(json_number(&v, &k).map_err(de::Error::custom)?);
                        }
                        "maximum" => {
                            s.maximum = Some(json_number(&v, &k).map_err(de::Error::custom)?);
                        }
                        "exclusiveMaximum" => {
                            s.exclusive_maximum =
                                Some(json_number(&v, &k).map_err(de::Error::custom)?);
                        }
                        "minLength" => {
                            s.min_length = Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "maxLength" => {
                            s.max_length = Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "pattern" => {
                            s.pattern = Some(json_string(&v, &k).map_err(de::Error::custom)?);
                        }
                        "minItems" => {
                            s.min_items = Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "maxItems" => {
                            s.max_items = Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "prefixItems" => {
                            let list = v.as_array().ok_or_else(|| {
                                de::Error::custom("expected a list for prefixItems")
                            })?;
                            let mut prefix = Vec::with_capacity(list.len());
                            for item in list {
                                prefix.push(
                                    json_schema(item.clone(), &k).map_err(de::Error::custom)?,
                                );
                            }
                            s.prefix_items = Some(prefix);
                        }
                        "items" => s.items = Some(json_schema(v, &k).map_err(de::Error::custom)?),
                        "minProperties" => {
                            s.min_properties =
                                Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "maxProperties" => {
                            s.max_properties =
                                Some(json_usize(&v, &k).map_err(de::Error::custom)?);
                        }
                        "properties" => {
                            let fields = v.as_object().ok_or_else(|| {
                                de::Error::custom("expected an object for properties")
                            })?;
                            let mut properties = BTreeMap::new();
                            for (name, v) in fields {
                                properties.insert(
                                    String::from(name.as_str()),
                                    json_schema(v.clone(), &k).map_err(de::Error::custom)?,
                                );
                            }
                            s.properties = Some(properties);
                        }
                        "additionalProperties" => {
                            s.additional_properties =
                                Some(json_schema(v, &k).map_err(de::Error::custom)?);
                        }
                        "required" => {
                            s.required =
                                Some(json_string_list(&v, &k).map_err(de::Error::custom)?);
                        }
                        "dependentRequired" => {
                            let fields = v.as_object().ok_or_else(|| {
                                de::Error::custom("expected an object for dependentRequired")
                            })?;
                            let mut deps = BTreeMap::new();
                            for (name, v) in fields {
                                deps.insert(
                                    String::from(name.as_str()),
                                    json_string_list(v, &k).map_err(de::Error::custom)?,
                                );
                            }
                            s.dependent_required = Some(deps);
                        }
                        _ => return Err(de::Error::custom(format!("unsupported field {k:?}"))),
                    }
                }
                Ok(s)
            }
            _ => Err(de::Error::custom("expected a schema")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use serde_json::json;

    #[test]
    fn boolean_forms() -> Result<()> {
        let t: Schema = serde_json::from_value(json!(true))?;
        assert!(t.always);
        let f: Schema = serde_json::from_value(json!(false))?;
        assert!(f.never);
        assert_eq!(serde_json::to_value(&Schema::always())?, json!(true));
        assert_eq!(serde_json::to_value(&Schema::never())?, json!(false));
        Ok(())
    }

    #[test]
    fn record_round_trip() -> Result<()> {
        let doc = json!({
            "type": "object",
            "properties": {
                "roleArn": {"type": "string", "minLength": 1},
                "sessionName": {"type": "string"},
            },
            "required": ["roleArn", "sessionName"],
            "additionalProperties": false,
        });
        let schema: Schema = serde_json::from_value(doc.clone())?;
        assert_eq!(schema.ty.as_deref(), Some("object"));
        assert_eq!(serde_json::to_value(&schema)?, doc);
        Ok(())
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let r: Result<Schema, _> = serde_json::from_value(json!({"allOf": []}));
        assert!(r.is_err());
    }

    #[test]
    fn compile_is_idempotent() -> Result<()> {
        let schema = Schema::string().pattern("^a+$");
        schema.compile()?;
        schema.compile()?;
        let re = schema
            .pattern_regex()
            .ok_or_else(|| anyhow!("pattern was not compiled"))?;
        assert!(re.is_match("aaa"));
        Ok(())
    }

    #[test]
    fn compile_rejects_invalid_patterns() {
        let schema = Schema::string().pattern("(");
        assert!(schema.compile().is_err());
    }
}
