// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The abstract syntax contract for environment definitions.
///
/// An external parser supplies these nodes with preserved source ranges for
/// every node; the evaluator never sees surface syntax. The free constructor
/// functions at the bottom of this module build nodes with empty ranges and
/// exist for hosts and tests that assemble documents programmatically.
use crate::Range;

use std::rc::Rc;

/// A parsed environment definition: an optional description, the ordered
/// import list, and the top-level object of values.
#[derive(Debug, Clone)]
pub struct Environment {
    pub description: Option<Rc<str>>,
    pub imports: Vec<Import>,
    pub values: ObjectExpr,
}

impl Environment {
    pub fn new(values: ObjectExpr) -> Self {
        Environment {
            description: None,
            imports: Vec::new(),
            values,
        }
    }

    pub fn with_imports(mut self, names: impl IntoIterator<Item = &'static str>) -> Self {
        self.imports = names
            .into_iter()
            .map(|name| Import {
                name: name.into(),
                range: Range::default(),
            })
            .collect();
        self
    }
}

/// A named import. The import resolver supplies the corresponding value.
#[derive(Debug, Clone)]
pub struct Import {
    pub name: Rc<str>,
    pub range: Range,
}

/// A property accessor: a named key or a signed index. Negative indices count
/// from the end of an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Key(Rc<str>),
    Index(isize),
}

impl Accessor {
    pub fn key(k: impl Into<Rc<str>>) -> Accessor {
        Accessor::Key(k.into())
    }

    pub fn index(i: isize) -> Accessor {
        Accessor::Index(i)
    }
}

/// An accessor together with its own source range.
#[derive(Debug, Clone)]
pub struct PropertyAccessor {
    pub accessor: Accessor,
    pub range: Range,
}

/// A reference path: one or more accessors. The head accessor must be a key;
/// it names a top-level binding.
#[derive(Debug, Clone)]
pub struct PropertyAccess {
    pub accessors: Vec<PropertyAccessor>,
}

/// One part of an interpolated string: a literal text chunk followed by an
/// optional `${...}` reference.
#[derive(Debug, Clone)]
pub struct InterpolationPart {
    pub text: Rc<str>,
    pub access: Option<PropertyAccess>,
}

#[derive(Debug, Clone)]
pub struct NullExpr {
    pub range: Range,
}

#[derive(Debug, Clone)]
pub struct BooleanExpr {
    pub range: Range,
    pub value: bool,
}

/// A number literal. The lexical form is preserved verbatim.
#[derive(Debug, Clone)]
pub struct NumberExpr {
    pub range: Range,
    pub value: Rc<str>,
}

#[derive(Debug, Clone)]
pub struct StringExpr {
    pub range: Range,
    pub value: Rc<str>,
}

#[derive(Debug, Clone)]
pub struct InterpolateExpr {
    pub range: Range,
    pub parts: Vec<InterpolationPart>,
}

/// A reference to another value, e.g. `${config.aws.region}`.
#[derive(Debug, Clone)]
pub struct SymbolExpr {
    pub range: Range,
    pub access: PropertyAccess,
}

#[derive(Debug, Clone)]
pub struct ListExpr {
    pub range: Range,
    pub elements: Vec<Expr>,
}

/// An object literal. Entries preserve source order.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: Rc<str>,
    pub key_range: Range,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct ObjectExpr {
    pub range: Range,
    pub entries: Vec<ObjectEntry>,
}

/// `fn::join: [delimiter, values]`
#[derive(Debug, Clone)]
pub struct JoinExpr {
    pub range: Range,
    pub delimiter: Box<Expr>,
    pub values: Box<Expr>,
}

/// `fn::open: {provider: ..., inputs: ...}`
#[derive(Debug, Clone)]
pub struct OpenExpr {
    pub range: Range,
    pub provider: Box<Expr>,
    pub inputs: Box<Expr>,
}

/// `fn::secret: value`
#[derive(Debug, Clone)]
pub struct SecretExpr {
    pub range: Range,
    pub value: Box<Expr>,
}

/// `fn::toBase64: value`
#[derive(Debug, Clone)]
pub struct ToBase64Expr {
    pub range: Range,
    pub value: Box<Expr>,
}

/// `fn::toJSON: value`
#[derive(Debug, Clone)]
pub struct ToJsonExpr {
    pub range: Range,
    pub value: Box<Expr>,
}

/// `fn::toString: value`
#[derive(Debug, Clone)]
pub struct ToStringExpr {
    pub range: Range,
    pub value: Box<Expr>,
}

/// A single expression in an environment definition.
#[derive(Debug, Clone)]
pub enum Expr {
    Null(NullExpr),
    Boolean(BooleanExpr),
    Number(NumberExpr),
    String(StringExpr),
    Interpolate(InterpolateExpr),
    Symbol(SymbolExpr),
    List(ListExpr),
    Object(ObjectExpr),
    Join(JoinExpr),
    Open(OpenExpr),
    Secret(SecretExpr),
    ToBase64(ToBase64Expr),
    ToJson(ToJsonExpr),
    ToString(ToStringExpr),
}

impl Expr {
    pub fn range(&self) -> &Range {
        use Expr::*;
        match self {
            Null(x) => &x.range,
            Boolean(x) => &x.range,
            Number(x) => &x.range,
            String(x) => &x.range,
            Interpolate(x) => &x.range,
            Symbol(x) => &x.range,
            List(x) => &x.range,
            Object(x) => &x.range,
            Join(x) => &x.range,
            Open(x) => &x.range,
            Secret(x) => &x.range,
            ToBase64(x) => &x.range,
            ToJson(x) => &x.range,
            ToString(x) => &x.range,
        }
    }
}

pub fn null() -> Expr {
    Expr::Null(NullExpr {
        range: Range::default(),
    })
}

pub fn boolean(value: bool) -> Expr {
    Expr::Boolean(BooleanExpr {
        range: Range::default(),
        value,
    })
}

pub fn number(value: &str) -> Expr {
    Expr::Number(NumberExpr {
        range: Range::default(),
        value: value.into(),
    })
}

pub fn string(value: &str) -> Expr {
    Expr::String(StringExpr {
        range: Range::default(),
        value: value.into(),
    })
}

/// A literal text chunk of an interpolated string.
pub fn part(text: &str) -> InterpolationPart {
    InterpolationPart {
        text: text.into(),
        access: None,
    }
}

/// A `${...}` reference chunk of an interpolated string.
pub fn part_ref(accessors: impl IntoIterator<Item = Accessor>) -> InterpolationPart {
    InterpolationPart {
        text: "".into(),
        access: Some(access(accessors)),
    }
}

/// A literal text chunk followed by a `${...}` reference.
pub fn part_text_ref(
    text: &str,
    accessors: impl IntoIterator<Item = Accessor>,
) -> InterpolationPart {
    InterpolationPart {
        text: text.into(),
        access: Some(access(accessors)),
    }
}

pub fn access(accessors: impl IntoIterator<Item = Accessor>) -> PropertyAccess {
    PropertyAccess {
        accessors: accessors
            .into_iter()
            .map(|accessor| PropertyAccessor {
                accessor,
                range: Range::default(),
            })
            .collect(),
    }
}

pub fn interpolate(parts: impl IntoIterator<Item = InterpolationPart>) -> Expr {
    Expr::Interpolate(InterpolateExpr {
        range: Range::default(),
        parts: parts.into_iter().collect(),
    })
}

pub fn symbol(accessors: impl IntoIterator<Item = Accessor>) -> Expr {
    Expr::Symbol(SymbolExpr {
        range: Range::default(),
        access: access(accessors),
    })
}

pub fn list(elements: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::List(ListExpr {
        range: Range::default(),
        elements: elements.into_iter().collect(),
    })
}

pub fn object(entries: impl IntoIterator<Item = (&'static str, Expr)>) -> ObjectExpr {
    ObjectExpr {
        range: Range::default(),
        entries: entries
            .into_iter()
            .map(|(key, value)| ObjectEntry {
                key: key.into(),
                key_range: Range::default(),
                value,
            })
            .collect(),
    }
}

pub fn object_expr(entries: impl IntoIterator<Item = (&'static str, Expr)>) -> Expr {
    Expr::Object(object(entries))
}

pub fn join(delimiter: Expr, values: Expr) -> Expr {
    Expr::Join(JoinExpr {
        range: Range::default(),
        delimiter: Box::new(delimiter),
        values: Box::new(values),
    })
}

pub fn open(provider: Expr, inputs: Expr) -> Expr {
    Expr::Open(OpenExpr {
        range: Range::default(),
        provider: Box::new(provider),
        inputs: Box::new(inputs),
    })
}

pub fn secret(value: Expr) -> Expr {
    Expr::Secret(SecretExpr {
        range: Range::default(),
        value: Box::new(value),
    })
}

pub fn to_base64(value: Expr) -> Expr {
    Expr::ToBase64(ToBase64Expr {
        range: Range::default(),
        value: Box::new(value),
    })
}

pub fn to_json(value: Expr) -> Expr {
    Expr::ToJson(ToJsonExpr {
        range: Range::default(),
        value: Box::new(value),
    })
}

pub fn to_string(value: Expr) -> Expr {
    Expr::ToString(ToStringExpr {
        range: Range::default(),
        value: Box::new(value),
    })
}
