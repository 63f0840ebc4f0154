// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{self, Debug, Display, Formatter};
use std::cmp::Ordering;
use std::rc::Rc;
use std::str::FromStr;

use serde::ser::Serializer;
use serde::Serialize;

type BigFloat = dashu_float::DBig;
const PRECISION: usize = 100;

/// An arbitrary-precision decimal number.
///
/// Comparisons and `multipleOf` tests use the numeric value; the original
/// lexical form is retained verbatim so that numbers round-trip through JSON
/// without loss of precision or formatting.
#[derive(Clone)]
pub struct Number {
    text: Rc<str>,
    d: Rc<BigFloat>,
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.text, f)
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let v = serde_json::Number::from_str(&self.text)
            .map_err(|_| serde::ser::Error::custom("could not serialize big number"))?;
        v.serialize(serializer)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseNumberError;

impl FromStr for Number {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let d = match BigFloat::from_str(s) {
            Ok(d) => d.with_precision(PRECISION).value(),
            Err(_) => {
                // Reading through float is not precise; only a fallback for
                // lexical forms dashu does not accept directly.
                let f = f64::from_str(s).map_err(|_| ParseNumberError)?;
                if !f.is_finite() {
                    return Err(ParseNumberError);
                }
                BigFloat::from_str(&format!("{f}"))
                    .map_err(|_| ParseNumberError)?
                    .with_precision(PRECISION)
                    .value()
            }
        };
        Ok(Number {
            text: s.into(),
            d: Rc::new(d),
        })
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number {
            text: n.to_string().into(),
            d: Rc::new(BigFloat::from(n).with_precision(PRECISION).value()),
        }
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Number {
            text: n.to_string().into(),
            d: Rc::new(BigFloat::from(n).with_precision(PRECISION).value()),
        }
    }
}

impl Number {
    /// The number's original lexical form.
    pub fn lexical(&self) -> &str {
        &self.text
    }

    pub fn is_integer(&self) -> bool {
        self.d.floor() == *self.d
    }

    /// True if `self` is an integral multiple of `m`. The quotient is taken
    /// with bounded precision; non-terminating quotients are not integral.
    pub fn is_multiple_of(&self, m: &Number) -> bool {
        if *m.d == BigFloat::ZERO {
            return false;
        }
        let q = self.d.as_ref().clone().with_precision(PRECISION).value() / m.d.as_ref();
        q.floor() == q
    }
}

impl Eq for Number {}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.d == other.d
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.d.cmp(&other.d)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
