//! Attribute values attached to rows and columns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single attribute value. Attribute stores hold heterogeneous values, so
/// this is a tagged sum rather than a generic parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

/// An attribute set for one row or column.
///
/// `BTreeMap` keeps iteration deterministic, which keeps merged bulk writes
/// and test assertions stable.
pub type Attrs = BTreeMap<String, AttrValue>;

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{:?}", s),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Uint(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::Uint(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}
