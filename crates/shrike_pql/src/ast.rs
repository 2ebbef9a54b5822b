//! Call-tree types and typed argument access.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use shrike_common::AttrValue;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A heterogeneous argument value. Parsing produces these; the executor only
/// ever reads them back through the typed accessors on [`Call`], so no
/// runtime reflection is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Uint(u64),
    Int(i64),
    Bool(bool),
    Float(f64),
    Str(String),
    UintList(Vec<u64>),
    IntList(Vec<i64>),
    /// Heterogeneous list as the parser hands it over; normalized to
    /// `IntList` by argument validation when every element is an integer.
    List(Vec<Value>),
}

impl Value {
    /// Convert to an attribute value, for args written into attribute stores.
    /// Lists have no attribute representation.
    pub fn to_attr_value(&self) -> Option<AttrValue> {
        match self {
            Value::Uint(v) => Some(AttrValue::Uint(*v)),
            Value::Int(v) => Some(AttrValue::Int(*v)),
            Value::Bool(b) => Some(AttrValue::Bool(*b)),
            Value::Float(v) => Some(AttrValue::Float(*v)),
            Value::Str(s) => Some(AttrValue::Str(s.clone())),
            Value::UintList(_) | Value::IntList(_) | Value::List(_) => None,
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u64>> for Value {
    fn from(v: Vec<u64>) -> Self {
        Value::UintList(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, "]")
        }

        match self {
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::UintList(v) => list(f, v),
            Value::IntList(v) => list(f, v),
            Value::List(v) => list(f, v),
        }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// One node of a query tree: an operator name, named arguments, and ordered
/// child calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Call {
    pub name: String,
    pub args: BTreeMap<String, Value>,
    pub children: Vec<Call>,
}

impl Call {
    pub fn new(name: &str) -> Self {
        Call {
            name: name.to_string(),
            args: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    pub fn with_child(mut self, child: Call) -> Self {
        self.children.push(child);
        self
    }

    /// Read a string argument. Non-string values read as absent, matching the
    /// lenient reads the executor performs for `frame` and `view`.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        match self.args.get(key) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Read an unsigned integer argument. Signed values coerce when
    /// non-negative. Returns `Ok(None)` when the argument is absent and a
    /// reason string when it is present with an unusable shape; callers wrap
    /// the reason with call/field context.
    pub fn uint_arg(&self, key: &str) -> Result<Option<u64>, String> {
        match self.args.get(key) {
            None => Ok(None),
            Some(Value::Uint(v)) => Ok(Some(*v)),
            Some(Value::Int(v)) if *v >= 0 => Ok(Some(*v as u64)),
            Some(Value::Int(v)) => Err(format!("negative value {}", v)),
            Some(other) => Err(format!("unexpected value {}", other)),
        }
    }

    /// Read an unsigned integer list argument. Signed lists coerce
    /// element-wise when every element is non-negative.
    pub fn uint_slice_arg(&self, key: &str) -> Result<Option<Vec<u64>>, String> {
        fn from_ints(values: &[i64]) -> Result<Vec<u64>, String> {
            values
                .iter()
                .map(|v| {
                    if *v >= 0 {
                        Ok(*v as u64)
                    } else {
                        Err(format!("negative value {}", v))
                    }
                })
                .collect()
        }

        match self.args.get(key) {
            None => Ok(None),
            Some(Value::UintList(v)) => Ok(Some(v.clone())),
            Some(Value::IntList(v)) => Ok(Some(from_ints(v)?)),
            Some(Value::List(values)) => {
                let ints = values
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Ok(*i),
                        Value::Uint(u) => Ok(*u as i64),
                        other => Err(format!("unexpected element {}", other)),
                    })
                    .collect::<Result<Vec<i64>, String>>()?;
                Ok(Some(from_ints(&ints)?))
            }
            Some(other) => Err(format!("unexpected value {}", other)),
        }
    }

    /// Whether this operator's argument shape selects between the standard
    /// and inverse orientations. Only `Bitmap` reads either the row label or
    /// the column label.
    pub fn supports_inverse(&self) -> bool {
        self.name == "Bitmap"
    }

    /// An inverse-oriented call names the column label and not the row label.
    pub fn is_inverse(&self, row_label: &str, column_label: &str) -> bool {
        self.args.contains_key(column_label) && !self.args.contains_key(row_label)
    }
}

impl fmt::Display for Call {
    /// Renders the canonical textual form forwarded to peer nodes: children
    /// in order, then arguments in key order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for child in &self.children {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", child)?;
        }
        for (key, value) in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        write!(f, ")")
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// An ordered sequence of top-level calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    pub calls: Vec<Call>,
}

impl Query {
    pub fn new(calls: Vec<Call>) -> Self {
        Query { calls }
    }

    /// A query holding a single call, the shape every forwarded sub-query
    /// takes except the bulk-attribute fan-out.
    pub fn single(call: Call) -> Self {
        Query { calls: vec![call] }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, call) in self.calls.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", call)?;
        }
        Ok(())
    }
}

/// True iff some call needs per-slice evaluation. Pure mutations and
/// attribute writes route by column or broadcast instead.
pub fn needs_slices(calls: &[Call]) -> bool {
    calls.iter().any(|call| {
        !matches!(
            call.name.as_str(),
            "ClearBit" | "SetBit" | "SetRowAttrs" | "SetColumnAttrs"
        )
    })
}

/// True iff the query consists solely of `SetRowAttrs` calls, which unlocks
/// the bulk attribute write path.
pub fn has_only_set_row_attrs(calls: &[Call]) -> bool {
    !calls.is_empty() && calls.iter().all(|c| c.name == "SetRowAttrs")
}
