//! Value model shared by query arguments, query results and mutation results
//!
//! [`Value`] is a closed, recursive tagged type. Objects are `BTreeMap`s so iteration
//! order is always key order, which makes the JSON encoding of argument maps canonical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named arguments of a query or mutation
pub type Args = BTreeMap<String, Value>;

/// A dynamically typed value exchanged with the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view of either number variant
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(n) => Some(*n as f64),
            Value::Float64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Canonical JSON text of this value (object keys sorted, no whitespace)
    pub fn to_canonical_json(&self) -> String {
        // BTreeMap keys serialize in order and every variant is representable,
        // so serialization into a String cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("null"))
    }

    /// Nesting depth, where scalars have depth 1
    pub fn depth(&self) -> usize {
        match self {
            Value::Array(items) => 1 + items.iter().map(Value::depth).max().unwrap_or(0),
            Value::Object(map) => 1 + map.values().map(Value::depth).max().unwrap_or(0),
            _ => 1,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_json())
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int64(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int64(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int64(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float64(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build an [`Args`] map from `key => value` pairs
///
/// ```
/// use livesync_core::args;
/// let args = args! { "author" => "A", "body" => "hi" };
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        $crate::value::Args::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::value::Args::new();
        $(
            map.insert(::std::string::String::from($key), $crate::value::Value::from($value));
        )+
        map
    }};
}

// ----------------------------------------------------------------------------
// Validation
// ----------------------------------------------------------------------------

/// Maximum length of a query or mutation name
pub const MAX_FUNCTION_NAME_LEN: usize = 256;

/// Check that a function name is non-empty and only uses path-like characters
///
/// Backend function names look like `listMessages` or `messages:send`.
pub fn validate_function_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("function name must not be empty".to_string());
    }
    if name.len() > MAX_FUNCTION_NAME_LEN {
        return Err(format!(
            "function name is {} bytes long (max {})",
            name.len(),
            MAX_FUNCTION_NAME_LEN
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '/' | '.' | '-')))
    {
        return Err(format!("function name contains invalid character {bad:?}"));
    }
    Ok(())
}

/// Check that an argument map can be sent to the backend
pub fn validate_args(args: &Args, max_depth: usize) -> Result<(), String> {
    for (key, value) in args {
        validate_key(key)?;
        validate_value(value, max_depth.saturating_sub(1))
            .map_err(|reason| format!("argument `{key}`: {reason}"))?;
    }
    Ok(())
}

/// Check a single value: finite numbers, valid object keys, bounded nesting
pub fn validate_value(value: &Value, max_depth: usize) -> Result<(), String> {
    if max_depth == 0 {
        return Err("value nesting exceeds the maximum depth".to_string());
    }
    match value {
        Value::Float64(n) if !n.is_finite() => Err(format!("non-finite number {n}")),
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| validate_value(item, max_depth - 1)),
        Value::Object(map) => map.iter().try_for_each(|(key, item)| {
            validate_key(key)?;
            validate_value(item, max_depth - 1)
        }),
        _ => Ok(()),
    }
}

fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("object keys must not be empty".to_string());
    }
    if key.starts_with('$') {
        return Err(format!("object key `{key}` uses the reserved `$` prefix"));
    }
    Ok(())
}
