use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::handle::Handle;

/// Error raised by a managed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError(pub String);

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback failed: {}", self.0)
    }
}

impl std::error::Error for CallError {}

pub type NativeFn = dyn Fn(&[Value]) -> Result<(), CallError> + Send + Sync;

/// A value of the embedding runtime. Tables, functions and handles are
/// shared references; everything else is carried by value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    String(Vec<u8>),
    Table(Arc<Table>),
    Function(Arc<NativeFn>),
    Handle(Handle),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::String(s.as_bytes().to_vec())
    }

    pub fn function<F>(f: F) -> Value
    where
        F: Fn(&[Value]) -> Result<(), CallError> + Send + Sync + 'static,
    {
        Value::Function(Arc::new(f))
    }

    pub fn table(t: Table) -> Value {
        Value::Table(Arc::new(t))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether the value must be retained by token to outlive the call.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Table(_) | Value::Function(_) | Value::Handle(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<(), CallError> {
        match self {
            Value::Function(f) => f(args),
            other => Err(CallError(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::String(b) => write!(f, "{:?}", String::from_utf8_lossy(b)),
            Value::Table(t) => t.fmt(f),
            Value::Function(func) => write!(f, "function: {:p}", Arc::as_ptr(func)),
            Value::Handle(h) => write!(f, "handle: {}", h.id()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Handle(a), Value::Handle(b)) => a.id() == b.id(),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Integer(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s.into_bytes())
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Value {
        Value::table(t)
    }
}

/// Generic table: an ordered array part plus named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    array: Vec<Value>,
    fields: BTreeMap<String, Value>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn from_array(array: Vec<Value>) -> Table {
        Table {
            array,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Table {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.array.push(value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_nil())
    }

    pub fn array(&self) -> &[Value] {
        &self.array
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.fields.is_empty()
    }
}
