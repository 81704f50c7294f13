//! Tagged values held by the registry and passed to host functions.
//!
//! Reference strings can only reach into a value through two capabilities:
//! get-by-name ([`Value::attribute`]) and get-by-index ([`Value::item`]).

use crate::catalog::Module;
use crate::fault::Fault;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments, keyed by (actualized) name.
pub type Kwargs = BTreeMap<String, Value>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Map(Arc<BTreeMap<String, Value>>),
    Function(Arc<Function>),
    Module(Arc<Module>),
    Object(Arc<dyn HostObject>),
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn map(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Map(Arc::new(entries.into_iter().collect()))
    }

    pub fn function(function: Function) -> Self {
        Value::Function(Arc::new(function))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        Value::Object(Arc::new(object))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Module(_) => "module",
            Value::Object(object) => object.type_name(),
        }
    }

    /// Get-by-name: map key, module member or object attribute.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match self {
            Value::Map(entries) => entries.get(name).cloned(),
            Value::Module(module) => module.member(name),
            Value::Object(object) => object.attribute(name),
            _ => None,
        }
    }

    /// Get-by-index: list element or object item.
    pub fn item(&self, index: usize) -> Option<Value> {
        match self {
            Value::List(items) => items.get(index).cloned(),
            Value::Object(object) => object.item(index),
            _ => None,
        }
    }

    /// One step of a dotted path. Numeric segments index first, then fall
    /// back to a lookup by name.
    pub fn lookup(&self, segment: &str) -> Option<Value> {
        match segment.parse::<usize>() {
            Ok(index) => self.item(index).or_else(|| self.attribute(segment)),
            Err(_) => self.attribute(segment),
        }
    }

    /// The name a value declares for itself, used when registering without
    /// an explicit name.
    pub fn declared_name(&self) -> Option<String> {
        match self {
            Value::Function(function) => Some(function.short_name().to_string()),
            Value::Module(module) => Some(module.name().to_string()),
            Value::Object(object) => object.declared_name().map(str::to_string),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(&**text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Inbound JSON arguments. Integers that fit `i64` stay integers.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(Arc::from(s)),
            Json::Array(items) => Value::list(items.into_iter().map(Value::from_json).collect()),
            Json::Object(entries) => Value::map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, Value::from_json(value))),
            ),
        }
    }
}

impl PartialEq for Value {
    /// Data compares structurally, handles by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Function(function) => {
                write!(f, "<function {}:{}>", function.module(), function.name())
            }
            Value::Module(module) => write!(f, "<module {}>", module.path()),
            Value::Object(object) => f.write_str(&object.describe()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<&Fault> for Value {
    /// Descriptor map handed back by guarded calls.
    fn from(fault: &Fault) -> Self {
        Value::map([
            ("kind".to_string(), Value::str(&fault.kind)),
            ("message".to_string(), Value::str(&fault.message)),
            (
                "trace".to_string(),
                Value::list(fault.trace.iter().rev().map(Value::str).collect()),
            ),
        ])
    }
}

type NativeFn = dyn Fn(CallArgs) -> Result<Value, Fault> + Send + Sync;

/// A named callable handle.
pub struct Function {
    module: String,
    name: String,
    body: Box<NativeFn>,
}

impl Function {
    /// `name` is the qualified name within `module`, e.g. `Counter.increment`.
    pub fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        body: impl Fn(CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
    ) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            body: Box::new(body),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the qualified name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn invoke(&self, args: CallArgs) -> Result<Value, Fault> {
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({}:{})", self.module, self.name)
    }
}

/// A live host object reachable from reference strings.
///
/// Objects own their state behind interior mutability; the registry only
/// ever hands out shared handles.
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn declared_name(&self) -> Option<&str> {
        None
    }

    fn attribute(&self, name: &str) -> Option<Value>;

    fn item(&self, _index: usize) -> Option<Value> {
        None
    }

    /// Convert-to-wire capability. `None` when the object has no wire form.
    fn to_wire(&self) -> Option<Result<Json, Fault>> {
        None
    }

    fn describe(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

/// Actualized arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Kwargs,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, keywords: Kwargs) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    /// Parameter `index`, or the keyword `name` when not given positionally.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keywords.get(name))
    }

    pub fn require(&self, index: usize, name: &str) -> Result<&Value, Fault> {
        self.arg(index, name)
            .ok_or_else(|| Fault::type_error(format!("missing required argument `{name}`")))
    }

    pub fn int(&self, index: usize, name: &str) -> Result<i64, Fault> {
        let value = self.require(index, name)?;
        value.as_int().ok_or_else(|| mismatch(name, "int", value))
    }

    pub fn float(&self, index: usize, name: &str) -> Result<f64, Fault> {
        let value = self.require(index, name)?;
        value.as_float().ok_or_else(|| mismatch(name, "float", value))
    }

    pub fn str(&self, index: usize, name: &str) -> Result<&str, Fault> {
        let value = self.require(index, name)?;
        value.as_str().ok_or_else(|| mismatch(name, "str", value))
    }
}

fn mismatch(name: &str, expected: &str, found: &Value) -> Fault {
    Fault::type_error(format!(
        "argument `{name}` must be {expected}, not {}",
        found.type_name()
    ))
}
