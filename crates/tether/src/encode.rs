//! Result encoding for replies.
//!
//! Values that are not plain data go through a fixed fallback chain:
//! an object's own wire form, then an identifier-path URI for modules and
//! functions, then structural encoding, then the display string.

use crate::catalog::Module;
use crate::fault;
use crate::value::{Function, HostObject, Value};
use serde_json::{Map, Number, Value as Json};
use tether_protocol::URI_SCHEME;

pub trait WireEncode {
    fn encode(&self) -> Json;
}

impl WireEncode for Value {
    fn encode(&self) -> Json {
        match self {
            Value::Object(object) => object.as_ref().encode(),
            Value::Module(module) => module.encode(),
            Value::Function(function) => function.encode(),
            data => structural(data).unwrap_or_else(|| Json::String(data.to_string())),
        }
    }
}

impl WireEncode for dyn HostObject {
    fn encode(&self) -> Json {
        let wire = fault::contain(|| HostObject::to_wire(self)).unwrap_or_else(|fault| Some(Err(fault)));
        match wire {
            Some(Ok(json)) => json,
            Some(Err(fault)) => {
                log::debug!("{} wire form failed ({fault}), using display form", self.type_name());
                display(self)
            }
            None => display(self),
        }
    }
}

fn display(object: &dyn HostObject) -> Json {
    let text = fault::contain(|| object.describe())
        .unwrap_or_else(|_| format!("<{} object>", object.type_name()));
    Json::String(text)
}

impl WireEncode for Module {
    fn encode(&self) -> Json {
        Json::String(format!("{URI_SCHEME}:///{}", self.path()))
    }
}

impl WireEncode for Function {
    fn encode(&self) -> Json {
        Json::String(format!("{URI_SCHEME}:///{}:{}", self.module(), self.name()))
    }
}

/// `None` when the value has no direct JSON form (non-finite floats).
fn structural(value: &Value) -> Option<Json> {
    Some(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(n) => Json::Number(Number::from_f64(*n)?),
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(items.iter().map(WireEncode::encode).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), value.encode()))
                .collect::<Map<_, _>>(),
        ),
        Value::Function(_) | Value::Module(_) | Value::Object(_) => return None,
    })
}
