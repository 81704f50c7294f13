//! Units served by default.

use crate::catalog::{Catalog, Module};
use crate::encode::WireEncode;
use crate::fault::Fault;
use crate::value::{CallArgs, Function, HostObject, Kwargs, Value};
use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub fn catalog() -> Catalog {
    Catalog::new()
        .with(math())
        .with(text())
        .with(Module::new("counter").function("Counter", |args| {
            let start = match args.arg(0, "start") {
                Some(_) => args.int(0, "start")?,
                None => 0,
            };
            Ok(Value::object(Counter::new(start)))
        }))
        .with(Module::new("runner").function("Runner", |args| {
            let label = match args.arg(0, "label") {
                Some(_) => args.str(0, "label")?.to_string(),
                None => "experiment".to_string(),
            };
            Ok(Value::object(Runner::new(label)))
        }))
}

fn math() -> Module {
    Module::new("math")
        .constant("pi", std::f64::consts::PI)
        .function("add", |args| arithmetic(&args, i64::checked_add, |a, b| a + b))
        .function("multiply", |args| arithmetic(&args, i64::checked_mul, |a, b| a * b))
        .function("divide", |args| {
            let a = args.float(0, "a")?;
            let b = args.float(1, "b")?;
            if b == 0.0 {
                return Err(Fault::new("ZeroDivisionError", "division by zero"));
            }
            Ok(Value::Float(a / b))
        })
        .function("sqrt", |args| {
            let x = args.float(0, "x")?;
            if x < 0.0 {
                return Err(Fault::value_error("math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        })
}

/// Integer arithmetic when both sides are integers, float otherwise.
fn arithmetic(
    args: &CallArgs,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Fault> {
    let a = args.require(0, "a")?;
    let b = args.require(1, "b")?;
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| Fault::new("OverflowError", "integer overflow")),
        _ => Ok(Value::Float(float_op(args.float(0, "a")?, args.float(1, "b")?))),
    }
}

fn text() -> Module {
    Module::new("text")
        .function("upper", |args| Ok(Value::from(args.str(0, "s")?.to_uppercase())))
        .function("concat", |args| {
            let joined: String = args.positional.iter().map(Value::to_string).collect();
            Ok(Value::from(joined))
        })
        .function("split", |args| {
            let s = args.str(0, "s")?;
            let sep = match args.arg(1, "sep") {
                Some(_) => args.str(1, "sep")?,
                None => " ",
            };
            if sep.is_empty() {
                return Err(Fault::value_error("empty separator"));
            }
            Ok(Value::list(s.split(sep).map(Value::from).collect()))
        })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn method(
    owner: &str,
    name: &str,
    body: impl Fn(CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
) -> Value {
    Value::function(Function::new(owner.to_lowercase(), format!("{owner}.{name}"), body))
}

/// A shared integer.
pub struct Counter {
    count: Arc<Mutex<i64>>,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self {
            count: Arc::new(Mutex::new(start)),
        }
    }
}

impl HostObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        let count = Arc::clone(&self.count);
        match name {
            "value" => Some(Value::Int(*lock(&self.count))),
            "increment" => Some(method("Counter", name, move |args| {
                let by = match args.arg(0, "by") {
                    Some(_) => args.int(0, "by")?,
                    None => 1,
                };
                let mut count = lock(&count);
                *count = count
                    .checked_add(by)
                    .ok_or_else(|| Fault::new("OverflowError", "integer overflow"))?;
                Ok(Value::Int(*count))
            })),
            "reset" => Some(method("Counter", name, move |_| {
                *lock(&count) = 0;
                Ok(Value::Null)
            })),
            _ => None,
        }
    }

    fn to_wire(&self) -> Option<Result<Json, Fault>> {
        Some(Ok(json!({"counter": *lock(&self.count)})))
    }
}

#[derive(Default)]
struct RunnerState {
    running: bool,
    runs: u64,
    results: BTreeMap<String, Value>,
}

/// Minimal experiment runner: start/stop cycles and recorded results.
pub struct Runner {
    label: String,
    state: Arc<Mutex<RunnerState>>,
}

impl Runner {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::default(),
        }
    }
}

impl HostObject for Runner {
    fn type_name(&self) -> &str {
        "Runner"
    }

    fn declared_name(&self) -> Option<&str> {
        Some(self.label.as_str())
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        let state = Arc::clone(&self.state);
        match name {
            "label" => Some(Value::str(&self.label)),
            "runs" => Some(Value::Int(lock(&self.state).runs as i64)),
            "results" => Some(Value::map(lock(&self.state).results.clone())),
            "status" => Some(method("Runner", name, move |_| {
                let status = if lock(&state).running { "running" } else { "idle" };
                Ok(Value::str(status))
            })),
            "start" => Some(method("Runner", name, move |_| {
                let mut state = lock(&state);
                if state.running {
                    return Err(Fault::new("RuntimeError", "runner is already running"));
                }
                state.running = true;
                state.runs += 1;
                Ok(Value::Int(state.runs as i64))
            })),
            "stop" => Some(method("Runner", name, move |_| {
                let mut state = lock(&state);
                let was_running = std::mem::replace(&mut state.running, false);
                Ok(Value::Bool(was_running))
            })),
            "record" => Some(method("Runner", name, move |args| {
                let key = args.str(0, "key")?.to_string();
                let value = args.require(1, "value")?.clone();
                let mut state = lock(&state);
                if !state.running {
                    return Err(Fault::new("RuntimeError", "runner is not running"));
                }
                state.results.insert(key.clone(), value);
                Ok(Value::from(key))
            })),
            _ => None,
        }
    }

    fn to_wire(&self) -> Option<Result<Json, Fault>> {
        let state = lock(&self.state);
        let results: serde_json::Map<String, Json> = state
            .results
            .iter()
            .map(|(key, value)| (key.clone(), value.encode()))
            .collect();
        Some(Ok(json!({
            "label": self.label,
            "running": state.running,
            "runs": state.runs,
            "results": results,
        })))
    }
}
