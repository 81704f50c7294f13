//! Schema-gated command dispatch.
//!
//! Envelopes that fail the schema are dropped without a reply. Everything
//! else maps onto one engine operation, and any failure of that operation
//! becomes an error reply.

use crate::encode::WireEncode;
use crate::engine::Engine;
use crate::fault::{self, Error};
use crate::schema::{CommandSchema, Schema};
use crate::value::{Kwargs, Value};
use serde_json::Value as Json;
use std::collections::VecDeque;
use tether_protocol::{CommandEnvelope, CommandName, Reply};

pub struct Dispatcher {
    engine: Engine,
    schema: Box<dyn Schema>,
}

impl Dispatcher {
    pub fn new(engine: Engine) -> Self {
        Self::with_schema(engine, CommandSchema)
    }

    pub fn with_schema(engine: Engine, schema: impl Schema + 'static) -> Self {
        Self {
            engine,
            schema: Box::new(schema),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// `None` when the envelope fails the schema.
    pub fn process(&self, envelope: &Json) -> Option<Result<Value, Error>> {
        if let Err(violation) = self.schema.validate(envelope) {
            log::debug!("dropping envelope that fails the command schema: {violation}");
            return None;
        }

        let envelope = match serde_json::from_value::<CommandEnvelope>(envelope.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                return Some(Err(Error::Argument(format!(
                    "envelope passed the schema but is not a command: {err}"
                ))));
            }
        };

        let positional = envelope.args.into_iter().map(Value::from_json).collect();
        let keywords = envelope
            .kwargs
            .into_iter()
            .map(|(key, value)| (key, Value::from_json(value)))
            .collect();
        Some(execute(&self.engine, envelope.command, positional, keywords))
    }

    /// Process an envelope and wrap the outcome in a reply.
    /// Host code panicking anywhere in here becomes a `Panic` error reply.
    pub fn respond(&self, envelope: &Json) -> Option<Reply> {
        let outcome = fault::contain(|| {
            self.process(envelope)
                .map(|outcome| outcome.map(|value| value.encode()))
        })
        .unwrap_or_else(|fault| Some(Err(Error::Raised(fault))))?;
        Some(match outcome {
            Ok(response) => Reply::Response {
                response,
                evt: envelope.clone(),
            },
            Err(error) => {
                log::info!("command failed: {error}");
                Reply::Error {
                    error: error.format(),
                    evt: envelope.clone(),
                }
            }
        })
    }
}

/// Run one operation. Parameters bind positionally first, then by keyword;
/// whatever `init`, `run` and `try` leave unbound is passed on to the callee.
pub(crate) fn execute(
    engine: &Engine,
    command: CommandName,
    positional: Vec<Value>,
    keywords: Kwargs,
) -> Result<Value, Error> {
    let mut params = Params {
        command,
        positional: positional.into(),
        keywords,
    };
    match command {
        CommandName::Get => {
            let reference = params.string("reference")?;
            params.finish()?;
            engine.resolve(&reference)
        }
        CommandName::Init => {
            let name = params.string("name")?;
            let reference = params.string("reference")?;
            let (args, kwargs) = params.rest();
            engine.initialize(&name, &reference, args, kwargs).map(Value::from)
        }
        CommandName::Run => {
            let reference = params.string("reference")?;
            let (args, kwargs) = params.rest();
            engine.call(&reference, args, kwargs)
        }
        CommandName::Try => {
            let reference = params.string("reference")?;
            let (args, kwargs) = params.rest();
            Ok(engine.attempt(&reference, args, kwargs))
        }
        CommandName::Register => {
            // A lone positional argument is the reference.
            let name = if params.positional.len() == 1 && !params.keywords.contains_key("reference") {
                None
            } else {
                params.optional_string("name")?
            };
            let reference = params.string("reference")?;
            params.finish()?;
            engine.register(name.as_deref(), &reference).map(Value::from)
        }
        CommandName::Store => {
            let name = params.string("name")?;
            let value = params.required("value")?;
            params.finish()?;
            Ok(Value::from(engine.store(&name, value)))
        }
        CommandName::Ping => {
            params.finish()?;
            Ok(Value::str(engine.ping()))
        }
    }
}

struct Params {
    command: CommandName,
    positional: VecDeque<Value>,
    keywords: Kwargs,
}

impl Params {
    fn take(&mut self, name: &str) -> Result<Option<Value>, Error> {
        match self.positional.pop_front() {
            Some(_) if self.keywords.contains_key(name) => Err(Error::Argument(format!(
                "`{}` got multiple values for `{name}`",
                self.command
            ))),
            Some(value) => Ok(Some(value)),
            None => Ok(self.keywords.remove(name)),
        }
    }

    fn required(&mut self, name: &str) -> Result<Value, Error> {
        self.take(name)?.ok_or_else(|| {
            Error::Argument(format!("`{}` is missing argument `{name}`", self.command))
        })
    }

    fn string(&mut self, name: &str) -> Result<String, Error> {
        match self.required(name)? {
            Value::Str(text) => Ok(text.to_string()),
            other => Err(self.not_a_string(name, &other)),
        }
    }

    fn optional_string(&mut self, name: &str) -> Result<Option<String>, Error> {
        match self.take(name)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Str(text)) => Ok(Some(text.to_string())),
            Some(other) => Err(self.not_a_string(name, &other)),
        }
    }

    fn not_a_string(&self, name: &str, found: &Value) -> Error {
        Error::Argument(format!(
            "`{}` argument `{name}` must be a string, not {}",
            self.command,
            found.type_name()
        ))
    }

    fn rest(self) -> (Vec<Value>, Kwargs) {
        (self.positional.into(), self.keywords)
    }

    fn finish(self) -> Result<(), Error> {
        if !self.positional.is_empty() {
            return Err(Error::Argument(format!(
                "`{}` got {} unexpected positional argument(s)",
                self.command,
                self.positional.len()
            )));
        }
        if let Some(key) = self.keywords.keys().next() {
            return Err(Error::Argument(format!(
                "`{}` got an unexpected keyword argument `{key}`",
                self.command
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Engine::new(builtins::catalog()))
    }

    fn response(dispatcher: &Dispatcher, envelope: Json) -> Json {
        match dispatcher.respond(&envelope) {
            Some(Reply::Response { response, evt }) => {
                assert_eq!(evt, envelope);
                response
            }
            other => panic!("expected a response to {envelope}, got {other:?}"),
        }
    }

    #[test]
    fn store_then_get() {
        let dispatcher = dispatcher();
        let stored = response(&dispatcher, json!({"command": "store", "args": ["x", 42]}));
        assert_eq!(stored, json!("x"));
        assert_eq!(dispatcher.engine().registry().get("x"), Some(Value::Int(42)));
        let got = response(&dispatcher, json!({"command": "get", "args": ["$x"]}));
        assert_eq!(got, json!(42));
    }

    #[test]
    fn unresolvable_run_is_an_error_reply() {
        let dispatcher = dispatcher();
        let envelope = json!({"command": "run", "args": ["$nonexistent"]});
        match dispatcher.respond(&envelope) {
            Some(Reply::Error { error, evt }) => {
                assert_eq!(evt, envelope);
                assert_eq!(
                    error.last().map(String::as_str),
                    Some("ResolutionError: no module named `nonexistent`")
                );
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    #[test]
    fn schema_invalid_envelopes_are_dropped() {
        let dispatcher = dispatcher();
        assert!(dispatcher.process(&json!({"foo": "bar"})).is_none());
        assert!(dispatcher.respond(&json!({"command": "store", "args": "x"})).is_none());
        assert!(dispatcher.respond(&json!("ping")).is_none());
        assert!(!dispatcher.engine().registry().contains("x"));
    }

    #[test]
    fn run_passes_args_and_kwargs() {
        let dispatcher = dispatcher();
        let sum = response(&dispatcher, json!({"command": "run", "args": ["math:add", 2, 3]}));
        assert_eq!(sum, json!(5));
        let parts = response(
            &dispatcher,
            json!({"command": "run", "args": ["text:split", "a-b"], "kwargs": {"sep": "-"}}),
        );
        assert_eq!(parts, json!(["a", "b"]));
        let by_keyword = response(
            &dispatcher,
            json!({"command": "run", "kwargs": {"reference": "math:multiply", "a": 4, "b": 5}}),
        );
        assert_eq!(by_keyword, json!(20));
    }

    #[test]
    fn try_reports_failure_without_error_reply() {
        let dispatcher = dispatcher();
        let outcome = response(&dispatcher, json!({"command": "try", "args": ["math:divide", 1, 0]}));
        assert_eq!(outcome["success"], json!(false));
        assert_eq!(outcome["result"]["kind"], json!("ZeroDivisionError"));
        assert_eq!(outcome["result"]["trace"], json!(["math:divide"]));

        let outcome = response(&dispatcher, json!({"command": "try", "args": ["math:divide", 9, 3]}));
        assert_eq!(outcome, json!({"success": true, "result": 3.0}));
    }

    #[test]
    fn init_then_call_methods() {
        let dispatcher = dispatcher();
        let name = response(
            &dispatcher,
            json!({"command": "init", "args": ["c", "counter:Counter"], "kwargs": {"start": 5}}),
        );
        assert_eq!(name, json!("c"));
        let value = response(&dispatcher, json!({"command": "run", "args": ["$c.increment"], "kwargs": {"by": 2}}));
        assert_eq!(value, json!(7));
        assert_eq!(response(&dispatcher, json!({"command": "get", "args": ["c.value"]})), json!(7));
        assert_eq!(response(&dispatcher, json!({"command": "get", "args": ["$c"]})), json!({"counter": 7}));
    }

    #[test]
    fn register_with_and_without_name() {
        let dispatcher = dispatcher();
        assert_eq!(response(&dispatcher, json!({"command": "register", "args": ["math:add"]})), json!("add"));
        assert_eq!(response(&dispatcher, json!({"command": "register", "args": [null, "text"]})), json!("text"));
        assert_eq!(
            response(&dispatcher, json!({"command": "register", "args": ["plus", "math:add"]})),
            json!("plus")
        );
        assert_eq!(response(&dispatcher, json!({"command": "run", "args": ["$plus", 1, 1]})), json!(2));

        let reply = dispatcher.respond(&json!({"command": "register", "args": [null, "math:pi"]}));
        match reply {
            Some(Reply::Error { error, .. }) => assert!(error.last().unwrap().starts_with("NamingError")),
            other => panic!("expected a naming error, got {other:?}"),
        }
    }

    #[test]
    fn get_encodes_functions_and_modules() {
        let dispatcher = dispatcher();
        assert_eq!(response(&dispatcher, json!({"command": "get", "args": ["math:add"]})), json!("rust:///math:add"));
        assert_eq!(response(&dispatcher, json!({"command": "get", "args": ["math"]})), json!("rust:///math"));
    }

    #[test]
    fn ping_pongs() {
        assert_eq!(response(&dispatcher(), json!({"command": "ping"})), json!("pong"));
    }

    #[test]
    fn binding_errors_are_argument_errors() {
        let dispatcher = dispatcher();
        for envelope in [
            json!({"command": "ping", "args": [1]}),
            json!({"command": "get"}),
            json!({"command": "get", "args": [3]}),
            json!({"command": "store", "args": ["x"]}),
            json!({"command": "store", "args": ["x", 1], "kwargs": {"name": "y"}}),
            json!({"command": "get", "args": ["x"], "kwargs": {"extra": true}}),
        ] {
            match dispatcher.respond(&envelope) {
                Some(Reply::Error { error, .. }) => {
                    assert!(error.last().unwrap().starts_with("ArgumentError"), "{envelope}: {error:?}")
                }
                other => panic!("expected an argument error for {envelope}, got {other:?}"),
            }
        }
    }

    #[test]
    fn nested_sigils_reach_the_callee_unresolved() {
        let dispatcher = dispatcher();
        response(&dispatcher, json!({"command": "store", "args": ["x", 1]}));
        let joined = response(
            &dispatcher,
            json!({"command": "run", "args": ["text:concat", "$x", ["$x"]]}),
        );
        assert_eq!(joined, json!("1[$x]"));
    }

    struct Nameless;

    impl crate::value::HostObject for Nameless {
        fn type_name(&self) -> &str {
            "Nameless"
        }

        fn declared_name(&self) -> Option<&str> {
            panic!("no name today")
        }

        fn attribute(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn panicking_host_code_becomes_an_error_reply() {
        let catalog = crate::catalog::Catalog::new()
            .with(crate::catalog::Module::new("odd").constant("thing", Value::object(Nameless)));
        let dispatcher = Dispatcher::new(Engine::new(catalog));
        let envelope = json!({"command": "register", "args": ["odd:thing"]});
        match dispatcher.respond(&envelope) {
            Some(Reply::Error { error, .. }) => {
                assert_eq!(error, vec!["Panic: no name today".to_string()]);
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
        let pong = response(&dispatcher, json!({"command": "ping"}));
        assert_eq!(pong, json!("pong"));
    }
}
