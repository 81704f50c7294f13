//! Reference resolution and guarded invocation.
//!
//! A reference either starts with a registered name, in which case the rest
//! of the dotted path is walked on the registered value, or it is an import
//! reference looked up in the [`Catalog`].

use crate::catalog::Catalog;
use crate::dispatcher;
use crate::fault::{self, Error, Fault};
use crate::reference::{self, ImportRef};
use crate::registry::Registry;
use crate::value::{CallArgs, Function, HostObject, Kwargs, Value};
use std::sync::{Arc, Weak};
use tether_protocol::CommandName;

/// Registry name of the engine's own handle.
pub const SELF_NAME: &str = "tether";

struct EngineInner {
    registry: Arc<Registry>,
    catalog: Arc<Catalog>,
}

/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_registry(Arc::new(Registry::new()), Arc::new(catalog))
    }

    /// Engine over an existing registry. The registry is seeded with the
    /// engine's own handle under [`SELF_NAME`].
    pub fn with_registry(registry: Arc<Registry>, catalog: Arc<Catalog>) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner { registry, catalog }),
        };
        let handle = EngineHandle {
            engine: Arc::downgrade(&engine.inner),
        };
        engine.inner.registry.store(SELF_NAME, Value::object(handle));
        engine
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    /// Resolve a reference, with or without the leading sigil.
    pub fn resolve(&self, reference: &str) -> Result<Value, Error> {
        let target = reference::strip_sigil(reference);
        let head = target.split('.').next().unwrap_or(target);
        // lookups run host attribute code
        fault::contain(|| match self.inner.registry.get(head) {
            Some(root) => walk(target, root),
            None => self.resolve_import(target),
        })
        .unwrap_or_else(|fault| Err(Error::Raised(fault.with_frame(target))))
    }

    /// Load a unit from the catalog and walk its attribute path.
    pub fn resolve_import(&self, reference: &str) -> Result<Value, Error> {
        let parsed = ImportRef::parse(reference)?;
        let module = self
            .inner
            .catalog
            .module(parsed.unit)
            .ok_or_else(|| Error::ModuleNotFound(parsed.unit.to_string()))?;

        let mut owner = parsed.unit.to_string();
        let mut value = Value::Module(module);
        for (i, attr) in parsed.attrs.iter().enumerate() {
            value = value.lookup(attr).ok_or_else(|| Error::AttributeNotFound {
                owner: owner.clone(),
                name: attr.to_string(),
            })?;
            owner.push(if i == 0 { ':' } else { '.' });
            owner.push_str(attr);
        }
        Ok(value)
    }

    /// Replace a top-level namespace reference string with its value.
    /// Anything else, including sigil strings nested in lists or maps, passes
    /// through untouched.
    pub fn actualize(&self, value: Value) -> Result<Value, Error> {
        if let Value::Str(text) = &value {
            if reference::is_namespace_ref(text) {
                return self.resolve(text);
            }
        }
        Ok(value)
    }

    /// Resolve a callable, actualize its arguments and invoke it.
    pub fn call(&self, reference: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
        let function = match self.resolve(reference)? {
            Value::Function(function) => function,
            _ => return Err(Error::NotCallable(reference.to_string())),
        };

        let positional = args
            .into_iter()
            .map(|arg| self.actualize(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut keywords = Kwargs::new();
        for (key, value) in kwargs {
            let name = match self.actualize(Value::str(&key))? {
                Value::Str(name) => name.to_string(),
                other => {
                    return Err(Error::Argument(format!(
                        "keyword `{key}` resolved to {} instead of a name",
                        other.type_name()
                    )));
                }
            };
            keywords.insert(name, self.actualize(value)?);
        }

        log::debug!("call {reference} ({} args)", positional.len());
        invoke(&function, CallArgs::new(positional, keywords))
            .map_err(|fault| Error::Raised(fault.with_frame(reference)))
    }

    /// Like [`Engine::call`], but failures come back as
    /// `{success: false, result: {kind, message, trace}}`.
    pub fn attempt(&self, reference: &str, args: Vec<Value>, kwargs: Kwargs) -> Value {
        let (success, result) = match self.call(reference, args, kwargs) {
            Ok(value) => (true, value),
            Err(error) => {
                log::debug!("attempt {reference} failed: {error}");
                (false, Value::from(&error.to_fault()))
            }
        };
        Value::map([
            ("success".to_string(), Value::Bool(success)),
            ("result".to_string(), result),
        ])
    }

    /// `store(name, call(reference, args, kwargs))`
    pub fn initialize(
        &self,
        name: &str,
        reference: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<String, Error> {
        let value = self.call(reference, args, kwargs)?;
        Ok(self.store(name, value))
    }

    /// Register a catalog symbol. Without a name, the symbol's own declared
    /// name is used.
    pub fn register(&self, name: Option<&str>, reference: &str) -> Result<String, Error> {
        let element = self.resolve_import(reference)?;
        let name = match name {
            Some(name) => name.to_string(),
            None => element
                .declared_name()
                .ok_or_else(|| Error::Unnamed(reference.to_string()))?,
        };
        Ok(self.store(&name, element))
    }

    pub fn store(&self, name: &str, value: Value) -> String {
        self.inner.registry.store(name, value)
    }

    pub fn ping(&self) -> &'static str {
        "pong"
    }
}

/// Walk a namespace path rooted at a registered value.
fn walk(target: &str, root: Value) -> Result<Value, Error> {
    let segments = reference::namespace_path(target)?;
    let mut value = root;
    for (depth, segment) in segments.iter().enumerate().skip(1) {
        value = value.lookup(segment).ok_or_else(|| Error::AttributeNotFound {
            owner: segments[..depth].join("."),
            name: segment.to_string(),
        })?;
    }
    Ok(value)
}

/// A panicking host function is contained like any other failure.
fn invoke(function: &Function, args: CallArgs) -> Result<Value, Fault> {
    fault::contain(|| function.invoke(args))?
}

/// Registered handle to the engine itself: the seven operations as callable
/// attributes, plus `names`.
struct EngineHandle {
    engine: Weak<EngineInner>,
}

impl EngineHandle {
    fn upgrade(engine: &Weak<EngineInner>) -> Result<Engine, Fault> {
        engine
            .upgrade()
            .map(|inner| Engine { inner })
            .ok_or_else(|| Fault::new("ReferenceError", "engine has been dropped"))
    }
}

impl HostObject for EngineHandle {
    fn type_name(&self) -> &str {
        "Engine"
    }

    fn declared_name(&self) -> Option<&str> {
        Some(SELF_NAME)
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        if name == "names" {
            let engine = Self::upgrade(&self.engine).ok()?;
            let names = engine.registry().names().into_iter().map(Value::from).collect();
            return Some(Value::list(names));
        }
        let command = CommandName::parse(name)?;
        let engine = self.engine.clone();
        let function = Function::new(SELF_NAME, format!("Engine.{command}"), move |args| {
            let engine = Self::upgrade(&engine)?;
            dispatcher::execute(&engine, command, args.positional, args.keywords)
                .map_err(|error| error.to_fault())
        });
        Some(Value::function(function))
    }

    fn describe(&self) -> String {
        format!("<{SELF_NAME} engine>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Module;

    fn engine() -> Engine {
        Engine::new(
            Catalog::new()
                .with(
                    Module::new("a.b")
                        .constant("C", Value::map([("d".to_string(), Value::Int(7))]))
                        .function("echo", |args| Ok(Value::list(args.positional))),
                )
                .with(Module::new("boom").function("fail", |_| Err(Fault::value_error("nope"))))
                .with(Module::new("panicky").function("explode", |_| panic!("kaboom"))),
        )
    }

    #[test]
    fn store_then_resolve_with_sigil() {
        let engine = engine();
        engine.store("x", Value::Int(42));
        assert_eq!(engine.resolve("$x").unwrap(), Value::Int(42));
        assert_eq!(engine.resolve("x").unwrap(), Value::Int(42));
    }

    #[test]
    fn import_reference_walks_unit_then_attributes() {
        assert_eq!(engine().resolve("a.b:C.d").unwrap(), Value::Int(7));
    }

    #[test]
    fn namespace_reference_walks_registered_value() {
        let engine = engine();
        engine.store("foo", Value::map([("bar".to_string(), Value::str("baz"))]));
        assert_eq!(engine.resolve("$foo.bar").unwrap(), Value::str("baz"));
        match engine.resolve("$foo.qux") {
            Err(Error::AttributeNotFound { owner, name }) => {
                assert_eq!(owner, "foo");
                assert_eq!(name, "qux");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unregistered_head_falls_back_to_import() {
        let engine = engine();
        // `a` is not registered, so `a.b` is loaded as a unit.
        assert!(matches!(engine.resolve("$a.b"), Ok(Value::Module(_))));
        assert!(matches!(
            engine.resolve("$nonexistent"),
            Err(Error::ModuleNotFound(name)) if name == "nonexistent"
        ));
    }

    #[test]
    fn malformed_reference_is_rejected() {
        let engine = engine();
        assert!(matches!(engine.resolve("x + 1"), Err(Error::MalformedReference(_))));
        engine.store("x", Value::Int(1));
        assert!(matches!(engine.resolve("x.__class__()"), Err(Error::MalformedReference(_))));
    }

    #[test]
    fn actualize_is_top_level_only() {
        let engine = engine();
        engine.store("x", Value::Int(42));
        assert_eq!(engine.actualize(Value::str("$x")).unwrap(), Value::Int(42));
        assert_eq!(engine.actualize(Value::str("x")).unwrap(), Value::str("x"));

        let nested = Value::list(vec![Value::str("$x")]);
        assert_eq!(engine.actualize(nested.clone()).unwrap(), nested);
        let nested = Value::map([("k".to_string(), Value::str("$x"))]);
        assert_eq!(engine.actualize(nested.clone()).unwrap(), nested);
    }

    #[test]
    fn call_actualizes_args_and_keyword_names() {
        let engine = engine();
        engine.store("x", Value::Int(42));
        engine.store("key", Value::str("renamed"));
        let result = engine
            .call("a.b:echo", vec![Value::str("$x"), Value::Int(1)], Kwargs::new())
            .unwrap();
        assert_eq!(result, Value::list(vec![Value::Int(42), Value::Int(1)]));

        engine.store(
            "kw",
            Value::function(Function::new("t", "kw", |args| {
                Ok(Value::list(args.keywords.keys().map(|k| Value::str(k)).collect()))
            })),
        );
        let mut kwargs = Kwargs::new();
        kwargs.insert("$key".to_string(), Value::Null);
        let result = engine.call("$kw", Vec::new(), kwargs).unwrap();
        assert_eq!(result, Value::list(vec![Value::str("renamed")]));
    }

    #[test]
    fn call_rejects_non_callables() {
        let engine = engine();
        engine.store("x", Value::Int(1));
        assert!(matches!(engine.call("$x", Vec::new(), Kwargs::new()), Err(Error::NotCallable(_))));
    }

    #[test]
    fn attempt_wraps_success_and_failure() {
        let engine = engine();
        let ok = engine.attempt("a.b:echo", vec![Value::Int(1)], Kwargs::new());
        assert_eq!(ok.attribute("success"), Some(Value::Bool(true)));
        assert_eq!(ok.attribute("result"), Some(Value::list(vec![Value::Int(1)])));

        let failed = engine.attempt("boom:fail", Vec::new(), Kwargs::new());
        assert_eq!(failed.attribute("success"), Some(Value::Bool(false)));
        let descriptor = failed.attribute("result").unwrap();
        assert_eq!(descriptor.attribute("kind"), Some(Value::str("ValueError")));
        assert_eq!(descriptor.attribute("message"), Some(Value::str("nope")));
        assert_eq!(
            descriptor.attribute("trace"),
            Some(Value::list(vec![Value::str("boom:fail")]))
        );
    }

    #[test]
    fn panics_are_contained() {
        let failed = engine().attempt("panicky:explode", Vec::new(), Kwargs::new());
        let descriptor = failed.attribute("result").unwrap();
        assert_eq!(descriptor.attribute("kind"), Some(Value::str("Panic")));
        assert_eq!(descriptor.attribute("message"), Some(Value::str("kaboom")));
    }

    struct Fragile;

    impl HostObject for Fragile {
        fn type_name(&self) -> &str {
            "Fragile"
        }

        fn attribute(&self, _name: &str) -> Option<Value> {
            panic!("attribute lookup exploded")
        }
    }

    #[test]
    fn panicking_attribute_lookups_are_contained() {
        let engine = engine();
        engine.store("frag", Value::object(Fragile));
        match engine.resolve("$frag.x") {
            Err(Error::Raised(fault)) => {
                assert_eq!(fault.kind, "Panic");
                assert_eq!(fault.message, "attribute lookup exploded");
                assert_eq!(fault.trace, vec!["frag.x".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let failed = engine.attempt("$frag.x", Vec::new(), Kwargs::new());
        assert_eq!(failed.attribute("success"), Some(Value::Bool(false)));
    }

    #[test]
    fn register_infers_declared_name() {
        let engine = engine();
        assert_eq!(engine.register(None, "a.b:echo").unwrap(), "echo");
        assert!(matches!(engine.resolve("$echo"), Ok(Value::Function(_))));
        assert_eq!(engine.register(None, "a.b").unwrap(), "b");
        assert_eq!(engine.register(Some("c"), "a.b:C").unwrap(), "c");
        assert!(matches!(engine.register(None, "a.b:C"), Err(Error::Unnamed(_))));
    }

    #[test]
    fn initialize_stores_call_result() {
        let engine = engine();
        let name = engine
            .initialize("pair", "a.b:echo", vec![Value::Int(1), Value::Int(2)], Kwargs::new())
            .unwrap();
        assert_eq!(name, "pair");
        assert_eq!(engine.resolve("$pair.1").unwrap(), Value::Int(2));
    }

    #[test]
    fn registry_is_seeded_with_self_handle() {
        let engine = engine();
        assert!(engine.registry().contains(SELF_NAME));
        assert_eq!(
            engine.call("tether.ping", Vec::new(), Kwargs::new()).unwrap(),
            Value::str("pong")
        );
        engine
            .call("$tether.store", vec![Value::str("y"), Value::Int(5)], Kwargs::new())
            .unwrap();
        assert_eq!(engine.resolve("$y").unwrap(), Value::Int(5));
        let names = engine.resolve("tether.names").unwrap();
        assert_eq!(names, Value::list(vec![Value::str("tether"), Value::str("y")]));
    }
}
