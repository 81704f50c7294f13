//! Static table of loadable units.
//!
//! Import references resolve against this table only. It is assembled at
//! startup and never grows afterwards, so the set of symbols a controller can
//! load is closed.

use crate::fault::Fault;
use crate::value::{CallArgs, Function, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A loadable unit: a path and its named members.
pub struct Module {
    path: String,
    members: BTreeMap<String, Value>,
}

impl Module {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn function(
        mut self,
        name: &str,
        body: impl Fn(CallArgs) -> Result<Value, Fault> + Send + Sync + 'static,
    ) -> Self {
        let function = Function::new(self.path.clone(), name, body);
        self.members.insert(name.to_string(), Value::function(function));
        self
    }

    pub fn constant(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.members.insert(name.to_string(), value.into());
        self
    }

    pub fn member(&self, name: &str) -> Option<Value> {
        self.members.get(name).cloned()
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.members.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    modules: BTreeMap<String, Arc<Module>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, module: Module) -> Self {
        self.insert(module);
        self
    }

    pub fn insert(&mut self, module: Module) {
        self.modules.insert(module.path.clone(), Arc::new(module));
    }

    pub fn module(&self, path: &str) -> Option<Arc<Module>> {
        self.modules.get(path).cloned()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Every top-level import reference, e.g. `math` and `math:add`.
    pub fn references(&self) -> Vec<String> {
        let mut references = Vec::new();
        for (path, module) in &self.modules {
            references.push(path.clone());
            for (name, _) in module.members() {
                references.push(format!("{path}:{name}"));
            }
        }
        references
    }
}
