//! Symbol-addressed remote invocation over a WebSocket session.
//!
//! A controller addresses live objects by name (`$runner.start`) or by
//! catalog path (`math:add`) and drives them with seven commands. See
//! [`tether_protocol`] for the wire types.

pub mod builtins;
pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod encode;
pub mod engine;
pub mod fault;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod session;
pub mod value;

pub use tether_protocol as protocol;

pub use catalog::{Catalog, Module};
pub use client::{Client, ClientError};
pub use config::{ConfigError, SessionConfig};
pub use dispatcher::Dispatcher;
pub use encode::WireEncode;
pub use engine::Engine;
pub use fault::{Error, Fault};
pub use registry::Registry;
pub use schema::{CommandSchema, Schema, SchemaViolation};
pub use session::{LifecycleSink, Session, SessionError, SessionEvent, SessionHandle, SessionState, StdoutSink};
pub use value::{CallArgs, Function, HostObject, Kwargs, Value};
