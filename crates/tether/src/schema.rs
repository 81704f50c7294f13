//! Command envelope contract.
//!
//! The dispatcher treats validation as an opaque check: anything that
//! implements [`Schema`] can gate inbound envelopes.

use serde_json::{Value as Json, json};
use tether_protocol::CommandName;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {message}")]
pub struct SchemaViolation {
    /// JSON pointer of the offending node
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

pub trait Schema: Send + Sync {
    fn validate(&self, instance: &Json) -> Result<(), SchemaViolation>;
}

/// `{"command": <one of the seven names>, "args"?: [...], "kwargs"?: {...}}`
/// Extra top-level properties are tolerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSchema;

impl CommandSchema {
    /// The same contract as a JSON Schema document, for clients.
    pub fn document() -> Json {
        let names: Vec<&str> = CommandName::ALL.iter().map(|c| c.as_str()).collect();
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "tether command",
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {"type": "string", "enum": names},
                "args": {"type": "array"},
                "kwargs": {"type": "object"}
            }
        })
    }
}

impl Schema for CommandSchema {
    fn validate(&self, instance: &Json) -> Result<(), SchemaViolation> {
        let Some(envelope) = instance.as_object() else {
            return Err(SchemaViolation::new("", "envelope must be an object"));
        };

        match envelope.get("command") {
            None => return Err(SchemaViolation::new("", "missing required property `command`")),
            Some(Json::String(name)) => {
                if CommandName::parse(name).is_none() {
                    return Err(SchemaViolation::new(
                        "/command",
                        format!("`{name}` is not a known command"),
                    ));
                }
            }
            Some(_) => return Err(SchemaViolation::new("/command", "must be a string")),
        }

        if let Some(args) = envelope.get("args") {
            if !args.is_array() {
                return Err(SchemaViolation::new("/args", "must be an array"));
            }
        }
        if let Some(kwargs) = envelope.get("kwargs") {
            if !kwargs.is_object() {
                return Err(SchemaViolation::new("/kwargs", "must be an object"));
            }
        }
        Ok(())
    }
}
