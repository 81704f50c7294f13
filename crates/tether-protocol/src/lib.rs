//! Wire types for the tether command protocol.
//!
//! A controller sends command envelopes as JSON text frames and receives one
//! reply per accepted envelope on the same connection. Envelopes that fail the
//! command schema get no reply at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Written to stdout once a session is listening.
pub const START_MARKER: &str = "TETHER_SESSION_START";

/// Written to stdout once a session has terminated.
pub const STOP_MARKER: &str = "TETHER_SESSION_STOP";

/// Scheme of identifier-path URIs used to encode functions and modules.
pub const URI_SCHEME: &str = "rust";

/// Lifecycle marker line, e.g. `TETHER_SESSION_START@localhost:8001`.
pub fn marker_line(marker: &str, host: &str, port: u16) -> String {
    format!("{marker}@{host}:{port}")
}

/// The fixed set of operations a command envelope can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandName {
    /// Resolve a reference and return its value
    Get,
    /// Call a constructor and register the result under a name
    Init,
    /// Call a function, failures become error replies
    Run,
    /// Call a function, failures become a `{success, result}` record
    Try,
    /// Register a catalog symbol under a name
    Register,
    /// Store a plain value under a name
    Store,
    /// Liveness check
    Ping,
}

impl CommandName {
    pub const ALL: [CommandName; 7] = [
        CommandName::Get,
        CommandName::Init,
        CommandName::Run,
        CommandName::Try,
        CommandName::Register,
        CommandName::Store,
        CommandName::Ping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Get => "get",
            CommandName::Init => "init",
            CommandName::Run => "run",
            CommandName::Try => "try",
            CommandName::Register => "register",
            CommandName::Store => "store",
            CommandName::Ping => "ping",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_str() == name)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound command: `{"command": ..., "args": [...], "kwargs": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: CommandName,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn new(command: CommandName) -> Self {
        Self {
            command,
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Outbound reply. `evt` echoes the envelope that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum Reply {
    /// Command succeeded
    Response { response: Value, evt: Value },

    /// Command raised; `error` holds the formatted failure lines
    Error { error: Vec<String>, evt: Value },
}

impl Reply {
    pub fn evt(&self) -> &Value {
        match self {
            Reply::Response { evt, .. } | Reply::Error { evt, .. } => evt,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// Parse a frame as a reply. Unsolicited pushes do not parse.
    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_defaults_missing_args() {
        let envelope: CommandEnvelope = serde_json::from_value(json!({"command": "ping"})).unwrap();
        assert_eq!(envelope.command, CommandName::Ping);
        assert!(envelope.args.is_empty());
        assert!(envelope.kwargs.is_empty());
    }

    #[test]
    fn envelope_rejects_unknown_command() {
        let parsed = serde_json::from_value::<CommandEnvelope>(json!({"command": "eval"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn response_reply_shape() {
        let reply = Reply::Response {
            response: json!("x"),
            evt: json!({"command": "store", "args": ["x", 42]}),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({
                "tag": "response",
                "response": "x",
                "evt": {"command": "store", "args": ["x", 42]},
            })
        );
    }

    #[test]
    fn error_reply_shape() {
        let reply = Reply::Error {
            error: vec!["ResolutionError: no module named `nonexistent`".to_string()],
            evt: json!({"command": "run"}),
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["tag"], "error");
        assert!(value["error"].is_array());
        assert_eq!(Reply::from_json(&value), Some(reply));
    }

    #[test]
    fn command_names_round_trip_through_parse() {
        for command in CommandName::ALL {
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
        }
        assert_eq!(CommandName::parse("exec"), None);
    }

    #[test]
    fn marker_line_format() {
        assert_eq!(
            marker_line(START_MARKER, "localhost", 8001),
            "TETHER_SESSION_START@localhost:8001"
        );
    }
}
