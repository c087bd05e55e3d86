//! Persistent trigger protocol.
//!
//! Messages are single-line JSON objects tagged by `type`, one per line in
//! each direction over the trigger process's stdin and stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Messages sent to a trigger process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Sent once, right after spawn.
    Start { config: JsonValue },
    /// Answers the event with the same request id.
    Reply {
        #[serde(rename = "requestId")]
        request_id: JsonValue,
        data: JsonValue,
    },
    /// Asks the process to shut down.
    Kill,
}

/// Initialization result reported in a `status` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyStatus {
    Ready,
    Error,
}

/// Messages received from a trigger process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Status {
        status: ReadyStatus,
        #[serde(default)]
        message: Option<String>,
    },
    /// The trigger's external condition fired.
    ///
    /// The request id is opaque and echoed back verbatim in the reply.
    Event {
        #[serde(rename = "requestId")]
        request_id: JsonValue,
        #[serde(default)]
        payload: JsonValue,
    },
    /// Fatal failure inside the trigger.
    Error {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
}

impl OutboundMessage {
    /// Serializes the message as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl InboundMessage {
    /// Parses one line of trigger output.
    ///
    /// # Errors
    ///
    /// Returns an error for anything that is not a known message.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
