//! Flat JSON envelopes exchanged over the connection.
//!
//! An outbound envelope carries a channel name and an optional payload under
//! two configurable field names. Inbound envelopes additionally carry a fixed
//! [`STATUS_FIELD`] that decides how the message is routed.

use std::fmt;

use serde_json::{Map, Value};

use crate::Result;
use crate::ws::WsError;

/// Name of the inbound field used for routing. Not configurable.
pub const STATUS_FIELD: &str = "status";

const DEFAULT_CHANNEL_FIELD: &str = "channel";
const DEFAULT_DATA_FIELD: &str = "data";

/// Field names used for the channel and payload of every envelope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeShape {
    channel_field: String,
    data_field: String,
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_FIELD, DEFAULT_DATA_FIELD)
    }
}

impl EnvelopeShape {
    #[must_use]
    pub fn new<C: Into<String>, D: Into<String>>(channel_field: C, data_field: D) -> Self {
        Self {
            channel_field: channel_field.into(),
            data_field: data_field.into(),
        }
    }

    #[must_use]
    pub fn channel_field(&self) -> &str {
        &self.channel_field
    }

    #[must_use]
    pub fn data_field(&self) -> &str {
        &self.data_field
    }

    /// Serialize a subscription envelope. A `None` payload omits the data field.
    pub fn encode(&self, channel: &str, data: Option<&Value>) -> Result<String> {
        let mut object = Map::with_capacity(2);
        object.insert(self.channel_field.clone(), Value::String(channel.to_owned()));
        if let Some(data) = data {
            object.insert(self.data_field.clone(), data.clone());
        }

        Ok(serde_json::to_string(&object)?)
    }

    /// Parse an inbound text frame.
    ///
    /// Only text that is not valid JSON fails. Valid JSON that is not an object,
    /// or that lacks the routing fields, decodes into an envelope whose
    /// accessors return `None`, and is dropped later during dispatch.
    pub fn decode(&self, text: &str) -> std::result::Result<Envelope, WsError> {
        let raw: Value = serde_json::from_str(text).map_err(|source| WsError::MalformedEnvelope {
            raw: text.to_owned(),
            source,
        })?;

        Ok(self.envelope_from_value(raw))
    }

    fn envelope_from_value(&self, raw: Value) -> Envelope {
        let (channel, data, status) = match raw.as_object() {
            Some(object) => (
                non_empty_str(object.get(&self.channel_field)),
                object.get(&self.data_field).cloned(),
                non_empty_str(object.get(STATUS_FIELD)).map(Status::from),
            ),
            None => (None, None, None),
        };

        Envelope {
            channel,
            data,
            status,
            raw,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Routing status of an inbound envelope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    /// Any other value; such envelopes are never delivered to a handler
    Other(String),
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Other(value),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Error => f.write_str("error"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// A decoded inbound envelope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Value of the configured channel field, if present and a non-empty string
    pub channel: Option<String>,
    /// Value of the configured data field
    pub data: Option<Value>,
    /// Value of the `status` field, if present and a non-empty string
    pub status: Option<Status>,
    /// The whole decoded JSON document
    pub raw: Value,
}
