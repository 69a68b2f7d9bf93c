//! Live update envelope types.

use serde::Serialize;
use serde_json::Value;
use snafu::prelude::*;

/// Error when decode a frame payload as an envelope
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum DecodeEnvelopeError {
    /// payload is invalid json
    #[snafu(display("parse json failed: {source}"))]
    ParseJSONFailed {
        /// payload for decode
        payload: String,
        /// source error
        source: serde_json::Error,
    },

    /// payload json is not an object
    #[snafu(display("parsed envelope is not object: {json}"))]
    EnvelopeNotObject {
        /// json string
        json: String,
    },

    /// payload json has no type field
    #[snafu(display("envelope has no type field: {json}"))]
    NoEnvelopeType {
        /// json string
        json: String,
    },

    /// payload json type field is not a string
    #[snafu(display("envelope has non-string type field: {json}"))]
    EnvelopeTypeNotString {
        /// json string
        json: String,
    },
}

/// Built-in message kinds the dispatcher routes to refresh hooks.
///
/// Unknown type names flow through as [`Kind::Other`] so listeners can react
/// to message kinds this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// the current principal changed, refetch the user
    UserRefresh,
    /// the active plan changed, refetch it
    PlanRefresh,
    /// the subscription state changed, refetch it
    SubscriptionRefresh,
    /// any other message type, passed through verbatim
    Other(String),
}

impl Kind {
    /// Map a wire type name to a kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "user.refresh" => Self::UserRefresh,
            "plan.refresh" => Self::PlanRefresh,
            "subscription.refresh" => Self::SubscriptionRefresh,
            _ => Self::Other(name.to_string()),
        }
    }

    /// get wire type name
    pub fn type_name(&self) -> &str {
        match self {
            Self::UserRefresh => "user.refresh",
            Self::PlanRefresh => "plan.refresh",
            Self::SubscriptionRefresh => "subscription.refresh",
            Self::Other(name) => name,
        }
    }
}

/// One pushed message: `{ "type": string, "data": any }`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// message type name
    #[serde(rename = "type")]
    pub type_name: String,
    /// message payload, `Null` when absent
    pub data: Value,
}

impl Envelope {
    /// Decode one frame payload to an envelope.
    pub fn decode(payload: &str) -> Result<Self, DecodeEnvelopeError> {
        let mut value: Value = serde_json::from_str(payload).context(error::ParseJSONFailed {
            payload: payload.to_string(),
        })?;

        let obj = value
            .as_object_mut()
            .with_context(|| error::EnvelopeNotObject {
                json: payload.to_string(),
            })?;

        let type_name = obj
            .get("type")
            .with_context(|| error::NoEnvelopeType {
                json: payload.to_string(),
            })?
            .as_str()
            .with_context(|| error::EnvelopeTypeNotString {
                json: payload.to_string(),
            })?
            .to_string();

        let data = obj.remove("data").unwrap_or(Value::Null);

        Ok(Self { type_name, data })
    }

    /// get built-in kind for this envelope
    pub fn kind(&self) -> Kind {
        Kind::from_type_name(&self.type_name)
    }
}
