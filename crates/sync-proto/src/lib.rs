//! Wire envelope shared by the two replicas of a session.
//! Keeping this in a dedicated crate allows other hosts (web views, test
//! drivers) to speak the protocol without pulling in the sync engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every frame on the wire is `{ "type": KIND, "payload": ... }`.
///
/// A `null` payload is written out; only [`Envelope::bare`] frames carry no
/// payload key. On decode a missing key and `null` both read as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }
}

pub mod kinds {
    pub const REQUEST_INITIAL_STATE: &str = "REQUEST_INITIAL_STATE";
    pub const FULL_REPLACE: &str = "FULL_REPLACE";

    pub const ADD_TOKEN: &str = "ADD_TOKEN";
    pub const UPDATE_TOKEN: &str = "UPDATE_TOKEN";
    pub const REMOVE_TOKEN: &str = "REMOVE_TOKEN";
    pub const ADD_DRAWING: &str = "ADD_DRAWING";
    pub const UPDATE_DRAWING: &str = "UPDATE_DRAWING";
    pub const REMOVE_DRAWING: &str = "REMOVE_DRAWING";
    pub const ADD_DOOR: &str = "ADD_DOOR";
    pub const UPDATE_DOOR: &str = "UPDATE_DOOR";
    pub const REMOVE_DOOR: &str = "REMOVE_DOOR";
    pub const ADD_STAIRS: &str = "ADD_STAIRS";
    pub const UPDATE_STAIRS: &str = "UPDATE_STAIRS";
    pub const REMOVE_STAIRS: &str = "REMOVE_STAIRS";

    pub const UPDATE_MAP: &str = "UPDATE_MAP";
    pub const UPDATE_CONFIG: &str = "UPDATE_CONFIG";
    pub const UPDATE_EXPLORED_REGIONS: &str = "UPDATE_EXPLORED_REGIONS";

    pub const UPDATE_MEASUREMENT: &str = "UPDATE_MEASUREMENT";
    pub const TOGGLE_DOOR: &str = "TOGGLE_DOOR";
}
