//! Call document kept in the `calls` collection.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{media::CallKind, platform::Document};

/// Status of a [`Call`].
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Callee is being rung.
    #[serde(rename = "calling")]
    #[display(fmt = "calling")]
    Ringing,

    /// Callee accepted the call, media is being negotiated.
    #[display(fmt = "accepted")]
    Accepted,

    /// Callee declined the call.
    #[display(fmt = "declined")]
    Declined,

    /// Peers are connected.
    #[serde(rename = "connected")]
    #[display(fmt = "connected")]
    Active,

    /// Call has been hung up.
    #[display(fmt = "ended")]
    Ended,

    /// Call couldn't be established.
    #[display(fmt = "failed")]
    Failed,
}

impl CallStatus {
    /// Indicates whether a [`Call`] in this status can't change anymore.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Declined | Self::Ended | Self::Failed)
    }
}

/// Single call attempt as stored in the document store.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// ID of the user who started this call.
    pub caller_id: String,

    /// Display name of the caller.
    #[serde(default)]
    pub caller_name: String,

    /// ID of the user being called.
    pub receiver_id: String,

    /// Kind of this call.
    #[serde(rename = "type")]
    pub kind: CallKind,

    /// Current status of this call.
    pub status: CallStatus,

    /// Time this call was created at, in milliseconds since Unix epoch.
    pub timestamp: i64,

    /// Time the caller started ringing at, in milliseconds since Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,

    /// Time the peers got connected at, if they ever did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_time: Option<i64>,

    /// Time this call was ended at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,

    /// Duration of this call in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl Call {
    /// Converts this [`Call`] into its stored [`Document`] representation.
    ///
    /// # Errors
    ///
    /// If serialization fails.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(serde::ser::Error::custom("expected a map")),
        }
    }

    /// Parses a [`Call`] out of its stored [`Document`] representation.
    ///
    /// # Errors
    ///
    /// If the [`Document`] has a wrong shape.
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }
}
