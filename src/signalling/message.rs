//! Shape of documents exchanged through a call's signalling mailbox.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::{Document, IceCandidate};

/// Single unit of exchange in a call's signalling mailbox.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignallingMessage {
    /// ID of the user who sent this message.
    pub from: String,

    /// ID of the user this message is addressed to.
    pub to: String,

    /// Actual content of this message.
    #[serde(flatten)]
    pub payload: Payload,

    /// Wall-clock time this message was sent at, in milliseconds since Unix
    /// epoch.
    pub timestamp: i64,
}

/// Content of a [`SignallingMessage`], tagged by its `type` field.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    /// SDP offer of the sender.
    Offer {
        /// SDP text.
        sdp: String,
    },

    /// SDP answer of the sender.
    Answer {
        /// SDP text.
        sdp: String,
    },

    /// ICE candidate discovered by the sender.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// Candidate line.
        candidate: String,

        /// Media stream identification tag.
        #[serde(default)]
        sdp_mid: Option<String>,

        /// Index of the media description the candidate is associated with.
        #[serde(default)]
        sdp_m_line_index: Option<u16>,
    },

    /// Sender has hung up.
    EndCall,
}

impl From<IceCandidate> for Payload {
    #[inline]
    fn from(candidate: IceCandidate) -> Self {
        Self::IceCandidate {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_m_line_index: candidate.sdp_m_line_index,
        }
    }
}

impl SignallingMessage {
    /// Converts this [`SignallingMessage`] into its stored [`Document`]
    /// representation.
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

    /// Parses a [`SignallingMessage`] out of its stored [`Document`]
    /// representation.
    ///
    /// # Errors
    ///
    /// If the [`Document`] has a wrong shape.
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }

    /// Indicates whether this message is addressed to `local_id` by someone
    /// else.
    #[inline]
    pub fn is_addressed_to(&self, local_id: &str) -> bool {
        self.to == local_id && self.from != local_id
    }
}
