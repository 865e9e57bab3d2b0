//! Document store layout used for signalling.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Names of the document store collections which calls are kept in.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Signalling {
    /// Top-level collection holding call documents.
    ///
    /// Defaults to `calls`.
    #[default = "calls"]
    pub calls_collection: Cow<'static, str>,

    /// Sub-collection of a call document holding its signalling mailbox.
    ///
    /// Defaults to `signaling`.
    #[default = "signaling"]
    pub mailbox_collection: Cow<'static, str>,
}

impl Signalling {
    /// Returns path of the call document with the provided ID.
    #[inline]
    pub fn call_path(&self, call_id: &str) -> String {
        format!("{}/{}", self.calls_collection, call_id)
    }

    /// Returns path of the mailbox collection of the call with the provided
    /// ID.
    #[inline]
    pub fn mailbox_path(&self, call_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.calls_collection, call_id, self.mailbox_collection,
        )
    }
}
