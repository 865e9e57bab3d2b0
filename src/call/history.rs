//! Call log entries shown in a user's call history.

use crate::{
    media::CallKind,
    signalling::{Call, CallStatus},
};

/// Calls shorter than this are considered missed, in milliseconds.
const MISSED_CALL_THRESHOLD_MS: i64 = 1000;

/// [`Call`] as seen by one of its parties.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallLogEntry {
    /// ID of the call document.
    pub call_id: String,

    /// ID of the other party.
    pub other_user_id: String,

    /// Kind of the call.
    pub kind: CallKind,

    /// Last status of the call.
    pub status: CallStatus,

    /// Time the call was started at, in milliseconds since Unix epoch.
    pub start_time: i64,

    /// Time the call was ended at, in milliseconds since Unix epoch.
    pub end_time: Option<i64>,

    /// Duration of the call in milliseconds.
    pub duration: Option<i64>,

    /// Whether the call was started by the local user.
    pub is_outgoing: bool,
}

impl CallLogEntry {
    /// Builds a [`CallLogEntry`] out of the provided [`Call`] as seen by the
    /// user with the provided `local_user_id`.
    pub fn new(call_id: String, call: &Call, local_user_id: &str) -> Self {
        let is_outgoing = call.caller_id == local_user_id;
        let other_user_id = if is_outgoing {
            call.receiver_id.clone()
        } else {
            call.caller_id.clone()
        };
        Self {
            call_id,
            other_user_id,
            kind: call.kind,
            status: call.status,
            start_time: call.start_time.unwrap_or(call.timestamp),
            end_time: call.end_time,
            duration: call.duration,
            is_outgoing,
        }
    }

    /// Indicates whether the call has been connected at some point.
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self.status, CallStatus::Ended | CallStatus::Active)
    }

    /// Indicates whether the call was declined, or ended before it really
    /// started.
    pub fn is_missed(&self) -> bool {
        match self.status {
            CallStatus::Declined => true,
            CallStatus::Ended => self
                .duration
                .map_or(false, |d| d < MISSED_CALL_THRESHOLD_MS),
            _ => false,
        }
    }

    /// Formats the duration as `m:ss`.
    ///
    /// Unknown or non-positive durations are formatted as `0:00`.
    pub fn formatted_duration(&self) -> String {
        let secs = match self.duration {
            Some(ms) if ms > 0 => ms / 1000,
            _ => 0,
        };
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}
