//! Calls lifecycle settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Calls lifecycle settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Call {
    /// Duration for a callee to answer an outgoing call, after which the call
    /// is considered unanswered and ended.
    ///
    /// Defaults to `45s`.
    #[default(Duration::from_secs(45))]
    #[serde(with = "humantime_serde")]
    pub ring_timeout: Duration,
}
