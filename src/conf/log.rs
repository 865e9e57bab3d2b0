//! Logging settings.

use std::{borrow::Cow, str::FromStr as _};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Logging settings of the backend installed by [`crate::log::init()`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Log {
    /// Minimal level of the records to be written, as named by [`slog`]
    /// (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR` or `CRITICAL`).
    ///
    /// `OFF`, or any unknown value, disables logging.
    ///
    /// Defaults to `INFO`.
    #[default("INFO")]
    pub level: Cow<'static, str>,
}

impl Log {
    /// Returns configured [`slog::Level`]. [`None`] if logging is disabled.
    pub fn level(&self) -> Option<slog::Level> {
        slog::Level::from_str(&self.level).ok()
    }

    /// Returns the filter the [`log`] facade records of the call layer are
    /// passed through.
    pub fn facade_filter(&self) -> log::LevelFilter {
        use slog::Level as L;

        match self.level() {
            None => log::LevelFilter::Off,
            Some(L::Critical) | Some(L::Error) => log::LevelFilter::Error,
            Some(L::Warning) => log::LevelFilter::Warn,
            Some(L::Info) => log::LevelFilter::Info,
            Some(L::Debug) => log::LevelFilter::Debug,
            Some(L::Trace) => log::LevelFilter::Trace,
        }
    }
}
