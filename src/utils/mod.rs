//! Helper utils used in the crate.

use std::fmt::Display;

use derive_more::{Display, From};
use futures::future::{self, AbortHandle, Future};
use tracerr::{Trace, Traced};

use crate::platform::Document;

/// Error which is able to name itself.
///
/// Names are used on the [`CallSession`] boundary where the concrete error
/// types are erased into a [`CallError`].
///
/// [`CallSession`]: crate::call::CallSession
pub trait Named {
    /// Returns name of this error.
    fn name(&self) -> &'static str;
}

/// Representation of any error reported to the UI layer.
///
/// Contains trace information of the place where the error has happened.
#[derive(Clone, Debug, Display)]
#[display(fmt = "{}: {}\n{}", name, message, trace)]
pub struct CallError {
    name: &'static str,
    message: String,
    trace: Trace,
}

impl CallError {
    /// Returns name of this [`CallError`].
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns human-readable message of this [`CallError`].
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns trace information of this [`CallError`].
    #[inline]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

impl<E: Named + Display> From<(E, Trace)> for CallError {
    #[inline]
    fn from((err, trace): (E, Trace)) -> Self {
        Self {
            name: err.name(),
            message: err.to_string(),
            trace,
        }
    }
}

impl<E: Named + Display> From<Traced<E>> for CallError {
    #[inline]
    fn from(traced: Traced<E>) -> Self {
        Self::from(traced.into_parts())
    }
}

/// Wrapper around [`AbortHandle`] which aborts [`Future`] on [`Drop`].
#[derive(Debug, From)]
pub struct TaskHandle(AbortHandle);

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns the provided [`Future`] onto the current [`tokio`] runtime and
/// returns a [`TaskHandle`] which aborts it once dropped.
///
/// # Panics
///
/// If called outside of a [`tokio`] runtime.
pub fn spawn<F>(task: F) -> TaskHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let (task, handle) = future::abortable(task);
    drop(tokio::spawn(task));
    TaskHandle(handle)
}

/// Unwraps the provided JSON object into document fields.
///
/// Anything but an object results in no fields.
pub fn fields(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(fields) => fields,
        _ => Document::new(),
    }
}

/// Returns current wall-clock time as milliseconds since Unix epoch.
#[inline]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sets the provided environment variables, parses a [`Conf`] and unsets them
/// back.
///
/// [`Conf`]: crate::conf::Conf
#[cfg(test)]
#[macro_export]
macro_rules! try_overrided_by_env_conf {
    ($($env:expr => $value:expr),+ $(,)?) => {{
        $(std::env::set_var($env, $value);)+
        let conf = $crate::conf::Conf::parse();
        $(std::env::remove_var($env);)+
        conf
    }};
}

/// Same as [`try_overrided_by_env_conf!`], but unwraps the parsed [`Conf`].
///
/// [`Conf`]: crate::conf::Conf
#[cfg(test)]
#[macro_export]
macro_rules! overrided_by_env_conf {
    ($($env:expr => $value:expr),+ $(,)?) => {
        $crate::try_overrided_by_env_conf!($($env => $value),+).unwrap()
    };
}
