#![allow(clippy::module_name_repetitions)]
#![forbid(non_ascii_idents, unsafe_code)]

mod engine;
mod session;
mod signalling;

use std::time::Duration;

/// How long a test waits for an expected event before failing.
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Polls `$name` [`Stream`] until finds provided `$pattern`.
///
/// When provided `$pattern` found - executes provided `$body`.
///
/// This macro can be used only in the `async` blocks.
///
/// # Usage
///
/// ```ignore
/// let (tx, mut rx) = mpsc::unbounded();
/// tx.unbounded_send(CallEvent::AudioStarted);
/// tx.unbounded_send(CallEvent::Connected);
///
/// if_let_next! {
///     CallEvent::Connected = rx {
///         println!("connected");
///     }
/// }
/// ```
///
/// [`Stream`]: futures::Stream
#[macro_export]
macro_rules! if_let_next {
    ($pattern:pat = $name:ident $body:block ) => {
        loop {
            if let $pattern = $name.select_next_some().await {
                $body;
                break;
            }
        }
    };
}

/// Awaits the provided [`Future`], panicking if it doesn't resolve within
/// [`DEADLINE`].
///
/// [`Future`]: std::future::Future
#[macro_export]
macro_rules! within_deadline {
    ($fut:expr) => {
        tokio::time::timeout($crate::DEADLINE, $fut)
            .await
            .expect("deadline exceeded")
    };
}
