//! Peer-to-peer audio/video call layer which signals over document store
//! change notifications.
//!
//! The crate is split the following way:
//! - [`signalling`] exchanges SDP and ICE candidates through a mailbox
//!   collection of the document store;
//! - [`peer`] drives offer/answer negotiation and reports connectivity;
//! - [`media`] acquires local capture and routes remote tracks to sinks;
//! - [`call`] wires all of the above into a [`CallSession`] used by UI.
//!
//! [`CallSession`]: call::CallSession

// TODO: Remove `clippy::must_use_candidate` once the issue below is resolved:
//       https://github.com/rust-lang/rust-clippy/issues/4779
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

#[macro_use]
pub mod utils;
pub mod call;
pub mod conf;
pub mod log;
pub mod media;
pub mod peer;
pub mod platform;
pub mod signalling;

#[doc(inline)]
pub use self::{
    call::{
        CallDirectory, CallEvent, CallEventHandler, CallLogEntry,
        CallParameters, CallSession, MediaEngineHandle,
    },
    conf::Conf,
    media::CallKind,
};
