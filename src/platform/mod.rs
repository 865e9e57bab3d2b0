//! Interfaces of the external collaborators the call layer is built on: a
//! document store, a [WebRTC] media engine and a system audio service.
//!
//! Concrete implementations are provided by the embedding application.
//!
//! [WebRTC]: https://webrtcglossary.com/webrtc

mod media;
mod rtc;
mod store;

use derive_more::Display;

#[doc(inline)]
pub use self::{
    media::{
        AudioConstraints, AudioService, CaptureSettings, CapturerEvent,
        CapturerEventHandler, FacingMode, MediaEngine, MediaStreamTrack,
        TrackKind, VideoCapturer, VideoFrame, VideoSink,
    },
    rtc::{
        BundlePolicy, IceCandidate, IceConnectionState, IceServer,
        OfferOptions, RtcConfiguration, RtcEvent, RtcPeerConnection, SdpType,
    },
    store::{
        ChangeKind, Document, DocumentChange, DocumentSnapshot, DocumentStore,
        Query,
    },
};

#[cfg(any(test, feature = "mockable"))]
#[doc(inline)]
pub use self::{media::MockAudioService, rtc::MockRtcPeerConnection};

/// Opaque failure reported by an external collaborator.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{}", _0)]
pub struct Error(String);

impl Error {
    /// Creates a new [`Error`] with the provided description.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

impl std::error::Error for Error {}
