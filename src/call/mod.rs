//! Call Session façade used by UI, together with the call registry kept in
//! the document store.

mod directory;
mod engine;
mod history;
mod session;

use async_trait::async_trait;
use derive_more::{Display, From};

use crate::{
    media::MediaError,
    peer::PeerError,
    platform::TrackKind,
    signalling::SignallingError,
    utils::{CallError, Named},
};

#[doc(inline)]
pub use self::{
    directory::{Answer, CallDirectory, DirectoryError, IncomingCall},
    engine::MediaEngineHandle,
    history::CallLogEntry,
    session::CallSession,
};

/// Errors occurring in a [`CallSession`].
#[derive(Clone, Debug, Display, From)]
pub enum SessionError {
    /// Call was started before [`CallParameters`] were set.
    #[display(fmt = "Call parameters are not set")]
    #[from(ignore)]
    ParametersNotSet,

    /// Media engine has already been disposed.
    #[display(fmt = "Media engine is disposed")]
    #[from(ignore)]
    EngineDisposed,

    /// Operation requires a started call.
    #[display(fmt = "No call is in progress")]
    #[from(ignore)]
    NoSession,

    /// [`PeerConnection`] failed.
    ///
    /// [`PeerConnection`]: crate::peer::PeerConnection
    #[display(fmt = "{}", _0)]
    Peer(PeerError),

    /// [`MediaPipeline`] failed.
    ///
    /// [`MediaPipeline`]: crate::media::MediaPipeline
    #[display(fmt = "{}", _0)]
    Media(MediaError),

    /// [`SignallingChannel`] failed.
    ///
    /// [`SignallingChannel`]: crate::signalling::SignallingChannel
    #[display(fmt = "{}", _0)]
    Signalling(SignallingError),
}

impl Named for SessionError {
    fn name(&self) -> &'static str {
        match self {
            Self::ParametersNotSet => "ParametersNotSet",
            Self::EngineDisposed => "EngineDisposed",
            Self::NoSession => "NoSession",
            Self::Peer(e) => e.name(),
            Self::Media(e) => e.name(),
            Self::Signalling(e) => e.name(),
        }
    }
}

/// Identities of a call and the role of the local user in it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallParameters {
    /// ID of the call document.
    pub call_id: String,

    /// ID of the local user.
    pub local_user_id: String,

    /// ID of the remote user.
    pub remote_user_id: String,

    /// Whether the local user started the call, and so sends the offer.
    pub is_initiator: bool,
}

/// Call lifecycle event published by a [`CallSession`].
///
/// Events may be observed on any thread.
#[derive(Clone, Debug)]
pub enum CallEvent {
    /// Peers are connected. Emitted once per call.
    Connected,

    /// Peers are disconnected. Emitted at most once per call.
    Disconnected,

    /// Audio started flowing. Emitted right after [`CallEvent::Connected`].
    AudioStarted,

    /// Local audio has been released. Emitted on every hang-up, even if the
    /// call has never connected.
    AudioStopped,

    /// Video started flowing. Emitted right after
    /// [`CallEvent::AudioStarted`] in video calls.
    VideoStarted,

    /// Local video has been released.
    VideoStopped,

    /// Camera delivered its first frame.
    LocalVideoReady,

    /// Remote track of the provided kind has been received and can be
    /// rendered.
    RemoteTrackReady {
        /// Kind of the received track.
        kind: TrackKind,
    },

    /// Remote user hung up.
    RemoteEnded,

    /// Something went wrong.
    Error {
        /// Occurred error.
        error: CallError,
    },
}

/// Handler of [`CallEvent`]s.
#[async_trait]
pub trait CallEventHandler {
    /// Output of this handler's methods.
    type Output;

    /// Handles [`CallEvent::Connected`].
    async fn on_connected(&mut self) -> Self::Output;

    /// Handles [`CallEvent::Disconnected`].
    async fn on_disconnected(&mut self) -> Self::Output;

    /// Handles [`CallEvent::AudioStarted`].
    async fn on_audio_started(&mut self) -> Self::Output;

    /// Handles [`CallEvent::AudioStopped`].
    async fn on_audio_stopped(&mut self) -> Self::Output;

    /// Handles [`CallEvent::VideoStarted`].
    async fn on_video_started(&mut self) -> Self::Output;

    /// Handles [`CallEvent::VideoStopped`].
    async fn on_video_stopped(&mut self) -> Self::Output;

    /// Handles [`CallEvent::LocalVideoReady`].
    async fn on_local_video_ready(&mut self) -> Self::Output;

    /// Handles [`CallEvent::RemoteTrackReady`].
    async fn on_remote_track_ready(&mut self, kind: TrackKind) -> Self::Output;

    /// Handles [`CallEvent::RemoteEnded`].
    async fn on_remote_ended(&mut self) -> Self::Output;

    /// Handles [`CallEvent::Error`].
    async fn on_error(&mut self, error: CallError) -> Self::Output;
}

impl CallEvent {
    /// Dispatches this [`CallEvent`] with the provided [`CallEventHandler`].
    pub async fn dispatch_with<T>(self, handler: &mut T) -> T::Output
    where
        T: CallEventHandler + Send,
    {
        match self {
            Self::Connected => handler.on_connected().await,
            Self::Disconnected => handler.on_disconnected().await,
            Self::AudioStarted => handler.on_audio_started().await,
            Self::AudioStopped => handler.on_audio_stopped().await,
            Self::VideoStarted => handler.on_video_started().await,
            Self::VideoStopped => handler.on_video_stopped().await,
            Self::LocalVideoReady => handler.on_local_video_ready().await,
            Self::RemoteTrackReady { kind } => {
                handler.on_remote_track_ready(kind).await
            }
            Self::RemoteEnded => handler.on_remote_ended().await,
            Self::Error { error } => handler.on_error(error).await,
        }
    }
}
