//! Media capture and playback abstractions of a media engine and the
//! device audio service.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use super::{Error, RtcConfiguration, RtcEvent, RtcPeerConnection};

/// Kind of a media track.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum TrackKind {
    /// Audio track.
    #[display(fmt = "audio")]
    Audio,

    /// Video track.
    #[display(fmt = "video")]
    Video,
}

/// Camera a video capturer takes frames from, as seen from a user's
/// perspective.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize,
    SmartDefault,
)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Camera facing the user.
    #[default]
    #[display(fmt = "front")]
    Front,

    /// Camera facing away from the user.
    #[display(fmt = "back")]
    Back,
}

impl FacingMode {
    /// Returns [`FacingMode::Front`] if `front` is `true`, or
    /// [`FacingMode::Back`] otherwise.
    #[inline]
    pub fn from_front(front: bool) -> Self {
        if front {
            Self::Front
        } else {
            Self::Back
        }
    }
}

/// Processing to be applied by a media engine to a captured audio.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AudioConstraints {
    /// Whether echo cancellation is enabled.
    pub echo_cancellation: bool,

    /// Whether automatic gain control is enabled.
    pub auto_gain_control: bool,

    /// Whether noise suppression is enabled.
    pub noise_suppression: bool,

    /// Whether a high-pass filter is enabled.
    pub high_pass_filter: bool,
}

/// Resolution and frame rate a camera captures with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaptureSettings {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Frames per second.
    pub frame_rate: u32,
}

/// Metadata of a single video frame delivered to a [`VideoSink`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Clockwise rotation of the frame in degrees.
    pub rotation: u16,

    /// Capture timestamp in nanoseconds.
    pub timestamp_ns: i64,
}

/// Surface provided by UI to render video frames on.
pub trait VideoSink: Debug + Send + Sync {
    /// Renders the provided [`VideoFrame`].
    fn on_frame(&self, frame: &VideoFrame);
}

/// Local or remote media track of a media engine.
pub trait MediaStreamTrack: Debug + Send + Sync {
    /// Returns ID of this track.
    fn id(&self) -> String;

    /// Returns [`TrackKind`] of this track.
    fn kind(&self) -> TrackKind;

    /// Indicates whether this track produces media.
    fn enabled(&self) -> bool;

    /// Enables or disables this track. A disabled local track sends silence
    /// (or black frames) without any renegotiation.
    fn set_enabled(&self, enabled: bool);

    /// Starts rendering this track on the provided [`VideoSink`].
    fn add_sink(&self, sink: Arc<dyn VideoSink>);

    /// Stops rendering this track on the provided [`VideoSink`].
    fn remove_sink(&self, sink: &Arc<dyn VideoSink>);

    /// Stops this track and releases its source.
    fn stop(&self);
}

/// Event fired by a [`VideoCapturer`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CapturerEvent {
    /// The first frame has been captured.
    FirstFrame,

    /// Camera failed.
    Error(String),
}

/// Handler of [`CapturerEvent`]s.
#[async_trait]
pub trait CapturerEventHandler {
    /// Output of this handler's methods.
    type Output;

    /// Handles [`CapturerEvent::FirstFrame`].
    async fn on_first_frame(&mut self) -> Self::Output;

    /// Handles [`CapturerEvent::Error`].
    async fn on_camera_error(&mut self, message: String) -> Self::Output;
}

impl CapturerEvent {
    /// Dispatches this [`CapturerEvent`] with the provided
    /// [`CapturerEventHandler`].
    pub async fn dispatch_with<T>(self, handler: &mut T) -> T::Output
    where
        T: CapturerEventHandler + Send,
    {
        match self {
            Self::FirstFrame => handler.on_first_frame().await,
            Self::Error(message) => handler.on_camera_error(message).await,
        }
    }
}

/// Hardware camera capturer.
///
/// Its [`CapturerEvent`]s are delivered to the sender passed to
/// [`MediaEngine::create_video_capturer()`].
pub trait VideoCapturer: Send + Sync {
    /// Starts capturing with the provided [`CaptureSettings`].
    ///
    /// # Errors
    ///
    /// If the camera cannot be opened.
    fn start_capture(&self, settings: CaptureSettings) -> Result<(), Error>;

    /// Stops capturing.
    fn stop_capture(&self);

    /// Switches capturing to the camera with the provided [`FacingMode`]
    /// without interrupting the produced track.
    ///
    /// # Errors
    ///
    /// If there is no such camera, or it cannot be opened.
    fn switch_camera(&self, facing: FacingMode) -> Result<(), Error>;

    /// Releases this capturer.
    fn dispose(&self);
}

/// Factory of peer connections, tracks and capturers.
///
/// The factory is a process-wide resource. See [`MediaEngineHandle`] for its
/// lifecycle.
///
/// [`MediaEngineHandle`]: crate::call::MediaEngineHandle
pub trait MediaEngine: Send + Sync {
    /// Creates a new [`RtcPeerConnection`] with the provided configuration,
    /// delivering its events into `events`.
    ///
    /// # Errors
    ///
    /// If the engine fails to create the connection.
    fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> Result<Box<dyn RtcPeerConnection>, Error>;

    /// Creates a new local audio track backed by the microphone.
    ///
    /// # Errors
    ///
    /// If the microphone cannot be captured.
    fn create_audio_track(
        &self,
        id: &str,
        constraints: AudioConstraints,
    ) -> Result<Arc<dyn MediaStreamTrack>, Error>;

    /// Creates a new [`VideoCapturer`] for the camera with the provided
    /// [`FacingMode`], delivering its events into `events`.
    ///
    /// # Errors
    ///
    /// If there is no such camera.
    fn create_video_capturer(
        &self,
        facing: FacingMode,
        events: mpsc::UnboundedSender<CapturerEvent>,
    ) -> Result<Box<dyn VideoCapturer>, Error>;

    /// Creates a new local video track fed by the provided
    /// [`VideoCapturer`].
    ///
    /// # Errors
    ///
    /// If the engine fails to create a video source.
    fn create_video_track(
        &self,
        id: &str,
        capturer: &dyn VideoCapturer,
    ) -> Result<Arc<dyn MediaStreamTrack>, Error>;

    /// Releases all the resources held by this engine.
    fn dispose(&self);
}

/// System audio routing service of a device.
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
pub trait AudioService: Send + Sync {
    /// Switches the device into (or out of) the voice communication mode.
    fn set_communication_mode(&self, enabled: bool);

    /// Routes playback to the loudspeaker if `on` is `true`, or to the
    /// earpiece otherwise.
    fn set_speakerphone_on(&self, on: bool);

    /// Mutes or unmutes the microphone.
    fn set_microphone_mute(&self, mute: bool);
}
