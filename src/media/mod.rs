//! Local media acquisition and remote media routing.

use std::sync::{Arc, Weak};

use derive_more::Display;
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use tracerr::Traced;

use crate::{
    conf,
    platform::{
        self, AudioService, BundlePolicy, CapturerEvent, FacingMode,
        MediaEngine, MediaStreamTrack, OfferOptions, TrackKind, VideoCapturer,
        VideoSink,
    },
    utils::Named,
};

/// ID of the local audio track.
const AUDIO_TRACK_ID: &str = "audio0";

/// ID of the local video track.
const VIDEO_TRACK_ID: &str = "video0";

/// Kind of a call.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub enum CallKind {
    /// Audio-only call.
    #[serde(rename = "audio_call")]
    #[display(fmt = "audio")]
    Audio,

    /// Audio and video call.
    #[serde(rename = "video_call")]
    #[display(fmt = "video")]
    Video,
}

impl CallKind {
    /// Indicates whether calls of this kind send and receive video.
    #[inline]
    pub fn has_video(self) -> bool {
        self == Self::Video
    }

    /// Returns media directions to be negotiated for calls of this kind.
    #[inline]
    pub fn offer_options(self) -> OfferOptions {
        OfferOptions {
            receive_audio: true,
            receive_video: self.has_video(),
        }
    }

    /// Returns [`BundlePolicy`] the peer connections of this kind are
    /// created with.
    #[inline]
    pub fn bundle_policy(self) -> BundlePolicy {
        match self {
            Self::Audio => BundlePolicy::MaxBundle,
            Self::Video => BundlePolicy::Balanced,
        }
    }
}

/// Errors occurring in a [`MediaPipeline`].
#[derive(Clone, Debug, Display)]
pub enum MediaError {
    /// Media engine failed to create a microphone track.
    #[display(fmt = "Failed to create local audio track: {}", _0)]
    CreateAudioTrack(platform::Error),

    /// Media engine failed to create a camera capturer.
    #[display(fmt = "Failed to create video capturer: {}", _0)]
    CreateVideoCapturer(platform::Error),

    /// Media engine failed to create a camera track.
    #[display(fmt = "Failed to create local video track: {}", _0)]
    CreateVideoTrack(platform::Error),

    /// Camera couldn't be switched.
    #[display(fmt = "Failed to switch camera: {}", _0)]
    SwitchCamera(platform::Error),

    /// Video operation requested while there is no video capture.
    #[display(fmt = "No video is captured in this call")]
    NoVideo,

    /// Camera failed.
    #[display(fmt = "Camera error: {}", _0)]
    Camera(String),
}

impl Named for MediaError {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateAudioTrack(_) => "CreateAudioTrack",
            Self::CreateVideoCapturer(_) => "CreateVideoCapturer",
            Self::CreateVideoTrack(_) => "CreateVideoTrack",
            Self::SwitchCamera(_) => "SwitchCamera",
            Self::NoVideo => "NoVideo",
            Self::Camera(_) => "Camera",
        }
    }
}

type Result<T> = std::result::Result<T, Traced<MediaError>>;

/// Owner of the local tracks of a call and router of its remote tracks to
/// [`VideoSink`]s.
///
/// Remote tracks are owned by a [`PeerConnection`], so this pipeline only
/// keeps [`Weak`] references to them. Detaching a sink never affects a track
/// lifetime.
///
/// [`PeerConnection`]: crate::peer::PeerConnection
pub struct MediaPipeline {
    kind: CallKind,
    engine: Arc<dyn MediaEngine>,
    audio_service: Arc<dyn AudioService>,
    conf: conf::Media,

    /// Camera being captured, or to be captured once video is acquired.
    facing: FacingMode,

    local_audio: Option<Arc<dyn MediaStreamTrack>>,
    local_video: Option<Arc<dyn MediaStreamTrack>>,
    capturer: Option<Box<dyn VideoCapturer>>,

    remote_audio: Option<Weak<dyn MediaStreamTrack>>,
    remote_video: Option<Weak<dyn MediaStreamTrack>>,

    /// Sinks rendering the local video.
    local_sinks: Vec<Arc<dyn VideoSink>>,

    /// Sinks rendering the remote video.
    remote_sinks: Vec<Arc<dyn VideoSink>>,

    muted: bool,
    speaker_on: bool,
}

impl MediaPipeline {
    /// Creates a new [`MediaPipeline`] which hasn't acquired any media yet.
    pub fn new(
        kind: CallKind,
        engine: Arc<dyn MediaEngine>,
        audio_service: Arc<dyn AudioService>,
        conf: conf::Media,
    ) -> Self {
        Self {
            kind,
            engine,
            audio_service,
            facing: conf.video.facing,
            conf,
            local_audio: None,
            local_video: None,
            capturer: None,
            remote_audio: None,
            remote_video: None,
            local_sinks: Vec::new(),
            remote_sinks: Vec::new(),
            muted: false,
            speaker_on: false,
        }
    }

    /// Acquires the microphone, and the camera for video calls, returning the
    /// local tracks to be sent.
    ///
    /// Camera events are delivered into `capturer_events`. Already acquired
    /// tracks are reused.
    ///
    /// # Errors
    ///
    /// If any of the local tracks cannot be created. Audio stays acquired if
    /// only video fails.
    pub fn acquire(
        &mut self,
        capturer_events: mpsc::UnboundedSender<CapturerEvent>,
    ) -> Result<Vec<Arc<dyn MediaStreamTrack>>> {
        if self.local_audio.is_none() {
            let track = self
                .engine
                .create_audio_track(AUDIO_TRACK_ID, self.conf.audio.into())
                .map_err(|e| tracerr::new!(MediaError::CreateAudioTrack(e)))?;
            track.set_enabled(!self.muted);
            self.local_audio = Some(track);
        }

        if self.kind.has_video() && self.local_video.is_none() {
            self.acquire_video(capturer_events)?;
        }

        Ok(self.local_tracks())
    }

    /// Opens the camera and creates the local video track out of it.
    fn acquire_video(
        &mut self,
        events: mpsc::UnboundedSender<CapturerEvent>,
    ) -> Result<()> {
        let capturer = self
            .engine
            .create_video_capturer(self.facing, events)
            .map_err(|e| tracerr::new!(MediaError::CreateVideoCapturer(e)))?;
        let track = match self
            .engine
            .create_video_track(VIDEO_TRACK_ID, capturer.as_ref())
        {
            Ok(track) => track,
            Err(e) => {
                capturer.dispose();
                return Err(tracerr::new!(MediaError::CreateVideoTrack(e)));
            }
        };
        if let Err(e) = capturer.start_capture(self.conf.video.into()) {
            track.stop();
            capturer.dispose();
            return Err(tracerr::new!(MediaError::Camera(e.to_string())));
        }
        log::debug!(
            "Capturing {} camera at {}x{}@{}",
            self.facing,
            self.conf.video.width,
            self.conf.video.height,
            self.conf.video.frame_rate,
        );

        for sink in &self.local_sinks {
            track.add_sink(Arc::clone(sink));
        }
        self.capturer = Some(capturer);
        self.local_video = Some(track);
        Ok(())
    }

    /// Returns all the acquired local tracks.
    pub fn local_tracks(&self) -> Vec<Arc<dyn MediaStreamTrack>> {
        self.local_audio
            .iter()
            .chain(self.local_video.iter())
            .cloned()
            .collect()
    }

    /// Indicates whether the microphone is acquired.
    #[inline]
    pub fn has_local_audio(&self) -> bool {
        self.local_audio.is_some()
    }

    /// Indicates whether the camera is acquired.
    #[inline]
    pub fn has_local_video(&self) -> bool {
        self.local_video.is_some()
    }

    /// Indicates whether the local audio is muted.
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Indicates whether playback is routed to the loudspeaker.
    #[inline]
    pub fn is_speaker_on(&self) -> bool {
        self.speaker_on
    }

    /// Returns [`FacingMode`] of the captured camera.
    #[inline]
    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    /// Mutes or unmutes the local audio by disabling its track, so no
    /// renegotiation is needed.
    ///
    /// Reapplies the whole audio routing.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(track) = &self.local_audio {
            track.set_enabled(!muted);
        }
        self.configure_audio_routing();
    }

    /// Routes playback to the loudspeaker or to the earpiece.
    ///
    /// Reapplies the whole audio routing.
    pub fn set_speaker(&mut self, on: bool) {
        self.speaker_on = on;
        self.configure_audio_routing();
    }

    /// Applies the current mute and speaker state to the device audio
    /// service, switching it into the communication mode.
    pub fn configure_audio_routing(&self) {
        self.audio_service.set_communication_mode(true);
        self.audio_service.set_speakerphone_on(self.speaker_on);
        self.audio_service.set_microphone_mute(self.muted);
    }

    /// Switches capturing to the front camera if `front` is `true`, or to the
    /// back one otherwise. The local video track stays the same.
    ///
    /// # Errors
    ///
    /// - With [`MediaError::NoVideo`] if no camera is captured.
    /// - With [`MediaError::SwitchCamera`] if the media engine fails to
    ///   switch.
    pub fn switch_camera(&mut self, front: bool) -> Result<()> {
        let capturer = self
            .capturer
            .as_ref()
            .ok_or_else(|| tracerr::new!(MediaError::NoVideo))?;
        let facing = FacingMode::from_front(front);
        if facing == self.facing {
            return Ok(());
        }
        capturer
            .switch_camera(facing)
            .map_err(|e| tracerr::new!(MediaError::SwitchCamera(e)))?;
        log::debug!("Switched camera to {}", facing);
        self.facing = facing;
        Ok(())
    }

    /// Stores a reference to the provided remote track, and starts rendering
    /// it if it's a video one and there are remote sinks connected.
    pub fn set_remote_track(&mut self, track: &Arc<dyn MediaStreamTrack>) {
        match track.kind() {
            TrackKind::Audio => {
                self.remote_audio = Some(Arc::downgrade(track));
                self.configure_audio_routing();
            }
            TrackKind::Video => {
                for sink in &self.remote_sinks {
                    track.add_sink(Arc::clone(sink));
                }
                self.remote_video = Some(Arc::downgrade(track));
            }
        }
    }

    /// Indicates whether a live remote track of the provided kind is known.
    pub fn has_remote_track(&self, kind: TrackKind) -> bool {
        let track = match kind {
            TrackKind::Audio => &self.remote_audio,
            TrackKind::Video => &self.remote_video,
        };
        track.as_ref().and_then(Weak::upgrade).is_some()
    }

    /// Starts rendering the local video on the provided [`VideoSink`].
    ///
    /// The sink is remembered, so it's attached once the camera is acquired.
    pub fn connect_local_video(&mut self, sink: Arc<dyn VideoSink>) {
        if let Some(track) = &self.local_video {
            track.add_sink(Arc::clone(&sink));
        }
        self.local_sinks.push(sink);
    }

    /// Stops rendering the local video on the provided [`VideoSink`].
    pub fn disconnect_local_video(&mut self, sink: &Arc<dyn VideoSink>) {
        if let Some(track) = &self.local_video {
            track.remove_sink(sink);
        }
        self.local_sinks.retain(|s| !same_sink(s, sink));
    }

    /// Starts rendering the remote video on the provided [`VideoSink`].
    ///
    /// The sink is remembered, so it's attached once the remote video
    /// arrives.
    pub fn connect_remote_video(&mut self, sink: Arc<dyn VideoSink>) {
        if let Some(track) = self.remote_video.as_ref().and_then(Weak::upgrade)
        {
            track.add_sink(Arc::clone(&sink));
        }
        self.remote_sinks.push(sink);
    }

    /// Stops rendering the remote video on the provided [`VideoSink`].
    pub fn disconnect_remote_video(&mut self, sink: &Arc<dyn VideoSink>) {
        if let Some(track) = self.remote_video.as_ref().and_then(Weak::upgrade)
        {
            track.remove_sink(sink);
        }
        self.remote_sinks.retain(|s| !same_sink(s, sink));
    }

    /// Detaches all the sinks, stops the local tracks, releases the camera
    /// and resets the device audio routing.
    ///
    /// Connected sinks are forgotten. Mute and speaker state is reset.
    pub fn release(&mut self) {
        if let Some(track) = self.remote_video.take().and_then(|t| t.upgrade())
        {
            for sink in &self.remote_sinks {
                track.remove_sink(sink);
            }
        }
        self.remote_audio = None;

        if let Some(track) = self.local_video.take() {
            for sink in &self.local_sinks {
                track.remove_sink(sink);
            }
            track.stop();
        }
        if let Some(capturer) = self.capturer.take() {
            capturer.stop_capture();
            capturer.dispose();
        }
        if let Some(track) = self.local_audio.take() {
            track.stop();
        }
        self.local_sinks.clear();
        self.remote_sinks.clear();

        self.muted = false;
        self.speaker_on = false;
        self.facing = self.conf.video.facing;
        self.audio_service.set_communication_mode(false);
        self.audio_service.set_speakerphone_on(false);
    }
}

/// Compares [`VideoSink`]s by their data address.
fn same_sink(a: &Arc<dyn VideoSink>, b: &Arc<dyn VideoSink>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
