//! Media engine and audio service doubles which connect two peers once they
//! have exchanged descriptions and candidates.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use futures::channel::mpsc;
use nurse_call::platform::{
    AudioConstraints, AudioService, CaptureSettings, CapturerEvent, Error,
    FacingMode, IceCandidate, IceConnectionState, MediaEngine,
    MediaStreamTrack, OfferOptions, RtcConfiguration, RtcEvent,
    RtcPeerConnection, SdpType, TrackKind, VideoCapturer, VideoFrame,
    VideoSink,
};

/// Local or remote track which only records what is done to it.
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    sinks: AtomicUsize,
}

impl FakeTrack {
    fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            sinks: AtomicUsize::new(0),
        })
    }

    /// Indicates whether [`MediaStreamTrack::stop()`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns number of attached [`VideoSink`]s.
    pub fn sinks(&self) -> usize {
        self.sinks.load(Ordering::SeqCst)
    }
}

impl MediaStreamTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn add_sink(&self, _: Arc<dyn VideoSink>) {
        let _ = self.sinks.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_sink(&self, _: &Arc<dyn VideoSink>) {
        let _ = self.sinks.fetch_sub(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// [`VideoSink`] dropping every frame.
#[derive(Debug, Default)]
pub struct FakeSink;

impl VideoSink for FakeSink {
    fn on_frame(&self, _: &VideoFrame) {}
}

#[derive(Default)]
struct PeerState {
    local_kinds: Vec<TrackKind>,
    has_local: bool,
    has_remote: bool,
    has_candidate: bool,
    connected: bool,
    closed: bool,
}

/// Peer connection reaching [`IceConnectionState::Connected`] as soon as it
/// has both descriptions and at least one remote candidate.
///
/// Its SDPs only list the kinds of the local tracks, e.g. `offer:audio,video`.
struct FakePeer {
    engine: Arc<Registry>,
    events: mpsc::UnboundedSender<RtcEvent>,
    state: Mutex<PeerState>,
}

impl FakePeer {
    fn describe(&self, kind: &str) -> String {
        let kinds: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .local_kinds
            .iter()
            .map(ToString::to_string)
            .collect();
        format!("{}:{}", kind, kinds.join(","))
    }

    fn emit(&self, event: RtcEvent) {
        if !self.state.lock().unwrap().closed {
            let _ = self.events.unbounded_send(event);
        }
    }

    fn try_connect(&self) {
        let ready = {
            let mut state = self.state.lock().unwrap();
            let ready = !state.connected
                && !state.closed
                && state.has_local
                && state.has_remote
                && state.has_candidate;
            state.connected |= ready;
            ready
        };
        if ready {
            for state in
                &[IceConnectionState::Checking, IceConnectionState::Connected]
            {
                self.emit(RtcEvent::IceConnectionStateChanged(*state));
            }
        }
    }
}

#[async_trait]
impl RtcPeerConnection for FakePeer {
    async fn create_offer(&self, _: OfferOptions) -> Result<String, Error> {
        Ok(self.describe("offer"))
    }

    async fn create_answer(&self, _: OfferOptions) -> Result<String, Error> {
        Ok(self.describe("answer"))
    }

    async fn set_local_description(&self, desc: SdpType) -> Result<(), Error> {
        self.state.lock().unwrap().has_local = true;
        self.emit(RtcEvent::IceCandidateDiscovered(IceCandidate {
            candidate: format!("candidate:{}", desc.kind()),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".to_owned()),
        }));
        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SdpType,
    ) -> Result<(), Error> {
        self.state.lock().unwrap().has_remote = true;
        let kinds = desc.sdp().splitn(2, ':').nth(1).unwrap_or_default();
        for kind in kinds.split(',') {
            let kind = match kind {
                "audio" => TrackKind::Audio,
                "video" => TrackKind::Video,
                _ => continue,
            };
            let track = FakeTrack::new(&format!("remote-{}", kind), kind);
            self.engine.remote.lock().unwrap().push(Arc::clone(&track));
            self.emit(RtcEvent::TrackAdded(track));
        }
        self.try_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.has_remote {
                return Err(Error::new("no remote description"));
            }
            state.has_candidate = true;
        }
        self.try_connect();
        Ok(())
    }

    fn add_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<(), Error> {
        self.state.lock().unwrap().local_kinds.push(track.kind());
        Ok(())
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        let _ = self.engine.closed_peers.fetch_add(1, Ordering::SeqCst);
    }
}

/// Camera which reports its first frame right away.
struct FakeCapturer {
    events: mpsc::UnboundedSender<CapturerEvent>,
}

impl VideoCapturer for FakeCapturer {
    fn start_capture(&self, _: CaptureSettings) -> Result<(), Error> {
        let _ = self.events.unbounded_send(CapturerEvent::FirstFrame);
        Ok(())
    }

    fn stop_capture(&self) {}

    fn switch_camera(&self, _: FacingMode) -> Result<(), Error> {
        Ok(())
    }

    fn dispose(&self) {}
}

#[derive(Default)]
struct Registry {
    local: Mutex<Vec<Arc<FakeTrack>>>,
    remote: Mutex<Vec<Arc<FakeTrack>>>,
    peers: AtomicUsize,
    closed_peers: AtomicUsize,
    disposed: AtomicBool,
}

/// [`MediaEngine`] creating [`FakeTrack`]s and peers connecting to each
/// other through signalling alone.
#[derive(Clone, Default)]
pub struct FakeEngine(Arc<Registry>);

impl FakeEngine {
    /// Returns the local track of the provided kind created last.
    pub fn local_track(&self, kind: TrackKind) -> Option<Arc<FakeTrack>> {
        last_of(&self.0.local.lock().unwrap(), kind)
    }

    /// Returns the remote track of the provided kind received last.
    pub fn remote_track(&self, kind: TrackKind) -> Option<Arc<FakeTrack>> {
        last_of(&self.0.remote.lock().unwrap(), kind)
    }

    /// Returns number of created peer connections.
    pub fn peers(&self) -> usize {
        self.0.peers.load(Ordering::SeqCst)
    }

    /// Returns number of closed peer connections.
    pub fn closed_peers(&self) -> usize {
        self.0.closed_peers.load(Ordering::SeqCst)
    }

    /// Indicates whether [`MediaEngine::dispose()`] was called.
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::SeqCst)
    }
}

fn last_of(tracks: &[Arc<FakeTrack>], kind: TrackKind) -> Option<Arc<FakeTrack>> {
    tracks.iter().rev().find(|t| t.kind == kind).cloned()
}

impl MediaEngine for FakeEngine {
    fn create_peer_connection(
        &self,
        _: &RtcConfiguration,
        events: mpsc::UnboundedSender<RtcEvent>,
    ) -> Result<Box<dyn RtcPeerConnection>, Error> {
        let _ = self.0.peers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePeer {
            engine: Arc::clone(&self.0),
            events,
            state: Mutex::default(),
        }))
    }

    fn create_audio_track(
        &self,
        id: &str,
        _: AudioConstraints,
    ) -> Result<Arc<dyn MediaStreamTrack>, Error> {
        let track = FakeTrack::new(id, TrackKind::Audio);
        self.0.local.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    fn create_video_capturer(
        &self,
        _: FacingMode,
        events: mpsc::UnboundedSender<CapturerEvent>,
    ) -> Result<Box<dyn VideoCapturer>, Error> {
        Ok(Box::new(FakeCapturer { events }))
    }

    fn create_video_track(
        &self,
        id: &str,
        _: &dyn VideoCapturer,
    ) -> Result<Arc<dyn MediaStreamTrack>, Error> {
        let track = FakeTrack::new(id, TrackKind::Video);
        self.0.local.lock().unwrap().push(Arc::clone(&track));
        Ok(track)
    }

    fn dispose(&self) {
        self.0.disposed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct AudioState {
    mute_history: Vec<bool>,
    speaker_on: bool,
    communication_mode: bool,
}

/// [`AudioService`] recording the requested routing.
#[derive(Clone, Default)]
pub struct RecordingAudio(Arc<Mutex<AudioState>>);

impl RecordingAudio {
    /// Returns all the microphone mute requests in order.
    pub fn mute_history(&self) -> Vec<bool> {
        self.0.lock().unwrap().mute_history.clone()
    }

    /// Indicates whether playback is routed to the loudspeaker.
    pub fn speaker_on(&self) -> bool {
        self.0.lock().unwrap().speaker_on
    }

    /// Indicates whether the voice communication mode is on.
    pub fn communication_mode(&self) -> bool {
        self.0.lock().unwrap().communication_mode
    }
}

impl AudioService for RecordingAudio {
    fn set_communication_mode(&self, enabled: bool) {
        self.0.lock().unwrap().communication_mode = enabled;
    }

    fn set_speakerphone_on(&self, on: bool) {
        self.0.lock().unwrap().speaker_on = on;
    }

    fn set_microphone_mute(&self, mute: bool) {
        self.0.lock().unwrap().mute_history.push(mute);
    }
}
