//! Negotiation and connectivity state machine over an [RTCPeerConnection][1].
//!
//! [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface

use std::{collections::HashSet, mem, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use futures::channel::mpsc;
use tracerr::Traced;

use crate::{
    conf,
    media::CallKind,
    platform::{
        self, IceCandidate, IceConnectionState, MediaEngine, MediaStreamTrack,
        RtcConfiguration, RtcEvent, RtcPeerConnection, SdpType,
    },
    utils::Named,
};

/// Errors occurring in a [`PeerConnection`].
#[derive(Clone, Debug, Display)]
pub enum PeerError {
    /// Occurs when cannot create [RTCPeerConnection][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    #[display(fmt = "Failed to create RTCPeerConnection: {}", _0)]
    CreatePeer(platform::Error),

    /// Occurs when cannot obtain SDP offer.
    #[display(fmt = "Failed to create SDP offer: {}", _0)]
    CreateOffer(platform::Error),

    /// Occurs when cannot obtain SDP answer.
    #[display(fmt = "Failed to create SDP answer: {}", _0)]
    CreateAnswer(platform::Error),

    /// Occurs when handling local description fails.
    #[display(fmt = "Failed to set local SDP description: {}", _0)]
    SetLocalDescription(platform::Error),

    /// Occurs when handling remote description fails.
    #[display(fmt = "Failed to set remote SDP description: {}", _0)]
    SetRemoteDescription(platform::Error),

    /// Occurs when adding remote ICE candidate fails.
    #[display(fmt = "Failed to add ICE candidate: {}", _0)]
    AddIceCandidate(platform::Error),

    /// Occurs when a local track cannot be added.
    #[display(fmt = "Failed to add local track: {}", _0)]
    AddTrack(platform::Error),

    /// Operation requested on an already closed connection.
    #[display(fmt = "Peer connection is closed")]
    Closed,

    /// Description is not applicable in the current [`NegotiationState`].
    #[display(fmt = "Cannot apply remote {} in {} state", desc, state)]
    WrongSignallingState {
        /// Kind of the rejected description.
        desc: &'static str,

        /// State the connection was in.
        state: NegotiationState,
    },

    /// ICE agent gave up on finding a usable connection.
    #[display(fmt = "ICE connection failed")]
    IceFailed,
}

impl Named for PeerError {
    fn name(&self) -> &'static str {
        match self {
            Self::CreatePeer(_) => "CreatePeer",
            Self::CreateOffer(_) => "CreateOffer",
            Self::CreateAnswer(_) => "CreateAnswer",
            Self::SetLocalDescription(_) => "SetLocalDescription",
            Self::SetRemoteDescription(_) => "SetRemoteDescription",
            Self::AddIceCandidate(_) => "AddIceCandidate",
            Self::AddTrack(_) => "AddTrack",
            Self::Closed => "Closed",
            Self::WrongSignallingState { .. } => "WrongSignallingState",
            Self::IceFailed => "IceFailed",
        }
    }
}

type Result<T> = std::result::Result<T, Traced<PeerError>>;

/// Offer/answer negotiation state of a [`PeerConnection`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum NegotiationState {
    /// No description has been applied yet.
    #[display(fmt = "idle")]
    Idle,

    /// Local offer is applied, waiting for an answer.
    #[display(fmt = "have-local-offer")]
    HaveLocalOffer,

    /// Remote offer is applied, local answer is to be created.
    #[display(fmt = "have-remote-offer")]
    HaveRemoteOffer,

    /// Offer/answer exchange is complete.
    #[display(fmt = "stable")]
    Stable,

    /// Connection is closed.
    #[display(fmt = "closed")]
    Closed,
}

/// Events emitted from a [`PeerConnection`].
#[derive(Debug)]
pub enum PeerEvent {
    /// Local [`IceCandidate`] has been discovered and is to be sent to the
    /// remote peer.
    IceCandidateDiscovered {
        /// Discovered candidate.
        candidate: IceCandidate,
    },

    /// ICE connectivity has been established for the first time.
    Connected,

    /// ICE connectivity has been lost, or the connection has been closed.
    Disconnected,

    /// Media started flowing.
    MediaStarted,

    /// Remote peer started sending a new track.
    NewRemoteTrack {
        /// Received track.
        track: Arc<dyn MediaStreamTrack>,
    },

    /// Error occurred outside of any requested operation.
    Error {
        /// Occurred error.
        error: Traced<PeerError>,
    },
}

/// Handler of [`PeerEvent`]s.
#[async_trait]
pub trait PeerEventHandler {
    /// Output of this handler's methods.
    type Output;

    /// Handles [`PeerEvent::IceCandidateDiscovered`].
    async fn on_ice_candidate_discovered(
        &mut self,
        candidate: IceCandidate,
    ) -> Self::Output;

    /// Handles [`PeerEvent::Connected`].
    async fn on_connected(&mut self) -> Self::Output;

    /// Handles [`PeerEvent::Disconnected`].
    async fn on_disconnected(&mut self) -> Self::Output;

    /// Handles [`PeerEvent::MediaStarted`].
    async fn on_media_started(&mut self) -> Self::Output;

    /// Handles [`PeerEvent::NewRemoteTrack`].
    async fn on_new_remote_track(
        &mut self,
        track: Arc<dyn MediaStreamTrack>,
    ) -> Self::Output;

    /// Handles [`PeerEvent::Error`].
    async fn on_error(&mut self, error: Traced<PeerError>) -> Self::Output;
}

impl PeerEvent {
    /// Dispatches this [`PeerEvent`] with the provided [`PeerEventHandler`].
    pub async fn dispatch_with<T>(self, handler: &mut T) -> T::Output
    where
        T: PeerEventHandler + Send,
    {
        match self {
            Self::IceCandidateDiscovered { candidate } => {
                handler.on_ice_candidate_discovered(candidate).await
            }
            Self::Connected => handler.on_connected().await,
            Self::Disconnected => handler.on_disconnected().await,
            Self::MediaStarted => handler.on_media_started().await,
            Self::NewRemoteTrack { track } => {
                handler.on_new_remote_track(track).await
            }
            Self::Error { error } => handler.on_error(error).await,
        }
    }
}

/// Builds [`RtcConfiguration`] for a peer connection of the provided
/// [`CallKind`].
pub fn rtc_configuration(kind: CallKind, ice: &conf::Ice) -> RtcConfiguration {
    RtcConfiguration {
        ice_servers: ice.ice_servers(),
        bundle_policy: kind.bundle_policy(),
        continual_gathering: ice.continual_gathering,
        tcp_candidates: ice.tcp_candidates,
    }
}

/// Single peer connection of a call.
///
/// Negotiation state is tracked along with an independent ICE connectivity
/// state. [`PeerEvent::Connected`] is emitted on the first transition of the
/// latter into [`IceConnectionState::Connected`] or
/// [`IceConnectionState::Completed`], whatever the negotiation state is.
/// [`PeerEvent::Connected`] and [`PeerEvent::Disconnected`] are emitted at
/// most once each.
///
/// Remote ICE candidates received before any remote description are
/// buffered and applied right after it.
pub struct PeerConnection {
    /// Kind of the call this connection belongs to.
    kind: CallKind,

    /// Underlying native connection.
    peer: Box<dyn RtcPeerConnection>,

    negotiation: NegotiationState,

    ice_state: IceConnectionState,

    /// SDP of the last applied remote description.
    remote_sdp: Option<String>,

    /// Remote candidates waiting for a remote description.
    pending_candidates: Vec<IceCandidate>,

    /// Remote candidates already added to the native connection.
    applied_candidates: HashSet<IceCandidate>,

    /// Tracks received from the remote peer.
    remote_tracks: Vec<Arc<dyn MediaStreamTrack>>,

    connected_reported: bool,
    disconnected_reported: bool,

    /// [`PeerEvent`]s tx.
    peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerConnection {
    /// Creates a new native connection with the provided [`MediaEngine`].
    ///
    /// Native events are delivered into `rtc_events` and are expected to be
    /// fed back with [`PeerConnection::on_rtc_event()`]. Resulting
    /// [`PeerEvent`]s are sent into `peer_events_sender`.
    ///
    /// # Errors
    ///
    /// With [`PeerError::CreatePeer`] if the engine fails to create the
    /// connection.
    pub fn new(
        engine: &dyn MediaEngine,
        kind: CallKind,
        ice: &conf::Ice,
        rtc_events: mpsc::UnboundedSender<RtcEvent>,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self> {
        let config = rtc_configuration(kind, ice);
        let peer = engine
            .create_peer_connection(&config, rtc_events)
            .map_err(|e| tracerr::new!(PeerError::CreatePeer(e)))?;
        Ok(Self::with_rtc(kind, peer, peer_events_sender))
    }

    /// Wraps an already created native connection.
    fn with_rtc(
        kind: CallKind,
        peer: Box<dyn RtcPeerConnection>,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            kind,
            peer,
            negotiation: NegotiationState::Idle,
            ice_state: IceConnectionState::New,
            remote_sdp: None,
            pending_candidates: Vec::new(),
            applied_candidates: HashSet::new(),
            remote_tracks: Vec::new(),
            connected_reported: false,
            disconnected_reported: false,
            peer_events_sender,
        }
    }

    /// Returns current [`NegotiationState`] of this connection.
    #[inline]
    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation
    }

    /// Returns the last known [`IceConnectionState`] of this connection.
    #[inline]
    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.ice_state
    }

    /// Indicates whether this connection has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.negotiation == NegotiationState::Closed
    }

    /// Indicates whether a remote description has been applied.
    #[inline]
    pub fn has_remote_description(&self) -> bool {
        self.remote_sdp.is_some()
    }

    /// Returns the number of remote candidates waiting for a remote
    /// description.
    #[inline]
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Returns the tracks received from the remote peer.
    #[inline]
    pub fn remote_tracks(&self) -> &[Arc<dyn MediaStreamTrack>] {
        &self.remote_tracks
    }

    /// Starts sending the provided local track.
    ///
    /// # Errors
    ///
    /// - With [`PeerError::Closed`] if this connection is closed.
    /// - With [`PeerError::AddTrack`] if the native connection fails.
    pub fn add_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<()> {
        self.ensure_open()?;
        self.peer
            .add_track(track)
            .map_err(|e| tracerr::new!(PeerError::AddTrack(e)))
    }

    /// Obtains an SDP offer, applies it as the local description and returns
    /// it for sending.
    ///
    /// # Errors
    ///
    /// - With [`PeerError::Closed`] if this connection is closed.
    /// - With [`PeerError::WrongSignallingState`] if a remote offer is being
    ///   answered.
    /// - With [`PeerError::CreateOffer`] or
    ///   [`PeerError::SetLocalDescription`] if the native connection fails.
    pub async fn create_offer(&mut self) -> Result<String> {
        self.ensure_open()?;
        if self.negotiation == NegotiationState::HaveRemoteOffer {
            return Err(tracerr::new!(PeerError::WrongSignallingState {
                desc: "local offer",
                state: self.negotiation,
            }));
        }

        let sdp = self
            .peer
            .create_offer(self.kind.offer_options())
            .await
            .map_err(|e| tracerr::new!(PeerError::CreateOffer(e)))?;
        self.peer
            .set_local_description(SdpType::Offer(sdp.clone()))
            .await
            .map_err(|e| tracerr::new!(PeerError::SetLocalDescription(e)))?;
        self.set_negotiation(NegotiationState::HaveLocalOffer);

        Ok(sdp)
    }

    /// Obtains an SDP answer to the applied remote offer, applies it as the
    /// local description and returns it for sending.
    ///
    /// # Errors
    ///
    /// - With [`PeerError::Closed`] if this connection is closed.
    /// - With [`PeerError::WrongSignallingState`] if there is no remote offer
    ///   to answer.
    /// - With [`PeerError::CreateAnswer`] or
    ///   [`PeerError::SetLocalDescription`] if the native connection fails.
    pub async fn create_answer(&mut self) -> Result<String> {
        self.ensure_open()?;
        if self.negotiation != NegotiationState::HaveRemoteOffer {
            return Err(tracerr::new!(PeerError::WrongSignallingState {
                desc: "local answer",
                state: self.negotiation,
            }));
        }

        let sdp = self
            .peer
            .create_answer(self.kind.offer_options())
            .await
            .map_err(|e| tracerr::new!(PeerError::CreateAnswer(e)))?;
        self.peer
            .set_local_description(SdpType::Answer(sdp.clone()))
            .await
            .map_err(|e| tracerr::new!(PeerError::SetLocalDescription(e)))?;
        self.set_negotiation(NegotiationState::Stable);

        Ok(sdp)
    }

    /// Applies the provided remote description.
    ///
    /// An answer is only accepted while a local offer is pending. An offer is
    /// accepted while idle, stable, or while a local offer is pending (glare),
    /// and is answered right away, in which case the SDP answer to be sent is
    /// returned.
    ///
    /// A description identical to the last applied one is ignored, so
    /// redelivered messages are harmless.
    ///
    /// # Errors
    ///
    /// - With [`PeerError::Closed`] if this connection is closed.
    /// - With [`PeerError::WrongSignallingState`] if the description is not
    ///   applicable in the current [`NegotiationState`].
    /// - With [`PeerError::SetRemoteDescription`] if the native connection
    ///   fails, or any error of [`PeerConnection::create_answer()`].
    pub async fn apply_remote_description(
        &mut self,
        desc: SdpType,
    ) -> Result<Option<String>> {
        self.ensure_open()?;
        if self.remote_sdp.as_deref() == Some(desc.sdp()) {
            log::debug!("Ignoring already applied remote {}", desc.kind());
            return Ok(None);
        }

        let applicable = match &desc {
            SdpType::Answer(_) => {
                self.negotiation == NegotiationState::HaveLocalOffer
            }
            SdpType::Offer(_) => matches!(
                self.negotiation,
                NegotiationState::Idle
                    | NegotiationState::Stable
                    | NegotiationState::HaveLocalOffer
            ),
        };
        if !applicable {
            return Err(tracerr::new!(PeerError::WrongSignallingState {
                desc: desc.kind(),
                state: self.negotiation,
            }));
        }

        self.peer
            .set_remote_description(desc.clone())
            .await
            .map_err(|e| tracerr::new!(PeerError::SetRemoteDescription(e)))?;
        self.remote_sdp = Some(desc.sdp().to_owned());
        self.flush_pending_candidates().await;

        match desc {
            SdpType::Answer(_) => {
                self.set_negotiation(NegotiationState::Stable);
                Ok(None)
            }
            SdpType::Offer(_) => {
                self.set_negotiation(NegotiationState::HaveRemoteOffer);
                self.create_answer().await.map(Some)
            }
        }
    }

    /// Adds the provided remote [`IceCandidate`].
    ///
    /// Candidates arriving before any remote description are buffered until
    /// one is applied. Duplicates are ignored, and so are candidates arriving
    /// after this connection is closed.
    ///
    /// # Errors
    ///
    /// With [`PeerError::AddIceCandidate`] if the native connection fails.
    pub async fn add_remote_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<()> {
        if self.is_closed() {
            log::warn!("Ignoring ICE candidate for closed peer connection");
            return Ok(());
        }
        if self.applied_candidates.contains(&candidate)
            || self.pending_candidates.contains(&candidate)
        {
            log::debug!("Ignoring duplicate ICE candidate");
            return Ok(());
        }
        if self.remote_sdp.is_none() {
            log::debug!("Buffering ICE candidate until remote description");
            self.pending_candidates.push(candidate);
            return Ok(());
        }

        self.peer
            .add_ice_candidate(candidate.clone())
            .await
            .map_err(|e| tracerr::new!(PeerError::AddIceCandidate(e)))?;
        let _ = self.applied_candidates.insert(candidate);
        Ok(())
    }

    /// Applies buffered remote candidates in their arrival order.
    ///
    /// Failures are emitted as [`PeerEvent::Error`]s.
    async fn flush_pending_candidates(&mut self) {
        for candidate in mem::take(&mut self.pending_candidates) {
            match self.peer.add_ice_candidate(candidate.clone()).await {
                Ok(()) => {
                    let _ = self.applied_candidates.insert(candidate);
                }
                Err(e) => self.emit(PeerEvent::Error {
                    error: tracerr::new!(PeerError::AddIceCandidate(e)),
                }),
            }
        }
    }

    /// Handles the provided native [`RtcEvent`] of this connection.
    pub fn on_rtc_event(&mut self, event: RtcEvent) {
        if self.is_closed() {
            return;
        }
        match event {
            RtcEvent::IceCandidateDiscovered(candidate) => {
                self.emit(PeerEvent::IceCandidateDiscovered { candidate });
            }
            RtcEvent::IceConnectionStateChanged(state) => {
                self.on_ice_connection_state_change(state);
            }
            RtcEvent::TrackAdded(track) => {
                log::debug!("Received remote {} track", track.kind());
                self.remote_tracks.push(Arc::clone(&track));
                self.emit(PeerEvent::NewRemoteTrack { track });
            }
        }
    }

    /// Maps the provided ICE connection state transition to [`PeerEvent`]s.
    fn on_ice_connection_state_change(&mut self, state: IceConnectionState) {
        use IceConnectionState as S;

        if state == self.ice_state {
            return;
        }
        log::debug!("ICE connection state: {} -> {}", self.ice_state, state);
        self.ice_state = state;

        match state {
            S::Connected | S::Completed => {
                if !self.connected_reported {
                    self.connected_reported = true;
                    self.emit(PeerEvent::Connected);
                    self.emit(PeerEvent::MediaStarted);
                }
            }
            S::Disconnected | S::Closed => self.report_disconnected(),
            S::Failed => {
                self.report_disconnected();
                self.emit(PeerEvent::Error {
                    error: tracerr::new!(PeerError::IceFailed),
                });
            }
            S::New | S::Checking => {}
        }
    }

    /// Closes the native connection and drops the remote tracks.
    ///
    /// Emits [`PeerEvent::Disconnected`] unless it was emitted before.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.peer.close();
        self.set_negotiation(NegotiationState::Closed);
        self.pending_candidates.clear();
        self.remote_tracks.clear();
        self.report_disconnected();
    }

    fn report_disconnected(&mut self) {
        if !self.disconnected_reported {
            self.disconnected_reported = true;
            self.emit(PeerEvent::Disconnected);
        }
    }

    fn set_negotiation(&mut self, state: NegotiationState) {
        log::debug!("Negotiation state: {} -> {}", self.negotiation, state);
        self.negotiation = state;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(tracerr::new!(PeerError::Closed))
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.peer_events_sender.unbounded_send(event);
    }
}

impl Drop for PeerConnection {
    /// Closes the native connection if it's still open.
    fn drop(&mut self) {
        if !self.is_closed() {
            self.peer.close();
        }
    }
}
