//! [RTCPeerConnection][1] abstraction of a media engine.
//!
//! [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;

use super::{Error, MediaStreamTrack};

/// Representation of [RTCSdpType].
///
/// [RTCSdpType]: https://w3.org/TR/webrtc/#dom-rtcsdptype
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// [`offer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    Offer(String),

    /// [`answer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    Answer(String),
}

impl SdpType {
    /// Returns the SDP text of this description.
    #[inline]
    pub fn sdp(&self) -> &str {
        match self {
            Self::Offer(sdp) | Self::Answer(sdp) => sdp,
        }
    }

    /// Returns human-readable name of this description type.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
        }
    }
}

/// Representation of [RTCIceCandidate][1].
///
/// [1]: https://w3.org/TR/webrtc/#rtcicecandidate-interface
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IceCandidate {
    /// [`candidate` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-candidate
    pub candidate: String,

    /// [`sdpMLineIndex` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmlineindex
    pub sdp_m_line_index: Option<u16>,

    /// [`sdpMid` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmid
    pub sdp_mid: Option<String>,
}

/// [RTCIceConnectionState][1] of a peer connection.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtciceconnectionstate
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum IceConnectionState {
    /// ICE agent is gathering addresses or is waiting to be given remote
    /// candidates.
    New,

    /// ICE agent has been given remote candidates and is checking pairs.
    Checking,

    /// A usable pairing of local and remote candidates has been found.
    Connected,

    /// ICE agent has finished gathering and checking and found a connection.
    Completed,

    /// Connectivity was lost, possibly temporarily.
    Disconnected,

    /// ICE agent has given up on finding a usable pair.
    Failed,

    /// ICE agent has shut down.
    Closed,
}

/// [STUN]/[TURN] server as understood by a media engine.
///
/// [STUN]: https://webrtcglossary.com/stun
/// [TURN]: https://webrtcglossary.com/turn
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IceServer {
    /// URLs of this server.
    pub urls: Vec<String>,

    /// Username to authenticate with.
    pub username: Option<String>,

    /// Credential to authenticate with.
    pub credential: Option<String>,
}

/// [RTCBundlePolicy][1] to gather candidates with.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcbundlepolicy
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BundlePolicy {
    /// Gather candidates for each media type in use.
    Balanced,

    /// Gather candidates for only one track.
    MaxBundle,
}

/// Configuration a peer connection is created with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtcConfiguration {
    /// [STUN]/[TURN] servers to use.
    ///
    /// [STUN]: https://webrtcglossary.com/stun
    /// [TURN]: https://webrtcglossary.com/turn
    pub ice_servers: Vec<IceServer>,

    /// Bundle policy to use.
    pub bundle_policy: BundlePolicy,

    /// Indicator whether candidates are gathered continually.
    pub continual_gathering: bool,

    /// Indicator whether TCP candidates are gathered.
    pub tcp_candidates: bool,
}

/// Media directions to be negotiated by an offer or answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OfferOptions {
    /// Indicator whether remote audio is wanted.
    pub receive_audio: bool,

    /// Indicator whether remote video is wanted.
    pub receive_video: bool,
}

/// Event fired by a media engine for its [`RtcPeerConnection`].
#[derive(Clone, Debug)]
pub enum RtcEvent {
    /// [RTCPeerConnection][1] discovered a new [`IceCandidate`].
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    IceCandidateDiscovered(IceCandidate),

    /// [RTCPeerConnection][1]'s ICE connection state changed.
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    IceConnectionStateChanged(IceConnectionState),

    /// [RTCPeerConnection][1] received a new remote track.
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    TrackAdded(Arc<dyn MediaStreamTrack>),
}

/// Native peer connection object of a media engine.
///
/// Its [`RtcEvent`]s are delivered to the sender passed to
/// [`MediaEngine::create_peer_connection()`].
///
/// [`MediaEngine::create_peer_connection()`]:
/// super::MediaEngine::create_peer_connection
#[cfg_attr(any(test, feature = "mockable"), mockall::automock)]
#[async_trait]
pub trait RtcPeerConnection: Send + Sync {
    /// Obtains [SDP offer][`SdpType::Offer`] from the underlying
    /// [RTCPeerConnection][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    async fn create_offer(&self, options: OfferOptions) -> Result<String, Error>;

    /// Obtains [SDP answer][`SdpType::Answer`] from the underlying
    /// [RTCPeerConnection][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#rtcpeerconnection-interface
    async fn create_answer(
        &self,
        options: OfferOptions,
    ) -> Result<String, Error>;

    /// Sets the provided description as the local one.
    async fn set_local_description(&self, desc: SdpType) -> Result<(), Error>;

    /// Sets the provided description as the remote one.
    async fn set_remote_description(&self, desc: SdpType)
        -> Result<(), Error>;

    /// Adds remote [`IceCandidate`] to the underlying connection.
    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Error>;

    /// Starts sending the provided local track.
    fn add_track(&self, track: Arc<dyn MediaStreamTrack>) -> Result<(), Error>;

    /// Closes the underlying connection. No [`RtcEvent`]s are expected after
    /// that.
    fn close(&self);
}
