//! [`CallSession`] façade and the task driving a call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{
    channel::{mpsc, oneshot},
    future,
    stream::{self, BoxStream, SelectAll},
    StreamExt as _,
};
use tracerr::Traced;

use crate::{
    conf::Conf,
    media::{CallKind, MediaError, MediaPipeline},
    peer::{PeerConnection, PeerError, PeerEvent, PeerEventHandler},
    platform::{
        AudioService, CapturerEvent, CapturerEventHandler, DocumentStore,
        IceCandidate, MediaStreamTrack, RtcEvent, SdpType, TrackKind,
        VideoSink,
    },
    signalling::{
        Route, SignallingChannel, SignallingError, SignallingEvent,
        SignallingEventHandler,
    },
    utils::CallError,
};

use super::{
    CallDirectory, CallEvent, CallParameters, MediaEngineHandle, SessionError,
};

type Result<T> = std::result::Result<T, Traced<SessionError>>;

/// Request of a [`CallSession`] user, processed by its task.
enum Command {
    SetParameters(CallParameters),
    Start,
    ToggleMute(bool),
    ToggleSpeaker(bool),
    SwitchCamera(bool),
    ConnectLocalVideo(Arc<dyn VideoSink>),
    DisconnectLocalVideo(Arc<dyn VideoSink>),
    ConnectRemoteVideo(Arc<dyn VideoSink>),
    DisconnectRemoteVideo(Arc<dyn VideoSink>),
    Subscribe(mpsc::UnboundedSender<CallEvent>),
    End,
    Cleanup(oneshot::Sender<()>),
}

/// Event of the components created for a single call attempt.
enum AttemptEvent {
    Signalling(SignallingEvent),
    Rtc(RtcEvent),
    Peer(PeerEvent),
    Capturer(CapturerEvent),
}

/// Anything the session task reacts on.
enum Input {
    Command(Command),

    /// Event of the attempt with the provided ID.
    Attempt(u64, AttemptEvent),

    /// All the [`CallSession`] handles are gone.
    Shutdown,
}

/// Façade of a single call used by UI.
///
/// Wires a [`SignallingChannel`], a [`PeerConnection`] and a
/// [`MediaPipeline`] together. All of them are owned by a dedicated task,
/// which processes requests of this façade and events of its components one
/// by one. So every method here only enqueues a request and returns
/// immediately, and failures are reported as [`CallEvent::Error`]s.
///
/// Dropping a [`CallSession`] ends its call.
pub struct CallSession {
    kind: CallKind,
    commands: mpsc::UnboundedSender<Command>,
}

impl CallSession {
    /// Creates a new [`CallSession`] of the provided [`CallKind`] and spawns
    /// its task.
    ///
    /// # Panics
    ///
    /// If called outside of a [`tokio`] runtime.
    pub fn new(
        kind: CallKind,
        engine: MediaEngineHandle,
        store: Arc<dyn DocumentStore>,
        audio_service: Arc<dyn AudioService>,
        conf: Conf,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded();
        let session = Session {
            kind,
            engine,
            directory: CallDirectory::new(
                Arc::clone(&store),
                conf.signalling.clone(),
            ),
            store,
            audio_service,
            conf,
            params: None,
            media: None,
            attempt: None,
            attempts: 0,
            new_inputs: Vec::new(),
            subscribers: Vec::new(),
        };

        let commands_rx = commands_rx
            .map(Input::Command)
            .chain(stream::once(future::ready(Input::Shutdown)))
            .boxed();
        drop(tokio::spawn(session.run(stream::select_all(vec![commands_rx]))));

        Self { kind, commands }
    }

    /// Returns [`CallKind`] of this [`CallSession`].
    #[inline]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Returns a [`Stream`] of [`CallEvent`]s happening after this call.
    ///
    /// The [`Stream`] ends once this [`CallSession`] is cleaned up.
    ///
    /// [`Stream`]: futures::Stream
    pub fn subscribe(&self) -> BoxStream<'static, CallEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.send(Command::Subscribe(tx));
        rx.boxed()
    }

    /// Sets identities of the call. Must precede
    /// [`CallSession::start_call()`], and is ignored while a call is in
    /// progress.
    #[inline]
    pub fn set_call_parameters(&self, params: CallParameters) {
        self.send(Command::SetParameters(params));
    }

    /// Acquires local media and starts negotiating the call.
    ///
    /// The initiator sends an SDP offer, while the other party waits for one.
    /// Reports [`SessionError::ParametersNotSet`] and does nothing else if
    /// [`CallSession::set_call_parameters()`] wasn't called.
    #[inline]
    pub fn start_call(&self) {
        self.send(Command::Start);
    }

    /// Starts the call on the callee side.
    ///
    /// Same as [`CallSession::start_call()`] for parameters with
    /// `is_initiator` unset.
    #[inline]
    pub fn answer_call(&self) {
        self.send(Command::Start);
    }

    /// Mutes or unmutes the local audio. Does nothing if no call is in
    /// progress.
    #[inline]
    pub fn toggle_mute(&self, muted: bool) {
        self.send(Command::ToggleMute(muted));
    }

    /// Routes the playback to the loudspeaker or to the earpiece. Does
    /// nothing if no call is in progress.
    #[inline]
    pub fn toggle_speaker(&self, on: bool) {
        self.send(Command::ToggleSpeaker(on));
    }

    /// Switches to the front camera if `front` is `true`, or to the back one
    /// otherwise. Does nothing if no call is in progress.
    #[inline]
    pub fn switch_camera(&self, front: bool) {
        self.send(Command::SwitchCamera(front));
    }

    /// Renders the local video on the provided [`VideoSink`].
    #[inline]
    pub fn connect_local_video(&self, sink: Arc<dyn VideoSink>) {
        self.send(Command::ConnectLocalVideo(sink));
    }

    /// Stops rendering the local video on the provided [`VideoSink`].
    #[inline]
    pub fn disconnect_local_video(&self, sink: Arc<dyn VideoSink>) {
        self.send(Command::DisconnectLocalVideo(sink));
    }

    /// Renders the remote video on the provided [`VideoSink`].
    #[inline]
    pub fn connect_remote_video(&self, sink: Arc<dyn VideoSink>) {
        self.send(Command::ConnectRemoteVideo(sink));
    }

    /// Stops rendering the remote video on the provided [`VideoSink`].
    #[inline]
    pub fn disconnect_remote_video(&self, sink: Arc<dyn VideoSink>) {
        self.send(Command::DisconnectRemoteVideo(sink));
    }

    /// Hangs up: notifies the remote party, closes the connection, releases
    /// local media and unsets the call parameters.
    ///
    /// Safe to call in any state, any number of times.
    #[inline]
    pub fn end_call(&self) {
        self.send(Command::End);
    }

    /// Ends the call, disposes the media engine and stops this
    /// [`CallSession`], resolving once everything is released.
    ///
    /// Meant to be called once UI is torn down, never in the middle of a
    /// call.
    pub async fn cleanup(self) {
        let (done, released) = oneshot::channel();
        self.send(Command::Cleanup(done));
        let _ = released.await;
    }

    fn send(&self, cmd: Command) {
        if self.commands.unbounded_send(cmd).is_err() {
            log::warn!("Call session is already closed");
        }
    }
}

/// Components of a started call.
struct Attempt {
    /// ID of this attempt inside its session.
    id: u64,

    /// Identities of the call.
    params: CallParameters,

    peer: PeerConnection,
    signalling: SignallingChannel,

    connected: bool,
    disconnected: bool,
}

/// State of a [`CallSession`], owned by its task.
struct Session {
    kind: CallKind,
    engine: MediaEngineHandle,
    store: Arc<dyn DocumentStore>,
    audio_service: Arc<dyn AudioService>,
    directory: CallDirectory,
    conf: Conf,

    /// Identities of the next or the current call.
    params: Option<CallParameters>,

    /// Created on first use, and reused by later calls.
    media: Option<MediaPipeline>,

    /// Current call, if any.
    attempt: Option<Attempt>,

    /// Number of attempts started so far.
    attempts: u64,

    /// Event streams of a just started attempt, to be polled by the task.
    new_inputs: Vec<BoxStream<'static, Input>>,

    /// Senders of published [`CallEvent`]s.
    subscribers: Vec<mpsc::UnboundedSender<CallEvent>>,
}

impl Session {
    /// Processes the provided inputs until the session is cleaned up or its
    /// handle is dropped.
    async fn run(mut self, mut inputs: SelectAll<BoxStream<'static, Input>>) {
        while let Some(input) = inputs.next().await {
            match input {
                Input::Command(cmd) => {
                    if !self.on_command(cmd).await {
                        break;
                    }
                }
                Input::Attempt(id, event) => {
                    if self.attempt.as_ref().map(|a| a.id) == Some(id) {
                        self.on_attempt_event(event).await;
                    }
                }
                Input::Shutdown => {
                    self.end(true).await;
                    break;
                }
            }
            for new in self.new_inputs.drain(..) {
                inputs.push(new);
            }
        }
        log::debug!("Call session stopped");
    }

    /// Executes the provided [`Command`], returning `false` if the session
    /// must stop.
    async fn on_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SetParameters(params) => {
                if self.attempt.is_some() {
                    log::warn!("Ignoring call parameters while in a call");
                } else {
                    self.params = Some(params);
                }
            }
            Command::Start => {
                if let Err(e) = self.start().await {
                    self.emit_error(e);
                }
            }
            Command::ToggleMute(muted) => {
                if let Some(media) = self.active_media() {
                    media.set_muted(muted);
                }
            }
            Command::ToggleSpeaker(on) => {
                if let Some(media) = self.active_media() {
                    media.set_speaker(on);
                }
            }
            Command::SwitchCamera(front) => {
                let switched = self.active_media().map(|m| {
                    m.switch_camera(front)
                        .map_err(tracerr::map_from_and_wrap!(=> SessionError))
                });
                if let Some(Err(e)) = switched {
                    self.emit_error(e);
                }
            }
            Command::ConnectLocalVideo(sink) => {
                self.with_media(|m| m.connect_local_video(sink));
            }
            Command::DisconnectLocalVideo(sink) => {
                self.with_media(|m| m.disconnect_local_video(&sink));
            }
            Command::ConnectRemoteVideo(sink) => {
                self.with_media(|m| m.connect_remote_video(sink));
            }
            Command::DisconnectRemoteVideo(sink) => {
                self.with_media(|m| m.disconnect_remote_video(&sink));
            }
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::End => self.end(true).await,
            Command::Cleanup(done) => {
                self.end(true).await;
                self.engine.dispose();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn on_attempt_event(&mut self, event: AttemptEvent) {
        match event {
            AttemptEvent::Signalling(ev) => ev.dispatch_with(self).await,
            AttemptEvent::Rtc(ev) => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.peer.on_rtc_event(ev);
                }
            }
            AttemptEvent::Peer(ev) => ev.dispatch_with(self).await,
            AttemptEvent::Capturer(ev) => ev.dispatch_with(self).await,
        }
    }

    /// Creates the components of a new call and starts negotiating it.
    async fn start(&mut self) -> Result<()> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| tracerr::new!(SessionError::ParametersNotSet))?;
        if self.attempt.is_some() {
            log::warn!("Call {} is already started", params.call_id);
            return Ok(());
        }
        let engine = self.engine.engine()?;

        self.attempts += 1;
        let id = self.attempts;
        let (signalling_tx, signalling_rx) = mpsc::unbounded();
        let (rtc_tx, rtc_rx) = mpsc::unbounded();
        let (peer_tx, peer_rx) = mpsc::unbounded();
        let (capturer_tx, capturer_rx) = mpsc::unbounded();
        self.new_inputs.extend(vec![
            attempt_input(id, signalling_rx, AttemptEvent::Signalling),
            attempt_input(id, rtc_rx, AttemptEvent::Rtc),
            attempt_input(id, peer_rx, AttemptEvent::Peer),
            attempt_input(id, capturer_rx, AttemptEvent::Capturer),
        ]);

        let peer = PeerConnection::new(
            engine.as_ref(),
            self.kind,
            &self.conf.ice,
            rtc_tx,
            peer_tx,
        )
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;

        let acquired = self.media()?.acquire(capturer_tx);
        let tracks = match acquired {
            Ok(tracks) => tracks,
            Err(e) => {
                self.release_media();
                return Err(tracerr::map_from_and_new!(e));
            }
        };
        for track in tracks {
            if let Err(e) = peer.add_track(track) {
                self.release_media();
                return Err(tracerr::map_from_and_new!(e));
            }
        }
        if let Some(media) = self.media.as_ref() {
            media.configure_audio_routing();
        }

        let mut signalling = SignallingChannel::new(
            Arc::clone(&self.store),
            &self.conf.signalling,
            Route {
                call_id: params.call_id.clone(),
                local_id: params.local_user_id.clone(),
                remote_id: params.remote_user_id.clone(),
            },
            signalling_tx,
        );
        signalling.start_listening();
        log::info!(
            "Starting {} call {} with {}",
            self.kind,
            params.call_id,
            params.remote_user_id,
        );

        let is_initiator = params.is_initiator;
        self.attempt = Some(Attempt {
            id,
            params,
            peer,
            signalling,
            connected: false,
            disconnected: false,
        });

        if is_initiator {
            self.send_offer().await?;
        }
        Ok(())
    }

    /// Creates an SDP offer and sends it to the remote party.
    async fn send_offer(&mut self) -> Result<()> {
        let attempt = self.attempt()?;
        let sdp = attempt
            .peer
            .create_offer()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
        attempt
            .signalling
            .send_offer(sdp)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))
    }

    /// Applies the remote offer and sends the answer to it.
    async fn accept_offer(&mut self, sdp: String) -> Result<()> {
        let attempt = self.attempt()?;
        let answer = attempt
            .peer
            .apply_remote_description(SdpType::Offer(sdp))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
        if let Some(answer) = answer {
            attempt
                .signalling
                .send_answer(answer)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
        }
        Ok(())
    }

    async fn accept_answer(&mut self, sdp: String) -> Result<()> {
        self.attempt()?
            .peer
            .apply_remote_description(SdpType::Answer(sdp))
            .await
            .map(drop)
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))
    }

    async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<()> {
        self.attempt()?
            .peer
            .add_remote_ice_candidate(candidate)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))
    }

    async fn send_local_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<()> {
        self.attempt()?
            .signalling
            .send_ice_candidate(candidate)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))
    }

    /// Tears the current call down. Notifies the remote party if
    /// `notify_remote` is `true`.
    ///
    /// Unsets the call parameters even if there is no call.
    async fn end(&mut self, notify_remote: bool) {
        self.params = None;
        let mut attempt = match self.attempt.take() {
            Some(attempt) => attempt,
            None => return,
        };

        if notify_remote {
            if let Err(e) = attempt.signalling.send_call_end().await {
                self.emit_error(tracerr::map_from_and_new!(e));
            }
            let call_id = &attempt.params.call_id;
            if let Err(e) = self.directory.end(call_id).await {
                log::warn!("Failed to record duration of {}: {}", call_id, e);
            }
        }
        attempt.signalling.cleanup().await;
        attempt.peer.close();
        if !attempt.disconnected {
            self.emit(CallEvent::Disconnected);
        }

        self.release_media();
        self.emit(CallEvent::AudioStopped);
        if self.kind.has_video() {
            self.emit(CallEvent::VideoStopped);
        }
        log::info!("Call {} ended", attempt.params.call_id);
    }

    fn release_media(&mut self) {
        if let Some(media) = self.media.as_mut() {
            media.release();
        }
    }

    /// Returns the [`MediaPipeline`], creating it if there is none yet.
    fn media(&mut self) -> Result<&mut MediaPipeline> {
        let media = match self.media.take() {
            Some(media) => media,
            None => MediaPipeline::new(
                self.kind,
                self.engine.engine()?,
                Arc::clone(&self.audio_service),
                self.conf.media.clone(),
            ),
        };
        Ok(self.media.insert(media))
    }

    /// Returns the [`MediaPipeline`] if a call is in progress.
    fn active_media(&mut self) -> Option<&mut MediaPipeline> {
        if self.attempt.is_none() {
            log::debug!("No call in progress, ignoring media request");
            return None;
        }
        self.media.as_mut()
    }

    /// Applies the provided function to the [`MediaPipeline`], reporting
    /// the failure to create one.
    fn with_media<F: FnOnce(&mut MediaPipeline)>(&mut self, f: F) {
        match self.media() {
            Ok(media) => f(media),
            Err(e) => self.emit_error(e),
        }
    }

    fn attempt(&mut self) -> Result<&mut Attempt> {
        self.attempt
            .as_mut()
            .ok_or_else(|| tracerr::new!(SessionError::NoSession))
    }

    /// Publishes the provided [`CallEvent`] to all the alive subscribers.
    fn emit(&mut self, event: CallEvent) {
        self.subscribers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    fn emit_error(&mut self, error: Traced<SessionError>) {
        log::error!("{}", error.as_ref());
        self.emit(CallEvent::Error {
            error: CallError::from(error),
        });
    }
}

/// Tags the events of the provided attempt component.
fn attempt_input<T, F>(
    id: u64,
    events: mpsc::UnboundedReceiver<T>,
    wrap: F,
) -> BoxStream<'static, Input>
where
    T: Send + 'static,
    F: Fn(T) -> AttemptEvent + Send + 'static,
{
    events.map(move |ev| Input::Attempt(id, wrap(ev))).boxed()
}

#[async_trait]
impl SignallingEventHandler for Session {
    type Output = ();

    async fn on_offer_received(&mut self, sdp: String) {
        if let Err(e) = self.accept_offer(sdp).await {
            self.emit_error(e);
        }
    }

    async fn on_answer_received(&mut self, sdp: String) {
        if let Err(e) = self.accept_answer(sdp).await {
            self.emit_error(e);
        }
    }

    async fn on_ice_candidate_received(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.add_remote_candidate(candidate).await {
            self.emit_error(e);
        }
    }

    /// Tears the call down without notifying the remote party back.
    async fn on_call_ended(&mut self) {
        log::info!("Remote party hung up");
        self.emit(CallEvent::RemoteEnded);
        self.end(false).await;
    }

    async fn on_error(&mut self, error: Traced<SignallingError>) {
        self.emit_error(tracerr::map_from_and_new!(error));
    }
}

#[async_trait]
impl PeerEventHandler for Session {
    type Output = ();

    async fn on_ice_candidate_discovered(&mut self, candidate: IceCandidate) {
        if let Err(e) = self.send_local_candidate(candidate).await {
            self.emit_error(e);
        }
    }

    /// Publishes [`CallEvent::Connected`] and marks the call connected in
    /// the registry.
    async fn on_connected(&mut self) {
        let call_id = match self.attempt.as_mut() {
            Some(attempt) if !attempt.connected => {
                attempt.connected = true;
                attempt.params.call_id.clone()
            }
            _ => return,
        };
        log::info!("Call {} connected", call_id);
        self.emit(CallEvent::Connected);

        if let Err(e) = self.directory.mark_connected(&call_id).await {
            log::warn!("Failed to mark call {} connected: {}", call_id, e);
        }
    }

    async fn on_disconnected(&mut self) {
        if let Some(attempt) = self.attempt.as_mut() {
            if !attempt.disconnected {
                attempt.disconnected = true;
                self.emit(CallEvent::Disconnected);
            }
        }
    }

    /// Publishes [`CallEvent::AudioStarted`], and [`CallEvent::VideoStarted`]
    /// for video calls, once the peers are connected.
    async fn on_media_started(&mut self) {
        if self.attempt.is_none() {
            return;
        }
        if let Some(media) = self.media.as_ref() {
            media.configure_audio_routing();
        }
        self.emit(CallEvent::AudioStarted);
        if self.kind.has_video() {
            self.emit(CallEvent::VideoStarted);
        }
    }

    async fn on_new_remote_track(&mut self, track: Arc<dyn MediaStreamTrack>) {
        let kind = track.kind();
        if let Some(media) = self.media.as_mut() {
            media.set_remote_track(&track);
        }
        if kind == TrackKind::Video && !self.kind.has_video() {
            log::warn!("Received remote video in an audio call");
        }
        self.emit(CallEvent::RemoteTrackReady { kind });
    }

    async fn on_error(&mut self, error: Traced<PeerError>) {
        self.emit_error(tracerr::map_from_and_new!(error));
    }
}

#[async_trait]
impl CapturerEventHandler for Session {
    type Output = ();

    async fn on_first_frame(&mut self) {
        self.emit(CallEvent::LocalVideoReady);
    }

    async fn on_camera_error(&mut self, message: String) {
        log::error!("Camera error: {}", message);
        self.emit_error(tracerr::new!(SessionError::Media(
            MediaError::Camera(message)
        )));
    }
}
