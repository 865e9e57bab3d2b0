use std::{sync::Arc, time::Duration};

use futures::{
    stream::{BoxStream, Fuse},
    StreamExt as _,
};
use nurse_call::{
    conf,
    platform::{DocumentStore, MediaStreamTrack as _, TrackKind, VideoSink},
    CallDirectory, CallEvent, CallKind, CallParameters, CallSession, Conf,
    MediaEngineHandle,
};

use crate::{
    engine::{FakeEngine, FakeSink, RecordingAudio},
    if_let_next,
    store::MemoryStore,
    within_deadline,
};

type Events = Fuse<BoxStream<'static, CallEvent>>;

/// Single party of a call with its own media engine.
struct Device {
    session: CallSession,
    events: Events,
    engine: FakeEngine,
    handle: MediaEngineHandle,
    audio: RecordingAudio,
}

impl Device {
    fn new(
        store: &Arc<MemoryStore>,
        kind: CallKind,
        params: Option<CallParameters>,
    ) -> Self {
        let engine = FakeEngine::default();
        let audio = RecordingAudio::default();
        let handle = MediaEngineHandle::new(Arc::new(engine.clone()));
        let session = CallSession::new(
            kind,
            handle.clone(),
            Arc::clone(store) as Arc<dyn DocumentStore>,
            Arc::new(audio.clone()),
            Conf::default(),
        );
        let events = session.subscribe().fuse();
        if let Some(params) = params {
            session.set_call_parameters(params);
        }
        Self {
            session,
            events,
            engine,
            handle,
            audio,
        }
    }

    /// Collects events up to and including the first one satisfying `stop`.
    async fn events_until<F>(&mut self, stop: F) -> Vec<CallEvent>
    where
        F: Fn(&CallEvent) -> bool,
    {
        let mut seen = Vec::new();
        while let Some(event) = self.events.next().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }
}

fn params(
    call_id: &str,
    local: &str,
    remote: &str,
    is_initiator: bool,
) -> Option<CallParameters> {
    Some(CallParameters {
        call_id: call_id.to_owned(),
        local_user_id: local.to_owned(),
        remote_user_id: remote.to_owned(),
        is_initiator,
    })
}

fn count<F: Fn(&CallEvent) -> bool>(events: &[CallEvent], f: F) -> usize {
    events.iter().filter(|e| f(e)).count()
}

fn is_connected(e: &CallEvent) -> bool {
    matches!(e, CallEvent::Connected)
}

fn is_disconnected(e: &CallEvent) -> bool {
    matches!(e, CallEvent::Disconnected)
}

fn is_error(e: &CallEvent) -> bool {
    matches!(e, CallEvent::Error { .. })
}

fn is_audio_started(e: &CallEvent) -> bool {
    matches!(e, CallEvent::AudioStarted)
}

fn is_audio_stopped(e: &CallEvent) -> bool {
    matches!(e, CallEvent::AudioStopped)
}

/// Registers a call and creates both of its parties.
async fn call_between(
    store: &Arc<MemoryStore>,
    kind: CallKind,
) -> (String, Device, Device) {
    let directory = CallDirectory::new(
        Arc::clone(store) as Arc<dyn DocumentStore>,
        conf::Signalling::default(),
    );
    let call_id = directory
        .create_call("u1", "Alice", "u2", kind)
        .await
        .unwrap();
    let caller = Device::new(store, kind, params(&call_id, "u1", "u2", true));
    let callee = Device::new(store, kind, params(&call_id, "u2", "u1", false));
    (call_id, caller, callee)
}

#[tokio::test]
async fn two_devices_connect_and_hang_up() {
    let store = Arc::new(MemoryStore::default());
    let (call_id, mut caller, mut callee) =
        call_between(&store, CallKind::Audio).await;

    callee.session.answer_call();
    caller.session.start_call();

    let caller_seen = within_deadline!(caller.events_until(is_audio_started));
    let callee_seen = within_deadline!(callee.events_until(is_audio_started));
    assert_eq!(count(&caller_seen, is_connected), 1);
    assert_eq!(count(&callee_seen, is_connected), 1);
    assert_eq!(count(&caller_seen, is_error), 0);
    assert_eq!(count(&callee_seen, is_error), 0);
    assert_eq!(
        store.doc(&format!("calls/{}", call_id)).unwrap()["status"],
        "connected",
    );

    caller.session.end_call();

    let caller_rest = within_deadline!(caller.events_until(is_audio_stopped));
    let callee_rest = within_deadline!(callee.events_until(is_audio_stopped));
    assert_eq!(count(&caller_rest, is_connected), 0);
    assert_eq!(count(&caller_rest, is_disconnected), 1);
    assert_eq!(count(&caller_rest, is_error), 0);
    assert_eq!(count(&callee_rest, is_connected), 0);
    assert_eq!(count(&callee_rest, is_disconnected), 1);
    assert_eq!(
        count(&callee_rest, |e| matches!(e, CallEvent::RemoteEnded)),
        1,
    );

    let call = store.doc(&format!("calls/{}", call_id)).unwrap();
    assert_eq!(call["status"], "ended");
    assert!(call["endTime"].is_i64());
    assert!(call["connectedTime"].is_i64());
    assert!(call["duration"].as_i64().unwrap() >= 0);
    assert_eq!(caller.engine.closed_peers(), 1);
    assert_eq!(callee.engine.closed_peers(), 1);
    assert!(caller.engine.local_track(TrackKind::Audio).unwrap().is_stopped());

    caller.session.cleanup().await;
    callee.session.cleanup().await;
    assert!(caller.engine.is_disposed());
    assert!(callee.engine.is_disposed());
}

#[tokio::test]
async fn callee_receives_remote_audio() {
    let store = Arc::new(MemoryStore::default());
    let (_, mut caller, mut callee) =
        call_between(&store, CallKind::Audio).await;

    callee.session.answer_call();
    caller.session.start_call();

    within_deadline!(async {
        let events = &mut callee.events;
        if_let_next! {
            CallEvent::RemoteTrackReady { kind } = events {
                assert_eq!(kind, TrackKind::Audio);
            }
        }
    });
    within_deadline!(caller.events_until(is_connected));
    within_deadline!(callee.events_until(is_connected));
    within_deadline!(async {
        while !callee.audio.communication_mode() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    assert_eq!(caller.engine.peers(), 1);
    assert_eq!(callee.engine.peers(), 1);
}

#[tokio::test]
async fn dropped_session_hangs_up() {
    let store = Arc::new(MemoryStore::default());
    let (_, mut caller, mut callee) =
        call_between(&store, CallKind::Audio).await;

    callee.session.answer_call();
    caller.session.start_call();
    within_deadline!(caller.events_until(is_connected));
    within_deadline!(callee.events_until(is_connected));

    drop(caller.session);

    let callee_rest = within_deadline!(callee.events_until(is_audio_stopped));
    assert_eq!(
        count(&callee_rest, |e| matches!(e, CallEvent::RemoteEnded)),
        1,
    );
    // Stream ends once the dropped session stops.
    let caller_rest: Vec<_> = within_deadline!(caller.events.collect());
    assert_eq!(count(&caller_rest, is_disconnected), 1);
    assert!(!caller.handle.is_disposed());
}

#[tokio::test]
async fn ending_before_start_is_silent() {
    let store = Arc::new(MemoryStore::default());
    let device = Device::new(
        &store,
        CallKind::Video,
        params("c1", "u1", "u2", true),
    );

    device.session.end_call();
    device.session.end_call();
    device.session.cleanup().await;

    let seen: Vec<_> = within_deadline!(device.events.collect());
    assert!(seen.is_empty(), "unexpected events: {:?}", seen);
    assert!(device.handle.is_disposed());
    assert!(device.engine.is_disposed());
    assert_eq!(device.engine.peers(), 0);
}

#[tokio::test]
async fn start_without_parameters_fails() {
    let store = Arc::new(MemoryStore::default());
    let mut device = Device::new(&store, CallKind::Audio, None);

    device.session.start_call();

    match within_deadline!(device.events.next()) {
        Some(CallEvent::Error { error }) => {
            assert_eq!(error.name(), "ParametersNotSet");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
    assert_eq!(device.engine.peers(), 0);
    assert!(store.docs_in("calls/c1/signaling").is_empty());
}

#[tokio::test]
async fn start_after_end_needs_new_parameters() {
    let store = Arc::new(MemoryStore::default());
    let mut device =
        Device::new(&store, CallKind::Audio, params("c1", "u1", "u2", true));

    device.session.end_call();
    device.session.start_call();

    match within_deadline!(device.events.next()) {
        Some(CallEvent::Error { error }) => {
            assert_eq!(error.name(), "ParametersNotSet");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
}

#[tokio::test]
async fn disposed_engine_is_reported() {
    let store = Arc::new(MemoryStore::default());
    let mut device =
        Device::new(&store, CallKind::Audio, params("c1", "u1", "u2", true));
    device.handle.dispose();

    device.session.start_call();

    match within_deadline!(device.events.next()) {
        Some(CallEvent::Error { error }) => {
            assert_eq!(error.name(), "EngineDisposed");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
    assert_eq!(device.engine.peers(), 0);
}

#[tokio::test]
async fn mute_toggle_keeps_track_enabled() {
    let store = Arc::new(MemoryStore::default());
    let mut device =
        Device::new(&store, CallKind::Audio, params("c1", "u1", "u2", true));

    device.session.start_call();
    device.session.toggle_mute(true);
    device.session.toggle_mute(false);
    device.session.toggle_speaker(true);

    within_deadline!(async {
        while !device.audio.speaker_on() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    // Routing is applied on attach, then reapplied on every toggle.
    assert_eq!(device.audio.mute_history(), vec![false, true, false, false]);
    assert!(device.audio.communication_mode());
    let track = device.engine.local_track(TrackKind::Audio).unwrap();
    assert!(track.enabled());

    let offers = store.added_to("calls/c1/signaling");
    assert_eq!(offers[0]["type"], "offer");
    assert_eq!(offers[0]["sdp"], "offer:audio");

    device.session.end_call();
    within_deadline!(device.events_until(is_audio_stopped));
    assert!(!device.audio.speaker_on());
    assert!(!device.audio.communication_mode());
}

#[tokio::test]
async fn unconnected_call_never_reports_started_media() {
    let store = Arc::new(MemoryStore::default());
    let (call_id, mut caller, _callee) =
        call_between(&store, CallKind::Video).await;

    caller.session.start_call();
    within_deadline!(async {
        while !caller.audio.communication_mode() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    assert!(caller.engine.local_track(TrackKind::Audio).is_some());

    caller.session.end_call();

    let seen = within_deadline!(caller.events_until(|e| matches!(
        e,
        CallEvent::VideoStopped
    )));
    assert_eq!(count(&seen, is_connected), 0);
    assert_eq!(count(&seen, is_audio_started), 0);
    assert_eq!(
        count(&seen, |e| matches!(e, CallEvent::VideoStarted)),
        0,
    );
    assert_eq!(count(&seen, is_disconnected), 1);
    assert_eq!(count(&seen, is_error), 0);
    assert!(!caller.audio.communication_mode());

    let call = store.doc(&format!("calls/{}", call_id)).unwrap();
    assert_eq!(call["status"], "ended");
    assert_eq!(call["duration"], 0);
}

#[tokio::test]
async fn toggles_without_call_are_ignored() {
    let store = Arc::new(MemoryStore::default());
    let device =
        Device::new(&store, CallKind::Video, params("c1", "u1", "u2", true));

    device.session.toggle_mute(true);
    device.session.toggle_speaker(true);
    device.session.switch_camera(false);
    device.session.cleanup().await;

    assert!(device.audio.mute_history().is_empty());
    assert!(!device.audio.speaker_on());
    let seen: Vec<_> = within_deadline!(device.events.collect());
    assert_eq!(count(&seen, is_error), 0);
}

#[tokio::test]
async fn video_call_routes_remote_video_to_sink() {
    let store = Arc::new(MemoryStore::default());
    let (_, mut caller, mut callee) =
        call_between(&store, CallKind::Video).await;
    let sink: Arc<dyn VideoSink> = Arc::new(FakeSink);

    callee.session.connect_remote_video(Arc::clone(&sink));
    callee.session.answer_call();
    caller.session.start_call();

    let callee_seen = within_deadline!(callee.events_until(|e| matches!(
        e,
        CallEvent::VideoStarted
    )));
    assert_eq!(count(&callee_seen, is_connected), 1);
    assert!(callee_seen.iter().any(|e| matches!(
        e,
        CallEvent::RemoteTrackReady {
            kind: TrackKind::Video
        },
    )));
    let remote = callee.engine.remote_track(TrackKind::Video).unwrap();
    assert_eq!(remote.sinks(), 1);

    within_deadline!(caller.events_until(|e| matches!(
        e,
        CallEvent::LocalVideoReady
    )));
    within_deadline!(caller.events_until(is_connected));
    caller.session.switch_camera(false);

    callee.session.end_call();
    let callee_rest = within_deadline!(callee.events_until(|e| matches!(
        e,
        CallEvent::VideoStopped
    )));
    assert_eq!(count(&callee_rest, is_error), 0);
    assert_eq!(remote.sinks(), 0);
    let local = callee.engine.local_track(TrackKind::Video).unwrap();
    assert!(local.is_stopped());

    let caller_rest = within_deadline!(caller.events_until(|e| matches!(
        e,
        CallEvent::VideoStopped
    )));
    assert_eq!(count(&caller_rest, is_error), 0);
    assert_eq!(
        count(&caller_rest, |e| matches!(e, CallEvent::RemoteEnded)),
        1,
    );
}
