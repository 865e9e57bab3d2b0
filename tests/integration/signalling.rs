use std::{sync::Arc, time::Duration};

use futures::{channel::mpsc, StreamExt as _};
use nurse_call::{
    conf,
    platform::{DocumentStore, IceCandidate},
    signalling::{
        Route, SignallingChannel, SignallingError, SignallingEvent,
    },
    utils,
};
use serde_json::json;

use crate::{if_let_next, store::MemoryStore, within_deadline};

const MAILBOX: &str = "calls/c1/signaling";

fn channel(
    store: &Arc<MemoryStore>,
    local_id: &str,
    remote_id: &str,
) -> (SignallingChannel, mpsc::UnboundedReceiver<SignallingEvent>) {
    let (tx, rx) = mpsc::unbounded();
    let channel = SignallingChannel::new(
        Arc::clone(store) as Arc<dyn DocumentStore>,
        &conf::Signalling::default(),
        Route {
            call_id: "c1".to_owned(),
            local_id: local_id.to_owned(),
            remote_id: remote_id.to_owned(),
        },
        tx,
    );
    (channel, rx)
}

async fn create_call(store: &MemoryStore) {
    store
        .set("calls/c1", utils::fields(json!({ "status": "connected" })))
        .await
        .unwrap();
}

/// Waits until the mailbox holds exactly `count` documents.
async fn mailbox_settles(store: &MemoryStore, count: usize) {
    within_deadline!(async {
        while store.docs_in(MAILBOX).len() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
}

#[tokio::test]
async fn offer_is_consumed_by_addressee() {
    let store = Arc::new(MemoryStore::default());
    let (caller, _) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");
    callee.start_listening();

    caller.send_offer("sdp-offer".to_owned()).await.unwrap();

    match within_deadline!(callee_rx.next()) {
        Some(SignallingEvent::OfferReceived { sdp }) => {
            assert_eq!(sdp, "sdp-offer");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
    mailbox_settles(&store, 0).await;

    let sent = store.added_to(MAILBOX);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "offer");
    assert_eq!(sent[0]["from"], "u1");
    assert_eq!(sent[0]["to"], "u2");
}

#[tokio::test]
async fn answer_goes_back_to_caller() {
    let store = Arc::new(MemoryStore::default());
    let (mut caller, mut caller_rx) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");
    caller.start_listening();
    callee.start_listening();

    caller.send_offer("sdp-offer".to_owned()).await.unwrap();
    within_deadline!(async {
        if_let_next! {
            SignallingEvent::OfferReceived { .. } = callee_rx {}
        }
    });
    callee.send_answer("sdp-answer".to_owned()).await.unwrap();

    match within_deadline!(caller_rx.next()) {
        Some(SignallingEvent::AnswerReceived { sdp }) => {
            assert_eq!(sdp, "sdp-answer");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
    mailbox_settles(&store, 0).await;
}

#[tokio::test]
async fn own_messages_are_not_delivered_back() {
    let store = Arc::new(MemoryStore::default());
    let (mut caller, mut caller_rx) = channel(&store, "u1", "u2");
    let (callee, _) = channel(&store, "u2", "u1");
    caller.start_listening();

    caller.send_offer("sdp-offer".to_owned()).await.unwrap();
    callee
        .send_ice_candidate(IceCandidate {
            candidate: "candidate:1".to_owned(),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("audio".to_owned()),
        })
        .await
        .unwrap();

    match within_deadline!(caller_rx.next()) {
        Some(SignallingEvent::IceCandidateReceived { candidate }) => {
            assert_eq!(candidate.candidate, "candidate:1");
            assert_eq!(candidate.sdp_m_line_index, Some(0));
            assert_eq!(candidate.sdp_mid.as_deref(), Some("audio"));
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
    // Offer of the caller stays for the callee.
    mailbox_settles(&store, 1).await;
}

#[tokio::test]
async fn undeleted_message_is_not_redelivered() {
    let store = Arc::new(MemoryStore::default());
    store.fail_deletes(true);
    let (caller, _) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");
    callee.start_listening();

    caller.send_offer("first".to_owned()).await.unwrap();
    match within_deadline!(callee_rx.next()) {
        Some(SignallingEvent::OfferReceived { sdp }) => {
            assert_eq!(sdp, "first");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }

    let first = store.docs_in(MAILBOX).remove(0);
    store.touch(&format!("{}/{}", MAILBOX, first.id));
    caller.send_offer("second".to_owned()).await.unwrap();

    match within_deadline!(callee_rx.next()) {
        Some(SignallingEvent::OfferReceived { sdp }) => {
            assert_eq!(sdp, "second");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
}

#[tokio::test]
async fn restarted_listener_does_not_redeliver() {
    let store = Arc::new(MemoryStore::default());
    store.fail_deletes(true);
    let (caller, _) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");
    callee.start_listening();

    caller.send_offer("first".to_owned()).await.unwrap();
    within_deadline!(async {
        if_let_next! {
            SignallingEvent::OfferReceived { .. } = callee_rx {}
        }
    });

    callee.stop_listening();
    assert!(!callee.is_listening());
    callee.start_listening();
    caller.send_answer("second".to_owned()).await.unwrap();

    match within_deadline!(callee_rx.next()) {
        Some(SignallingEvent::AnswerReceived { sdp }) => {
            assert_eq!(sdp, "second");
        }
        ev => panic!("unexpected event: {:?}", ev),
    }
}

#[tokio::test]
async fn call_end_updates_call_even_if_not_sent() {
    let store = Arc::new(MemoryStore::default());
    create_call(&store).await;
    store.fail_adds(true);
    let (caller, _) = channel(&store, "u1", "u2");

    let err = caller.send_call_end().await.unwrap_err();

    assert!(matches!(err.as_ref(), SignallingError::Send(_)));
    let call = store.doc("calls/c1").unwrap();
    assert_eq!(call["status"], "ended");
    assert!(call["endTime"].is_i64());
    assert!(store.docs_in(MAILBOX).is_empty());
}

#[tokio::test]
async fn call_end_is_delivered_to_remote() {
    let store = Arc::new(MemoryStore::default());
    create_call(&store).await;
    let (caller, _) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");
    callee.start_listening();

    caller.send_call_end().await.unwrap();

    assert!(matches!(
        within_deadline!(callee_rx.next()),
        Some(SignallingEvent::CallEnded),
    ));
    assert_eq!(store.doc("calls/c1").unwrap()["status"], "ended");
}

#[tokio::test]
async fn cleanup_keeps_pending_call_end() {
    let store = Arc::new(MemoryStore::default());
    create_call(&store).await;
    let (mut caller, _) = channel(&store, "u1", "u2");
    let (mut callee, mut callee_rx) = channel(&store, "u2", "u1");

    caller.send_offer("sdp-offer".to_owned()).await.unwrap();
    callee
        .send_ice_candidate(IceCandidate {
            candidate: "candidate:1".to_owned(),
            sdp_m_line_index: None,
            sdp_mid: None,
        })
        .await
        .unwrap();
    caller.send_call_end().await.unwrap();
    caller.cleanup().await;

    let left = store.docs_in(MAILBOX);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].data["type"], "end-call");
    assert_eq!(left[0].data["from"], "u1");

    callee.start_listening();
    assert!(matches!(
        within_deadline!(callee_rx.next()),
        Some(SignallingEvent::CallEnded),
    ));
}
