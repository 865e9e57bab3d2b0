//! Signalling of a single call over a mailbox collection of the document
//! store.
//!
//! Every call has a `calls/{callId}/signaling` sub-collection. Peers append
//! [`SignallingMessage`]s addressed to each other there, and consume (read
//! and delete) the ones addressed to themselves.

pub mod call;
pub mod message;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use derive_more::Display;
use futures::{channel::mpsc, stream::BoxStream, StreamExt as _};
use serde_json::json;
use tracerr::Traced;

use crate::{
    conf,
    platform::{
        self, ChangeKind, DocumentChange, DocumentSnapshot, DocumentStore,
        IceCandidate, Query,
    },
    utils::{self, Named, TaskHandle},
};

#[doc(inline)]
pub use self::{
    call::{Call, CallStatus},
    message::{Payload, SignallingMessage},
};

/// Errors occurring in a [`SignallingChannel`].
#[derive(Clone, Debug, Display)]
pub enum SignallingError {
    /// Failed to append a message to the mailbox.
    #[display(fmt = "Failed to send signalling message: {}", _0)]
    Send(platform::Error),

    /// Mailbox subscription failed.
    #[display(fmt = "Signalling error: {}", _0)]
    Receive(platform::Error),

    /// Failed to update the call document.
    #[display(fmt = "Failed to update call status: {}", _0)]
    UpdateCall(platform::Error),

    /// Message couldn't be converted from or into a document.
    #[display(fmt = "Malformed signalling message: {}", _0)]
    Malformed(String),
}

impl Named for SignallingError {
    fn name(&self) -> &'static str {
        match self {
            Self::Send(_) => "Send",
            Self::Receive(_) => "Receive",
            Self::UpdateCall(_) => "UpdateCall",
            Self::Malformed(_) => "Malformed",
        }
    }
}

type Result<T> = std::result::Result<T, Traced<SignallingError>>;

/// Event delivered by a [`SignallingChannel`].
#[derive(Debug)]
pub enum SignallingEvent {
    /// Remote peer sent an SDP offer.
    OfferReceived {
        /// SDP text of the offer.
        sdp: String,
    },

    /// Remote peer sent an SDP answer.
    AnswerReceived {
        /// SDP text of the answer.
        sdp: String,
    },

    /// Remote peer sent one of its ICE candidates.
    IceCandidateReceived {
        /// Received candidate.
        candidate: IceCandidate,
    },

    /// Remote peer hung up.
    CallEnded,

    /// Mailbox subscription failed.
    Error {
        /// Occurred error.
        error: Traced<SignallingError>,
    },
}

/// Handler of [`SignallingEvent`]s.
#[async_trait]
pub trait SignallingEventHandler {
    /// Output of this handler's methods.
    type Output;

    /// Handles [`SignallingEvent::OfferReceived`].
    async fn on_offer_received(&mut self, sdp: String) -> Self::Output;

    /// Handles [`SignallingEvent::AnswerReceived`].
    async fn on_answer_received(&mut self, sdp: String) -> Self::Output;

    /// Handles [`SignallingEvent::IceCandidateReceived`].
    async fn on_ice_candidate_received(
        &mut self,
        candidate: IceCandidate,
    ) -> Self::Output;

    /// Handles [`SignallingEvent::CallEnded`].
    async fn on_call_ended(&mut self) -> Self::Output;

    /// Handles [`SignallingEvent::Error`].
    async fn on_error(
        &mut self,
        error: Traced<SignallingError>,
    ) -> Self::Output;
}

impl SignallingEvent {
    /// Dispatches this [`SignallingEvent`] with the provided
    /// [`SignallingEventHandler`].
    pub async fn dispatch_with<T>(self, handler: &mut T) -> T::Output
    where
        T: SignallingEventHandler + Send,
    {
        match self {
            Self::OfferReceived { sdp } => handler.on_offer_received(sdp).await,
            Self::AnswerReceived { sdp } => {
                handler.on_answer_received(sdp).await
            }
            Self::IceCandidateReceived { candidate } => {
                handler.on_ice_candidate_received(candidate).await
            }
            Self::CallEnded => handler.on_call_ended().await,
            Self::Error { error } => handler.on_error(error).await,
        }
    }
}

impl From<Payload> for SignallingEvent {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Offer { sdp } => Self::OfferReceived { sdp },
            Payload::Answer { sdp } => Self::AnswerReceived { sdp },
            Payload::IceCandidate {
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => Self::IceCandidateReceived {
                candidate: IceCandidate {
                    candidate,
                    sdp_m_line_index,
                    sdp_mid,
                },
            },
            Payload::EndCall => Self::CallEnded,
        }
    }
}

/// Identities of the parties of a call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Route {
    /// ID of the call.
    pub call_id: String,

    /// ID of the local user.
    pub local_id: String,

    /// ID of the remote user.
    pub remote_id: String,
}

/// Signalling channel between exactly two peers, scoped to a single call.
///
/// Received messages are delivered as [`SignallingEvent`]s into the sender
/// provided on creation, each one at most once per message ID.
pub struct SignallingChannel {
    /// Store the mailbox lives in.
    store: Arc<dyn DocumentStore>,

    /// Path of the call document.
    call_path: String,

    /// Path of the call's mailbox collection.
    mailbox_path: String,

    /// Parties of the call.
    route: Route,

    /// Sender of the received [`SignallingEvent`]s.
    events: mpsc::UnboundedSender<SignallingEvent>,

    /// IDs of the already dispatched messages.
    ///
    /// Outlives the listener, so restarting listening doesn't redeliver
    /// messages.
    dispatched: Arc<Mutex<HashSet<String>>>,

    /// Running mailbox listener, if any.
    listener: Option<TaskHandle>,
}

impl SignallingChannel {
    /// Creates a new [`SignallingChannel`] for the provided [`Route`].
    ///
    /// Doesn't listen for messages until [`start_listening()`] is called.
    ///
    /// [`start_listening()`]: SignallingChannel::start_listening
    pub fn new(
        store: Arc<dyn DocumentStore>,
        conf: &conf::Signalling,
        route: Route,
        events: mpsc::UnboundedSender<SignallingEvent>,
    ) -> Self {
        Self {
            store,
            call_path: conf.call_path(&route.call_id),
            mailbox_path: conf.mailbox_path(&route.call_id),
            route,
            events,
            dispatched: Arc::default(),
            listener: None,
        }
    }

    /// Returns the [`Route`] of this [`SignallingChannel`].
    #[inline]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Indicates whether this [`SignallingChannel`] is listening for
    /// messages.
    #[inline]
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Subscribes to the mailbox.
    ///
    /// Every message addressed to the local user by the remote one is
    /// dispatched and then deleted from the mailbox. Does nothing if already
    /// listening.
    ///
    /// # Panics
    ///
    /// If called outside of a [`tokio`] runtime.
    pub fn start_listening(&mut self) {
        if self.listener.is_some() {
            return;
        }
        log::debug!(
            "Listening for signalling messages of call {}",
            self.route.call_id,
        );

        let changes = self
            .store
            .watch_query(Query::collection(self.mailbox_path.clone()));
        let mailbox = Mailbox {
            store: Arc::clone(&self.store),
            mailbox_path: self.mailbox_path.clone(),
            local_id: self.route.local_id.clone(),
            dispatched: Arc::clone(&self.dispatched),
            events: self.events.clone(),
        };
        self.listener = Some(utils::spawn(mailbox.consume(changes)));
    }

    /// Cancels the mailbox subscription. Idempotent.
    pub fn stop_listening(&mut self) {
        if self.listener.take().is_some() {
            log::debug!(
                "Stopped listening for signalling messages of call {}",
                self.route.call_id,
            );
        }
    }

    /// Sends SDP offer to the remote peer.
    ///
    /// # Errors
    ///
    /// With [`SignallingError::Send`] if the message cannot be appended.
    #[inline]
    pub async fn send_offer(&self, sdp: String) -> Result<()> {
        self.send(Payload::Offer { sdp }).await
    }

    /// Sends SDP answer to the remote peer.
    ///
    /// # Errors
    ///
    /// With [`SignallingError::Send`] if the message cannot be appended.
    #[inline]
    pub async fn send_answer(&self, sdp: String) -> Result<()> {
        self.send(Payload::Answer { sdp }).await
    }

    /// Sends a locally discovered [`IceCandidate`] to the remote peer.
    ///
    /// # Errors
    ///
    /// With [`SignallingError::Send`] if the message cannot be appended.
    #[inline]
    pub async fn send_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<()> {
        self.send(candidate.into()).await
    }

    /// Notifies the remote peer about the hang up and marks the call document
    /// as `ended`.
    ///
    /// The call document is updated even if the message cannot be sent.
    ///
    /// # Errors
    ///
    /// With the first of [`SignallingError::Send`] and
    /// [`SignallingError::UpdateCall`] that happened.
    pub async fn send_call_end(&self) -> Result<()> {
        let sent = self.send(Payload::EndCall).await;

        let fields = utils::fields(json!({
            "status": CallStatus::Ended,
            "endTime": utils::now_millis(),
        }));
        let updated = self
            .store
            .update(&self.call_path, fields)
            .await
            .map_err(|e| {
                log::warn!("Failed to mark call {} ended: {}", self.call_path, e);
                tracerr::new!(SignallingError::UpdateCall(e))
            });

        sent.and(updated)
    }

    /// Stops listening and deletes all the remaining messages of the call,
    /// except the hang up notification for the remote peer which is left for
    /// it to consume.
    ///
    /// Failures are logged and not reported.
    pub async fn cleanup(&mut self) {
        self.stop_listening();

        let query = Query::collection(self.mailbox_path.clone());
        let docs = match self.store.list(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                log::warn!("Failed to clean up signalling data: {}", e);
                return;
            }
        };
        for doc in docs {
            if self.is_pending_hangup(&doc) {
                continue;
            }
            let path = format!("{}/{}", self.mailbox_path, doc.id);
            if let Err(e) = self.store.delete(&path).await {
                log::warn!("Failed to delete {}: {}", path, e);
            }
        }
        log::debug!("Signalling data of {} cleaned up", self.call_path);
    }

    /// Checks whether the provided mailbox document is our hang up
    /// notification which the remote peer hasn't consumed yet.
    fn is_pending_hangup(&self, doc: &DocumentSnapshot) -> bool {
        SignallingMessage::from_document(doc.data.clone())
            .map(|msg| {
                msg.payload == Payload::EndCall
                    && msg.from == self.route.local_id
                    && msg.to == self.route.remote_id
            })
            .unwrap_or(false)
    }

    /// Appends a new message with the provided [`Payload`] to the mailbox.
    async fn send(&self, payload: Payload) -> Result<()> {
        let msg = SignallingMessage {
            from: self.route.local_id.clone(),
            to: self.route.remote_id.clone(),
            payload,
            timestamp: utils::now_millis(),
        };
        let doc = msg.to_document().map_err(|e| {
            tracerr::new!(SignallingError::Malformed(e.to_string()))
        })?;

        self.store
            .add(&self.mailbox_path, doc)
            .await
            .map(drop)
            .map_err(|e| {
                log::error!(
                    "Failed to send {:?} to {}: {}",
                    msg.payload,
                    self.route.remote_id,
                    e,
                );
                tracerr::new!(SignallingError::Send(e))
            })
    }
}

/// Consumer of the mailbox subscription, run by the listener task.
struct Mailbox {
    store: Arc<dyn DocumentStore>,
    mailbox_path: String,
    local_id: String,
    dispatched: Arc<Mutex<HashSet<String>>>,
    events: mpsc::UnboundedSender<SignallingEvent>,
}

impl Mailbox {
    /// Processes the mailbox subscription until it ends.
    async fn consume(
        self,
        mut changes: BoxStream<
            'static,
            std::result::Result<Vec<DocumentChange>, platform::Error>,
        >,
    ) {
        while let Some(batch) = changes.next().await {
            match batch {
                Ok(batch) => {
                    for change in batch {
                        if change.kind != ChangeKind::Removed {
                            self.on_document(change.document).await;
                        }
                    }
                }
                Err(e) => {
                    log::error!("Signalling listener error: {}", e);
                    let _ = self.events.unbounded_send(SignallingEvent::Error {
                        error: tracerr::new!(SignallingError::Receive(e)),
                    });
                }
            }
        }
    }

    /// Dispatches the provided mailbox document if it's addressed to the
    /// local user and hasn't been dispatched yet, then deletes it.
    async fn on_document(&self, doc: DocumentSnapshot) {
        let DocumentSnapshot { id, data } = doc;
        let msg = match SignallingMessage::from_document(data) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Skipping malformed message {}: {}", id, e);
                return;
            }
        };
        if !msg.is_addressed_to(&self.local_id) {
            return;
        }

        let is_new = self
            .dispatched
            .lock()
            .map(|mut ids| ids.insert(id.clone()))
            .unwrap_or(true);
        if is_new {
            log::debug!("Received {:?} from {}", msg.payload, msg.from);
            let _ = self.events.unbounded_send(msg.payload.into());
        } else {
            log::debug!("Ignoring redelivered message {}", id);
        }

        let path = format!("{}/{}", self.mailbox_path, id);
        if let Err(e) = self.store.delete(&path).await {
            log::warn!("Failed to delete {}: {}", path, e);
        }
    }
}
