//! Registry of calls kept in the `calls` collection of the document store.

use std::{collections::HashSet, sync::Arc, time::Duration};

use derive_more::Display;
use futures::{stream, stream::BoxStream, StreamExt as _};
use serde_json::json;
use tracerr::Traced;

use crate::{
    conf,
    media::CallKind,
    platform::{self, ChangeKind, DocumentSnapshot, DocumentStore, Query},
    signalling::{Call, CallStatus},
    utils::{self, Named},
};

/// Errors occurring in a [`CallDirectory`].
#[derive(Clone, Debug, Display)]
pub enum DirectoryError {
    /// Document store request failed.
    #[display(fmt = "Call registry request failed: {}", _0)]
    Store(platform::Error),

    /// There is no call with the provided ID.
    #[display(fmt = "Call {} doesn't exist", _0)]
    NotFound(String),

    /// Call document has a wrong shape.
    #[display(fmt = "Malformed call document: {}", _0)]
    Malformed(String),
}

impl Named for DirectoryError {
    fn name(&self) -> &'static str {
        match self {
            Self::Store(_) => "Store",
            Self::NotFound(_) => "NotFound",
            Self::Malformed(_) => "Malformed",
        }
    }
}

type Result<T> = std::result::Result<T, Traced<DirectoryError>>;

/// Outcome of ringing a callee.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Answer {
    /// Callee accepted the call.
    Accepted,

    /// Callee declined the call.
    Declined,

    /// Call has been ended before the callee answered.
    Ended,

    /// Callee didn't answer in time, so the call has been ended.
    TimedOut,
}

/// Call addressed to a user which is still ringing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IncomingCall {
    /// ID of the call document.
    pub call_id: String,

    /// The call itself.
    pub call: Call,
}

/// Registry of [`Call`] documents.
///
/// The document store is the system of record: nothing is cached here, so
/// either party may update a call at any time.
#[derive(Clone)]
pub struct CallDirectory {
    store: Arc<dyn DocumentStore>,
    conf: conf::Signalling,
}

impl CallDirectory {
    /// Creates a new [`CallDirectory`] over the provided store.
    #[inline]
    pub fn new(store: Arc<dyn DocumentStore>, conf: conf::Signalling) -> Self {
        Self { store, conf }
    }

    /// Registers a new ringing call, returning its ID.
    ///
    /// # Errors
    ///
    /// With [`DirectoryError::Store`] if the document cannot be created.
    pub async fn create_call(
        &self,
        caller_id: &str,
        caller_name: &str,
        receiver_id: &str,
        kind: CallKind,
    ) -> Result<String> {
        let now = utils::now_millis();
        let call = Call {
            caller_id: caller_id.to_owned(),
            caller_name: caller_name.to_owned(),
            receiver_id: receiver_id.to_owned(),
            kind,
            status: CallStatus::Ringing,
            timestamp: now,
            start_time: Some(now),
            connected_time: None,
            end_time: None,
            duration: None,
        };
        let doc = call.to_document().map_err(|e| {
            tracerr::new!(DirectoryError::Malformed(e.to_string()))
        })?;

        let id = self
            .store
            .add(&self.conf.calls_collection, doc)
            .await
            .map_err(|e| tracerr::new!(DirectoryError::Store(e)))?;
        log::info!("Created {} call {} to {}", kind, id, receiver_id);
        Ok(id)
    }

    /// Marks the call as accepted by the callee.
    ///
    /// # Errors
    ///
    /// With [`DirectoryError::Store`] if the document cannot be updated.
    #[inline]
    pub async fn accept(&self, call_id: &str) -> Result<()> {
        self.update(call_id, json!({ "status": CallStatus::Accepted }))
            .await
    }

    /// Marks the call as declined by the callee.
    ///
    /// # Errors
    ///
    /// With [`DirectoryError::Store`] if the document cannot be updated.
    #[inline]
    pub async fn decline(&self, call_id: &str) -> Result<()> {
        self.update(call_id, json!({ "status": CallStatus::Declined }))
            .await
    }

    /// Marks the call as connected now.
    ///
    /// # Errors
    ///
    /// With [`DirectoryError::Store`] if the document cannot be updated.
    pub async fn mark_connected(&self, call_id: &str) -> Result<()> {
        self.update(
            call_id,
            json!({
                "status": CallStatus::Active,
                "connectedTime": utils::now_millis(),
            }),
        )
        .await
    }

    /// Marks the call as ended now.
    ///
    /// Duration is counted since the call got connected, and is zero if it
    /// never did.
    ///
    /// # Errors
    ///
    /// - With [`DirectoryError::NotFound`] if there is no such call.
    /// - With [`DirectoryError::Store`] if the document cannot be updated.
    pub async fn end(&self, call_id: &str) -> Result<()> {
        let call = self
            .get(call_id)
            .await?
            .ok_or_else(|| {
                tracerr::new!(DirectoryError::NotFound(call_id.to_owned()))
            })?;
        let now = utils::now_millis();
        let duration = call.connected_time.map_or(0, |t| (now - t).max(0));

        self.update(
            call_id,
            json!({
                "status": CallStatus::Ended,
                "endTime": now,
                "duration": duration,
            }),
        )
        .await
    }

    /// Returns the call with the provided ID, if any.
    ///
    /// # Errors
    ///
    /// - With [`DirectoryError::Store`] if the document cannot be read.
    /// - With [`DirectoryError::Malformed`] if it cannot be parsed.
    pub async fn get(&self, call_id: &str) -> Result<Option<Call>> {
        let doc = self
            .store
            .get(&self.conf.call_path(call_id))
            .await
            .map_err(|e| tracerr::new!(DirectoryError::Store(e)))?;
        doc.map(parse_call).transpose()
    }

    /// Subscribes to the updates of the call with the provided ID.
    ///
    /// [`None`] is yielded while the call doesn't exist.
    pub fn watch(
        &self,
        call_id: &str,
    ) -> BoxStream<'static, Result<Option<Call>>> {
        self.store
            .watch_document(&self.conf.call_path(call_id))
            .map(|doc| {
                doc.map_err(|e| tracerr::new!(DirectoryError::Store(e)))?
                    .map(parse_call)
                    .transpose()
            })
            .boxed()
    }

    /// Subscribes to the ringing calls addressed to the provided user.
    ///
    /// Every call is yielded once, even if it's modified while ringing.
    pub fn watch_incoming(
        &self,
        user_id: &str,
    ) -> BoxStream<'static, Result<IncomingCall>> {
        let query = Query::collection(self.conf.calls_collection.to_string())
            .where_eq("receiverId", user_id)
            .where_eq("status", CallStatus::Ringing.to_string());
        let mut seen = HashSet::new();

        self.store
            .watch_query(query)
            .flat_map(move |batch| {
                let calls: Vec<_> = match batch {
                    Ok(changes) => changes
                        .into_iter()
                        .filter(|ch| ch.kind != ChangeKind::Removed)
                        .filter(|ch| seen.insert(ch.document.id.clone()))
                        .map(|ch| {
                            let DocumentSnapshot { id, data } = ch.document;
                            parse_call(data)
                                .map(|call| IncomingCall { call_id: id, call })
                        })
                        .collect(),
                    Err(e) => vec![Err(tracerr::new!(DirectoryError::Store(e)))],
                };
                stream::iter(calls)
            })
            .boxed()
    }

    /// Waits for the callee to answer the call with the provided ID.
    ///
    /// If there is no answer within `ring_timeout`, the call is ended and
    /// [`Answer::TimedOut`] is returned. A call which disappears is
    /// considered ended.
    ///
    /// # Errors
    ///
    /// If watching the call fails, or the unanswered call cannot be ended.
    pub async fn await_answer(
        &self,
        call_id: &str,
        ring_timeout: Duration,
    ) -> Result<Answer> {
        let answer = wait_for_answer(self.watch(call_id));
        if let Ok(answer) = tokio::time::timeout(ring_timeout, answer).await {
            return answer;
        }
        log::info!("Call {} wasn't answered in {:?}", call_id, ring_timeout);
        self.end(call_id).await?;
        Ok(Answer::TimedOut)
    }

    /// Updates the provided fields of the call document.
    async fn update(
        &self,
        call_id: &str,
        fields: serde_json::Value,
    ) -> Result<()> {
        self.store
            .update(&self.conf.call_path(call_id), utils::fields(fields))
            .await
            .map_err(|e| {
                log::warn!("Failed to update call {}: {}", call_id, e);
                tracerr::new!(DirectoryError::Store(e))
            })
    }
}

/// Resolves once the provided call updates show the callee's answer.
async fn wait_for_answer(
    mut updates: BoxStream<'static, Result<Option<Call>>>,
) -> Result<Answer> {
    while let Some(update) = updates.next().await {
        let status = match update? {
            Some(call) => call.status,
            None => return Ok(Answer::Ended),
        };
        match status {
            CallStatus::Ringing => {}
            CallStatus::Accepted | CallStatus::Active => {
                return Ok(Answer::Accepted)
            }
            CallStatus::Declined => return Ok(Answer::Declined),
            CallStatus::Ended | CallStatus::Failed => return Ok(Answer::Ended),
        }
    }
    Ok(Answer::Ended)
}

/// Parses a [`Call`] out of its document.
fn parse_call(doc: platform::Document) -> Result<Call> {
    Call::from_document(doc)
        .map_err(|e| tracerr::new!(DirectoryError::Malformed(e.to_string())))
}
