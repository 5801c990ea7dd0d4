//! Client side of the document store protocol.
//!
//! [`SyncChannel`] does no I/O of its own. It tags outgoing requests, tracks
//! what is still in flight, and turns store replies into [`SyncEvent`]s. The
//! bytes move through a [`Transport`], which may be a socket thread, a browser
//! WebSocket, or the in-process store.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use inkboard_shared::{
    ClientMessage, DrawRecord, RequestId, ServerMessage, ServerTime, StoredDocument,
    SubscriptionId,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("channel is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(ServerMessage),
    Error(String),
    Disconnected,
}

/// Moves protocol messages to and from the store. Neither call may block.
pub trait Transport {
    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;
    fn poll(&mut self) -> Vec<TransportEvent>;
    fn close(&mut self) {}
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Handle for a live subscription; pass it back to
/// [`SyncChannel::unsubscribe`] to release the listener.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    SignedIn {
        request: RequestId,
        uid: String,
    },
    SignInFailed {
        request: RequestId,
        error: SyncError,
    },
    /// Complete current window, ascending by server time.
    Snapshot {
        subscription: SubscriptionId,
        documents: Vec<StoredDocument>,
    },
    SubscriptionFailed {
        subscription: SubscriptionId,
        error: SyncError,
    },
    Published {
        request: RequestId,
        result: Result<ServerTime, SyncError>,
    },
    Cleared {
        request: RequestId,
        result: Result<u32, SyncError>,
    },
    ConnectionLost {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    SignIn,
    Publish,
    ClearQuery,
    ClearDelete,
}

pub struct SyncChannel<T: Transport> {
    transport: T,
    next_request: RequestId,
    next_subscription: SubscriptionId,
    pending: HashMap<RequestId, Pending>,
    subscriptions: HashSet<SubscriptionId>,
    snapshot_limit: u32,
    last_transport_error: Option<String>,
    closed: bool,
}

impl<T: Transport> SyncChannel<T> {
    pub fn new(transport: T, snapshot_limit: u32) -> Self {
        Self {
            transport,
            next_request: 1,
            next_subscription: 1,
            pending: HashMap::new(),
            subscriptions: HashSet::new(),
            snapshot_limit: snapshot_limit.max(1),
            last_transport_error: None,
            closed: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn send(&mut self, message: &ClientMessage) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::Closed);
        }
        self.transport.send(message)?;
        Ok(())
    }

    fn start(
        &mut self,
        kind: Pending,
        build: impl FnOnce(RequestId) -> ClientMessage,
    ) -> Result<RequestId, SyncError> {
        let request = self.next_request;
        self.next_request += 1;
        self.send(&build(request))?;
        self.pending.insert(request, kind);
        Ok(request)
    }

    /// Anonymous sign-in when `token` is `None`, custom-token sign-in otherwise.
    pub fn sign_in(&mut self, token: Option<&str>) -> Result<RequestId, SyncError> {
        let token = token.map(str::to_string);
        self.start(Pending::SignIn, |request| ClientMessage::SignIn { request, token })
    }

    pub fn subscribe(&mut self, limit: u32) -> Result<Subscription, SyncError> {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.send(&ClientMessage::Subscribe {
            subscription: id,
            limit: limit.clamp(1, self.snapshot_limit),
        })?;
        self.subscriptions.insert(id);
        Ok(Subscription { id })
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) {
        if !self.subscriptions.remove(&subscription.id) {
            return;
        }
        if let Err(error) = self.send(&ClientMessage::Unsubscribe {
            subscription: subscription.id,
        }) {
            log::debug!("unsubscribe {} not delivered: {error}", subscription.id);
        }
    }

    pub fn publish(&mut self, record: &DrawRecord) -> Result<RequestId, SyncError> {
        let document = record.to_document();
        self.start(Pending::Publish, |request| ClientMessage::Add { request, document })
    }

    /// Deletes every document in the current window: a query, then one
    /// batch delete of everything it returned. Completion arrives as
    /// [`SyncEvent::Cleared`].
    pub fn clear_all(&mut self) -> Result<RequestId, SyncError> {
        let limit = self.snapshot_limit;
        self.start(Pending::ClearQuery, |request| ClientMessage::Query { request, limit })
    }

    /// Releases every subscription and drops pending operations. Replies that
    /// arrive afterwards are discarded.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let subscriptions: Vec<SubscriptionId> = self.subscriptions.iter().copied().collect();
        for id in subscriptions {
            self.unsubscribe(Subscription { id });
        }
        self.pending.clear();
        self.closed = true;
        self.transport.close();
    }

    pub fn poll(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        for event in self.transport.poll() {
            if self.closed {
                continue;
            }
            match event {
                TransportEvent::Connected => {
                    self.last_transport_error = None;
                    events.push(SyncEvent::Connected);
                }
                TransportEvent::Message(message) => {
                    if let Some(event) = self.handle(message) {
                        events.push(event);
                    }
                }
                TransportEvent::Error(message) => {
                    log::warn!("transport error: {message}");
                    self.last_transport_error = Some(message);
                }
                TransportEvent::Disconnected => {
                    let reason = self
                        .last_transport_error
                        .take()
                        .unwrap_or_else(|| "connection closed".to_string());
                    self.fail_pending(&reason, &mut events);
                    self.subscriptions.clear();
                    events.push(SyncEvent::ConnectionLost { reason });
                }
            }
        }
        events
    }

    fn fail_pending(&mut self, reason: &str, events: &mut Vec<SyncEvent>) {
        let mut pending: Vec<(RequestId, Pending)> = self.pending.drain().collect();
        pending.sort_by_key(|(request, _)| *request);
        for (request, kind) in pending {
            let error = SyncError::ConnectionLost(reason.to_string());
            events.push(completion(request, kind, error));
        }
    }

    /// Maps one store reply to an event. Replies to unknown requests or
    /// released subscriptions yield `None`.
    pub fn handle(&mut self, message: ServerMessage) -> Option<SyncEvent> {
        if self.closed {
            return None;
        }
        match message {
            ServerMessage::Snapshot {
                subscription,
                documents,
            } => self
                .subscriptions
                .contains(&subscription)
                .then_some(SyncEvent::Snapshot {
                    subscription,
                    documents,
                }),
            ServerMessage::SubscriptionFailed {
                subscription,
                message,
            } => self
                .subscriptions
                .remove(&subscription)
                .then_some(SyncEvent::SubscriptionFailed {
                    subscription,
                    error: SyncError::Rejected(message),
                }),
            ServerMessage::SignedIn { request, uid } => match self.take(request)? {
                Pending::SignIn => Some(SyncEvent::SignedIn { request, uid }),
                other => self.unexpected(request, other, "signed_in"),
            },
            ServerMessage::Added {
                request,
                server_time,
                ..
            } => match self.take(request)? {
                Pending::Publish => Some(SyncEvent::Published {
                    request,
                    result: Ok(server_time),
                }),
                other => self.unexpected(request, other, "added"),
            },
            ServerMessage::QueryResult { request, documents } => match self.take(request)? {
                Pending::ClearQuery => self.delete_found(request, documents),
                other => self.unexpected(request, other, "query_result"),
            },
            ServerMessage::Deleted { request, count } => match self.take(request)? {
                Pending::ClearDelete => Some(SyncEvent::Cleared {
                    request,
                    result: Ok(count),
                }),
                other => self.unexpected(request, other, "deleted"),
            },
            ServerMessage::Failed { request, message } => {
                let kind = self.take(request)?;
                Some(completion(request, kind, SyncError::Rejected(message)))
            }
        }
    }

    fn take(&mut self, request: RequestId) -> Option<Pending> {
        let kind = self.pending.remove(&request);
        if kind.is_none() {
            log::debug!("reply for unknown request {request} ignored");
        }
        kind
    }

    fn unexpected(&mut self, request: RequestId, kind: Pending, reply: &str) -> Option<SyncEvent> {
        log::warn!("request {request} ({kind:?}) got unexpected {reply} reply");
        Some(completion(
            request,
            kind,
            SyncError::Rejected(format!("unexpected {reply} reply")),
        ))
    }

    fn delete_found(
        &mut self,
        request: RequestId,
        documents: Vec<StoredDocument>,
    ) -> Option<SyncEvent> {
        if documents.is_empty() {
            return Some(SyncEvent::Cleared {
                request,
                result: Ok(0),
            });
        }
        let ids = documents.into_iter().map(|stored| stored.id).collect();
        match self.send(&ClientMessage::DeleteBatch { request, ids }) {
            Ok(()) => {
                self.pending.insert(request, Pending::ClearDelete);
                None
            }
            Err(error) => Some(SyncEvent::Cleared {
                request,
                result: Err(error),
            }),
        }
    }
}

fn completion(request: RequestId, kind: Pending, error: SyncError) -> SyncEvent {
    match kind {
        Pending::SignIn => SyncEvent::SignInFailed { request, error },
        Pending::Publish => SyncEvent::Published {
            request,
            result: Err(error),
        },
        Pending::ClearQuery | Pending::ClearDelete => SyncEvent::Cleared {
            request,
            result: Err(error),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use inkboard_shared::{encode_segment, Collection, Document, Point};

    use super::*;

    #[derive(Default)]
    struct ScriptedTransport {
        sent: Vec<ClientMessage>,
        inbox: VecDeque<TransportEvent>,
        fail_sends: bool,
        closed: bool,
    }

    impl Transport for ScriptedTransport {
        fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
            if self.fail_sends || self.closed {
                return Err(TransportError::Closed);
            }
            self.sent.push(message.clone());
            Ok(())
        }

        fn poll(&mut self) -> Vec<TransportEvent> {
            self.inbox.drain(..).collect()
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn channel() -> SyncChannel<ScriptedTransport> {
        SyncChannel::new(ScriptedTransport::default(), 500)
    }

    fn record() -> DrawRecord {
        DrawRecord::Segment(
            encode_segment(Point::new(1.0, 1.0), Point::new(2.0, 2.0), "#000", 3.0, "me").unwrap(),
        )
    }

    fn stored(count: usize) -> Vec<StoredDocument> {
        let mut collection = Collection::new();
        for i in 0..count {
            collection.insert(Document::new(), i as u64);
        }
        collection.documents().to_vec()
    }

    #[test]
    fn publish_completes_with_server_time() {
        let mut channel = channel();
        let request = channel.publish(&record()).unwrap();
        assert!(matches!(channel.transport().sent[0], ClientMessage::Add { .. }));
        let event = channel.handle(ServerMessage::Added {
            request,
            id: "x".to_string(),
            server_time: ServerTime::new(5, 1),
        });
        assert_eq!(
            event,
            Some(SyncEvent::Published {
                request,
                result: Ok(ServerTime::new(5, 1)),
            })
        );
        assert_eq!(channel.pending_len(), 0);
    }

    #[test]
    fn rejected_publish_reports_error() {
        let mut channel = channel();
        let request = channel.publish(&record()).unwrap();
        let event = channel.handle(ServerMessage::Failed {
            request,
            message: "denied".to_string(),
        });
        assert_eq!(
            event,
            Some(SyncEvent::Published {
                request,
                result: Err(SyncError::Rejected("denied".to_string())),
            })
        );
    }

    #[test]
    fn clear_all_deletes_everything_the_query_returned() {
        let mut channel = channel();
        let request = channel.clear_all().unwrap();
        assert_eq!(
            channel.transport().sent[0],
            ClientMessage::Query { request, limit: 500 }
        );
        let documents = stored(3);
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        assert_eq!(
            channel.handle(ServerMessage::QueryResult { request, documents }),
            None
        );
        assert_eq!(
            channel.transport().sent[1],
            ClientMessage::DeleteBatch { request, ids }
        );
        assert_eq!(
            channel.handle(ServerMessage::Deleted { request, count: 3 }),
            Some(SyncEvent::Cleared {
                request,
                result: Ok(3),
            })
        );
    }

    #[test]
    fn clear_all_on_empty_window_skips_the_delete() {
        let mut channel = channel();
        let request = channel.clear_all().unwrap();
        let event = channel.handle(ServerMessage::QueryResult {
            request,
            documents: Vec::new(),
        });
        assert_eq!(
            event,
            Some(SyncEvent::Cleared {
                request,
                result: Ok(0),
            })
        );
        assert_eq!(channel.transport().sent.len(), 1);
    }

    #[test]
    fn snapshots_for_released_subscriptions_are_dropped() {
        let mut channel = channel();
        let subscription = channel.subscribe(10_000).unwrap();
        assert_eq!(
            channel.transport().sent[0],
            ClientMessage::Subscribe {
                subscription: subscription.id(),
                limit: 500,
            }
        );
        let snapshot = ServerMessage::Snapshot {
            subscription: subscription.id(),
            documents: stored(2),
        };
        assert!(matches!(
            channel.handle(snapshot.clone()),
            Some(SyncEvent::Snapshot { .. })
        ));
        channel.unsubscribe(subscription);
        assert_eq!(channel.handle(snapshot), None);
    }

    #[test]
    fn close_discards_late_replies() {
        let mut channel = channel();
        let _subscription = channel.subscribe(500).unwrap();
        let request = channel.publish(&record()).unwrap();
        channel.close();
        assert!(channel.transport().closed);
        assert!(matches!(
            channel.transport().sent.last(),
            Some(ClientMessage::Unsubscribe { .. })
        ));
        assert_eq!(
            channel.handle(ServerMessage::Added {
                request,
                id: "x".to_string(),
                server_time: ServerTime::new(1, 1),
            }),
            None
        );
        assert_eq!(channel.publish(&record()), Err(SyncError::Closed));
    }

    #[test]
    fn disconnect_fails_pending_operations() {
        let mut channel = channel();
        let sign_in = channel.sign_in(None).unwrap();
        let publish = channel.publish(&record()).unwrap();
        channel
            .transport_mut()
            .inbox
            .extend([TransportEvent::Error("reset".to_string()), TransportEvent::Disconnected]);
        let events = channel.poll();
        assert_eq!(
            events,
            vec![
                SyncEvent::SignInFailed {
                    request: sign_in,
                    error: SyncError::ConnectionLost("reset".to_string()),
                },
                SyncEvent::Published {
                    request: publish,
                    result: Err(SyncError::ConnectionLost("reset".to_string())),
                },
                SyncEvent::ConnectionLost {
                    reason: "reset".to_string(),
                },
            ]
        );
    }

    #[test]
    fn send_failure_is_immediate() {
        let mut channel = SyncChannel::new(
            ScriptedTransport {
                fail_sends: true,
                ..ScriptedTransport::default()
            },
            500,
        );
        assert_eq!(
            channel.publish(&record()),
            Err(SyncError::Transport(TransportError::Closed))
        );
        assert_eq!(channel.pending_len(), 0);
    }
}
