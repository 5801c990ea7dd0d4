//! In-process document store.
//!
//! Runs the same collection logic as the server behind a [`Transport`], so
//! sessions can collaborate without a network. Replies are queued and only
//! delivered when the transport is polled, like a real connection.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use inkboard_shared::{
    resolve_identity, ClientMessage, Collection, Document, ServerMessage, StoredDocument,
    SubscriptionId, SNAPSHOT_LIMIT,
};

use crate::sync::{Transport, TransportError, TransportEvent};

type ConnectionId = u64;

#[derive(Default)]
struct Connection {
    outbox: VecDeque<TransportEvent>,
    subscriptions: HashMap<SubscriptionId, usize>,
    dropped: bool,
}

struct StoreInner {
    collection: Collection,
    clock: u64,
    next_connection: ConnectionId,
    connections: BTreeMap<ConnectionId, Connection>,
    allow_anonymous: bool,
    reject_writes: Option<String>,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn push(&mut self, connection: ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.get_mut(&connection) {
            connection.outbox.push_back(TransportEvent::Message(message));
        }
    }

    fn broadcast_snapshots(&mut self) {
        let collection = &self.collection;
        for connection in self.connections.values_mut() {
            for (subscription, limit) in &connection.subscriptions {
                connection
                    .outbox
                    .push_back(TransportEvent::Message(ServerMessage::Snapshot {
                        subscription: *subscription,
                        documents: collection.window(*limit),
                    }));
            }
        }
    }

    fn dispatch(&mut self, connection: ConnectionId, message: ClientMessage) {
        match message {
            ClientMessage::SignIn { request, token } => {
                let reply = match resolve_identity(token.as_deref(), self.allow_anonymous) {
                    Ok(uid) => ServerMessage::SignedIn { request, uid },
                    Err(error) => ServerMessage::Failed {
                        request,
                        message: error.to_string(),
                    },
                };
                self.push(connection, reply);
            }
            ClientMessage::Subscribe {
                subscription,
                limit,
            } => {
                let limit = limit.clamp(1, SNAPSHOT_LIMIT) as usize;
                let documents = self.collection.window(limit);
                if let Some(entry) = self.connections.get_mut(&connection) {
                    entry.subscriptions.insert(subscription, limit);
                }
                self.push(
                    connection,
                    ServerMessage::Snapshot {
                        subscription,
                        documents,
                    },
                );
            }
            ClientMessage::Unsubscribe { subscription } => {
                if let Some(entry) = self.connections.get_mut(&connection) {
                    entry.subscriptions.remove(&subscription);
                }
            }
            ClientMessage::Add { request, .. } | ClientMessage::DeleteBatch { request, .. }
                if self.reject_writes.is_some() =>
            {
                let message = self.reject_writes.clone().unwrap_or_default();
                self.push(connection, ServerMessage::Failed { request, message });
            }
            other => {
                let now = self.tick();
                if let Some(outcome) = self.collection.handle_request(other, now) {
                    self.push(connection, outcome.reply);
                    if outcome.changed {
                        self.broadcast_snapshots();
                    }
                }
            }
        }
    }
}

/// Shared handle to one in-memory collection. Clones refer to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                collection: Collection::new(),
                clock: 0,
                next_connection: 1,
                connections: BTreeMap::new(),
                allow_anonymous: true,
                reject_writes: None,
            })),
        }
    }

    pub fn set_allow_anonymous(&self, allow: bool) {
        self.inner.borrow_mut().allow_anonymous = allow;
    }

    /// While set, adds and deletes fail with `message`.
    pub fn reject_writes(&self, message: Option<&str>) {
        self.inner.borrow_mut().reject_writes = message.map(str::to_string);
    }

    pub fn connect(&self) -> MemoryTransport {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_connection;
        inner.next_connection += 1;
        let mut connection = Connection::default();
        connection.outbox.push_back(TransportEvent::Connected);
        inner.connections.insert(id, connection);
        MemoryTransport {
            store: self.clone(),
            connection: id,
            closed: false,
        }
    }

    pub fn documents(&self) -> Vec<StoredDocument> {
        self.inner.borrow().collection.documents().to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().collection.is_empty()
    }

    /// Stores a document without validation, as an older or foreign writer
    /// might have, and notifies subscribers.
    pub fn insert_raw(&self, document: Document) -> StoredDocument {
        let mut inner = self.inner.borrow_mut();
        let now = inner.tick();
        let stored = inner.collection.insert(document, now);
        inner.broadcast_snapshots();
        stored
    }

    pub fn disconnect_all(&self) {
        let mut inner = self.inner.borrow_mut();
        for connection in inner.connections.values_mut() {
            connection.subscriptions.clear();
            connection.dropped = true;
            connection.outbox.push_back(TransportEvent::Disconnected);
        }
    }
}

pub struct MemoryTransport {
    store: MemoryStore,
    connection: ConnectionId,
    closed: bool,
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut inner = self.store.inner.borrow_mut();
        match inner.connections.get(&self.connection) {
            Some(connection) if !connection.dropped => {}
            _ => return Err(TransportError::Closed),
        }
        inner.dispatch(self.connection, message.clone());
        Ok(())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut inner = self.store.inner.borrow_mut();
        match inner.connections.get_mut(&self.connection) {
            Some(connection) => connection.outbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.store
            .inner
            .borrow_mut()
            .connections
            .remove(&self.connection);
    }
}
