use std::time::{SystemTime, UNIX_EPOCH};

use inkboard_shared::{decode, resolve_identity, ClientMessage, ServerMessage, SNAPSHOT_LIMIT};
use uuid::Uuid;

use crate::state::CollectionState;

pub struct Dispatch {
    pub reply: Option<ServerMessage>,
    pub changed: bool,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

fn clamp_limit(limit: u32) -> usize {
    limit.clamp(1, SNAPSHOT_LIMIT) as usize
}

pub fn apply_client_message(
    state: &mut CollectionState,
    sender: Uuid,
    message: ClientMessage,
    allow_anonymous: bool,
    now: u64,
) -> Dispatch {
    match message {
        ClientMessage::SignIn { request, token } => {
            let reply = match resolve_identity(token.as_deref(), allow_anonymous) {
                Ok(uid) => ServerMessage::SignedIn { request, uid },
                Err(error) => ServerMessage::Failed {
                    request,
                    message: error.to_string(),
                },
            };
            Dispatch {
                reply: Some(reply),
                changed: false,
            }
        }
        ClientMessage::Subscribe {
            subscription,
            limit,
        } => {
            let limit = clamp_limit(limit);
            let Some(peer) = state.peers.get_mut(&sender) else {
                return Dispatch {
                    reply: None,
                    changed: false,
                };
            };
            peer.subscriptions.insert(subscription, limit);
            Dispatch {
                reply: Some(ServerMessage::Snapshot {
                    subscription,
                    documents: state.collection.window(limit),
                }),
                changed: false,
            }
        }
        ClientMessage::Unsubscribe { subscription } => {
            if let Some(peer) = state.peers.get_mut(&sender) {
                peer.subscriptions.remove(&subscription);
            }
            Dispatch {
                reply: None,
                changed: false,
            }
        }
        ClientMessage::Query { request, limit } => {
            let documents = state.collection.window(clamp_limit(limit));
            Dispatch {
                reply: Some(ServerMessage::QueryResult { request, documents }),
                changed: false,
            }
        }
        message => match state.collection.handle_request(message, now) {
            Some(outcome) => {
                if outcome.changed {
                    state.dirty = true;
                }
                Dispatch {
                    reply: Some(outcome.reply),
                    changed: outcome.changed,
                }
            }
            None => Dispatch {
                reply: None,
                changed: false,
            },
        },
    }
}

/// Pushes the full current window to every live subscription. Peers whose
/// channel is gone are dropped.
pub fn broadcast_snapshots(state: &mut CollectionState) {
    let mut stale = Vec::new();
    for (id, peer) in state.peers.iter() {
        for (subscription, limit) in peer.subscriptions.iter() {
            let message = ServerMessage::Snapshot {
                subscription: *subscription,
                documents: state.collection.window(*limit),
            };
            if peer.tx.send(message).is_err() {
                stale.push(*id);
                break;
            }
        }
    }
    for id in stale {
        state.peers.remove(&id);
    }
}

/// Number of stored documents that no longer decode to a drawable record.
/// They are kept (clients skip them) but worth reporting when loading.
pub fn count_undrawable(state: &CollectionState) -> usize {
    state
        .collection
        .documents()
        .iter()
        .filter(|stored| decode(stored).is_none())
        .count()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use inkboard_shared::{encode_segment, Collection, Document, DrawRecord, Point};
    use tokio::sync::mpsc;

    use super::*;
    use crate::state::Peer;

    fn segment(x: f32) -> Document {
        DrawRecord::Segment(
            encode_segment(Point::new(x, x), Point::new(x + 1.0, x + 1.0), "#00f", 3.0, "u")
                .unwrap(),
        )
        .to_document()
    }

    fn state_with_peer() -> (
        CollectionState,
        Uuid,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let mut state = CollectionState::new(Collection::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.peers.insert(
            id,
            Peer {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        (state, id, rx)
    }

    #[test]
    fn subscribe_replies_with_current_window() {
        let (mut state, peer, _rx) = state_with_peer();
        state.collection.insert(segment(1.0), 10);
        let dispatch = apply_client_message(
            &mut state,
            peer,
            ClientMessage::Subscribe {
                subscription: 1,
                limit: 10_000,
            },
            true,
            11,
        );
        match dispatch.reply {
            Some(ServerMessage::Snapshot {
                subscription,
                documents,
            }) => {
                assert_eq!(subscription, 1);
                assert_eq!(documents.len(), 1);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(state.peers[&peer].subscriptions[&1], SNAPSHOT_LIMIT as usize);
    }

    #[test]
    fn add_marks_dirty_and_broadcast_reaches_subscribers() {
        let (mut state, peer, mut rx) = state_with_peer();
        apply_client_message(
            &mut state,
            peer,
            ClientMessage::Subscribe {
                subscription: 2,
                limit: 500,
            },
            true,
            1,
        );
        let dispatch = apply_client_message(
            &mut state,
            peer,
            ClientMessage::Add {
                request: 9,
                document: segment(4.0),
            },
            true,
            5,
        );
        assert!(dispatch.changed);
        assert!(state.dirty);
        assert!(matches!(
            dispatch.reply,
            Some(ServerMessage::Added { request: 9, .. })
        ));

        broadcast_snapshots(&mut state);
        match rx.try_recv() {
            Ok(ServerMessage::Snapshot {
                subscription,
                documents,
            }) => {
                assert_eq!(subscription, 2);
                assert_eq!(documents.len(), 1);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn broadcast_drops_disconnected_peers() {
        let (mut state, peer, rx) = state_with_peer();
        state
            .peers
            .get_mut(&peer)
            .unwrap()
            .subscriptions
            .insert(1, 500);
        drop(rx);
        broadcast_snapshots(&mut state);
        assert!(state.peers.is_empty());
    }

    #[test]
    fn sign_in_respects_anonymous_setting() {
        let (mut state, peer, _rx) = state_with_peer();
        let denied = apply_client_message(
            &mut state,
            peer,
            ClientMessage::SignIn {
                request: 1,
                token: None,
            },
            false,
            1,
        );
        assert!(matches!(
            denied.reply,
            Some(ServerMessage::Failed { request: 1, .. })
        ));
        let granted = apply_client_message(
            &mut state,
            peer,
            ClientMessage::SignIn {
                request: 2,
                token: Some("abc".to_string()),
            },
            false,
            1,
        );
        assert!(matches!(
            granted.reply,
            Some(ServerMessage::SignedIn { request: 2, .. })
        ));
    }

    #[test]
    fn undrawable_documents_are_counted() {
        let mut collection = Collection::new();
        collection.insert(segment(1.0), 1);
        collection.insert(Document::new(), 2);
        let state = CollectionState::new(collection);
        assert_eq!(count_undrawable(&state), 1);
    }
}
