//! Ordered, append-only document collection.
//!
//! Both the server and the in-process store keep their documents here, so
//! time assignment, window queries and batch deletes behave the same on
//! either side of the wire.

use crate::document::{Document, ServerTime, StoredDocument};
use crate::record::DrawRecord;
use crate::{ClientMessage, ServerMessage};

pub const MAX_BATCH_DELETE: usize = 500;
pub const MAX_DOCUMENTS: usize = 100_000;

#[derive(Debug, Default, Clone)]
pub struct Collection {
    documents: Vec<StoredDocument>,
    last_time: ServerTime,
}

/// Reply to a collection request, and whether subscribers must be notified.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub reply: ServerMessage,
    pub changed: bool,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a collection from persisted documents, restoring the ordering
    /// and the time watermark.
    pub fn from_documents(mut documents: Vec<StoredDocument>) -> Self {
        documents.sort_by_key(|stored| stored.server_time);
        let last_time = documents
            .last()
            .map(|stored| stored.server_time)
            .unwrap_or_default();
        Self {
            documents,
            last_time,
        }
    }

    pub fn documents(&self) -> &[StoredDocument] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn insert(&mut self, document: Document, now_millis: u64) -> StoredDocument {
        let server_time = ServerTime {
            millis: now_millis.max(self.last_time.millis),
            seq: self.last_time.seq + 1,
        };
        self.last_time = server_time;
        let stored = StoredDocument {
            id: server_time.document_id(),
            server_time,
            document,
        };
        self.documents.push(stored.clone());
        stored
    }

    pub fn window(&self, limit: usize) -> Vec<StoredDocument> {
        let start = self.documents.len().saturating_sub(limit);
        self.documents[start..].to_vec()
    }

    /// Removes every listed document or none of them. Unknown ids are
    /// ignored; the returned count covers the documents actually removed.
    pub fn delete_batch(&mut self, ids: &[String]) -> Result<usize, String> {
        if ids.len() > MAX_BATCH_DELETE {
            return Err(format!(
                "delete batch of {} exceeds the limit of {MAX_BATCH_DELETE}",
                ids.len()
            ));
        }
        let before = self.documents.len();
        self.documents
            .retain(|stored| !ids.iter().any(|id| *id == stored.id));
        Ok(before - self.documents.len())
    }

    /// Applies `add`, `query` and `delete_batch`. Other messages concern the
    /// connection rather than the collection and yield `None`.
    pub fn handle_request(
        &mut self,
        message: ClientMessage,
        now_millis: u64,
    ) -> Option<RequestOutcome> {
        match message {
            ClientMessage::Add { request, document } => {
                if DrawRecord::from_document(&document).is_none() {
                    return Some(RequestOutcome {
                        reply: ServerMessage::Failed {
                            request,
                            message: "document is not a drawable record".to_string(),
                        },
                        changed: false,
                    });
                }
                if self.documents.len() >= MAX_DOCUMENTS {
                    return Some(RequestOutcome {
                        reply: ServerMessage::Failed {
                            request,
                            message: "collection is full".to_string(),
                        },
                        changed: false,
                    });
                }
                let stored = self.insert(document, now_millis);
                Some(RequestOutcome {
                    reply: ServerMessage::Added {
                        request,
                        id: stored.id,
                        server_time: stored.server_time,
                    },
                    changed: true,
                })
            }
            ClientMessage::Query { request, limit } => Some(RequestOutcome {
                reply: ServerMessage::QueryResult {
                    request,
                    documents: self.window(limit as usize),
                },
                changed: false,
            }),
            ClientMessage::DeleteBatch { request, ids } => match self.delete_batch(&ids) {
                Ok(count) => Some(RequestOutcome {
                    reply: ServerMessage::Deleted {
                        request,
                        count: count as u32,
                    },
                    changed: count > 0,
                }),
                Err(message) => Some(RequestOutcome {
                    reply: ServerMessage::Failed { request, message },
                    changed: false,
                }),
            },
            ClientMessage::SignIn { .. }
            | ClientMessage::Subscribe { .. }
            | ClientMessage::Unsubscribe { .. } => None,
        }
    }
}
