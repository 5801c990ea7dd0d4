use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

pub mod auth;
pub mod collection;
pub mod document;
pub mod record;
mod session_format;

pub use auth::{resolve_identity, AuthError};
pub use collection::{Collection, RequestOutcome, MAX_BATCH_DELETE, MAX_DOCUMENTS};
pub use document::{Document, FieldValue, ServerTime, StoredDocument};
pub use record::{
    decode, encode_segment, DrawRecord, Drawable, ImagePlacement, RecordError, Segment,
};
pub use session_format::{
    decode_collection_file, encode_collection_file, CollectionFileData, CollectionFileError,
    COLLECTION_FILE_MAGIC, COLLECTION_FILE_VERSION,
};

/// Number of most recent documents a live subscription delivers.
pub const SNAPSHOT_LIMIT: u32 = 500;

pub type RequestId = u64;
pub type SubscriptionId = u64;

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "sign_in")]
    SignIn {
        request: RequestId,
        token: Option<String>,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        subscription: SubscriptionId,
        limit: u32,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { subscription: SubscriptionId },
    #[serde(rename = "add")]
    Add {
        request: RequestId,
        document: Document,
    },
    #[serde(rename = "query")]
    Query { request: RequestId, limit: u32 },
    #[serde(rename = "delete_batch")]
    DeleteBatch {
        request: RequestId,
        ids: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, Encode, Decode, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "signed_in")]
    SignedIn { request: RequestId, uid: String },
    #[serde(rename = "snapshot")]
    Snapshot {
        subscription: SubscriptionId,
        documents: Vec<StoredDocument>,
    },
    #[serde(rename = "subscription_failed")]
    SubscriptionFailed {
        subscription: SubscriptionId,
        message: String,
    },
    #[serde(rename = "added")]
    Added {
        request: RequestId,
        id: String,
        server_time: ServerTime,
    },
    #[serde(rename = "query_result")]
    QueryResult {
        request: RequestId,
        documents: Vec<StoredDocument>,
    },
    #[serde(rename = "deleted")]
    Deleted { request: RequestId, count: u32 },
    #[serde(rename = "failed")]
    Failed { request: RequestId, message: String },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SignedIn { .. } => "signed_in",
            ServerMessage::Snapshot { .. } => "snapshot",
            ServerMessage::SubscriptionFailed { .. } => "subscription_failed",
            ServerMessage::Added { .. } => "added",
            ServerMessage::QueryResult { .. } => "query_result",
            ServerMessage::Deleted { .. } => "deleted",
            ServerMessage::Failed { .. } => "failed",
        }
    }
}

pub fn encode_message<T: Encode>(message: &T) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::encode_to_vec(message, bincode::config::standard())
}

pub fn decode_message<T: Decode<()>>(payload: &[u8]) -> Result<T, bincode::error::DecodeError> {
    bincode::decode_from_slice(payload, bincode::config::standard()).map(|(message, _)| message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_json_uses_type_tag() {
        let message = ClientMessage::Query {
            request: 7,
            limit: SNAPSHOT_LIMIT,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"query""#));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn server_message_survives_binary_frame() {
        let mut document = Document::new();
        document.set_number("x1", 1.5);
        document.set_text("color", "#ff0000");
        let message = ServerMessage::Snapshot {
            subscription: 3,
            documents: vec![StoredDocument {
                id: ServerTime::new(10, 1).document_id(),
                server_time: ServerTime::new(10, 1),
                document,
            }],
        };
        let payload = encode_message(&message).unwrap();
        let decoded: ServerMessage = decode_message(&payload).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.kind(), "snapshot");
    }
}
