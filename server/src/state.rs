use std::collections::HashMap;
use std::sync::Arc;

use inkboard_shared::{Collection, CollectionFileData, ServerMessage, SubscriptionId};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub collections: Arc<RwLock<HashMap<String, Arc<RwLock<CollectionState>>>>>,
    pub storage: Arc<dyn Storage>,
    pub allow_anonymous: bool,
}

/// A connected client and the live queries it holds on the collection.
pub struct Peer {
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    pub subscriptions: HashMap<SubscriptionId, usize>,
}

pub struct CollectionState {
    pub collection: Collection,
    pub peers: HashMap<Uuid, Peer>,
    pub dirty: bool,
}

impl CollectionState {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            peers: HashMap::new(),
            dirty: false,
        }
    }

    pub fn to_file_data(&self) -> CollectionFileData {
        CollectionFileData {
            documents: self.collection.documents().to_vec(),
        }
    }
}
