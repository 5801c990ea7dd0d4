use std::sync::Arc;

use inkboard_shared::{Collection, CollectionFileData};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::logic::count_undrawable;
use crate::state::{AppState, CollectionState};
use crate::storage::StorageError;

const MAX_APP_ID_LEN: usize = 64;

/// Application ids name collections on disk and in S3 keys, so only a
/// conservative character set is accepted.
pub fn normalize_app_id(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_APP_ID_LEN {
        return None;
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return None;
    }
    Some(value.to_string())
}

pub async fn get_or_create_collection(
    state: &AppState,
    app_id: &str,
) -> Arc<RwLock<CollectionState>> {
    if let Some(collection) = state.collections.read().await.get(app_id).cloned() {
        return collection;
    }
    info!(app_id, "loading collection");
    let documents = match state.storage.load_collection(app_id).await {
        Ok(data) => data.documents,
        Err(StorageError::NotFound(_)) => Vec::new(),
        Err(error) => {
            warn!(app_id, %error, "failed to load collection, starting empty");
            Vec::new()
        }
    };
    let loaded = CollectionState::new(Collection::from_documents(documents));
    let undrawable = count_undrawable(&loaded);
    if undrawable > 0 {
        warn!(app_id, undrawable, "collection holds documents clients will skip");
    }
    let loaded = Arc::new(RwLock::new(loaded));
    let mut collections = state.collections.write().await;
    let entry = collections
        .entry(app_id.to_string())
        .or_insert_with(|| loaded.clone());
    entry.clone()
}

pub async fn save_collection(state: &AppState, app_id: &str, data: &CollectionFileData) {
    match state.storage.save_collection(app_id, data).await {
        Ok(()) => info!(app_id, documents = data.documents.len(), "saved collection"),
        Err(error) => warn!(app_id, %error, "failed to save collection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_ids_are_restricted() {
        assert_eq!(normalize_app_id(" board-1 "), Some("board-1".to_string()));
        assert_eq!(normalize_app_id("a_b"), Some("a_b".to_string()));
        assert_eq!(normalize_app_id("../etc"), None);
        assert_eq!(normalize_app_id(""), None);
        assert_eq!(normalize_app_id(&"x".repeat(65)), None);
    }
}
