use inkboard_shared::SNAPSHOT_LIMIT;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::generate::GenerateConfig;

const MAX_APP_ID_LEN: usize = 64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    /// Namespace of the shared collection.
    pub app_id: String,
    /// Base `ws://` or `wss://` url of the document store.
    pub server_url: String,
    pub snapshot_limit: u32,
    pub generate: Option<GenerateConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            app_id: "default".to_string(),
            server_url: "ws://localhost:3000".to_string(),
            snapshot_limit: SNAPSHOT_LIMIT,
            generate: None,
        }
    }
}

impl BoardConfig {
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        let config: BoardConfig = serde_json::from_str(text)
            .map_err(|error| SessionError::Configuration(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        let app_id = self.app_id.as_str();
        if app_id.is_empty()
            || app_id.len() > MAX_APP_ID_LEN
            || !app_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SessionError::Configuration(format!(
                "app id {app_id:?} must be 1-{MAX_APP_ID_LEN} characters of [A-Za-z0-9_-]"
            )));
        }
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(SessionError::Configuration(format!(
                "server url must start with ws:// or wss://, got {:?}",
                self.server_url
            )));
        }
        if self.snapshot_limit == 0 || self.snapshot_limit > SNAPSHOT_LIMIT {
            return Err(SessionError::Configuration(format!(
                "snapshot limit must be between 1 and {SNAPSHOT_LIMIT}"
            )));
        }
        if let Some(generate) = &self.generate {
            generate.validate()?;
        }
        Ok(())
    }

    /// WebSocket url of this board's collection.
    pub fn collection_url(&self) -> String {
        format!("{}/ws/{}", self.server_url.trim_end_matches('/'), self.app_id)
    }
}
