use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use inkboard_shared::{
    decode_collection_file, encode_collection_file, CollectionFileData, CollectionFileError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("collection {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Format(#[from] CollectionFileError),
    #[error("s3 error: {0}")]
    S3(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_collection(&self, app_id: &str) -> Result<CollectionFileData, StorageError>;
    async fn save_collection(
        &self,
        app_id: &str,
        data: &CollectionFileData,
    ) -> Result<(), StorageError>;
}

pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path(&self, app_id: &str) -> PathBuf {
        self.data_dir.join(format!("{app_id}.bin"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load_collection(&self, app_id: &str) -> Result<CollectionFileData, StorageError> {
        let payload = match tokio::fs::read(self.path(app_id)).await {
            Ok(payload) => payload,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(app_id.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        Ok(decode_collection_file(&payload)?)
    }

    async fn save_collection(
        &self,
        app_id: &str,
        data: &CollectionFileData,
    ) -> Result<(), StorageError> {
        let payload = encode_collection_file(data)?;
        let path = self.path(app_id);
        let tmp = path.with_extension("bin.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3StorageConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

pub struct S3Storage {
    bucket: String,
    prefix: String,
    client: Client,
}

impl S3Storage {
    pub async fn new(config: S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let (Some(access_key_id), Some(secret_access_key)) = (
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
        ) {
            let creds = Credentials::new(access_key_id, secret_access_key, None, None, "static");
            loader = loader.credentials_provider(creds);
        }
        if let Some(region) = config.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint_url) = config.endpoint_url.as_ref() {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());
        Self {
            bucket: config.bucket,
            prefix: normalize_prefix(config.prefix.as_deref()),
            client,
        }
    }

    fn object_key(&self, app_id: &str) -> String {
        object_key(&self.prefix, app_id)
    }
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix.unwrap_or_default().trim_matches('/').to_string()
}

fn object_key(prefix: &str, app_id: &str) -> String {
    if prefix.is_empty() {
        format!("apps/{app_id}/drawings.bin")
    } else {
        format!("{prefix}/apps/{app_id}/drawings.bin")
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn load_collection(&self, app_id: &str) -> Result<CollectionFileData, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(app_id))
            .send()
            .await;
        let output = match response {
            Ok(output) => output,
            Err(error) => {
                if let Some(service_error) = error.as_service_error() {
                    if service_error.is_no_such_key() {
                        return Err(StorageError::NotFound(app_id.to_string()));
                    }
                }
                return Err(StorageError::S3(format!(
                    "failed to load {app_id}: {error:?}"
                )));
            }
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|error| StorageError::S3(format!("failed to read {app_id}: {error:?}")))?
            .into_bytes();
        Ok(decode_collection_file(&bytes)?)
    }

    async fn save_collection(
        &self,
        app_id: &str,
        data: &CollectionFileData,
    ) -> Result<(), StorageError> {
        let payload = encode_collection_file(data)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(app_id))
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|error| StorageError::S3(format!("failed to save {app_id}: {error:?}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use inkboard_shared::{encode_segment, Collection, DrawRecord, Point};

    use super::*;

    #[tokio::test]
    async fn file_storage_round_trips_collections() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());

        let mut collection = Collection::new();
        let segment = encode_segment(
            Point::new(0.0, 0.0),
            Point::new(5.0, 5.0),
            "#ff0000",
            5.0,
            "a",
        )
        .unwrap();
        collection.insert(DrawRecord::Segment(segment).to_document(), 7);
        let data = CollectionFileData {
            documents: collection.documents().to_vec(),
        };

        storage.save_collection("board", &data).await.unwrap();
        let loaded = storage.load_collection("board").await.unwrap();
        assert_eq!(loaded, data);
    }

    #[tokio::test]
    async fn file_storage_reports_missing_collections() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());
        assert!(matches!(
            storage.load_collection("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_storage_rejects_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.bin"), b"garbage").unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());
        assert!(matches!(
            storage.load_collection("bad").await,
            Err(StorageError::Format(_))
        ));
    }

    #[test]
    fn object_keys_are_namespaced_by_app_id() {
        assert_eq!(object_key("", "demo"), "apps/demo/drawings.bin");
        assert_eq!(
            object_key(&normalize_prefix(Some("/boards/")), "demo"),
            "boards/apps/demo/drawings.bin"
        );
    }
}
