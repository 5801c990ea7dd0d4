//! Image assets referenced by image records.
//!
//! Loading is asynchronous from the replayer's point of view: a record whose
//! asset is not ready is skipped, its URL is queued, and the host resolves it
//! later through [`AssetCache::resolve`].

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbaImage;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssetError {
    #[error("not a base64 data uri")]
    NotDataUri,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("failed to decode image: {0}")]
    Image(String),
    #[error("remote assets need a host loader: {0}")]
    Remote(String),
}

#[derive(Clone, Debug)]
pub enum AssetState {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed(AssetError),
}

#[derive(Default)]
pub struct AssetCache {
    entries: HashMap<String, AssetState>,
    queued: Vec<String>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&AssetState> {
        self.entries.get(url)
    }

    pub fn ready(&self, url: &str) -> Option<Arc<RgbaImage>> {
        match self.entries.get(url)? {
            AssetState::Ready(image) => Some(image.clone()),
            _ => None,
        }
    }

    /// Marks `url` as wanted. Returns `false` when it is already known.
    pub fn request(&mut self, url: &str) -> bool {
        if self.entries.contains_key(url) {
            return false;
        }
        self.entries.insert(url.to_string(), AssetState::Pending);
        self.queued.push(url.to_string());
        true
    }

    pub fn take_requests(&mut self) -> Vec<String> {
        std::mem::take(&mut self.queued)
    }

    pub fn insert_ready(&mut self, url: &str, image: RgbaImage) -> Arc<RgbaImage> {
        let image = Arc::new(image);
        self.entries
            .insert(url.to_string(), AssetState::Ready(image.clone()));
        image
    }

    /// Records the outcome of a load. Returns the image when it became ready.
    pub fn resolve(
        &mut self,
        url: &str,
        result: Result<RgbaImage, AssetError>,
    ) -> Option<Arc<RgbaImage>> {
        match result {
            Ok(image) => Some(self.insert_ready(url, image)),
            Err(error) => {
                log::warn!("asset {} failed: {error}", preview(url));
                self.entries
                    .insert(url.to_string(), AssetState::Failed(error));
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn preview(url: &str) -> &str {
    let end = url
        .char_indices()
        .nth(48)
        .map(|(index, _)| index)
        .unwrap_or(url.len());
    &url[..end]
}

pub fn is_data_uri(url: &str) -> bool {
    url.starts_with("data:")
}

pub fn data_uri(mime: &str, base64_payload: &str) -> String {
    format!("data:{mime};base64,{base64_payload}")
}

pub fn decode_data_uri_bytes(url: &str) -> Result<Vec<u8>, AssetError> {
    let rest = url.strip_prefix("data:").ok_or(AssetError::NotDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(AssetError::NotDataUri)?;
    if !meta.ends_with(";base64") {
        return Err(AssetError::NotDataUri);
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|error| AssetError::Base64(error.to_string()))
}

pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, AssetError> {
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgba8())
        .map_err(|error| AssetError::Image(error.to_string()))
}

/// Loads assets that need no network: data URIs decode in place, anything
/// else fails with [`AssetError::Remote`].
pub fn load_inline(url: &str) -> Result<RgbaImage, AssetError> {
    if !is_data_uri(url) {
        return Err(AssetError::Remote(preview(url).to_string()));
    }
    decode_image(&decode_data_uri_bytes(url)?)
}

#[cfg(test)]
pub(crate) fn png_data_uri(width: u32, height: u32, color: [u8; 4]) -> String {
    use std::io::Cursor;

    let image = RgbaImage::from_pixel(width, height, image::Rgba(color));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    data_uri("image/png", &STANDARD.encode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_png_decodes() {
        let url = png_data_uri(3, 2, [9, 8, 7, 255]);
        let image = load_inline(&url).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [9, 8, 7, 255]);
    }

    #[test]
    fn malformed_data_uris_are_errors() {
        assert_eq!(
            decode_data_uri_bytes("data:image/png,plain"),
            Err(AssetError::NotDataUri)
        );
        assert!(matches!(
            decode_data_uri_bytes("data:image/png;base64,!!!"),
            Err(AssetError::Base64(_))
        ));
        assert!(matches!(
            load_inline("https://example.com/a.png"),
            Err(AssetError::Remote(_))
        ));
    }

    #[test]
    fn request_queues_each_url_once() {
        let mut cache = AssetCache::new();
        assert!(cache.request("data:a"));
        assert!(!cache.request("data:a"));
        assert_eq!(cache.take_requests(), vec!["data:a".to_string()]);
        assert!(cache.take_requests().is_empty());
        assert!(matches!(cache.get("data:a"), Some(AssetState::Pending)));
    }

    #[test]
    fn resolve_records_failures_without_readiness() {
        let mut cache = AssetCache::new();
        cache.request("data:x");
        assert!(cache
            .resolve("data:x", Err(AssetError::NotDataUri))
            .is_none());
        assert!(matches!(cache.get("data:x"), Some(AssetState::Failed(_))));
        assert!(cache.ready("data:x").is_none());
    }
}
