//! Board session controller.
//!
//! A [`BoardSession`] owns everything one open board needs: the identity,
//! the local tool state, the latest snapshot, the surface it is rendered on,
//! the asset cache and the sync channel. Hosts drive it by calling
//! [`BoardSession::pump`] and forwarding input, resizes and asset loads.

use std::sync::Arc;

use image::RgbaImage;
use inkboard_shared::{encode_segment, DrawRecord, ImagePlacement, StoredDocument};

use crate::assets::{
    decode_data_uri_bytes, decode_image, is_data_uri, load_inline, AssetCache, AssetError,
};
use crate::config::BoardConfig;
use crate::error::SessionError;
use crate::generate::parse_generate_response;
use crate::input::{Phase, PointerEvent};
use crate::placement::place_image;
use crate::render::{draw_drawable, draw_resolved_asset, replay, ReplayStats};
use crate::state::DrawState;
use crate::surface::Surface;
use crate::sync::{CancelToken, Subscription, SyncChannel, SyncEvent, Transport};

pub struct BoardSession<S: Surface, T: Transport> {
    config: BoardConfig,
    identity: Option<String>,
    draw: DrawState,
    sync: SyncChannel<T>,
    subscription: Option<Subscription>,
    snapshot: Vec<StoredDocument>,
    surface: S,
    assets: AssetCache,
    last_error: Option<SessionError>,
    cancel: CancelToken,
}

impl<S: Surface, T: Transport> BoardSession<S, T> {
    pub fn new(config: BoardConfig, surface: S, transport: T) -> Result<Self, SessionError> {
        config.validate()?;
        let sync = SyncChannel::new(transport, config.snapshot_limit);
        Ok(Self {
            config,
            identity: None,
            draw: DrawState::default(),
            sync,
            subscription: None,
            snapshot: Vec::new(),
            surface,
            assets: AssetCache::new(),
            last_error: None,
            cancel: CancelToken::new(),
        })
    }

    /// Signs in once; the live subscription starts when sign-in completes.
    pub fn start(&mut self, token: Option<&str>) -> Result<(), SessionError> {
        if self.is_torn_down() {
            return Err(SessionError::Configuration("session is closed".to_string()));
        }
        self.sync.sign_in(token).map_err(|error| {
            let error = SessionError::Auth(error.to_string());
            self.fail(error.clone());
            error
        })?;
        Ok(())
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn draw_state(&self) -> &DrawState {
        &self.draw
    }

    pub fn draw_state_mut(&mut self) -> &mut DrawState {
        &mut self.draw
    }

    pub fn snapshot(&self) -> &[StoredDocument] {
        &self.snapshot
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<SessionError> {
        self.last_error.take()
    }

    /// Token cancelled by [`BoardSession::teardown`]. Hosts hand clones to
    /// their async work and drop results once it is cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn fail(&mut self, error: SessionError) {
        log::warn!("{error}");
        self.last_error = Some(error);
    }

    pub fn pump(&mut self) -> usize {
        if self.is_torn_down() {
            return 0;
        }
        let events = self.sync.poll();
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    pub fn handle_event(&mut self, event: SyncEvent) {
        if self.is_torn_down() {
            return;
        }
        match event {
            SyncEvent::Connected => log::info!("connected to {}", self.config.app_id),
            SyncEvent::SignedIn { uid, .. } => {
                log::info!("signed in as {uid}");
                self.identity = Some(uid);
                if self.subscription.is_none() {
                    match self.sync.subscribe(self.config.snapshot_limit) {
                        Ok(subscription) => self.subscription = Some(subscription),
                        Err(error) => self.fail(SessionError::SyncRead(error.to_string())),
                    }
                }
            }
            SyncEvent::SignInFailed { error, .. } => {
                self.fail(SessionError::Auth(error.to_string()))
            }
            SyncEvent::Snapshot {
                subscription,
                documents,
            } => {
                if self.subscription.map(|active| active.id()) != Some(subscription) {
                    return;
                }
                self.snapshot = documents;
                let stats = self.redraw();
                log::debug!(
                    "snapshot of {} documents: {} lines, {} images, {} deferred",
                    self.snapshot.len(),
                    stats.lines,
                    stats.images,
                    stats.deferred
                );
            }
            SyncEvent::SubscriptionFailed { error, .. } => {
                self.subscription = None;
                self.fail(SessionError::SyncRead(error.to_string()));
            }
            SyncEvent::Published { request, result } => match result {
                Ok(server_time) => {
                    log::debug!("record {request} stored at {}", server_time.document_id())
                }
                Err(error) => self.fail(SessionError::SyncWrite(error.to_string())),
            },
            SyncEvent::Cleared { result, .. } => match result {
                Ok(count) => log::info!("cleared {count} records"),
                Err(error) => self.fail(SessionError::SyncWrite(format!("clear failed: {error}"))),
            },
            SyncEvent::ConnectionLost { reason } => {
                self.subscription = None;
                self.fail(SessionError::SyncRead(reason));
            }
        }
    }

    pub fn redraw(&mut self) -> ReplayStats {
        replay(&mut self.surface, &self.snapshot, &mut self.assets)
    }

    /// Drag input. Each move draws and publishes one segment from the
    /// previous point; multi-touch is ignored.
    pub fn pointer(&mut self, event: PointerEvent) {
        if self.is_torn_down() {
            return;
        }
        let Some(point) = event.point() else {
            if event.phase == Phase::Up {
                self.draw.last_point = None;
            }
            return;
        };
        match event.phase {
            Phase::Down => self.draw.last_point = Some(point),
            Phase::Move => {
                let Some(previous) = self.draw.last_point else {
                    return;
                };
                self.draw.last_point = Some(point);
                let Some(author_id) = self.identity.clone() else {
                    log::debug!("drawing before sign-in is dropped");
                    return;
                };
                let segment = match encode_segment(
                    previous,
                    point,
                    self.draw.stroke_color(),
                    self.draw.size,
                    &author_id,
                ) {
                    Ok(segment) => segment,
                    Err(error) => {
                        log::debug!("segment rejected: {error}");
                        return;
                    }
                };
                self.publish_optimistic(DrawRecord::Segment(segment));
            }
            Phase::Up => self.draw.last_point = None,
        }
    }

    fn publish_optimistic(&mut self, record: DrawRecord) {
        draw_drawable(&mut self.surface, &record.drawable(), &mut self.assets);
        if let Err(error) = self.sync.publish(&record) {
            self.fail(SessionError::SyncWrite(error.to_string()));
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
        self.redraw();
    }

    pub fn clear_all(&mut self) {
        if self.is_torn_down() {
            return;
        }
        if let Err(error) = self.sync.clear_all() {
            self.fail(SessionError::SyncWrite(format!("clear failed: {error}")));
        }
    }

    /// Places an image centered at half the surface width, draws it locally
    /// and publishes it.
    pub fn merge_image(
        &mut self,
        url: &str,
        source_width: u32,
        source_height: u32,
    ) -> Option<ImagePlacement> {
        if self.is_torn_down() {
            return None;
        }
        let Some(author_id) = self.identity.clone() else {
            self.fail(SessionError::SyncWrite("not signed in".to_string()));
            return None;
        };
        let placement = place_image(
            source_width,
            source_height,
            self.surface.width(),
            self.surface.height(),
        );
        let image = ImagePlacement {
            url: url.to_string(),
            x: placement.x,
            y: placement.y,
            width: placement.width,
            height: placement.height,
            author_id,
        };
        self.publish_optimistic(DrawRecord::Image(image.clone()));
        Some(image)
    }

    pub fn merge_loaded_image(&mut self, url: &str, image: RgbaImage) -> Option<ImagePlacement> {
        if self.is_torn_down() {
            return None;
        }
        let (width, height) = image.dimensions();
        self.assets.insert_ready(url, image);
        self.merge_image(url, width, height)
    }

    pub fn merge_generated(&mut self, status: u16, body: &str) -> Option<ImagePlacement> {
        if self.is_torn_down() {
            return None;
        }
        let generated = match parse_generate_response(status, body) {
            Ok(generated) => generated,
            Err(error) => {
                self.fail(error);
                return None;
            }
        };
        let url = generated.data_uri();
        let decoded = decode_data_uri_bytes(&url).and_then(|bytes| decode_image(&bytes));
        match decoded {
            Ok(image) => self.merge_loaded_image(&url, image),
            Err(error) => {
                self.fail(SessionError::ExternalService(error.to_string()));
                None
            }
        }
    }

    /// Records a finished asset load and draws the image wherever the current
    /// snapshot places it.
    pub fn asset_loaded(
        &mut self,
        url: &str,
        result: Result<RgbaImage, AssetError>,
    ) -> Option<Arc<RgbaImage>> {
        if self.is_torn_down() {
            return None;
        }
        let image = self.assets.resolve(url, result)?;
        draw_resolved_asset(&mut self.surface, &self.snapshot, url, &mut self.assets);
        Some(image)
    }

    /// Resolves queued data-URI assets in place. Returns the remaining
    /// (remote) URLs for the host to fetch.
    pub fn load_inline_assets(&mut self) -> Vec<String> {
        let mut remote = Vec::new();
        for url in self.assets.take_requests() {
            if is_data_uri(&url) {
                let result = load_inline(&url);
                self.asset_loaded(&url, result);
            } else {
                remote.push(url);
            }
        }
        remote
    }

    /// Releases the subscription, closes the channel and cancels outstanding
    /// work. Everything delivered afterwards is ignored.
    pub fn teardown(&mut self) {
        if self.is_torn_down() {
            return;
        }
        if let Some(subscription) = self.subscription.take() {
            self.sync.unsubscribe(subscription);
        }
        self.sync.close();
        self.cancel.cancel();
        self.draw.last_point = None;
        log::info!("board {} closed", self.config.app_id);
    }
}

#[cfg(test)]
mod tests {
    use inkboard_shared::Point;

    use super::*;
    use crate::assets::png_data_uri;
    use crate::memory::{MemoryStore, MemoryTransport};
    use crate::raster::RasterSurface;
    use crate::surface::Rgba;

    fn session(store: &MemoryStore) -> BoardSession<RasterSurface, MemoryTransport> {
        let mut session = BoardSession::new(
            BoardConfig::default(),
            RasterSurface::new(100, 100),
            store.connect(),
        )
        .unwrap();
        session.start(None).unwrap();
        session.pump();
        session.pump();
        session
    }

    #[test]
    fn sign_in_then_subscribe() {
        let store = MemoryStore::new();
        let session = session(&store);
        assert!(session.identity().is_some());
        assert!(session.is_subscribed());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let store = MemoryStore::new();
        let config = BoardConfig {
            app_id: String::new(),
            ..BoardConfig::default()
        };
        assert!(matches!(
            BoardSession::new(config, RasterSurface::new(1, 1), store.connect()),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn drag_draws_before_the_store_answers() {
        let store = MemoryStore::new();
        let mut session = session(&store);
        session.pointer(PointerEvent::mouse(Phase::Down, 10.0, 50.0));
        session.pointer(PointerEvent::mouse(Phase::Move, 90.0, 50.0));
        assert_ne!(session.surface().pixel(50, 50), Some(Rgba::TRANSPARENT));
        assert_eq!(store.len(), 1);
        session.pump();
        assert_eq!(session.snapshot().len(), 1);
    }

    #[test]
    fn anonymous_sign_in_refused_sets_auth_error() {
        let store = MemoryStore::new();
        store.set_allow_anonymous(false);
        let mut session = BoardSession::new(
            BoardConfig::default(),
            RasterSurface::new(10, 10),
            store.connect(),
        )
        .unwrap();
        session.start(None).unwrap();
        session.pump();
        assert!(matches!(session.last_error(), Some(SessionError::Auth(_))));
        assert!(!session.is_subscribed());
    }

    #[test]
    fn generated_image_is_merged_and_published() {
        let store = MemoryStore::new();
        let mut session = session(&store);
        let url = png_data_uri(4, 2, [0, 0, 255, 255]);
        let payload = url.split_once(',').unwrap().1;
        let body = format!(r#"{{"predictions":[{{"bytesBase64Encoded":"{payload}"}}]}}"#);
        let placement = session.merge_generated(200, &body).unwrap();
        assert_eq!(
            (placement.x, placement.y, placement.width, placement.height),
            (25.0, 37.5, 50.0, 25.0)
        );
        assert_eq!(session.surface().pixel(50, 50), Some(Rgba([0, 0, 255, 255])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn generation_failure_surfaces_upstream_message() {
        let store = MemoryStore::new();
        let mut session = session(&store);
        assert!(session
            .merge_generated(429, r#"{"error":{"message":"quota exceeded"}}"#)
            .is_none());
        assert_eq!(
            session.last_error(),
            Some(&SessionError::ExternalService("quota exceeded".to_string()))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn inline_assets_resolve_without_the_host() {
        let store = MemoryStore::new();
        let mut author = session(&store);
        let url = png_data_uri(2, 2, [0, 255, 0, 255]);
        author.merge_image(&url, 2, 2).unwrap();

        let mut viewer = session(&store);
        viewer.pump();
        assert_eq!(viewer.surface().pixel(50, 50), Some(Rgba::TRANSPARENT));
        assert!(viewer.load_inline_assets().is_empty());
        assert_eq!(viewer.surface().pixel(50, 50), Some(Rgba([0, 255, 0, 255])));
        assert!(author.load_inline_assets().is_empty());
    }

    #[test]
    fn remote_assets_are_left_to_the_host() {
        let store = MemoryStore::new();
        let mut session = session(&store);
        session.merge_image("https://cdn.example.com/cat.png", 10, 10).unwrap();
        assert_eq!(
            session.load_inline_assets(),
            vec!["https://cdn.example.com/cat.png".to_string()]
        );
        let image = RgbaImage::from_pixel(1, 1, image::Rgba([200, 0, 0, 255]));
        session.pump();
        assert!(session
            .asset_loaded("https://cdn.example.com/cat.png", Ok(image))
            .is_some());
        assert_eq!(session.surface().pixel(50, 50), Some(Rgba([200, 0, 0, 255])));
    }

    #[test]
    fn points_outside_a_drag_are_ignored() {
        let store = MemoryStore::new();
        let mut session = session(&store);
        session.pointer(PointerEvent::mouse(Phase::Move, 5.0, 5.0));
        session.pointer(PointerEvent::touch(Phase::Down, 2, 5.0, 5.0));
        session.pointer(PointerEvent::touch(Phase::Move, 2, 50.0, 50.0));
        assert!(store.is_empty());
        assert_eq!(session.draw_state().last_point, None);
        session.pointer(PointerEvent::touch(Phase::Down, 1, 1.0, 1.0));
        assert_eq!(session.draw_state().last_point, Some(Point::new(1.0, 1.0)));
    }
}
