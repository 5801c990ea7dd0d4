use inkboard_shared::{decode, Drawable, StoredDocument};

use crate::assets::{AssetCache, AssetState};
use crate::surface::Surface;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: usize,
    pub images: usize,
    pub deferred: usize,
    pub skipped: usize,
}

/// Draws one primitive. Image primitives whose asset is not ready are
/// requested from the cache and left out; returns whether anything was drawn.
pub fn draw_drawable<S: Surface>(
    surface: &mut S,
    drawable: &Drawable,
    assets: &mut AssetCache,
) -> bool {
    match drawable {
        Drawable::Line {
            from,
            to,
            color,
            width,
        } => {
            surface.stroke_line(*from, *to, color, *width);
            true
        }
        Drawable::Blit {
            url,
            x,
            y,
            width,
            height,
        } => match assets.get(url) {
            Some(AssetState::Ready(image)) => {
                let image = image.clone();
                surface.draw_image(&image, *x, *y, *width, *height);
                true
            }
            Some(AssetState::Pending) | Some(AssetState::Failed(_)) => false,
            None => {
                assets.request(url);
                false
            }
        },
    }
}

pub fn replay<S: Surface>(
    surface: &mut S,
    documents: &[StoredDocument],
    assets: &mut AssetCache,
) -> ReplayStats {
    surface.clear();
    let mut stats = ReplayStats::default();
    for stored in documents {
        let Some(drawable) = decode(stored) else {
            stats.skipped += 1;
            continue;
        };
        let drawn = draw_drawable(surface, &drawable, assets);
        match (&drawable, drawn) {
            (Drawable::Line { .. }, _) => stats.lines += 1,
            (Drawable::Blit { .. }, true) => stats.images += 1,
            (Drawable::Blit { .. }, false) => stats.deferred += 1,
        }
    }
    if stats.skipped > 0 {
        log::debug!("replay skipped {} malformed documents", stats.skipped);
    }
    stats
}

/// Draws a freshly loaded asset at every place the snapshot references it,
/// on top of whatever is already on the surface.
pub fn draw_resolved_asset<S: Surface>(
    surface: &mut S,
    documents: &[StoredDocument],
    url: &str,
    assets: &mut AssetCache,
) -> usize {
    let mut drawn = 0;
    for stored in documents {
        let Some(drawable) = decode(stored) else {
            continue;
        };
        let matches = matches!(&drawable, Drawable::Blit { url: target, .. } if target == url);
        if matches && draw_drawable(surface, &drawable, assets) {
            drawn += 1;
        }
    }
    drawn
}
