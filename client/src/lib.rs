pub mod assets;
pub mod audio;
pub mod config;
pub mod error;
pub mod generate;
pub mod input;
pub mod memory;
pub mod placement;
pub mod raster;
pub mod render;
pub mod session;
pub mod state;
pub mod surface;
pub mod sync;
#[cfg(not(target_arch = "wasm32"))]
pub mod transport;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use config::BoardConfig;
pub use error::SessionError;
pub use memory::{MemoryStore, MemoryTransport};
pub use placement::{place_image, Placement};
pub use raster::RasterSurface;
pub use render::{replay, ReplayStats};
pub use session::BoardSession;
pub use surface::Surface;
pub use sync::{CancelToken, Subscription, SyncChannel, SyncEvent, Transport, TransportEvent};
#[cfg(not(target_arch = "wasm32"))]
pub use transport::WsTransport;
