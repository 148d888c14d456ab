//! Overlay metadata
//!
//! Text and image elements positioned on top of a stream's output. This
//! module only stores and validates the descriptions; rendering belongs to
//! the transcoder.

pub mod store;
pub mod types;

pub use store::OverlayStore;
pub use types::{Geometry, Overlay, OverlayKind, OverlayPatch};
