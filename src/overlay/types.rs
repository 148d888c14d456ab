//! Overlay records and geometry validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LiveError, Result};

/// Kind of overlay element. Unknown tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OverlayKind {
    Text,
    Image,
    Custom(String),
}

impl From<String> for OverlayKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "text" => OverlayKind::Text,
            "image" => OverlayKind::Image,
            _ => OverlayKind::Custom(tag),
        }
    }
}

impl From<OverlayKind> for String {
    fn from(kind: OverlayKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayKind::Text => f.write_str("text"),
            OverlayKind::Image => f.write_str("image"),
            OverlayKind::Custom(tag) => f.write_str(tag),
        }
    }
}

/// Placement of an overlay on the output frame, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    #[serde(alias = "zIndex")]
    pub z_index: i64,
}

impl Geometry {
    /// Position and stacking order must be non-negative, size strictly positive.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("x", self.x, 0),
            ("y", self.y, 0),
            ("z_index", self.z_index, 0),
            ("width", self.width, 1),
            ("height", self.height, 1),
        ];
        for (field, value, min) in checks {
            if value < min {
                return Err(LiveError::InvalidGeometry(format!(
                    "{} must be >= {}, got {}",
                    field, min, value
                )));
            }
        }
        Ok(())
    }

    /// Overwrite the fields present in `patch`
    pub fn apply(&mut self, patch: &GeometryPatch) {
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(z_index) = patch.z_index {
            self.z_index = z_index;
        }
    }
}

/// Overlay attached to a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub id: String,
    /// Weak reference; the stream may be stopped, deleted or never started
    pub stream_id: String,
    pub kind: OverlayKind,
    /// Text to draw, or a reference to the image
    pub content: String,
    pub geometry: Geometry,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial geometry update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryPatch {
    pub x: Option<i64>,
    pub y: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    #[serde(alias = "zIndex")]
    pub z_index: Option<i64>,
}

/// Partial overlay update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayPatch {
    pub kind: Option<OverlayKind>,
    pub content: Option<String>,
    pub geometry: Option<GeometryPatch>,
}
