//! Tunable constants for containment, layout, and change detection.
//!
//! Hosts may ship a JSON override; every field is optional and falls back
//! to the defaults below.

use crate::error::{CanvasError, Result};
use serde::{Deserialize, Serialize};

// ─── Folder layout ───────────────────────────────────────────────────────

/// Grid arrangement parameters for GROUP containers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub padding_left: f32,
    /// Clears the folder's title bar; keep it >= `CanvasConfig::header_offset`.
    pub padding_top: f32,
    pub padding_right: f32,
    pub padding_bottom: f32,
    /// Spacing between grid cells on both axes.
    pub gap: f32,
    /// Two children whose `y` differ by less than this share a visual row.
    pub row_band: f32,
    /// Floor for `resize_to_fit`.
    pub min_width: f32,
    pub min_height: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            padding_left: 20.0,
            padding_top: 60.0,
            padding_right: 20.0,
            padding_bottom: 20.0,
            gap: 20.0,
            row_band: 60.0,
            min_width: 300.0,
            min_height: 200.0,
        }
    }
}

// ─── Canvas ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Minimum `y` of a child inside its parent (title bar safe zone).
    pub header_offset: f32,
    /// A child whose overlap with its parent drops below this escapes.
    pub escape_ratio: f32,
    /// A node overlapping a container by more than this enters it.
    pub entry_ratio: f32,
    /// Position/size differences at or below this are not changes.
    pub position_tolerance: f32,
    /// Pass limit for GROUP expansion while searching.
    pub search_expansion_cap: usize,
    pub layout: LayoutConfig,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            header_offset: 40.0,
            escape_ratio: 0.2,
            entry_ratio: 0.2,
            position_tolerance: 1.0,
            search_expansion_cap: 100,
            layout: LayoutConfig::default(),
        }
    }
}

impl CanvasConfig {
    /// Parse a (possibly partial) JSON override.
    ///
    /// # Errors
    /// Malformed JSON, or ratios outside `[0, 1]`.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CanvasConfig =
            serde_json::from_str(json).map_err(|e| CanvasError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("escape_ratio", self.escape_ratio),
            ("entry_ratio", self.entry_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CanvasError::Config(format!(
                    "{name} must be within [0, 1], got {ratio}"
                )));
            }
        }
        if self.position_tolerance < 0.0 {
            return Err(CanvasError::Config(
                "position_tolerance must not be negative".into(),
            ));
        }
        if self.search_expansion_cap == 0 {
            return Err(CanvasError::Config(
                "search_expansion_cap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
