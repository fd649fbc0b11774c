use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, TraceError};

/// Fill discipline for adjacent color regions.
///
/// `Abutting` contracts paths slightly at shared edges with `evenodd`
/// fill so inks do not overlap (the print default). `Overlapping`
/// expands paths slightly with `nonzero` fill, better for complex or
/// non-adjacent shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FillMethod {
    #[default]
    Abutting,
    Overlapping,
}

/// Z-ordering of the emitted layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LayerOrder {
    /// Darkest ink first (bottom), lightest last. Print default.
    #[default]
    DarkToLight,
    LightToDark,
}

/// All pipeline parameters in one explicit struct; no ambient state.
///
/// Serializable so presets can be stored alongside output documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Target palette size, 1..=30.
    pub max_colors: usize,
    /// Initial tile dimension in pixels; may shrink under memory pressure.
    pub tile_size: u32,
    /// Tile overlap in pixels so seam-crossing contours can be rejoined.
    pub tile_overlap: u32,
    /// Hard ceiling for pipeline working memory.
    pub memory_budget_mb: usize,
    /// Base tolerance of the luma-weighted color distance used for
    /// mask membership; adapted per target brightness.
    pub color_tolerance: f32,
    /// Douglas-Peucker perpendicular-distance tolerance in pixels.
    pub simplify_tolerance: f64,
    /// Turn angle above which a vertex is a hard corner, degrees.
    pub corner_angle_deg: f64,
    pub max_paths_per_layer: usize,
    /// Size cap for the serialized document; exceeding it triggers the
    /// degradation ladder, never an error.
    pub max_output_bytes: usize,
    pub fill_method: FillMethod,
    pub layer_order: LayerOrder,
    /// Fixed RNG seed for palette clustering. Set for reproducible runs;
    /// `None` seeds from the OS.
    pub palette_seed: Option<u64>,
    /// Palette entries whose image coverage falls below this fraction
    /// are skipped entirely.
    pub min_coverage: f32,
    /// Acceptable mean point-to-curve distance for a fitted cubic, px.
    pub curve_fit_error: f64,
    /// Single foreground/background layer via automatic (Otsu)
    /// thresholding instead of palette clustering.
    pub binary_mode: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_colors: 5,
            tile_size: 512,
            tile_overlap: 32,
            memory_budget_mb: 150,
            color_tolerance: 45.0,
            simplify_tolerance: 1.5,
            corner_angle_deg: 60.0,
            max_paths_per_layer: 1000,
            max_output_bytes: 20_000_000,
            fill_method: FillMethod::default(),
            layer_order: LayerOrder::default(),
            palette_seed: None,
            min_coverage: 0.01,
            curve_fit_error: 2.0,
            binary_mode: false,
        }
    }
}

impl TraceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_colors == 0 || self.max_colors > 30 {
            return Err(TraceError::InvalidConfig(format!(
                "max_colors {} outside 1..=30",
                self.max_colors
            )));
        }
        if self.tile_size < crate::tiles::MIN_TILE_SIZE {
            return Err(TraceError::InvalidConfig(format!(
                "tile_size {} below minimum {}",
                self.tile_size,
                crate::tiles::MIN_TILE_SIZE
            )));
        }
        if self.memory_budget_mb == 0 {
            return Err(TraceError::InvalidConfig("memory_budget_mb is zero".into()));
        }
        if !(self.color_tolerance > 0.0) {
            return Err(TraceError::InvalidConfig(format!(
                "color_tolerance {} must be positive",
                self.color_tolerance
            )));
        }
        if !(self.simplify_tolerance > 0.0) {
            return Err(TraceError::InvalidConfig(format!(
                "simplify_tolerance {} must be positive",
                self.simplify_tolerance
            )));
        }
        if !(0.0..=180.0).contains(&self.corner_angle_deg) {
            return Err(TraceError::InvalidConfig(format!(
                "corner_angle_deg {} outside 0..=180",
                self.corner_angle_deg
            )));
        }
        if self.max_output_bytes < crate::svg::PLACEHOLDER_RESERVE {
            return Err(TraceError::InvalidConfig(format!(
                "max_output_bytes {} too small for any document",
                self.max_output_bytes
            )));
        }
        Ok(())
    }

    /// Effective overlap: never below the floor needed by seam stitching.
    pub fn effective_overlap(&self) -> u32 {
        self.tile_overlap.max(crate::tiles::MIN_OVERLAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TraceConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range() {
        let mut cfg = TraceConfig::default();
        cfg.max_colors = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TraceConfig::default();
        cfg.max_colors = 31;
        assert!(cfg.validate().is_err());

        let mut cfg = TraceConfig::default();
        cfg.memory_budget_mb = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TraceConfig::default();
        cfg.simplify_tolerance = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = TraceConfig {
            max_colors: 8,
            fill_method: FillMethod::Overlapping,
            palette_seed: Some(7),
            ..TraceConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TraceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_colors, 8);
        assert_eq!(back.fill_method, FillMethod::Overlapping);
        assert_eq!(back.palette_seed, Some(7));
    }

    #[test]
    fn fill_method_serializes_snake_case() {
        assert_eq!(FillMethod::Abutting.to_string(), "abutting");
        let json = serde_json::to_string(&FillMethod::Overlapping).unwrap();
        assert_eq!(json, "\"overlapping\"");
    }
}
