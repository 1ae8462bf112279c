//! Heatmap intensity mapping
//!
//! Maps a line count to a color on a log scale relative to the report-wide
//! maximum: green for rarely executed lines, red for the hottest ones.

use std::fmt;

/// Hue for the coldest non-zero count
const COLD_HUE: f64 = 120.0;
const SATURATION_PCT: u8 = 85;
const LIGHTNESS_PCT: u8 = 45;
const ALPHA: f64 = 0.85;

/// An HSLA color with fixed saturation, lightness and alpha
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsla {
    pub hue: f64,
    pub saturation: u8,
    pub lightness: u8,
    pub alpha: f64,
}

impl fmt::Display for Hsla {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hsla({}, {}%, {}%, {})",
            self.hue, self.saturation, self.lightness, self.alpha
        )
    }
}

/// Log-scaled position of `count` between 0 and `global_max`, in [0, 1]
pub fn ratio(count: u64, global_max: u64) -> f64 {
    let log_count = (count as f64).ln_1p();
    let log_max = (global_max.max(1) as f64).ln_1p();
    (log_count / log_max).clamp(0.0, 1.0)
}

/// Color for a count; `None` means no highlight
pub fn intensity(count: u64, global_max: u64) -> Option<Hsla> {
    if count == 0 {
        return None;
    }
    Some(Hsla {
        hue: COLD_HUE * (1.0 - ratio(count, global_max)),
        saturation: SATURATION_PCT,
        lightness: LIGHTNESS_PCT,
        alpha: ALPHA,
    })
}
