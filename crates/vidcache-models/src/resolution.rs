//! Rendition ladder and transcode sizing rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Height used for [`Resolution::Original`]; larger than any real tier.
pub const ORIGINAL_HEIGHT: u32 = 99_999;

/// Margin applied to size estimates to absorb compression variance.
const SIZE_ESTIMATE_MARGIN: f64 = 1.1;

/// Target resolution tier.
///
/// Variants are declared in ascending height order, so the derived `Ord`
/// sorts by height with `Original` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    P240,
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
    Original,
}

impl Resolution {
    /// All tiers, lowest first.
    pub const ALL: [Resolution; 8] = [
        Resolution::P240,
        Resolution::P360,
        Resolution::P480,
        Resolution::P720,
        Resolution::P1080,
        Resolution::P1440,
        Resolution::P2160,
        Resolution::Original,
    ];

    /// Pixel height of the tier (short edge of the output).
    pub fn height(&self) -> u32 {
        match self {
            Resolution::P240 => 240,
            Resolution::P360 => 360,
            Resolution::P480 => 480,
            Resolution::P720 => 720,
            Resolution::P1080 => 1080,
            Resolution::P1440 => 1440,
            Resolution::P2160 => 2160,
            Resolution::Original => ORIGINAL_HEIGHT,
        }
    }

    /// Nominal 16:9 long-edge width. `None` for `Original`.
    pub fn nominal_width(&self) -> Option<u32> {
        match self {
            Resolution::P240 => Some(426),
            Resolution::P360 => Some(640),
            Resolution::P480 => Some(854),
            Resolution::P720 => Some(1280),
            Resolution::P1080 => Some(1920),
            Resolution::P1440 => Some(2560),
            Resolution::P2160 => Some(3840),
            Resolution::Original => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::P240 => "p240",
            Resolution::P360 => "p360",
            Resolution::P480 => "p480",
            Resolution::P720 => "p720",
            Resolution::P1080 => "p1080",
            Resolution::P1440 => "p1440",
            Resolution::P2160 => "p2160",
            Resolution::Original => "original",
        }
    }

    pub fn is_original(&self) -> bool {
        matches!(self, Resolution::Original)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Resolution::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownResolution(s.to_string()))
    }
}

/// Short edge of a source frame. Tier heights apply to this edge, so a
/// portrait 1080x1920 source is a 1080p source.
pub fn short_edge(width: u32, height: u32) -> u32 {
    width.min(height)
}

/// Whether producing `target` from a `width`x`height` source requires a
/// downscale.
pub fn needs_transcode(width: u32, height: u32, target: Resolution) -> bool {
    if target.is_original() {
        return false;
    }
    target.height() < short_edge(width, height)
}

/// Estimate the output size of a transcode to `target`.
///
/// Scales `source_size` by the ratio of target pixels to source pixels and
/// adds a 10% margin.
pub fn estimate_output_size(source_size: u64, width: u32, height: u32, target: Resolution) -> u64 {
    let Some(target_width) = target.nominal_width() else {
        return source_size;
    };
    let source_pixels = u64::from(width) * u64::from(height);
    if source_pixels == 0 {
        return source_size;
    }
    let target_pixels = u64::from(target_width) * u64::from(target.height());
    let ratio = target_pixels as f64 / source_pixels as f64;
    (source_size as f64 * ratio * SIZE_ESTIMATE_MARGIN).round() as u64
}
