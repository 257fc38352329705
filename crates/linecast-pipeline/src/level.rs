//! Input level adjustment.
//!
//! Stretches the intensity band `[low, high]` of a grayscale image onto
//! the full `0..=255` range with
//! [`imageproc::contrast::stretch_contrast`], clipping whatever lies
//! outside it. The bounds can be fitted to an image with
//! [`detect_levels`], which clips a fixed fraction of pixels at each
//! end.

use image::GrayImage;
use imageproc::contrast::stretch_contrast;
use imageproc::stats::cumulative_histogram;

use crate::node::Filter;
use crate::settings::{LevelSettings, Validate};
use crate::types::ConfigError;

/// Map `[low, high]` onto `[0, 255]`.
///
/// Bounds with `low >= high` return the image unchanged.
#[must_use = "returns the adjusted image"]
pub fn level_adjust(image: &GrayImage, low: u8, high: u8) -> GrayImage {
    if low >= high {
        return image.clone();
    }
    stretch_contrast(image, low, high, 0, u8::MAX)
}

/// Level bounds that clip at most `margin` of the pixels at each end.
///
/// `low` is the darkest intensity with more than `margin` of the pixels
/// at or below it, and `high` the darkest with at least `1 - margin` at
/// or below it. The bounds are kept at least one level apart. An empty
/// image gives the identity bounds `(0, 255)`.
#[must_use]
pub fn detect_levels(image: &GrayImage, margin: f64) -> (u8, u8) {
    let cumulative = cumulative_histogram(image).channels[0];
    if cumulative[255] == 0 {
        return (0, u8::MAX);
    }
    let total = f64::from(cumulative[255]);

    let first_above = |fraction: f64, inclusive: bool| -> u8 {
        let target = fraction * total;
        let index = cumulative
            .iter()
            .position(|&count| {
                let count = f64::from(count);
                if inclusive { count >= target } else { count > target }
            })
            .unwrap_or(255);
        u8::try_from(index).unwrap_or(u8::MAX)
    };

    let low = first_above(margin, false);
    let high = first_above(1.0 - margin, true);

    if high > low {
        (low, high)
    } else if low == u8::MAX {
        (u8::MAX - 1, u8::MAX)
    } else {
        (low, low + 1)
    }
}

/// Level adjustment stage.
#[derive(Debug, Clone)]
pub struct LevelAdjust {
    enable: bool,
    low: u8,
    high: u8,
}

impl Filter for LevelAdjust {
    type Settings = LevelSettings;
    type Input = GrayImage;
    type Output = GrayImage;

    const NAME: &'static str = "level";

    fn new(settings: &LevelSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            enable: settings.enable,
            low: settings.low,
            high: settings.high,
        })
    }

    fn filter(&self, input: &GrayImage) -> Option<GrayImage> {
        if !self.enable {
            return Some(input.clone());
        }
        Some(level_adjust(input, self.low, self.high))
    }
}
