//! Gaussian pre-blur and Sobel gradient stages.
//!
//! These feed the Canny detector: a grayscale image is optionally
//! smoothed with [`imageproc::filter::gaussian_blur_f32`], then
//! differentiated with the 3×3 Sobel operators into a
//! [`GradientField`]. [`detect_gradient_scale`] picks a magnitude scale
//! that brightens weak images to a usable range.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use ndarray::Array2;
use tracing::warn;

use crate::node::Filter;
use crate::settings::{GaussianSettings, GradientSettings, Validate};
use crate::types::{ConfigError, GradientField, Phasor, Real};

/// Largest absolute response of a 3×3 Sobel kernel per unit of input.
const SOBEL_GAIN: f64 = 4.0;

/// Normalized magnitude the detected scale maps the percentile to.
const SCALE_TARGET: f64 = 0.9;

/// Fewest nonzero magnitudes scale detection will work from.
const MIN_SCALE_SAMPLES: usize = 10;

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Sobel derivatives of `image`, normalized against `maximum`.
#[must_use]
pub fn sobel_gradient<T: Real>(image: &GrayImage, maximum: T) -> GradientField<T> {
    let gx = imageproc::gradients::horizontal_sobel(image);
    let gy = imageproc::gradients::vertical_sobel(image);
    GradientField {
        dx: to_array(&gx),
        dy: to_array(&gy),
        maximum,
    }
}

fn to_array<T: Real>(image: &Image<Luma<i16>>) -> Array2<T> {
    let cols = image.width() as usize;
    let rows = image.height() as usize;
    let raw = image.as_raw();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        T::from_f64(f64::from(raw[r * cols + c]))
    })
}

/// Magnitude scale that maps the `percentile` of the nonzero
/// magnitudes of `field` to 0.9.
///
/// `field` should be computed at scale 1. The result is rounded and
/// clamped to the accepted scale range. With fewer than ten nonzero
/// magnitudes there is nothing to fit and the scale is 1.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn detect_gradient_scale<T: Real>(field: &GradientField<T>, percentile: f64) -> f64 {
    let phasor = Phasor::from_gradient(field);
    let mut magnitudes: Vec<f64> = phasor
        .magnitude
        .iter()
        .map(|&m| m.into_f64())
        .filter(|&m| m > 0.0)
        .collect();

    if magnitudes.len() < MIN_SCALE_SAMPLES {
        warn!(
            nonzero = magnitudes.len(),
            "gradient has too few nonzero values to detect a scale"
        );
        return GradientSettings::DEFAULT_SCALE;
    }

    let rank = (percentile.clamp(0.0, 1.0) * (magnitudes.len() - 1) as f64).round() as usize;
    let (_, value, _) = magnitudes.select_nth_unstable_by(rank, f64::total_cmp);

    (SCALE_TARGET / *value)
        .round()
        .clamp(GradientSettings::DEFAULT_SCALE, GradientSettings::MAX_SCALE)
}

// ─── Stages ──────────────────────────────────────────────────────────

/// Gaussian blur stage.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    sigma: f32,
}

impl Filter for GaussianBlur {
    type Settings = GaussianSettings;
    type Input = GrayImage;
    type Output = GrayImage;

    const NAME: &'static str = "gaussian";

    fn new(settings: &GaussianSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            sigma: if settings.enable { settings.sigma } else { 0.0 },
        })
    }

    fn filter(&self, input: &GrayImage) -> Option<GrayImage> {
        Some(gaussian_blur(input, self.sigma))
    }
}

/// Sobel gradient stage.
#[derive(Debug, Clone)]
pub struct Gradient<T> {
    enable: bool,
    maximum: T,
}

impl<T: Real> Gradient<T> {
    /// Normalization divisor used for the produced fields.
    #[must_use]
    pub const fn maximum(&self) -> T {
        self.maximum
    }
}

impl<T: Real> Filter for Gradient<T> {
    type Settings = GradientSettings;
    type Input = GrayImage;
    type Output = GradientField<T>;

    const NAME: &'static str = "gradient";

    fn new(settings: &GradientSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            enable: settings.enable,
            maximum: T::from_f64(SOBEL_GAIN * settings.maximum_input / settings.scale),
        })
    }

    fn filter(&self, input: &GrayImage) -> Option<GradientField<T>> {
        self.enable.then(|| sobel_gradient(input, self.maximum))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Phasor;

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn zero_sigma_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 0.0), img);
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 2.0);
        let left = blurred.get_pixel(4, 5).0[0];
        let right = blurred.get_pixel(5, 5).0[0];
        assert!(left > 0, "left of edge should brighten, got {left}");
        assert!(right < 255, "right of edge should darken, got {right}");
    }

    #[test]
    fn disabled_blur_passes_through() {
        let stage = GaussianBlur::new(&GaussianSettings {
            enable: false,
            sigma: 3.0,
        })
        .unwrap();
        let img = sharp_edge_image();
        assert_eq!(stage.filter(&img).unwrap(), img);
    }

    #[test]
    fn gradient_shape_is_rows_by_cols() {
        let img = GrayImage::new(7, 3);
        let field = sobel_gradient::<f32>(&img, 1.0);
        assert_eq!(field.dim(), (3, 7));
        assert_eq!(field.dy.dim(), (3, 7));
    }

    #[test]
    fn vertical_edge_has_horizontal_gradient() {
        let field = sobel_gradient::<f64>(&sharp_edge_image(), 1020.0);
        let phasor = Phasor::from_gradient(&field);

        // Full-contrast step: the Sobel response at the boundary is the
        // kernel maximum, so the normalized magnitude reaches 1.
        assert!((phasor.magnitude[[5, 5]] - 1.0).abs() < 1e-9);
        assert!(field.dy[[5, 5]].abs() < f64::EPSILON);
        let phase = phasor.phase[[5, 5]];
        assert!(
            phase.abs() < 1e-9 || (phase - 180.0).abs() < 1e-9,
            "expected a horizontal gradient, got phase {phase}"
        );
        assert!(phasor.magnitude[[5, 1]].abs() < f64::EPSILON);
    }

    #[test]
    fn gradient_stage_uses_sobel_maximum() {
        let stage = Gradient::<f64>::new(&GradientSettings::default()).unwrap();
        assert!((stage.maximum() - 1020.0).abs() < f64::EPSILON);

        let scaled = Gradient::<f64>::new(&GradientSettings {
            scale: 2.0,
            ..GradientSettings::default()
        })
        .unwrap();
        assert!((scaled.maximum() - 510.0).abs() < f64::EPSILON);
    }

    /// A step of `contrast` levels down the middle of a 16×16 image.
    fn step_field(contrast: u8) -> GradientField<f64> {
        let img = GrayImage::from_fn(16, 16, |x, _| {
            if x < 8 {
                image::Luma([100])
            } else {
                image::Luma([100 + contrast])
            }
        });
        sobel_gradient(&img, 1020.0)
    }

    #[test]
    fn faint_edges_get_a_larger_scale() {
        // A 60-level step reaches 240 / 1020 of the Sobel maximum.
        assert!((detect_gradient_scale(&step_field(60), 0.9) - 4.0).abs() < f64::EPSILON);
        // A full-contrast step already fills the range.
        assert!((detect_gradient_scale(&step_field(155), 0.9) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn very_faint_edges_clamp_to_the_largest_scale() {
        assert!((detect_gradient_scale(&step_field(2), 0.9) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn flat_image_keeps_unit_scale() {
        let field = sobel_gradient::<f32>(&GrayImage::from_pixel(8, 8, image::Luma([9])), 1020.0);
        assert!((detect_gradient_scale(&field, 0.9) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disabled_gradient_produces_nothing() {
        let stage = Gradient::<f32>::new(&GradientSettings {
            enable: false,
            ..GradientSettings::default()
        })
        .unwrap();
        assert!(stage.filter(&sharp_edge_image()).is_none());
    }
}
