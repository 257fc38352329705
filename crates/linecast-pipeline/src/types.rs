//! Shared types for the linecast detection pipeline.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can feed the pipeline
/// without depending on `image` directly.
pub use image::GrayImage;

/// Floating-point scalar used by the gradient, Canny, and Hough kernels.
///
/// Implemented for `f32` and `f64`; a pipeline picks one at
/// instantiation. Settings stay in `f64` and are converted with
/// [`Real::from_f64`] when a filter is built.
pub trait Real: ndarray::NdFloat + Default {
    /// Lossy conversion from `f64`.
    fn from_f64(value: f64) -> Self;

    /// Widening (or identity) conversion to `f64`.
    fn into_f64(self) -> f64;
}

impl Real for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(value: f64) -> Self {
        value as Self
    }

    fn into_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Real for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }

    fn into_f64(self) -> f64 {
        self
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of a `rows × cols` array.
    ///
    /// Saturates at `u32::MAX`, far beyond any image `image` can decode.
    #[must_use]
    pub fn of_array<T>(array: &Array2<T>) -> Self {
        Self::from_shape(array.dim())
    }

    /// Dimensions of a `(rows, cols)` shape.
    #[must_use]
    pub fn from_shape((rows, cols): (usize, usize)) -> Self {
        Self {
            width: u32::try_from(cols).unwrap_or(u32::MAX),
            height: u32::try_from(rows).unwrap_or(u32::MAX),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Horizontal and vertical image derivatives.
///
/// `maximum` is the largest magnitude the derivative operator can
/// produce; [`Phasor::from_gradient`] divides by it so magnitudes land
/// in `0..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientField<T> {
    /// Derivative along columns (x).
    pub dx: Array2<T>,
    /// Derivative along rows (y).
    pub dy: Array2<T>,
    /// Normalization divisor.
    pub maximum: T,
}

impl<T: Real> GradientField<T> {
    /// Shape as `(rows, cols)`.
    #[must_use]
    pub fn dim(&self) -> (usize, usize) {
        self.dx.dim()
    }
}

/// Magnitude/phase view of a [`GradientField`].
#[derive(Debug, Clone, PartialEq)]
pub struct Phasor<T> {
    /// `hypot(dx, dy) / maximum`, clamped to `0..=1`.
    pub magnitude: Array2<T>,
    /// `atan2(dy, dx)` in degrees on `[0, 360)`.
    pub phase: Array2<T>,
}

impl<T: Real> Phasor<T> {
    /// Convert a gradient field to magnitude and phase.
    #[must_use]
    pub fn from_gradient(gradient: &GradientField<T>) -> Self {
        let full_turn = T::from_f64(360.0);
        let maximum = gradient.maximum;

        let mut magnitude = Array2::zeros(gradient.dim());
        let mut phase = Array2::zeros(gradient.dim());

        Zip::from(&mut magnitude)
            .and(&mut phase)
            .and(&gradient.dx)
            .and(&gradient.dy)
            .for_each(|m, p, &dx, &dy| {
                let (x, y) = (dx / maximum, dy / maximum);
                *m = x.hypot(y).min(T::one());
                *p = (y.atan2(x).to_degrees() + full_turn) % full_turn;
            });

        Self { magnitude, phase }
    }
}

/// Output of the Canny detector.
#[derive(Debug, Clone, PartialEq)]
pub struct CannyResult<T> {
    /// Phasor computed from the input gradient.
    pub phasor: Phasor<T>,
    /// Edge strength; zero for non-edge pixels.
    pub edges: Array2<T>,
    /// Low hysteresis threshold the edges were traced with.
    pub low: T,
    /// High hysteresis threshold the seeds were selected with.
    pub high: T,
}

impl<T: Real> CannyResult<T> {
    /// Number of nonzero edge pixels.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().filter(|&&v| v != T::zero()).count()
    }
}

/// A detected line in normal form `x·cos θ + y·sin θ = rho`.
///
/// `x` and `y` are column and row offsets from the image center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Signed distance from the image center in pixels.
    pub rho: f64,
    /// Normal angle in degrees on `[0, 180)`.
    pub theta: f64,
    /// Accumulated votes at the peak.
    pub votes: f64,
}

/// Output of the Hough detector.
#[derive(Debug, Clone, PartialEq)]
pub struct HoughResult<T> {
    /// Accumulator with `rho_count` rows and `theta_count` columns.
    pub space: Array2<T>,
    /// Lines extracted from surviving peaks, in row-major peak order.
    pub lines: Vec<Line>,
    /// Dimensions of the image the votes came from.
    pub dimensions: Dimensions,
}

impl<T: Real> HoughResult<T> {
    /// Largest accumulator value, zero for an empty space.
    #[must_use]
    pub fn peak(&self) -> T {
        self.space.iter().copied().fold(T::zero(), T::max)
    }

    /// Accumulator rescaled linearly so the peak maps to `target`.
    ///
    /// Returns a zero space when nothing was voted.
    #[must_use]
    pub fn scaled_space(&self, target: T) -> Array2<T> {
        let peak = self.peak();
        if peak <= T::zero() {
            return Array2::zeros(self.space.dim());
        }
        self.space.mapv(|v| v * target / peak)
    }
}

/// Configuration errors, reported when a filter or node is built and
/// when a settings control rejects new settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A parallel stage was asked to run with no workers.
    #[error("thread count must be at least 1")]
    ZeroThreadCount,

    /// A suppression window of zero cells.
    #[error("suppression window must be at least 1")]
    ZeroWindow,

    /// The suppression window does not fit the data.
    #[error("window {window} does not fit a {rows}x{cols} array")]
    WindowTooLarge {
        /// Requested window side.
        window: usize,
        /// Array rows.
        rows: usize,
        /// Array columns.
        cols: usize,
    },

    /// Fewer items than the minimum span length.
    #[error("cannot split {count} items into spans of at least {minimum}")]
    SpanTooShort {
        /// Items to split.
        count: usize,
        /// Required span length.
        minimum: usize,
    },

    /// Low hysteresis threshold above the high one.
    #[error("low threshold {low} exceeds high threshold {high}")]
    InvertedThresholds {
        /// Low threshold.
        low: f64,
        /// High threshold.
        high: f64,
    },

    /// The Hough accumulator is too small for the suppression window.
    #[error(
        "accumulator {rho_count}x{theta_count} too small for window {window} \
         (need rho_count >= window and theta_count >= 2 * window)"
    )]
    AccumulatorTooSmall {
        /// Rho bins.
        rho_count: usize,
        /// Theta bins.
        theta_count: usize,
        /// Suppression window.
        window: usize,
    },

    /// A scalar setting outside its accepted range.
    #[error("{name} = {value} is out of range ({expected})")]
    OutOfRange {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: f64,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

/// Errors from the one-shot pipeline entry points.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A stage rejected its settings.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A stage produced nothing, usually because it is disabled.
    #[error("stage {stage} produced no result")]
    NoResult {
        /// Name of the stage that came back empty.
        stage: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn real_conversions_round_trip_exact_values() {
        assert!((f32::from_f64(0.25).into_f64() - 0.25).abs() < f64::EPSILON);
        assert!((f64::from_f64(1.5e300).into_f64() - 1.5e300).abs() < f64::EPSILON);
    }

    #[test]
    fn dimensions_of_array_swap_to_width_height() {
        let a = Array2::<f32>::zeros((3, 7));
        let dims = Dimensions::of_array(&a);
        assert_eq!(dims.width, 7);
        assert_eq!(dims.height, 3);
        assert_eq!(dims.pixel_count(), 21);
    }

    #[test]
    fn phasor_normalizes_and_clamps_magnitude() {
        let gradient = GradientField {
            dx: array![[3.0_f64, 30.0]],
            dy: array![[4.0, 40.0]],
            maximum: 10.0,
        };
        let phasor = Phasor::from_gradient(&gradient);
        assert!((phasor.magnitude[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((phasor.magnitude[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn phasor_phase_is_in_degrees_on_full_turn() {
        let gradient = GradientField {
            dx: array![[1.0_f64, 0.0, -1.0, 0.0]],
            dy: array![[0.0, 1.0, 0.0, -1.0]],
            maximum: 1.0,
        };
        let phase = Phasor::from_gradient(&gradient).phase;
        let expected = [0.0, 90.0, 180.0, 270.0];
        for (got, want) in phase.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "phase {got} != {want}");
        }
    }

    #[test]
    fn scaled_space_maps_peak_to_target() {
        let result = HoughResult {
            space: array![[0.0_f32, 2.0], [4.0, 1.0]],
            lines: Vec::new(),
            dimensions: Dimensions {
                width: 2,
                height: 2,
            },
        };
        assert!((result.peak() - 4.0).abs() < f32::EPSILON);
        let scaled = result.scaled_space(255.0);
        assert!((scaled[[1, 0]] - 255.0).abs() < 1e-4);
        assert!((scaled[[0, 1]] - 127.5).abs() < 1e-4);
    }

    #[test]
    fn scaled_space_of_empty_accumulator_is_zero() {
        let result = HoughResult {
            space: Array2::<f64>::zeros((4, 4)),
            lines: Vec::new(),
            dimensions: Dimensions {
                width: 4,
                height: 4,
            },
        };
        assert!(result.scaled_space(1.0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn config_error_messages_name_the_setting() {
        let err = ConfigError::OutOfRange {
            name: "angle_range",
            value: 200.0,
            expected: "0..=180",
        };
        assert_eq!(
            err.to_string(),
            "angle_range = 200 is out of range (0..=180)"
        );
    }
}
