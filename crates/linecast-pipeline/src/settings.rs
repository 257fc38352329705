//! Per-stage settings with their documented defaults.
//!
//! Every settings type is a plain value: cloned into a
//! [`SettingsControl`](crate::node::SettingsControl), snapshotted by the
//! node that owns the stage, and checked with [`Validate`] before it is
//! accepted. Missing JSON fields fall back to the defaults, so a partial
//! `--config-json` override is valid.

use serde::{Deserialize, Serialize};

use crate::types::ConfigError;

/// Range check applied before settings reach a filter.
pub trait Validate {
    /// Returns the first violated constraint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the offending field.
    fn validate(&self) -> Result<(), ConfigError>;
}

fn check_range(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            expected,
        })
    }
}

const fn check_threads(threads: usize) -> Result<(), ConfigError> {
    if threads == 0 {
        Err(ConfigError::ZeroThreadCount)
    } else {
        Ok(())
    }
}

// ─── Levels ──────────────────────────────────────────────────────────

/// Input level adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelSettings {
    /// When `false` the stage passes the image through unchanged.
    pub enable: bool,
    /// Intensity mapped to black; anything darker clips.
    pub low: u8,
    /// Intensity mapped to white; anything brighter clips.
    pub high: u8,
    /// Fraction of pixels allowed to clip at each end when the bounds
    /// are detected from an image.
    pub detect_margin: f64,
}

impl LevelSettings {
    /// Default detection margin.
    pub const DEFAULT_DETECT_MARGIN: f64 = 0.05;
    /// Largest accepted detection margin.
    pub const MAX_DETECT_MARGIN: f64 = 0.49;
}

impl Default for LevelSettings {
    fn default() -> Self {
        Self {
            enable: true,
            low: 0,
            high: u8::MAX,
            detect_margin: Self::DEFAULT_DETECT_MARGIN,
        }
    }
}

impl Validate for LevelSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.low >= self.high {
            return Err(ConfigError::OutOfRange {
                name: "low",
                value: f64::from(self.low),
                expected: "< high",
            });
        }
        check_range(
            "detect_margin",
            self.detect_margin,
            0.0,
            Self::MAX_DETECT_MARGIN,
            "0..=0.49",
        )
    }
}

// ─── Gaussian ────────────────────────────────────────────────────────

/// Gaussian pre-blur.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianSettings {
    /// When `false` the stage passes the image through unchanged.
    pub enable: bool,
    /// Kernel sigma. Non-positive values pass the image through.
    pub sigma: f32,
}

impl GaussianSettings {
    /// Default blur sigma.
    pub const DEFAULT_SIGMA: f32 = 1.4;
}

impl Default for GaussianSettings {
    fn default() -> Self {
        Self {
            enable: true,
            sigma: Self::DEFAULT_SIGMA,
        }
    }
}

impl Validate for GaussianSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.sigma.is_finite() {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange {
                name: "sigma",
                value: f64::from(self.sigma),
                expected: "finite",
            })
        }
    }
}

// ─── Gradient ────────────────────────────────────────────────────────

/// Sobel gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientSettings {
    /// When `false` the stage produces nothing.
    pub enable: bool,
    /// Largest input intensity (255 for 8-bit images).
    pub maximum_input: f64,
    /// Divides the normalization maximum; larger values brighten weak
    /// gradients.
    pub scale: f64,
    /// Fraction of nonzero magnitudes that scale detection maps to 0.9.
    pub percentile: f64,
}

impl GradientSettings {
    /// Default largest input intensity.
    pub const DEFAULT_MAXIMUM_INPUT: f64 = 255.0;
    /// Default magnitude scale.
    pub const DEFAULT_SCALE: f64 = 1.0;
    /// Largest accepted magnitude scale.
    pub const MAX_SCALE: f64 = 10.0;
    /// Default detection percentile.
    pub const DEFAULT_PERCENTILE: f64 = 0.9;
}

impl Default for GradientSettings {
    fn default() -> Self {
        Self {
            enable: true,
            maximum_input: Self::DEFAULT_MAXIMUM_INPUT,
            scale: Self::DEFAULT_SCALE,
            percentile: Self::DEFAULT_PERCENTILE,
        }
    }
}

impl Validate for GradientSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.maximum_input.is_finite() && self.maximum_input > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "maximum_input",
                value: self.maximum_input,
                expected: "> 0",
            });
        }
        check_range("scale", self.scale, 1.0, Self::MAX_SCALE, "1..=10")?;
        check_range("percentile", self.percentile, 0.0, 1.0, "0..=1")
    }
}

// ─── Canny ───────────────────────────────────────────────────────────

/// Canny non-maximum suppression and hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CannySettings {
    /// When `false` the stage produces nothing.
    pub enable: bool,
    /// Low hysteresis threshold on normalized magnitude.
    pub low: f64,
    /// High hysteresis threshold; pixels at or above it seed edges.
    pub high: f64,
    /// Maximum tracing distance, in steps, from the nearest seed.
    pub depth: usize,
    /// Worker count for hysteresis.
    pub threads: usize,
}

impl CannySettings {
    /// Default low threshold.
    pub const DEFAULT_LOW: f64 = 0.1;
    /// Default high threshold.
    pub const DEFAULT_HIGH: f64 = 0.25;
    /// Default tracing depth.
    pub const DEFAULT_DEPTH: usize = 32;
    /// Default worker count.
    pub const DEFAULT_THREADS: usize = 4;
}

impl Default for CannySettings {
    fn default() -> Self {
        Self {
            enable: true,
            low: Self::DEFAULT_LOW,
            high: Self::DEFAULT_HIGH,
            depth: Self::DEFAULT_DEPTH,
            threads: Self::DEFAULT_THREADS,
        }
    }
}

impl Validate for CannySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        check_threads(self.threads)?;
        check_range("low", self.low, 0.0, 1.0, "0..=1")?;
        check_range("high", self.high, 0.0, 1.0, "0..=1")?;
        if self.low > self.high {
            return Err(ConfigError::InvertedThresholds {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

// ─── Hough ───────────────────────────────────────────────────────────

/// Hough voting, peak suppression, and line extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughSettings {
    /// When `false` the stage produces nothing.
    pub enable: bool,
    /// Rho bins (accumulator rows).
    pub rho_count: usize,
    /// Theta bins over `[0, 180)` degrees (accumulator columns).
    pub theta_count: usize,
    /// Half-width, in degrees, of the theta span each point votes for.
    pub angle_range: f64,
    /// Vote with edge strength instead of 1.
    pub weighted: bool,
    /// Suppress non-peaks and extract lines.
    pub suppress: bool,
    /// Suppression window side in bins.
    pub window: usize,
    /// Peaks must be strictly above this vote count to become lines.
    pub threshold: f64,
    /// Drop lines within this many pixels of an image border along its
    /// whole length.
    pub edge_tolerance: Option<f64>,
    /// Worker count for voting and suppression.
    pub threads: usize,
}

impl HoughSettings {
    /// Default rho bins.
    pub const DEFAULT_RHO_COUNT: usize = 1024;
    /// Default theta bins.
    pub const DEFAULT_THETA_COUNT: usize = 1024;
    /// Default voting half-width in degrees.
    pub const DEFAULT_ANGLE_RANGE: f64 = 15.0;
    /// Default suppression window.
    pub const DEFAULT_WINDOW: usize = 24;
    /// Largest accepted suppression window.
    pub const MAX_WINDOW: usize = 256;
    /// Default line threshold.
    pub const DEFAULT_THRESHOLD: f64 = 96.0;
    /// Default worker count.
    pub const DEFAULT_THREADS: usize = 4;
}

impl Default for HoughSettings {
    fn default() -> Self {
        Self {
            enable: true,
            rho_count: Self::DEFAULT_RHO_COUNT,
            theta_count: Self::DEFAULT_THETA_COUNT,
            angle_range: Self::DEFAULT_ANGLE_RANGE,
            weighted: true,
            suppress: true,
            window: Self::DEFAULT_WINDOW,
            threshold: Self::DEFAULT_THRESHOLD,
            edge_tolerance: None,
            threads: Self::DEFAULT_THREADS,
        }
    }
}

impl Validate for HoughSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        check_threads(self.threads)?;
        if self.window == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.window > Self::MAX_WINDOW {
            #[allow(clippy::cast_precision_loss)]
            let value = self.window as f64;
            return Err(ConfigError::OutOfRange {
                name: "window",
                value,
                expected: "1..=256",
            });
        }
        if self.rho_count < self.window || self.theta_count < 2 * self.window {
            return Err(ConfigError::AccumulatorTooSmall {
                rho_count: self.rho_count,
                theta_count: self.theta_count,
                window: self.window,
            });
        }
        check_range("angle_range", self.angle_range, 0.0, 180.0, "0..=180")?;
        check_range("threshold", self.threshold, 0.0, f64::INFINITY, ">= 0")?;
        if let Some(tolerance) = self.edge_tolerance {
            check_range("edge_tolerance", tolerance, 0.0, f64::INFINITY, ">= 0")?;
        }
        Ok(())
    }
}

// ─── Chain ───────────────────────────────────────────────────────────

/// Settings owned by the lines chain itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// When `false` the chain reports no composite result.
    pub enable: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self { enable: true }
    }
}

impl Validate for ChainSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Settings for every stage of the lines chain, as one serializable
/// value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinesSettings {
    /// Chain-level switches.
    pub chain: ChainSettings,
    /// Input level adjustment.
    pub level: LevelSettings,
    /// Gaussian pre-blur.
    pub gaussian: GaussianSettings,
    /// Sobel gradient.
    pub gradient: GradientSettings,
    /// Canny detector.
    pub canny: CannySettings,
    /// Hough detector.
    pub hough: HoughSettings,
}

impl Validate for LinesSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        self.chain.validate()?;
        self.level.validate()?;
        self.gaussian.validate()?;
        self.gradient.validate()?;
        self.canny.validate()?;
        self.hough.validate()
    }
}
