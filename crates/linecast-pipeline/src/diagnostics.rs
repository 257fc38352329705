//! Line detection diagnostics: timing, counts, and other metrics for
//! each stage.
//!
//! [`run_with_diagnostics`] runs every stage once, outside the node
//! graph, and records what each one did. It is meant for parameter
//! tuning from the bench CLI; interactive use goes through
//! [`LinesChain`](crate::chain::LinesChain).
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::canny::Canny;
use crate::gradient::{GaussianBlur, Gradient};
use crate::hough::{Hough, edge_points};
use crate::level::LevelAdjust;
use crate::node::Filter;
use crate::settings::{LinesSettings, Validate};
use crate::types::{Dimensions, HoughResult, PipelineError, Real};

/// Time source for stage measurements.
///
/// The bench supplies a `std::time::Instant` clock; tests tick by hand.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// Current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single detection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinesDiagnostics {
    /// Stage 1: level adjustment.
    pub level: StageDiagnostics,
    /// Stage 2: Gaussian blur.
    pub blur: StageDiagnostics,
    /// Stage 3: Sobel gradient.
    pub gradient: StageDiagnostics,
    /// Stage 4: Canny edge detection.
    pub edge_detection: StageDiagnostics,
    /// Stage 5: Hough voting.
    pub voting: StageDiagnostics,
    /// Stage 6: peak suppression and line extraction.
    pub line_extraction: StageDiagnostics,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: LinesSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Level adjustment metrics.
    Level {
        /// Intensity mapped to black.
        low: u8,
        /// Intensity mapped to white.
        high: u8,
        /// Whether the stage was enabled.
        enabled: bool,
    },
    /// Gaussian blur metrics.
    Blur {
        /// Sigma applied; zero when the stage was disabled.
        sigma: f32,
    },
    /// Sobel gradient metrics.
    Gradient {
        /// Normalization divisor.
        maximum: f64,
        /// Field width in pixels.
        width: u32,
        /// Field height in pixels.
        height: u32,
    },
    /// Canny edge detection metrics.
    EdgeDetection {
        /// Low hysteresis threshold.
        low_threshold: f64,
        /// High hysteresis threshold.
        high_threshold: f64,
        /// Number of nonzero edge pixels.
        edge_pixel_count: u64,
        /// Total pixel count for computing edge density.
        total_pixel_count: u64,
    },
    /// Hough voting metrics.
    Voting {
        /// Edge pixels that cast votes.
        edge_points: usize,
        /// Accumulator rho bins.
        rho_count: usize,
        /// Accumulator theta bins.
        theta_count: usize,
        /// Largest accumulator value before suppression.
        peak: f64,
    },
    /// Peak suppression and line extraction metrics.
    LineExtraction {
        /// Whether suppression ran; without it no lines are extracted.
        suppressed: bool,
        /// Suppression window side.
        window: usize,
        /// Vote threshold.
        threshold: f64,
        /// Lines extracted.
        line_count: usize,
    },
}

/// High-level summary counts for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinesSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Nonzero Canny edge pixels.
    pub edge_pixel_count: u64,
    /// Lines extracted.
    pub line_count: usize,
}

impl LinesDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Line Detection Diagnostics\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Edge pixels: {}  |  Lines: {}",
            self.summary.edge_pixel_count, self.summary.line_count,
        ));

        lines.join("\n")
    }

    /// Stages in execution order with their display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Levels", &self.level),
            ("Blur", &self.blur),
            ("Gradient", &self.gradient),
            ("Edge Detection", &self.edge_detection),
            ("Voting", &self.voting),
            ("Line Extraction", &self.line_extraction),
        ]
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Level { enabled: false, .. } => "off".to_string(),
        StageMetrics::Level { low, high, .. } => format!("low={low} high={high}"),
        StageMetrics::Blur { sigma } => format!("sigma={sigma:.2}"),
        StageMetrics::Gradient {
            maximum,
            width,
            height,
        } => format!("{width}x{height} max={maximum:.1}"),
        StageMetrics::EdgeDetection {
            low_threshold,
            high_threshold,
            edge_pixel_count,
            total_pixel_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixel_count > 0 {
                *edge_pixel_count as f64 / *total_pixel_count as f64 * 100.0
            } else {
                0.0
            };
            format!(
                "low={low_threshold:.3} high={high_threshold:.3} edges={edge_pixel_count} ({density:.1}%)",
            )
        }
        StageMetrics::Voting {
            edge_points,
            rho_count,
            theta_count,
            peak,
        } => format!("{edge_points} pts -> {rho_count}x{theta_count} peak={peak:.1}"),
        StageMetrics::LineExtraction {
            suppressed: false, ..
        } => "suppression off".to_string(),
        StageMetrics::LineExtraction {
            window,
            threshold,
            line_count,
            ..
        } => format!("window={window} threshold={threshold:.1} lines={line_count}"),
    }
}

/// Run every stage once on `image`, timing each with `clock`.
///
/// Unlike the node graph, a disabled stage here is an error: the run
/// has nothing to measure past it.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for a zero-sized image,
/// [`PipelineError::Config`] for invalid settings, and
/// [`PipelineError::NoResult`] when a stage is disabled.
pub fn run_with_diagnostics<T: Real, C: Clock>(
    image: &GrayImage,
    settings: &LinesSettings,
    clock: &C,
) -> Result<(HoughResult<T>, LinesDiagnostics), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EmptyInput);
    }
    settings.validate()?;
    let level_stage = LevelAdjust::new(&settings.level)?;
    let blur_stage = GaussianBlur::new(&settings.gaussian)?;
    let gradient_stage = Gradient::<T>::new(&settings.gradient)?;
    let canny_stage = Canny::<T>::new(&settings.canny)?;
    let hough_stage = Hough::<T>::new(&settings.hough)?;

    let total_start = clock.now();

    // --- Levels ---
    let start = clock.now();
    let adjusted = level_stage.filter(image).ok_or(PipelineError::NoResult {
        stage: LevelAdjust::NAME,
    })?;
    let level = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Level {
            low: settings.level.low,
            high: settings.level.high,
            enabled: settings.level.enable,
        },
    };

    // --- Blur ---
    let start = clock.now();
    let blurred = blur_stage.filter(&adjusted).ok_or(PipelineError::NoResult {
        stage: GaussianBlur::NAME,
    })?;
    let blur = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Blur {
            sigma: if settings.gaussian.enable {
                settings.gaussian.sigma
            } else {
                0.0
            },
        },
    };

    // --- Gradient ---
    let start = clock.now();
    let field = gradient_stage
        .filter(&blurred)
        .ok_or(PipelineError::NoResult {
            stage: Gradient::<T>::NAME,
        })?;
    let dimensions = Dimensions::from_shape(field.dim());
    let gradient = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Gradient {
            maximum: gradient_stage.maximum().into_f64(),
            width: dimensions.width,
            height: dimensions.height,
        },
    };

    // --- Canny ---
    if !settings.canny.enable {
        return Err(PipelineError::NoResult {
            stage: Canny::<T>::NAME,
        });
    }
    let start = clock.now();
    let edges = canny_stage.detect(&field)?;
    let edge_pixel_count = edges.edge_count() as u64;
    let edge_detection = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::EdgeDetection {
            low_threshold: settings.canny.low,
            high_threshold: settings.canny.high,
            edge_pixel_count,
            total_pixel_count: dimensions.pixel_count(),
        },
    };

    // --- Hough voting ---
    if !settings.hough.enable {
        return Err(PipelineError::NoResult {
            stage: Hough::<T>::NAME,
        });
    }
    let start = clock.now();
    let points = edge_points(&edges, settings.hough.weighted);
    let merged = hough_stage.vote(&points, edges.edges.dim())?;
    let peak = merged.iter().copied().fold(T::zero(), T::max).into_f64();
    let voting = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Voting {
            edge_points: points.len(),
            rho_count: settings.hough.rho_count,
            theta_count: settings.hough.theta_count,
            peak,
        },
    };

    // --- Suppression + extraction ---
    let start = clock.now();
    let result = hough_stage.finish(merged, edges.edges.dim())?;
    let line_extraction = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::LineExtraction {
            suppressed: settings.hough.suppress,
            window: settings.hough.window,
            threshold: settings.hough.threshold,
            line_count: result.lines.len(),
        },
    };

    let total_duration = clock.elapsed(&total_start);
    let summary = LinesSummary {
        image_width: dimensions.width,
        image_height: dimensions.height,
        pixel_count: dimensions.pixel_count(),
        edge_pixel_count,
        line_count: result.lines.len(),
    };

    Ok((
        result,
        LinesDiagnostics {
            level,
            blur,
            gradient,
            edge_detection,
            voting,
            line_extraction,
            total_duration,
            summary,
        },
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::settings::{CannySettings, HoughSettings};

    /// Advances one millisecond per reading.
    struct TickClock(Cell<u64>);

    impl TickClock {
        fn new() -> Self {
            Self(Cell::new(0))
        }

        fn tick(&self) -> u64 {
            let now = self.0.get();
            self.0.set(now + 1);
            now
        }
    }

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.tick()
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.tick() - since)
        }
    }

    fn frame_image() -> GrayImage {
        GrayImage::from_fn(64, 48, |x, y| {
            if (10..54).contains(&x) && (8..40).contains(&y) {
                image::Luma([230])
            } else {
                image::Luma([15])
            }
        })
    }

    fn settings() -> LinesSettings {
        LinesSettings {
            hough: HoughSettings {
                rho_count: 128,
                theta_count: 180,
                angle_range: 10.0,
                weighted: false,
                window: 5,
                threshold: 20.0,
                ..HoughSettings::default()
            },
            ..LinesSettings::default()
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    type Run = Result<(HoughResult<f64>, LinesDiagnostics), PipelineError>;

    fn run(settings: &LinesSettings) -> Run {
        run_with_diagnostics(&frame_image(), settings, &TickClock::new())
    }

    #[test]
    fn every_stage_is_timed_once() {
        let (_, diag) = run(&settings()).unwrap();
        for (name, stage) in diag.stages() {
            assert_eq!(stage.duration, Duration::from_millis(1), "stage {name}");
        }
        assert!(diag.total_duration >= Duration::from_millis(6));
    }

    #[test]
    fn metrics_match_the_result() {
        let (result, diag) = run(&settings()).unwrap();
        assert_eq!(diag.summary.image_width, 64);
        assert_eq!(diag.summary.image_height, 48);
        assert_eq!(diag.summary.pixel_count, 64 * 48);
        assert_eq!(diag.summary.line_count, result.lines.len());
        assert!(diag.summary.edge_pixel_count > 0);
        assert!(!result.lines.is_empty());

        let StageMetrics::Voting {
            edge_points, peak, ..
        } = diag.voting.metrics
        else {
            unreachable!("voting stage recorded {:?}", diag.voting.metrics);
        };
        assert_eq!(
            u64::try_from(edge_points).unwrap(),
            diag.summary.edge_pixel_count
        );
        assert!(peak >= result.peak());
    }

    #[test]
    fn matches_one_shot_detection() {
        let img = frame_image();
        let (with_diag, _) =
            run_with_diagnostics::<f32, _>(&img, &settings(), &TickClock::new()).unwrap();
        let plain = crate::detect_lines::<f32>(&img, &settings()).unwrap();
        assert_eq!(with_diag, plain);
    }

    #[test]
    fn level_bounds_are_recorded() {
        let mut s = settings();
        s.level.low = 10;
        s.level.high = 200;
        let (_, diag) = run(&s).unwrap();
        let StageMetrics::Level { low, high, enabled } = diag.level.metrics else {
            unreachable!("level stage recorded {:?}", diag.level.metrics);
        };
        assert_eq!((low, high, enabled), (10, 200, true));
        assert!(diag.report().contains("low=10 high=200"));
    }

    #[test]
    fn disabled_canny_is_reported() {
        let mut s = settings();
        s.canny = CannySettings {
            enable: false,
            ..CannySettings::default()
        };
        let err = run(&s).unwrap_err();
        assert!(matches!(err, PipelineError::NoResult { stage: "canny" }));
    }

    #[test]
    fn invalid_settings_are_reported() {
        let mut s = settings();
        s.hough.threads = 0;
        assert!(matches!(run(&s).unwrap_err(), PipelineError::Config(_)));
    }

    #[test]
    fn empty_image_is_rejected() {
        let empty = GrayImage::new(0, 0);
        let err =
            run_with_diagnostics::<f64, _>(&empty, &settings(), &TickClock::new()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[test]
    fn report_lists_every_stage() {
        let (_, diag) = run(&settings()).unwrap();
        let report = diag.report();
        for (name, _) in diag.stages() {
            assert!(report.contains(name), "report is missing {name}");
        }
        assert!(report.contains("64x48"));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let (_, diag) = run(&settings()).unwrap();
        let json = serde_json::to_value(&diag).unwrap();
        assert!((json["blur"]["duration"].as_f64().unwrap() - 0.001).abs() < 1e-12);

        let back: LinesDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.blur.duration, Duration::from_millis(1));
        assert_eq!(back.summary.line_count, diag.summary.line_count);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"duration": -1.0, "metrics": {"Blur": {"sigma": 1.0}}}"#;
        assert!(serde_json::from_str::<StageDiagnostics>(json).is_err());
    }
}
