//! Hough line detection from Canny edges.
//!
//! Every edge pixel votes into a `rho_count × theta_count` accumulator,
//! but only for the normal angles within `angle_range` degrees of its own
//! gradient direction. Lines use the normal form
//! `x·cos θ + y·sin θ = rho` with `(x, y)` the column and row offsets
//! from the image center, θ on `[0, 180)`, and rho on
//! `[-max_rho, max_rho]` where `max_rho` is half the image diagonal.
//!
//! θ is periodic: the cell `(rho, 180° - ε)` neighbours `(-rho, 0° + ε)`.
//! After ordinary peak suppression, [`suppress_periodic`] re-runs the
//! suppression on a seam made of the last and (rho-reversed) first
//! columns so twin peaks straddling 0°/180° cannot both survive. Equal
//! cells on the seam are ordered by their accumulator position, so a
//! plateau keeps the same cell in both passes.

use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::chunk::make_chunks;
use crate::node::Filter;
use crate::settings::{HoughSettings, Validate};
use crate::suppression::{suppress, suppress_by};
use crate::types::{CannyResult, ConfigError, Dimensions, HoughResult, Line, Real};

/// One edge pixel about to vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgePoint<T> {
    /// Pixel row.
    pub row: usize,
    /// Pixel column.
    pub col: usize,
    /// Vote weight: edge strength, or 1 when unweighted.
    pub weight: T,
    /// Gradient direction folded to `[0, 180)` degrees.
    pub angle: T,
}

/// Nonzero pixels of a Canny result, in row-major order.
#[must_use]
pub fn edge_points<T: Real>(canny: &CannyResult<T>, weighted: bool) -> Vec<EdgePoint<T>> {
    let half_turn = T::from_f64(180.0);
    canny
        .edges
        .indexed_iter()
        .filter(|(_, v)| **v != T::zero())
        .map(|((row, col), &v)| EdgePoint {
            row,
            col,
            weight: if weighted { v } else { T::one() },
            angle: canny.phasor.phase[[row, col]] % half_turn,
        })
        .collect()
}

/// Suppress non-peaks in an accumulator whose columns wrap around with
/// rho reversed.
///
/// # Errors
///
/// Returns [`ConfigError::AccumulatorTooSmall`] if `space` has fewer
/// than `2 × window` columns, and any error of
/// [`suppress`](crate::suppression::suppress).
pub fn suppress_periodic<T>(
    thread_count: usize,
    window: usize,
    space: &Array2<T>,
) -> Result<Array2<T>, ConfigError>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    let (rho_count, theta_count) = space.dim();
    if theta_count < 2 * window {
        return Err(ConfigError::AccumulatorTooSmall {
            rho_count,
            theta_count,
            window,
        });
    }

    let mut out = suppress(thread_count, window, space)?;

    // Seam: columns [theta_count - window, theta_count) followed by
    // columns [0, window) flipped in rho.
    let position = |i: usize, k: usize| {
        if k < window {
            (i, theta_count - window + k)
        } else {
            (rho_count - 1 - i, k - window)
        }
    };
    let seam = Array2::from_shape_fn((rho_count, 2 * window), |(i, k)| space[position(i, k)]);
    // Ties resolve by accumulator position, as in the main pass.
    let kept = suppress_by(thread_count, window, &seam, |(i, k)| position(i, k))?;

    for ((i, k), v) in kept.indexed_iter() {
        if *v == T::default() {
            out[position(i, k)] = T::default();
        }
    }
    Ok(out)
}

/// Placement of the rho axis for one image size.
#[derive(Debug, Clone, Copy)]
struct Geometry {
    rows: usize,
    cols: usize,
    cx: f64,
    cy: f64,
    max_rho: f64,
    /// Rho-to-bin scale: `(rho_count - 1) / (2 · max_rho)`.
    to_index: f64,
}

impl Geometry {
    #[allow(clippy::cast_precision_loss)]
    fn new((rows, cols): (usize, usize), rho_count: usize) -> Self {
        let cx = cols as f64 / 2.0;
        let cy = rows as f64 / 2.0;
        let max_rho = cx.hypot(cy);
        let to_index = if max_rho > 0.0 {
            (rho_count - 1) as f64 / (2.0 * max_rho)
        } else {
            0.0
        };
        Self {
            rows,
            cols,
            cx,
            cy,
            max_rho,
            to_index,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn rho_index(&self, rho: f64, rho_count: usize) -> usize {
        let last = (rho_count - 1) as f64;
        ((rho + self.max_rho) * self.to_index).round().clamp(0.0, last) as usize
    }

    #[allow(clippy::cast_precision_loss)]
    fn rho_of(&self, index: usize) -> f64 {
        if self.to_index > 0.0 {
            index as f64 / self.to_index - self.max_rho
        } else {
            0.0
        }
    }

    /// Whether `line` runs within `tolerance` pixels of one image border
    /// along that border's whole length.
    #[allow(clippy::cast_precision_loss)]
    fn hugs_border(&self, line: &Line, tolerance: f64) -> bool {
        let (sin, cos) = line.theta.to_radians().sin_cos();
        let within = |(col, row): (f64, f64)| {
            ((col - self.cx) * cos + (row - self.cy) * sin - line.rho).abs() <= tolerance
        };
        let right = self.cols.saturating_sub(1) as f64;
        let bottom = self.rows.saturating_sub(1) as f64;
        [
            ((0.0, 0.0), (0.0, bottom)),
            ((right, 0.0), (right, bottom)),
            ((0.0, 0.0), (right, 0.0)),
            ((0.0, bottom), (right, bottom)),
        ]
        .into_iter()
        .any(|(a, b)| within(a) && within(b))
    }
}

/// Hough detector built from validated [`HoughSettings`].
#[derive(Debug, Clone)]
pub struct Hough<T> {
    enable: bool,
    weighted: bool,
    suppress: bool,
    rho_count: usize,
    theta_count: usize,
    angle_range: f64,
    window: usize,
    threshold: T,
    edge_tolerance: Option<f64>,
    threads: usize,
    cos: Vec<T>,
    sin: Vec<T>,
}

impl<T: Real> Hough<T> {
    /// Normal angle in degrees of accumulator column `col`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn theta_of(&self, col: usize) -> f64 {
        col as f64 * 180.0 / self.theta_count as f64
    }

    /// Cast votes from `points` for an image of `dim = (rows, cols)`.
    ///
    /// Points are split across workers, each filling its own
    /// accumulator; the accumulators are summed in chunk order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroThreadCount`] for zero workers.
    pub fn vote(
        &self,
        points: &[EdgePoint<T>],
        dim: (usize, usize),
    ) -> Result<Array2<T>, ConfigError> {
        let geometry = Geometry::new(dim, self.rho_count);
        let shape = (self.rho_count, self.theta_count);
        if points.is_empty() {
            return Ok(Array2::zeros(shape));
        }

        let threads = self.threads.min(points.len());
        let chunks = make_chunks(threads, points.len())?;
        let parts: Vec<Array2<T>> = chunks
            .par_iter()
            .map(|chunk| {
                let mut acc = Array2::zeros(shape);
                for point in &points[chunk.range()] {
                    self.vote_point(&mut acc, &geometry, point);
                }
                acc
            })
            .collect();

        let mut merged = Array2::zeros(shape);
        for part in &parts {
            merged += part;
        }
        Ok(merged)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn vote_point(&self, acc: &mut Array2<T>, geometry: &Geometry, point: &EdgePoint<T>) {
        let bins_per_degree = self.theta_count as f64 / 180.0;
        let angle = point.angle.into_f64();
        let first = ((angle - self.angle_range) * bins_per_degree).round() as i64;
        let last = ((angle + self.angle_range) * bins_per_degree).round() as i64;
        let last = last.min(first + self.theta_count as i64 - 1);

        let x = T::from_f64(point.col as f64 - geometry.cx);
        let y = T::from_f64(point.row as f64 - geometry.cy);
        for bin in first..=last {
            let col = bin.rem_euclid(self.theta_count as i64) as usize;
            let rho = x * self.cos[col] + y * self.sin[col];
            let row = geometry.rho_index(rho.into_f64(), self.rho_count);
            acc[[row, col]] += point.weight;
        }
    }

    /// Vote, suppress, and extract lines from `canny`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the accumulator or worker count does
    /// not fit the suppression window (unreachable through
    /// [`Filter::new`]).
    pub fn detect(&self, canny: &CannyResult<T>) -> Result<HoughResult<T>, ConfigError> {
        let points = edge_points(canny, self.weighted);
        let merged = self.vote(&points, canny.edges.dim())?;
        let result = self.finish(merged, canny.edges.dim())?;
        debug!(
            points = points.len(),
            lines = result.lines.len(),
            "hough detection finished"
        );
        Ok(result)
    }

    /// Suppress non-peaks in a merged accumulator and extract lines.
    ///
    /// With `suppress` off, the accumulator is returned as is and no
    /// lines are extracted.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the accumulator does not fit the
    /// suppression window.
    pub fn finish(
        &self,
        merged: Array2<T>,
        dim: (usize, usize),
    ) -> Result<HoughResult<T>, ConfigError> {
        let dimensions = Dimensions::from_shape(dim);

        if !self.suppress {
            return Ok(HoughResult {
                space: merged,
                lines: Vec::new(),
                dimensions,
            });
        }

        let space = suppress_periodic(self.threads, self.window, &merged)?;
        let geometry = Geometry::new(dim, self.rho_count);
        let lines: Vec<Line> = space
            .indexed_iter()
            .filter(|(_, v)| **v > self.threshold)
            .map(|((row, col), v)| Line {
                rho: geometry.rho_of(row),
                theta: self.theta_of(col),
                votes: v.into_f64(),
            })
            .filter(|line| {
                self.edge_tolerance
                    .is_none_or(|tolerance| !geometry.hugs_border(line, tolerance))
            })
            .collect();

        Ok(HoughResult {
            space,
            lines,
            dimensions,
        })
    }
}

impl<T: Real> Filter for Hough<T> {
    type Settings = HoughSettings;
    type Input = CannyResult<T>;
    type Output = HoughResult<T>;

    const NAME: &'static str = "hough";

    fn new(settings: &HoughSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        #[allow(clippy::cast_precision_loss)]
        let step = 180.0 / settings.theta_count as f64;
        #[allow(clippy::cast_precision_loss)]
        let (sin, cos): (Vec<T>, Vec<T>) = (0..settings.theta_count)
            .map(|j| {
                let (s, c) = (j as f64 * step).to_radians().sin_cos();
                (T::from_f64(s), T::from_f64(c))
            })
            .unzip();
        Ok(Self {
            enable: settings.enable,
            weighted: settings.weighted,
            suppress: settings.suppress,
            rho_count: settings.rho_count,
            theta_count: settings.theta_count,
            angle_range: settings.angle_range,
            window: settings.window,
            threshold: T::from_f64(settings.threshold),
            edge_tolerance: settings.edge_tolerance,
            threads: settings.threads,
            cos,
            sin,
        })
    }

    fn filter(&self, input: &CannyResult<T>) -> Option<HoughResult<T>> {
        if !self.enable {
            return None;
        }
        match self.detect(input) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(stage = Self::NAME, error = %e, "line detection failed");
                None
            }
        }
    }
}

/// Run Hough detection on `canny` with `settings`, ignoring `enable`.
///
/// # Errors
///
/// Returns the settings' [`ConfigError`].
pub fn hough<T: Real>(
    canny: &CannyResult<T>,
    settings: &HoughSettings,
) -> Result<HoughResult<T>, ConfigError> {
    <Hough<T> as Filter>::new(settings)?.detect(canny)
}
