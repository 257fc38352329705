//! Canny edge detection on a precomputed gradient field.
//!
//! 1. Gradient phase is quantized into four directions (see
//!    [`quantize_directions`]).
//! 2. Non-maximum suppression keeps a pixel only if its magnitude is at
//!    least that of both neighbours along its gradient direction.
//! 3. Hysteresis keeps every pixel at or above the high threshold, then
//!    follows each kept pixel's edge (perpendicular to its gradient) to
//!    neighbours at or above the low threshold, up to `depth` steps from
//!    the nearest seed.
//!
//! Hysteresis is split by row chunk. Each worker starts from the seeds
//! in its own rows but may trace anywhere, writing into a private
//! buffer; buffers are merged by keeping any nonzero value. Tracing is
//! breadth-first, so a pixel's depth is its shortest distance from a
//! seed and the merged result is the same for every thread count.

use std::collections::VecDeque;
use std::ops::Range;

use ndarray::{Array2, Zip};
use rayon::prelude::*;
use tracing::warn;

use crate::chunk::make_chunks;
use crate::node::Filter;
use crate::settings::{CannySettings, Validate};
use crate::types::{CannyResult, ConfigError, GradientField, Phasor, Real};

/// Gradient along columns; edge runs vertically.
pub const HORIZONTAL: u8 = 0;
/// Gradient towards increasing row and column.
pub const DIAGONAL: u8 = 1;
/// Gradient along rows; edge runs horizontally.
pub const VERTICAL: u8 = 2;
/// Gradient towards increasing row, decreasing column.
pub const ANTI_DIAGONAL: u8 = 3;

/// `(row, col)` step for each direction; the opposite neighbour is the
/// negated step.
const STEPS: [(isize, isize); 4] = [(0, 1), (1, 1), (1, 0), (1, -1)];

/// Quantize phase in degrees into one of four directions.
///
/// The circle is cut into eight 45° sectors centred on the axes and
/// diagonals; opposite sectors share a direction.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize_directions<T: Real>(phase: &Array2<T>) -> Array2<u8> {
    let sector = T::from_f64(45.0);
    phase.mapv(|p| ((p / sector).round().into_f64() as u8) % 4)
}

/// The two neighbours of `(r, c)` along `direction` that lie inside a
/// `rows × cols` grid.
fn neighbours(
    (r, c): (usize, usize),
    direction: u8,
    (rows, cols): (usize, usize),
) -> impl Iterator<Item = (usize, usize)> {
    let (dr, dc) = STEPS[usize::from(direction % 4)];
    [(dr, dc), (-dr, -dc)]
        .into_iter()
        .filter_map(move |(dr, dc)| {
            let nr = r.checked_add_signed(dr)?;
            let nc = c.checked_add_signed(dc)?;
            (nr < rows && nc < cols).then_some((nr, nc))
        })
}

/// Thin edges to one pixel by zeroing non-maxima along the gradient.
///
/// Border pixels have an incomplete neighbourhood and are always zero.
#[must_use]
pub fn non_maximum_suppression<T: Real>(
    magnitude: &Array2<T>,
    directions: &Array2<u8>,
) -> Array2<T> {
    let dim = magnitude.dim();
    let (rows, cols) = dim;
    let mut out = Array2::zeros(dim);

    for r in 1..rows.saturating_sub(1) {
        for c in 1..cols.saturating_sub(1) {
            let m = magnitude[[r, c]];
            if neighbours((r, c), directions[[r, c]], dim).all(|n| m >= magnitude[n]) {
                out[[r, c]] = m;
            }
        }
    }
    out
}

/// Canny detector built from validated [`CannySettings`].
#[derive(Debug, Clone)]
pub struct Canny<T> {
    enable: bool,
    low: T,
    high: T,
    depth: usize,
    threads: usize,
}

impl<T: Real> Canny<T> {
    /// Run all three steps on `gradient`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroThreadCount`] if built with zero
    /// workers (unreachable through [`Filter::new`]).
    pub fn detect(&self, gradient: &GradientField<T>) -> Result<CannyResult<T>, ConfigError> {
        let phasor = Phasor::from_gradient(gradient);
        let directions = quantize_directions(&phasor.phase);
        let suppressed = non_maximum_suppression(&phasor.magnitude, &directions);
        let edges = self.hysteresis(&suppressed, &directions)?;
        Ok(CannyResult {
            phasor,
            edges,
            low: self.low,
            high: self.high,
        })
    }

    /// Trace edges from seeds through weak pixels.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroThreadCount`] for zero workers.
    pub fn hysteresis(
        &self,
        suppressed: &Array2<T>,
        directions: &Array2<u8>,
    ) -> Result<Array2<T>, ConfigError> {
        let chunks = make_chunks(self.threads, suppressed.nrows())?;

        let parts: Vec<Array2<T>> = chunks
            .par_iter()
            .filter(|chunk| chunk.count > 0)
            .map(|chunk| self.trace(suppressed, directions, chunk.range()))
            .collect();

        let mut merged = Array2::zeros(suppressed.dim());
        for part in &parts {
            Zip::from(&mut merged).and(part).for_each(|m, &p| {
                if p != T::zero() {
                    *m = p;
                }
            });
        }
        Ok(merged)
    }

    /// Breadth-first trace from the seeds in `rows`.
    fn trace(
        &self,
        suppressed: &Array2<T>,
        directions: &Array2<u8>,
        rows: Range<usize>,
    ) -> Array2<T> {
        let dim = suppressed.dim();
        let mut out = Array2::zeros(dim);
        let mut visited = Array2::from_elem(dim, false);
        let mut queue = VecDeque::new();

        for r in rows {
            for c in 0..dim.1 {
                let v = suppressed[[r, c]];
                if v > T::zero() && v >= self.high {
                    visited[[r, c]] = true;
                    out[[r, c]] = v;
                    queue.push_back(((r, c), 0_usize));
                }
            }
        }

        while let Some((at, steps)) = queue.pop_front() {
            if steps >= self.depth {
                continue;
            }
            let along_edge = (directions[at] + 2) % 4;
            for n in neighbours(at, along_edge, dim) {
                if visited[n] {
                    continue;
                }
                let v = suppressed[n];
                if v > T::zero() && v >= self.low {
                    visited[n] = true;
                    out[n] = v;
                    queue.push_back((n, steps + 1));
                }
            }
        }
        out
    }
}

impl<T: Real> Filter for Canny<T> {
    type Settings = CannySettings;
    type Input = GradientField<T>;
    type Output = CannyResult<T>;

    const NAME: &'static str = "canny";

    fn new(settings: &CannySettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            enable: settings.enable,
            low: T::from_f64(settings.low),
            high: T::from_f64(settings.high),
            depth: settings.depth,
            threads: settings.threads,
        })
    }

    fn filter(&self, input: &GradientField<T>) -> Option<CannyResult<T>> {
        if !self.enable {
            return None;
        }
        match self.detect(input) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(stage = Self::NAME, error = %e, "edge detection failed");
                None
            }
        }
    }
}

/// Run Canny on `gradient` with `settings`, ignoring `enable`.
///
/// # Errors
///
/// Returns the settings' [`ConfigError`].
pub fn canny<T: Real>(
    gradient: &GradientField<T>,
    settings: &CannySettings,
) -> Result<CannyResult<T>, ConfigError> {
    <Canny<T> as Filter>::new(settings)?.detect(gradient)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::GrayImage;
    use ndarray::array;

    use super::*;
    use crate::gradient::{gaussian_blur, sobel_gradient};

    fn detector(depth: usize, threads: usize) -> Canny<f64> {
        <Canny<f64> as Filter>::new(&CannySettings {
            depth,
            threads,
            ..CannySettings::default()
        })
        .unwrap()
    }

    /// Bright square on a dark background, lightly blurred.
    fn square_gradient() -> GradientField<f64> {
        let img = GrayImage::from_fn(48, 48, |x, y| {
            if (12..36).contains(&x) && (12..36).contains(&y) {
                image::Luma([200])
            } else {
                image::Luma([20])
            }
        });
        sobel_gradient(&gaussian_blur(&img, 1.0), 1020.0)
    }

    fn nonzero(a: &Array2<f64>) -> Vec<(usize, usize)> {
        a.indexed_iter()
            .filter(|(_, v)| **v != 0.0)
            .map(|(idx, _)| idx)
            .collect()
    }

    #[test]
    fn directions_fold_opposite_sectors() {
        let phase = array![[0.0_f64, 22.0, 23.0, 44.0, 90.0, 135.0, 180.0, 200.0, 337.0, 359.0]];
        let dirs = quantize_directions(&phase);
        assert_eq!(
            dirs.iter().copied().collect::<Vec<_>>(),
            vec![0, 0, 1, 1, 2, 3, 0, 0, 3, 0]
        );
    }

    #[test]
    fn suppression_keeps_ridge_centre() {
        let profile = [0.2, 0.5, 1.0, 0.5, 0.2];
        let magnitude = Array2::from_shape_fn((5, 5), |(_, c)| profile[c]);
        let dirs = Array2::from_elem((5, 5), HORIZONTAL);
        let out = non_maximum_suppression(&magnitude, &dirs);
        assert_eq!(nonzero(&out), vec![(1, 2), (2, 2), (3, 2)]);
    }

    #[test]
    fn anti_diagonal_compares_against_anti_diagonal_neighbours() {
        let mut magnitude = Array2::<f64>::zeros((5, 5));
        magnitude[[2, 2]] = 0.5;
        magnitude[[3, 3]] = 0.9;

        let anti = Array2::from_elem((5, 5), ANTI_DIAGONAL);
        let out = non_maximum_suppression(&magnitude, &anti);
        assert!((out[[2, 2]] - 0.5).abs() < f64::EPSILON);

        let diag = Array2::from_elem((5, 5), DIAGONAL);
        let out = non_maximum_suppression(&magnitude, &diag);
        assert!(out[[2, 2]].abs() < f64::EPSILON);

        magnitude[[3, 1]] = 0.9;
        let out = non_maximum_suppression(&magnitude, &anti);
        assert!(out[[2, 2]].abs() < f64::EPSILON);
    }

    #[test]
    fn border_pixels_are_always_suppressed() {
        let magnitude = Array2::from_elem((4, 4), 1.0_f64);
        let dirs = Array2::from_elem((4, 4), VERTICAL);
        let out = non_maximum_suppression(&magnitude, &dirs);
        assert_eq!(nonzero(&out), vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    /// A vertical edge at column 4: one seed on row 1, weak pixels
    /// below it, and a too-weak tail on row 10. An unseeded weak run at
    /// column 7.
    fn vertical_edge() -> (Array2<f64>, Array2<u8>) {
        let mut suppressed = Array2::<f64>::zeros((12, 9));
        suppressed[[1, 4]] = 0.9;
        for r in 2..=9 {
            suppressed[[r, 4]] = 0.15;
        }
        suppressed[[10, 4]] = 0.05;
        for r in 1..=5 {
            suppressed[[r, 7]] = 0.2;
        }
        (suppressed, Array2::from_elem((12, 9), HORIZONTAL))
    }

    #[test]
    fn hysteresis_follows_edge_down_to_low_threshold() {
        let (suppressed, dirs) = vertical_edge();
        let out = detector(32, 1).hysteresis(&suppressed, &dirs).unwrap();
        let expected: Vec<_> = (1..=9).map(|r| (r, 4)).collect();
        assert_eq!(nonzero(&out), expected);
    }

    #[test]
    fn hysteresis_stops_at_depth() {
        let (suppressed, dirs) = vertical_edge();
        let out = detector(3, 1).hysteresis(&suppressed, &dirs).unwrap();
        let expected: Vec<_> = (1..=4).map(|r| (r, 4)).collect();
        assert_eq!(nonzero(&out), expected);
    }

    #[test]
    fn hysteresis_traces_across_chunk_boundaries() {
        let (suppressed, dirs) = vertical_edge();
        let single = detector(32, 1).hysteresis(&suppressed, &dirs).unwrap();
        for threads in 2..=6 {
            let multi = detector(32, threads).hysteresis(&suppressed, &dirs).unwrap();
            assert_eq!(multi, single, "threads={threads}");
        }
    }

    #[test]
    fn detection_is_thread_count_invariant() {
        let gradient = square_gradient();
        let one = detector(32, 1).detect(&gradient).unwrap();
        let four = detector(32, 4).detect(&gradient).unwrap();
        assert!(one.edge_count() > 0);
        assert_eq!(one.edges, four.edges);
    }

    #[test]
    fn edges_respect_thresholds_and_connect_to_seeds() {
        let result = detector(32, 3).detect(&square_gradient()).unwrap();
        let edges = &result.edges;
        let (rows, cols) = edges.dim();

        for &v in edges {
            assert!(v == 0.0 || v >= result.low, "edge {v} below low threshold");
        }

        let mut seen = Array2::from_elem((rows, cols), false);
        for start in nonzero(edges) {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let mut has_seed = false;
            while let Some((r, c)) = stack.pop() {
                has_seed |= edges[[r, c]] >= result.high;
                for nr in r.saturating_sub(1)..=(r + 1).min(rows - 1) {
                    for nc in c.saturating_sub(1)..=(c + 1).min(cols - 1) {
                        if edges[[nr, nc]] != 0.0 && !seen[[nr, nc]] {
                            seen[[nr, nc]] = true;
                            stack.push((nr, nc));
                        }
                    }
                }
            }
            assert!(has_seed, "component at {start:?} has no seed");
        }
    }

    #[test]
    fn filter_rejects_bad_settings() {
        let zero = CannySettings {
            threads: 0,
            ..CannySettings::default()
        };
        assert!(matches!(
            <Canny<f32> as Filter>::new(&zero),
            Err(ConfigError::ZeroThreadCount)
        ));

        let inverted = CannySettings {
            low: 0.3,
            high: 0.2,
            ..CannySettings::default()
        };
        assert!(canny::<f32>(&square_gradient_f32(), &inverted).is_err());
    }

    #[test]
    fn disabled_filter_produces_nothing() {
        let stage = <Canny<f64> as Filter>::new(&CannySettings {
            enable: false,
            ..CannySettings::default()
        })
        .unwrap();
        assert!(stage.filter(&square_gradient()).is_none());
    }

    fn square_gradient_f32() -> GradientField<f32> {
        let g = square_gradient();
        GradientField {
            dx: g.dx.mapv(f32::from_f64),
            dy: g.dy.mapv(f32::from_f64),
            maximum: 1020.0,
        }
    }
}
