//! Parallel sliding-window local-maximum suppression.
//!
//! A cell survives when it is the largest value in every `window ×
//! window` window that contains it, i.e. in the neighbourhood spanning
//! `window - 1` rows and columns on each side (clipped to the array).
//! Everything else is set to zero. Equal values are ordered row-major,
//! so of two equal peaks in reach of each other only the earlier one
//! survives and the result never depends on scan order.
//!
//! Rows are split into chunks of at least `window` rows and each chunk
//! is suppressed on its own in parallel. A cell near a chunk edge may
//! then survive only because its rival sits in the neighbouring chunk,
//! so a second, sequential pass re-runs the same test on a strip of
//! `2 × (window - 1)` rows around every chunk boundary and zeroes what
//! the strip rejects. Any rival within reach of a cell in another chunk
//! lies in the strip of the boundary between them, which makes the
//! result identical for every thread count.

use std::cmp::Ordering;

use ndarray::{Array2, ArrayView2, Zip, s};
use rayon::prelude::*;

use crate::chunk::make_chunks_with_minimum;
use crate::types::ConfigError;

/// Zero every value that is not the maximum of its sliding window.
///
/// `T::default()` is the zero written over suppressed cells. A window
/// of 1 returns a copy of the input.
///
/// # Errors
///
/// Returns [`ConfigError::ZeroThreadCount`], [`ConfigError::ZeroWindow`],
/// or [`ConfigError::WindowTooLarge`] when the window exceeds either
/// dimension of `input`.
pub fn suppress<T>(
    thread_count: usize,
    window: usize,
    input: &Array2<T>,
) -> Result<Array2<T>, ConfigError>
where
    T: Copy + PartialOrd + Default + Send + Sync,
{
    suppress_by(thread_count, window, input, |at| at)
}

/// [`suppress`] with equal values ordered by `rank` of their `(row,
/// col)` position instead of by the position itself.
///
/// Use this when `input` is a rearranged view of some larger array and
/// ties must resolve the same way they would there.
///
/// # Errors
///
/// Same as [`suppress`].
pub fn suppress_by<T, K>(
    thread_count: usize,
    window: usize,
    input: &Array2<T>,
    rank: impl Fn((usize, usize)) -> K + Sync,
) -> Result<Array2<T>, ConfigError>
where
    T: Copy + PartialOrd + Default + Send + Sync,
    K: Ord,
{
    if thread_count == 0 {
        return Err(ConfigError::ZeroThreadCount);
    }
    if window == 0 {
        return Err(ConfigError::ZeroWindow);
    }
    let (rows, cols) = input.dim();
    if window > rows || window > cols {
        return Err(ConfigError::WindowTooLarge { window, rows, cols });
    }
    if window == 1 {
        return Ok(input.clone());
    }

    let radius = window - 1;
    let chunks = make_chunks_with_minimum(thread_count, rows, window)?;

    let parts: Vec<Array2<T>> = chunks
        .par_iter()
        .map(|chunk| {
            let view = input.slice(s![chunk.range(), ..]);
            let keep = local_maxima(&view, radius, |(r, c)| rank((r + chunk.offset, c)));
            let mut part = view.to_owned();
            zero_rejected(&mut part, &keep);
            part
        })
        .collect();

    let mut output = Array2::default((rows, cols));
    for (chunk, part) in chunks.iter().zip(&parts) {
        output.slice_mut(s![chunk.range(), ..]).assign(part);
    }

    // Seams: re-test the rows straddling each chunk boundary against the
    // unsuppressed input.
    for chunk in chunks.iter().skip(1) {
        let strip = chunk.offset.saturating_sub(radius)..(chunk.offset + radius).min(rows);
        let start = strip.start;
        let keep = local_maxima(&input.slice(s![strip.clone(), ..]), radius, |(r, c)| {
            rank((r + start, c))
        });
        let mut target = output.slice_mut(s![strip, ..]);
        Zip::from(&mut target).and(&keep).for_each(|out, &kept| {
            if !kept {
                *out = T::default();
            }
        });
    }

    Ok(output)
}

fn zero_rejected<T: Copy + Default>(values: &mut Array2<T>, keep: &Array2<bool>) {
    Zip::from(values).and(keep).for_each(|v, &kept| {
        if !kept {
            *v = T::default();
        }
    });
}

/// Mark the cells of `view` that win their clipped neighbourhood of
/// `radius` cells in each direction.
///
/// The 2-D maximum is computed separably: first the winning column for
/// each cell's horizontal span, then the winner among those along the
/// vertical span. Both passes compare by value, then by `rank` of the
/// position, so the composition picks the same winner as a direct scan.
fn local_maxima<T, K>(
    view: &ArrayView2<'_, T>,
    radius: usize,
    rank: impl Fn((usize, usize)) -> K,
) -> Array2<bool>
where
    T: Copy + PartialOrd,
    K: Ord,
{
    let (rows, cols) = view.dim();
    let beats = |a: (usize, usize), b: (usize, usize)| match view[a].partial_cmp(&view[b]) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Equal) => rank(a) < rank(b),
        _ => false,
    };

    let mut across = Array2::<usize>::zeros((rows, cols));
    for r in 0..rows {
        let best = sliding_best(cols, radius, |j, b| beats((r, j), (r, b)));
        for (c, b) in best.into_iter().enumerate() {
            across[[r, c]] = b;
        }
    }

    let mut keep = Array2::from_elem((rows, cols), false);
    for c in 0..cols {
        let best = sliding_best(rows, radius, |j, b| {
            beats((j, across[[j, c]]), (b, across[[b, c]]))
        });
        for (r, b) in best.into_iter().enumerate() {
            keep[[r, c]] = b == r && across[[r, c]] == c;
        }
    }
    keep
}

/// For each position `i` of a sequence of `len` items, the index of the
/// best item in `[i - radius, i + radius]`.
///
/// Keeps one running candidate: each newly revealed item replaces it
/// only if it `beats` the candidate, and the span is rescanned when the
/// candidate slides out on the left.
fn sliding_best(
    len: usize,
    radius: usize,
    mut beats: impl FnMut(usize, usize) -> bool,
) -> Vec<usize> {
    let mut out = Vec::with_capacity(len);
    if len == 0 {
        return out;
    }

    let mut best = 0;
    let mut revealed = 0;
    for i in 0..len {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(len - 1);

        if best < lo {
            best = lo;
            for j in lo + 1..=revealed {
                if beats(j, best) {
                    best = j;
                }
            }
        }
        while revealed < hi {
            revealed += 1;
            if beats(revealed, best) {
                best = revealed;
            }
        }
        out.push(best);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Direct O(n·w²) reference using the same ordering.
    fn brute_force<T: Copy + PartialOrd + Default>(input: &Array2<T>, window: usize) -> Array2<T> {
        let (rows, cols) = input.dim();
        let radius = window - 1;
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let v = input[[r, c]];
            for rr in r.saturating_sub(radius)..=(r + radius).min(rows - 1) {
                for cc in c.saturating_sub(radius)..=(c + radius).min(cols - 1) {
                    let other = input[[rr, cc]];
                    if other > v || (other == v && (rr, cc) < (r, c)) {
                        return T::default();
                    }
                }
            }
            v
        })
    }

    /// Small deterministic pseudo-random field with many ties.
    fn noise(rows: usize, cols: usize, seed: u64) -> Array2<i32> {
        let mut state = seed;
        Array2::from_shape_fn((rows, cols), |_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            i32::try_from(state >> 59).unwrap()
        })
    }

    fn nonzero_cells(a: &Array2<f64>) -> Vec<(usize, usize)> {
        a.indexed_iter()
            .filter(|(_, v)| **v != 0.0)
            .map(|(idx, _)| idx)
            .collect()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let a = Array2::<f64>::zeros((4, 6));
        assert_eq!(suppress(0, 3, &a), Err(ConfigError::ZeroThreadCount));
        assert_eq!(suppress(2, 0, &a), Err(ConfigError::ZeroWindow));
        assert_eq!(
            suppress(2, 5, &a),
            Err(ConfigError::WindowTooLarge {
                window: 5,
                rows: 4,
                cols: 6
            })
        );
    }

    #[test]
    fn window_of_one_is_identity() {
        let a = noise(7, 9, 3);
        assert_eq!(suppress(3, 1, &a).unwrap(), a);
    }

    #[test]
    fn nearby_peaks_keep_only_the_largest() {
        let mut a = Array2::<f64>::zeros((10, 10));
        a[[4, 4]] = 2.0;
        a[[5, 5]] = 3.0;
        a[[0, 4]] = 42.9;
        a[[0, 5]] = 42.8;

        let out = suppress(2, 3, &a).unwrap();
        assert!(out[[4, 4]].abs() < f64::EPSILON);
        assert!((out[[5, 5]] - 3.0).abs() < f64::EPSILON);
        assert!((out[[0, 4]] - 42.9).abs() < f64::EPSILON);
        assert!(out[[0, 5]].abs() < f64::EPSILON);
    }

    #[test]
    fn stronger_peak_two_cells_away_suppresses_chain() {
        let mut a = Array2::<f64>::zeros((10, 10));
        a[[4, 4]] = 2.0;
        a[[5, 5]] = 3.0;
        a[[3, 3]] = 4.0;
        a[[0, 4]] = 42.9;
        a[[0, 5]] = 42.8;
        a[[0, 3]] = 42.9;

        let out = suppress(2, 3, &a).unwrap();
        assert!((out[[3, 3]] - 4.0).abs() < f64::EPSILON);
        assert!(out[[4, 4]].abs() < f64::EPSILON);
        assert!(out[[5, 5]].abs() < f64::EPSILON);
        assert!((out[[0, 3]] - 42.9).abs() < f64::EPSILON);
        assert!(out[[0, 4]].abs() < f64::EPSILON);
        assert!(out[[0, 5]].abs() < f64::EPSILON);
    }

    #[test]
    fn equal_diagonal_peaks_keep_exactly_one() {
        for (size, threads) in [(10, 2), (16, 2), (16, 1)] {
            let mut a = Array2::<f64>::zeros((size, size));
            a[[7, 7]] = 16.0;
            a[[8, 8]] = 16.0;
            let out = suppress(threads, 8, &a).unwrap();
            assert_eq!(
                nonzero_cells(&out),
                vec![(7, 7)],
                "size={size} threads={threads}"
            );
        }
    }

    #[test]
    fn monotonic_column_keeps_top_value_across_chunk_boundary() {
        for threads in 1..=4 {
            let mut a = Array2::<f64>::zeros((10, 10));
            a[[3, 2]] = 18.0;
            a[[4, 2]] = 18.1;
            a[[5, 2]] = 18.2;
            a[[6, 2]] = 18.3;
            let out = suppress(threads, 5, &a).unwrap();
            assert_eq!(nonzero_cells(&out), vec![(6, 2)], "threads={threads}");
        }
    }

    #[test]
    fn seam_pass_removes_rival_from_neighbouring_chunk() {
        // 12 rows, 2 threads, window 3: chunks are rows 0..6 and 6..12.
        let mut a = Array2::<f64>::zeros((12, 8));
        a[[5, 4]] = 1.0;
        a[[6, 4]] = 2.0;
        let out = suppress(2, 3, &a).unwrap();
        assert_eq!(nonzero_cells(&out), vec![(6, 4)]);
    }

    #[test]
    fn rank_decides_between_equal_values() {
        // Rows 5 and 6 fall in different chunks for 2 threads.
        for threads in 1..=3 {
            let mut a = Array2::<f64>::zeros((12, 6));
            a[[5, 1]] = 4.0;
            a[[6, 1]] = 4.0;
            let reversed =
                suppress_by(threads, 3, &a, |(r, c)| std::cmp::Reverse((r, c))).unwrap();
            assert_eq!(nonzero_cells(&reversed), vec![(6, 1)], "threads={threads}");
            let plain = suppress(threads, 3, &a).unwrap();
            assert_eq!(nonzero_cells(&plain), vec![(5, 1)], "threads={threads}");
        }
    }

    #[test]
    fn matches_brute_force_for_every_thread_count() {
        for (rows, cols, window, seed) in [
            (17, 13, 2, 1),
            (23, 19, 3, 2),
            (31, 12, 4, 3),
            (40, 40, 6, 4),
        ] {
            let a = noise(rows, cols, seed);
            let expected = brute_force(&a, window);
            for threads in 1..=6 {
                let got = suppress(threads, window, &a).unwrap();
                assert_eq!(
                    got, expected,
                    "rows={rows} cols={cols} window={window} threads={threads}"
                );
            }
        }
    }

    #[test]
    fn survivors_dominate_every_window_containing_them() {
        let a = noise(25, 25, 11).mapv(f64::from);
        let window = 4;
        let out = suppress(3, window, &a).unwrap();
        let radius = window - 1;
        for ((r, c), &v) in out.indexed_iter() {
            if v == 0.0 {
                continue;
            }
            for rr in r.saturating_sub(radius)..=(r + radius).min(24) {
                for cc in c.saturating_sub(radius)..=(c + radius).min(24) {
                    assert!(a[[rr, cc]] <= v, "({r},{c}) beaten by ({rr},{cc})");
                    if (rr, cc) != (r, c) {
                        assert!(out[[rr, cc]] == 0.0 || out[[rr, cc]] < v);
                    }
                }
            }
        }
    }

    #[test]
    fn sliding_best_picks_first_of_equal_values() {
        let values = [1, 3, 3, 2, 0, 0, 5];
        let best = sliding_best(values.len(), 1, |j, b| values[j] > values[b]);
        assert_eq!(best, vec![1, 1, 1, 2, 3, 6, 6]);
    }
}
