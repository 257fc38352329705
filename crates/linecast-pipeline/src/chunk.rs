//! Work partitioning for the parallel stages.
//!
//! A range of `count` items (image rows, accumulator rows, edge points)
//! is split into contiguous spans, one per worker. Every span gets
//! `count / threads` items and the last one also takes the remainder, so
//! concatenating the spans in order reproduces the full range.

use std::ops::Range;

use crate::types::ConfigError;

/// A contiguous span of items assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Index of the first item.
    pub offset: usize,
    /// Number of items.
    pub count: usize,
}

impl Chunk {
    /// Index range covered by this chunk.
    #[must_use]
    pub const fn range(self) -> Range<usize> {
        self.offset..self.offset + self.count
    }

    /// One past the last index.
    #[must_use]
    pub const fn end(self) -> usize {
        self.offset + self.count
    }
}

/// Split `count` items into `thread_count` spans.
///
/// When `count < thread_count` the leading spans are empty and the last
/// one holds everything.
///
/// # Errors
///
/// Returns [`ConfigError::ZeroThreadCount`] if `thread_count == 0`.
pub fn make_chunks(thread_count: usize, count: usize) -> Result<Vec<Chunk>, ConfigError> {
    if thread_count == 0 {
        return Err(ConfigError::ZeroThreadCount);
    }

    let size = count / thread_count;
    let mut chunks: Vec<Chunk> = (0..thread_count)
        .map(|i| Chunk {
            offset: i * size,
            count: size,
        })
        .collect();

    if let Some(last) = chunks.last_mut() {
        last.count += count - size * thread_count;
    }

    Ok(chunks)
}

/// Split `count` items into at most `thread_count` spans of at least
/// `minimum` items each.
///
/// The thread count is lowered until the even share reaches `minimum`,
/// down to a single span.
///
/// # Errors
///
/// Returns [`ConfigError::ZeroThreadCount`] if `thread_count == 0`, and
/// [`ConfigError::SpanTooShort`] if even one span covering everything
/// would be shorter than `minimum`.
pub fn make_chunks_with_minimum(
    thread_count: usize,
    count: usize,
    minimum: usize,
) -> Result<Vec<Chunk>, ConfigError> {
    if thread_count == 0 {
        return Err(ConfigError::ZeroThreadCount);
    }
    if count < minimum {
        return Err(ConfigError::SpanTooShort { count, minimum });
    }

    let threads = match count.checked_div(minimum) {
        Some(fit) => thread_count.min(fit).max(1),
        None => thread_count,
    };
    make_chunks(threads, count)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_is_an_error() {
        assert_eq!(make_chunks(0, 10), Err(ConfigError::ZeroThreadCount));
        assert_eq!(
            make_chunks_with_minimum(0, 10, 2),
            Err(ConfigError::ZeroThreadCount)
        );
    }

    #[test]
    fn remainder_goes_to_last_chunk() {
        let chunks = make_chunks(3, 10).unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk {
                    offset: 0,
                    count: 3
                },
                Chunk {
                    offset: 3,
                    count: 3
                },
                Chunk {
                    offset: 6,
                    count: 4
                },
            ]
        );
    }

    #[test]
    fn chunks_tile_the_range_without_gaps() {
        for threads in 1..=9 {
            for count in 0..40 {
                let chunks = make_chunks(threads, count).unwrap();
                assert_eq!(chunks.len(), threads);
                let mut next = 0;
                for chunk in &chunks {
                    assert_eq!(chunk.offset, next, "gap at threads={threads} count={count}");
                    next = chunk.end();
                }
                assert_eq!(next, count);
            }
        }
    }

    #[test]
    fn fewer_items_than_threads_puts_all_in_last() {
        let chunks = make_chunks(4, 2).unwrap();
        assert_eq!(chunks.iter().filter(|c| c.count > 0).count(), 1);
        assert_eq!(chunks[3].range(), 0..2);
    }

    #[test]
    fn minimum_lowers_thread_count() {
        let chunks = make_chunks_with_minimum(8, 20, 6).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.count >= 6));
        assert_eq!(chunks.last().unwrap().end(), 20);
    }

    #[test]
    fn minimum_keeps_thread_count_when_spans_are_long_enough() {
        let chunks = make_chunks_with_minimum(4, 100, 10).unwrap();
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn minimum_larger_than_count_is_an_error() {
        assert_eq!(
            make_chunks_with_minimum(2, 5, 6),
            Err(ConfigError::SpanTooShort {
                count: 5,
                minimum: 6
            })
        );
    }

    #[test]
    fn zero_minimum_behaves_like_plain_split() {
        assert_eq!(
            make_chunks_with_minimum(3, 10, 0).unwrap(),
            make_chunks(3, 10).unwrap()
        );
    }
}
