//! Client-side helpers for driving the Mediaflow upload flow from the
//! command line.

pub mod client;

use std::ops::Range;

pub use client::ApiClient;

/// Byte range of each part when `size` bytes are split into `part_size`
/// chunks. Part `i + 1` covers `ranges[i]`.
pub fn part_ranges(size: u64, part_size: u64) -> Vec<Range<u64>> {
    if part_size == 0 {
        return Vec::new();
    }
    (0..size.div_ceil(part_size))
        .map(|i| {
            let start = i * part_size;
            start..(start + part_size).min(size)
        })
        .collect()
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_ranges_cover_file() {
        assert_eq!(part_ranges(10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(part_ranges(8, 4), vec![0..4, 4..8]);
        assert_eq!(part_ranges(3, 4), vec![0..3]);
    }

    #[test]
    fn test_part_ranges_empty() {
        assert!(part_ranges(0, 4).is_empty());
        assert!(part_ranges(10, 0).is_empty());
    }
}
