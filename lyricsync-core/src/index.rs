//! "Which line is active at time T" lookups over a timeline.

use crate::timeline::LyricTimeline;

/// Forward steps the cursor tries before falling back to binary search
const MAX_FORWARD_STEPS: usize = 4;

/// Sorted start times of a timeline's lines.
#[derive(Debug, Clone, Default)]
pub struct TimelineIndex {
    starts: Vec<u64>,
}

impl TimelineIndex {
    #[must_use]
    pub fn new(timeline: &LyricTimeline) -> Self {
        Self {
            starts: timeline.lines.iter().map(|l| l.start_ms).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Index of the line active at `position_ms`.
    ///
    /// `None` before the first line (including negative positions). At or past
    /// the last line's end this keeps returning the last index.
    #[must_use]
    pub fn active_line_index(&self, position_ms: i64) -> Option<usize> {
        let position = u64::try_from(position_ms).ok()?;
        self.starts
            .partition_point(|&start| start <= position)
            .checked_sub(1)
    }

    /// Whether `position` still belongs to line `i`
    fn contains(&self, i: usize, position: u64) -> bool {
        self.starts[i] <= position
            && self.starts.get(i + 1).is_none_or(|&next| position < next)
    }
}

/// Remembers the last answer so steadily advancing playback resolves in a few
/// comparisons.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineCursor {
    last: Option<usize>,
}

impl TimelineCursor {
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Last index returned by [`TimelineCursor::lookup`]
    #[must_use]
    pub const fn current(&self) -> Option<usize> {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Same answer as [`TimelineIndex::active_line_index`].
    ///
    /// Scans forward from the previous answer for small advances and binary
    /// searches on backward or large jumps.
    pub fn lookup(&mut self, index: &TimelineIndex, position_ms: i64) -> Option<usize> {
        let result = self
            .scan_forward(index, position_ms)
            .or_else(|| index.active_line_index(position_ms));
        self.last = result;
        result
    }

    fn scan_forward(&self, index: &TimelineIndex, position_ms: i64) -> Option<usize> {
        let position = u64::try_from(position_ms).ok()?;
        let start = self.last?;
        if start >= index.len() || index.starts[start] > position {
            return None;
        }

        let mut i = start;
        for _ in 0..=MAX_FORWARD_STEPS {
            if index.contains(i, position) {
                return Some(i);
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lrc::LrcFile;
    use crate::playback::TrackIdentity;
    use crate::timeline::TimelineSource;

    fn index_of(lrc: &str, duration_ms: u64) -> TimelineIndex {
        let track = TrackIdentity::new("Song", "Artist", duration_ms);
        let timeline =
            LyricTimeline::from_lrc(track, &LrcFile::parse(lrc), TimelineSource::Fetched);
        TimelineIndex::new(&timeline)
    }

    fn sample() -> TimelineIndex {
        index_of("[00:00.00]A\n[00:02.00]B\n[00:05.00]C", 7_000)
    }

    fn long_index() -> TimelineIndex {
        let lrc: String = (0..200)
            .map(|i| format!("[{:02}:{:02}.00]line {i}\n", (i * 3) / 60, (i * 3) % 60))
            .collect();
        index_of(&lrc, 600_000)
    }

    #[test]
    fn test_active_line_examples() {
        let index = sample();
        assert_eq!(index.active_line_index(2_500), Some(1));
        assert_eq!(index.active_line_index(6_000), Some(2));
        assert_eq!(index.active_line_index(-100), None);
    }

    #[test]
    fn test_boundaries() {
        let index = sample();
        assert_eq!(index.active_line_index(0), Some(0));
        assert_eq!(index.active_line_index(1_999), Some(0));
        assert_eq!(index.active_line_index(2_000), Some(1));
        // Past the last line's end: stays on the last line
        assert_eq!(index.active_line_index(60_000), Some(2));
    }

    #[test]
    fn test_before_first_line() {
        let index = index_of("[00:10.00]late start", 30_000);
        assert_eq!(index.active_line_index(9_999), None);
        assert_eq!(index.active_line_index(10_000), Some(0));
    }

    #[test]
    fn test_empty_index() {
        let index = TimelineIndex::default();
        assert!(index.is_empty());
        assert_eq!(index.active_line_index(1_000), None);
        assert_eq!(TimelineCursor::new().lookup(&index, 1_000), None);
    }

    #[test]
    fn test_monotonic_for_increasing_positions() {
        let index = long_index();
        let mut position: i64 = -500;
        let mut seed: u64 = 0x2545_f491;
        let mut previous: Option<usize> = None;

        while position < 700_000 {
            let current = index.active_line_index(position);
            assert!(current >= previous, "regressed at {position}");
            previous = current;

            // xorshift step sizes between 0 and 4095 ms
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            position += i64::try_from(seed % 4_096).unwrap();
        }
        assert_eq!(previous, Some(199));
    }

    #[test]
    fn test_cursor_matches_binary_search() {
        let index = long_index();
        let mut cursor = TimelineCursor::new();
        let positions = [
            -10, 0, 50, 2_999, 3_000, 3_100, 9_000, 9_050, 300_000, 300_010, 1_000, 1_001,
            599_000, 650_000, 5_999, 6_000,
        ];

        for position in positions {
            assert_eq!(
                cursor.lookup(&index, position),
                index.active_line_index(position),
                "mismatch at {position}"
            );
        }
        assert_eq!(cursor.current(), Some(2));
    }

    #[test]
    fn test_cursor_reset() {
        let index = sample();
        let mut cursor = TimelineCursor::new();
        assert_eq!(cursor.lookup(&index, 5_500), Some(2));
        cursor.reset();
        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.lookup(&index, 100), Some(0));
    }
}
