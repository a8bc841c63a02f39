//! Fixed-capacity field splitter for sampled source rows.
//!
//! The sampling phase reads raw rows as bytes and needs them decomposed into
//! column values before they reach the statistics aggregator. Rows can be
//! arbitrarily large, so [`RowFieldSplitter`] bounds the work per row:
//!
//! - every field buffer holds at most `field_capacity` bytes; a longer run
//!   without a separator is *force-sealed* at exactly `field_capacity` bytes
//!   and the next field starts at the following byte (no input is skipped);
//! - at most `max_fields` buffers exist; a row that needs more fails with
//!   [`SplitError::CapacityExceeded`] instead of being truncated.
//!
//! Buffers are allocated once in [`RowFieldSplitter::new`] and reused by every
//! [`split`](RowFieldSplitter::split) call. Each call starts from an empty
//! result, so fields from a previous row are never visible after a shorter
//! row is split.
//!
//! ```
//! use cube_build_core::splitter::RowFieldSplitter;
//!
//! let mut splitter = RowFieldSplitter::new(15, 10).unwrap();
//! let row = b"2013-02-17\x7f\x7fCollectibles";
//! let n = splitter.split(row, row.len(), 0x7f).unwrap();
//! assert_eq!(n, 3);
//! assert_eq!(splitter.field(1), Some(&b""[..]));
//! ```
//!
//! A splitter is not meant to be shared between concurrently processed rows;
//! give each sampling worker its own instance.

use std::fmt;

use snafu::{Backtrace, prelude::*};

use crate::config::SplitterConfig;

/// Delimiters commonly found in delimited source tables, in detection order.
pub const COMMON_DELIMITERS: [u8; 4] = [0x7f, b'|', b'\t', b','];

/// Upper bound on the bytes a splitter pre-allocates (`field_capacity * max_fields`).
pub const MAX_SPLITTER_BYTES: usize = 1 << 30;

/// Whether both limits are positive and their buffers fit in [`MAX_SPLITTER_BYTES`].
pub fn limits_are_valid(field_capacity: usize, max_fields: usize) -> bool {
    field_capacity > 0
        && max_fields > 0
        && field_capacity
            .checked_mul(max_fields)
            .is_some_and(|total| total <= MAX_SPLITTER_BYTES)
}

/// Errors raised while splitting rows.
#[derive(Debug, Snafu)]
pub enum SplitError {
    /// Construction parameters must be positive and bounded.
    #[snafu(display(
        "Invalid splitter configuration: field_capacity={field_capacity}, max_fields={max_fields} \
         (both must be > 0 and their product at most {MAX_SPLITTER_BYTES} bytes)"
    ))]
    InvalidConfig {
        /// Requested bytes per field.
        field_capacity: usize,
        /// Requested number of fields.
        max_fields: usize,
    },

    /// The row needs more fields than the splitter was built for.
    #[snafu(display(
        "Row of {row_len} bytes needs more than {max_fields} fields (field capacity {field_capacity} bytes)"
    ))]
    CapacityExceeded {
        /// Configured maximum number of fields.
        max_fields: usize,
        /// Configured bytes per field.
        field_capacity: usize,
        /// Length of the offending row.
        row_len: usize,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

/// One column value of the current row.
///
/// The backing allocation is `field_capacity` bytes and survives across rows;
/// only the first [`len`](FieldBuffer::len) bytes belong to the current value.
/// A zero-length buffer is a present, empty field.
#[derive(Clone)]
pub struct FieldBuffer {
    value: Box<[u8]>,
    len: usize,
}

impl FieldBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            value: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    fn fill(&mut self, bytes: &[u8]) {
        self.value[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }

    /// The field's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.value[..self.len]
    }

    /// Logical length of the field.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the field is present but empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing allocation.
    pub fn capacity(&self) -> usize {
        self.value.len()
    }
}

impl fmt::Debug for FieldBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBuffer")
            .field("value", &String::from_utf8_lossy(self.as_bytes()))
            .field("len", &self.len)
            .finish()
    }
}

/// Splits byte rows into reusable, capacity-bounded field buffers.
#[derive(Debug, Clone)]
pub struct RowFieldSplitter {
    buffers: Vec<FieldBuffer>,
    field_capacity: usize,
    count: usize,
}

impl RowFieldSplitter {
    /// Pre-allocate `max_fields` buffers of `field_capacity` bytes each.
    ///
    /// Fails with [`SplitError::InvalidConfig`] when either limit is zero or
    /// the total exceeds [`MAX_SPLITTER_BYTES`].
    pub fn new(field_capacity: usize, max_fields: usize) -> Result<Self, SplitError> {
        ensure!(
            limits_are_valid(field_capacity, max_fields),
            InvalidConfigSnafu {
                field_capacity,
                max_fields,
            }
        );

        let buffers = (0..max_fields)
            .map(|_| FieldBuffer::with_capacity(field_capacity))
            .collect();

        Ok(Self {
            buffers,
            field_capacity,
            count: 0,
        })
    }

    /// Build a splitter from the `[splitter]` configuration section.
    pub fn from_config(config: &SplitterConfig) -> Result<Self, SplitError> {
        Self::new(config.field_capacity, config.max_fields)
    }

    /// Bytes each field buffer can hold.
    pub fn field_capacity(&self) -> usize {
        self.field_capacity
    }

    /// Number of pre-allocated field buffers.
    pub fn max_fields(&self) -> usize {
        self.buffers.len()
    }

    /// Split `input[..length]` on `separator` and return the number of fields.
    ///
    /// - Adjacent separators, or a separator at position 0, produce a present
    ///   field of length 0; a trailing separator produces an empty last field.
    /// - A run of more than `field_capacity` bytes without a separator is
    ///   sealed every `field_capacity` bytes.
    /// - The in-progress field is always sealed at end of input, so an empty
    ///   row yields one empty field.
    ///
    /// `length` is clamped to `input.len()`. On error no fields are exposed.
    pub fn split(&mut self, input: &[u8], length: usize, separator: u8) -> Result<usize, SplitError> {
        self.count = 0;
        let row = &input[..length.min(input.len())];

        for segment in row.split(|b| *b == separator) {
            if segment.is_empty() {
                self.seal(segment, row.len())?;
                continue;
            }
            for chunk in segment.chunks(self.field_capacity) {
                self.seal(chunk, row.len())?;
            }
        }

        Ok(self.count)
    }

    fn seal(&mut self, bytes: &[u8], row_len: usize) -> Result<(), SplitError> {
        let Some(buffer) = self.buffers.get_mut(self.count) else {
            let max_fields = self.buffers.len();
            self.count = 0;
            return CapacityExceededSnafu {
                max_fields,
                field_capacity: self.field_capacity,
                row_len,
            }
            .fail();
        };

        buffer.fill(bytes);
        self.count += 1;
        Ok(())
    }

    /// Forget the current row without releasing any buffer.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Number of fields sealed by the last [`split`](Self::split) call.
    pub fn field_count(&self) -> usize {
        self.count
    }

    /// Fields of the last row, in column order.
    pub fn fields(&self) -> &[FieldBuffer] {
        &self.buffers[..self.count]
    }

    /// Bytes of field `index` of the last row, or `None` past the field count.
    pub fn field(&self, index: usize) -> Option<&[u8]> {
        self.fields().get(index).map(FieldBuffer::as_bytes)
    }

    /// Iterate over the fields of the last row as byte slices.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.fields().iter().map(FieldBuffer::as_bytes)
    }
}

impl fmt::Display for RowFieldSplitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&String::from_utf8_lossy(field))?;
        }
        Ok(())
    }
}

/// Split a whole row on `separator` into owned strings, without capacity limits.
///
/// Invalid UTF-8 is replaced lossily.
pub fn split_to_strings(row: &[u8], separator: u8) -> Vec<String> {
    row.split(|b| *b == separator)
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// First delimiter from [`COMMON_DELIMITERS`] that occurs in `row`.
pub fn detect_delimiter(row: &[u8]) -> Option<u8> {
    COMMON_DELIMITERS
        .iter()
        .copied()
        .find(|delim| row.contains(delim))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEL: u8 = 0x7f;

    fn fields_of(splitter: &RowFieldSplitter) -> Vec<String> {
        splitter
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    #[test]
    fn splits_on_separator() {
        let mut splitter = RowFieldSplitter::new(15, 10).expect("valid config");
        let input = b"2013-02-17\x7fCollectibles";

        let n = splitter.split(input, input.len(), DEL).expect("split");

        assert_eq!(n, 2);
        assert_eq!(fields_of(&splitter), vec!["2013-02-17", "Collectibles"]);
    }

    #[test]
    fn adjacent_separators_yield_present_empty_field() {
        let mut splitter = RowFieldSplitter::new(15, 10).expect("valid config");
        let input = b"2013-02-17\x7f\x7fCollectibles";

        let n = splitter.split(input, input.len(), DEL).expect("split");

        assert_eq!(n, 3);
        assert_eq!(fields_of(&splitter), vec!["2013-02-17", "", "Collectibles"]);
        assert!(splitter.fields()[1].is_empty());
        assert_eq!(splitter.field(1), Some(&b""[..]));
        assert_eq!(splitter.field(3), None);
    }

    #[test]
    fn leading_and_trailing_separators_yield_empty_fields() {
        let mut splitter = RowFieldSplitter::new(8, 8).expect("valid config");

        splitter.split(b"|a|", 3, b'|').expect("split");
        assert_eq!(fields_of(&splitter), vec!["", "a", ""]);
    }

    #[test]
    fn row_without_separator_is_split_by_capacity() {
        let mut splitter = RowFieldSplitter::new(10, 15).expect("valid config");
        let input = b"2013-02-17Collectibles";

        let n = splitter.split(input, input.len(), DEL).expect("split");

        assert_eq!(n, 3);
        assert_eq!(fields_of(&splitter), vec!["2013-02-17", "Collectibl", "es"]);
    }

    #[test]
    fn capacity_law_holds_for_separator_free_rows() {
        for k in 1..=7usize {
            let mut splitter = RowFieldSplitter::new(k, 64).expect("valid config");
            for len in 1..=40usize {
                let row: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();

                let n = splitter.split(&row, row.len(), b'|').expect("split");

                assert_eq!(n, len.div_ceil(k), "k={k} len={len}");
                let (last, full) = splitter.fields().split_last().expect("at least one field");
                assert!(full.iter().all(|f| f.len() == k), "k={k} len={len}");
                assert!(last.len() >= 1 && last.len() <= k, "k={k} len={len}");
                assert_eq!(splitter.iter().flatten().copied().collect::<Vec<_>>(), row);
            }
        }
    }

    #[test]
    fn separator_law_holds_when_segments_fit() {
        let mut splitter = RowFieldSplitter::new(4, 32).expect("valid config");
        let rows: [&[u8]; 5] = [b"a", b"a,b", b"ab,,cd", b",", b"abcd,abcd,,x,"];

        for row in rows {
            let separators = row.iter().filter(|b| **b == b',').count();
            let n = splitter.split(row, row.len(), b',').expect("split");
            assert_eq!(n, separators + 1, "{}", String::from_utf8_lossy(row));
        }
    }

    #[test]
    fn capacity_seals_interleave_with_separators() {
        let mut splitter = RowFieldSplitter::new(3, 16).expect("valid config");

        splitter.split(b"abcdefg|hi|jkl", 14, b'|').expect("split");

        assert_eq!(fields_of(&splitter), vec!["abc", "def", "g", "hi", "jkl"]);
    }

    #[test]
    fn field_of_exactly_capacity_is_not_followed_by_phantom_field() {
        let mut splitter = RowFieldSplitter::new(4, 8).expect("valid config");

        assert_eq!(splitter.split(b"abcd", 4, b'|').expect("split"), 1);
        assert_eq!(splitter.split(b"abcd|ef", 7, b'|').expect("split"), 2);
        assert_eq!(fields_of(&splitter), vec!["abcd", "ef"]);
    }

    #[test]
    fn empty_row_yields_one_empty_field() {
        let mut splitter = RowFieldSplitter::new(4, 4).expect("valid config");

        assert_eq!(splitter.split(b"", 0, b'|').expect("split"), 1);
        assert!(splitter.fields()[0].is_empty());
    }

    #[test]
    fn length_limits_the_scanned_prefix() {
        let mut splitter = RowFieldSplitter::new(8, 8).expect("valid config");

        splitter.split(b"ab|cd|ef", 5, b'|').expect("split");
        assert_eq!(fields_of(&splitter), vec!["ab", "cd"]);

        // Oversized lengths are clamped to the input.
        splitter.split(b"ab|cd", 100, b'|').expect("split");
        assert_eq!(fields_of(&splitter), vec!["ab", "cd"]);
    }

    #[test]
    fn exceeding_max_fields_fails_without_exposing_partial_row() {
        let mut splitter = RowFieldSplitter::new(2, 3).expect("valid config");

        let err = splitter
            .split(b"a|b|c|d", 7, b'|')
            .expect_err("four fields do not fit");
        assert!(matches!(
            err,
            SplitError::CapacityExceeded {
                max_fields: 3,
                row_len: 7,
                ..
            }
        ));
        assert_eq!(splitter.field_count(), 0);

        // Capacity seals count towards the limit too.
        assert!(splitter.split(b"abcdefg", 7, b'|').is_err());

        // Exactly max_fields fits.
        assert_eq!(splitter.split(b"abcdef", 6, b'|').expect("split"), 3);
    }

    #[test]
    fn reuse_across_rows_of_different_shape_hides_stale_fields() {
        let mut splitter = RowFieldSplitter::new(15, 10).expect("valid config");

        splitter
            .split(b"2013-02-17\x7f\x7fCollectibles", 24, DEL)
            .expect("split");
        assert_eq!(splitter.field_count(), 3);

        splitter
            .split(b"2013-02-17\x7fCollectibles", 23, DEL)
            .expect("split");
        assert_eq!(splitter.field_count(), 2);
        assert_eq!(fields_of(&splitter), vec!["2013-02-17", "Collectibles"]);
        assert_eq!(splitter.field(2), None);

        // Same input twice gives the same answer regardless of call history.
        splitter.split(b"x", 1, DEL).expect("split");
        let n = splitter
            .split(b"2013-02-17\x7fCollectibles", 23, DEL)
            .expect("split");
        assert_eq!(n, 2);
    }

    #[test]
    fn reset_clears_result_but_keeps_buffers() {
        let mut splitter = RowFieldSplitter::new(6, 4).expect("valid config");
        splitter.split(b"a,b", 3, b',').expect("split");

        splitter.reset();

        assert_eq!(splitter.field_count(), 0);
        assert!(splitter.fields().is_empty());
        assert_eq!(splitter.max_fields(), 4);
        assert!(splitter.buffers.iter().all(|b| b.capacity() == 6));
    }

    #[test]
    fn zero_sized_configuration_is_rejected() {
        assert!(matches!(
            RowFieldSplitter::new(0, 4),
            Err(SplitError::InvalidConfig { .. })
        ));
        assert!(matches!(
            RowFieldSplitter::new(4, 0),
            Err(SplitError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn oversized_configuration_is_rejected_before_allocating() {
        for (field_capacity, max_fields) in [(usize::MAX, 1), (1 << 20, 1 << 20), (usize::MAX, usize::MAX)] {
            assert!(
                matches!(
                    RowFieldSplitter::new(field_capacity, max_fields),
                    Err(SplitError::InvalidConfig { .. })
                ),
                "{field_capacity} x {max_fields}"
            );
        }
        assert!(limits_are_valid(MAX_SPLITTER_BYTES, 1));
    }

    #[test]
    fn display_joins_fields_with_commas() {
        let mut splitter = RowFieldSplitter::new(8, 8).expect("valid config");
        splitter.split(b"a\tb\t\tc", 6, b'\t').expect("split");

        assert_eq!(splitter.to_string(), "a,b,,c");
    }

    #[test]
    fn split_to_strings_has_no_capacity_limit() {
        let long = "x".repeat(10_000);
        let row = format!("{long}|y");

        assert_eq!(split_to_strings(row.as_bytes(), b'|'), vec![long, "y".to_string()]);
    }

    #[test]
    fn detect_delimiter_prefers_common_order() {
        assert_eq!(detect_delimiter(b"a|b\tc"), Some(b'|'));
        assert_eq!(detect_delimiter(b"a,b\x7fc"), Some(0x7f));
        assert_eq!(detect_delimiter(b"a,b"), Some(b','));
        assert_eq!(detect_delimiter(b"plain"), None);
    }
}
