//! Bounded rolling history of readings.
//!
//! [`History`] is a fixed-capacity ring buffer. Writes advance a cursor and,
//! once the buffer is full, overwrite the oldest slot, so the history never
//! grows beyond its capacity and eviction is strictly first-in, first-out.
//!
//! # Design
//!
//! - Slots are allocated once, at construction
//! - The write cursor points at the next slot to be written
//! - Wraparound is tracked so iteration can start at the oldest slot
//! - Iteration yields readings in chronological (insertion) order

use serde::{Deserialize, Serialize};

use crate::metric::Reading;

/// A fixed-capacity ring of readings, oldest evicted first.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    /// Pre-allocated slots; `None` until first written.
    slots: Vec<Option<Reading>>,
    /// Index of the next slot to write.
    cursor: usize,
    /// Whether the cursor has gone past the last slot at least once.
    has_wrapped: bool,
}

impl History {
    /// Creates an empty history holding at most `capacity` readings.
    ///
    /// A capacity of zero is bumped to one; configuration validation rejects
    /// zero before it gets here.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            cursor: 0,
            has_wrapped: false,
        }
    }

    /// Appends a reading, evicting the oldest one if the history is full.
    ///
    /// Returns the evicted reading, if any.
    pub fn push(&mut self, reading: Reading) -> Option<Reading> {
        let evicted = self.slots[self.cursor].replace(reading);

        self.cursor += 1;
        if self.cursor == self.slots.len() {
            self.cursor = 0;
            self.has_wrapped = true;
        }

        evicted
    }

    /// Returns the maximum number of readings retained.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of readings currently held.
    pub fn len(&self) -> usize {
        if self.has_wrapped {
            self.slots.len()
        } else {
            self.cursor
        }
    }

    /// Returns `true` if nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the ring has wrapped around (evicted at least once).
    pub fn has_wrapped(&self) -> bool {
        self.has_wrapped
    }

    /// Returns the most recent reading.
    pub fn newest(&self) -> Option<&Reading> {
        if self.is_empty() {
            return None;
        }
        let last = if self.cursor == 0 {
            self.slots.len() - 1
        } else {
            self.cursor - 1
        };
        self.slots[last].as_ref()
    }

    /// Returns the oldest reading still retained.
    pub fn oldest(&self) -> Option<&Reading> {
        self.iter().next()
    }

    /// Iterates over readings from oldest to newest.
    pub fn iter(&self) -> HistoryIter<'_> {
        let start = if self.has_wrapped { self.cursor } else { 0 };
        HistoryIter {
            history: self,
            current_slot: start,
            remaining: self.len(),
        }
    }

    /// Returns the scalar projection of every reading, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.iter()
            .filter_map(|r| r.value().map(|v| v.as_f64()))
            .collect()
    }

    /// Summarizes the retained values with `statistic`.
    ///
    /// Returns `None` when the history holds no values.
    pub fn summarize(&self, statistic: Statistic) -> Option<f64> {
        let value = statistic.apply(&self.values());
        if value.is_nan() { None } else { Some(value) }
    }
}

/// Iterator over a [`History`] in chronological order.
#[derive(Debug)]
pub struct HistoryIter<'a> {
    history: &'a History,
    current_slot: usize,
    remaining: usize,
}

impl<'a> Iterator for HistoryIter<'a> {
    type Item = &'a Reading;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let slot = &self.history.slots[self.current_slot];
            self.current_slot = (self.current_slot + 1) % self.history.slots.len();
            self.remaining -= 1;

            if let Some(reading) = slot {
                return Some(reading);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Reading;
    type IntoIter = HistoryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Aggregation applied to a window of history values.
///
/// Non-finite values are filtered out before aggregation. If none remain,
/// the result is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statistic {
    /// Arithmetic mean of all values.
    Average,
    /// Minimum of all values.
    Min,
    /// Maximum of all values.
    Max,
    /// Most recent value.
    Last,
}

impl Statistic {
    /// Applies this statistic to a slice of values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vigil::history::Statistic;
    ///
    /// let values = [1.0, 2.0, f64::NAN, 4.0];
    ///
    /// let avg = Statistic::Average.apply(&values);
    /// assert!((avg - (7.0 / 3.0)).abs() < 1e-10);
    /// assert_eq!(Statistic::Min.apply(&values), 1.0);
    /// assert_eq!(Statistic::Max.apply(&values), 4.0);
    /// assert_eq!(Statistic::Last.apply(&values), 4.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // Window sizes are far below 2^52
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut valid = values.iter().copied().filter(|v| v.is_finite()).peekable();
        if valid.peek().is_none() {
            return f64::NAN;
        }

        match self {
            Self::Average => {
                let (sum, count) = valid.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                sum / count as f64
            }
            Self::Min => valid.fold(f64::INFINITY, f64::min),
            Self::Max => valid.fold(f64::NEG_INFINITY, f64::max),
            Self::Last => valid.last().unwrap_or(f64::NAN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricId, Value};

    fn reading(i: u32) -> Reading {
        Reading::ok(
            MetricId::new("cpu.percent").unwrap(),
            Value::Percent(f64::from(i)),
            u64::from(i) + 1,
        )
    }

    #[test]
    fn test_empty_history() {
        let history = History::new(10);

        assert!(history.is_empty());
        assert!(!history.has_wrapped());
        assert_eq!(history.len(), 0);
        assert_eq!(history.capacity(), 10);
        assert_eq!(history.newest(), None);
        assert_eq!(history.oldest(), None);
        assert_eq!(history.iter().count(), 0);
        assert_eq!(history.summarize(Statistic::Average), None);
    }

    #[test]
    fn test_push_without_wrap() {
        let mut history = History::new(5);
        for i in 0..3 {
            assert!(history.push(reading(i)).is_none());
        }

        assert_eq!(history.len(), 3);
        assert!(!history.has_wrapped());
        assert_eq!(history.values(), vec![0.0, 1.0, 2.0]);
        assert_eq!(history.newest(), Some(&reading(2)));
        assert_eq!(history.oldest(), Some(&reading(0)));
    }

    #[test]
    fn test_wraparound_evicts_oldest_first() {
        let mut history = History::new(3);
        for i in 0..3 {
            history.push(reading(i));
        }

        // Fourth push evicts the first reading
        let evicted = history.push(reading(3));
        assert_eq!(evicted, Some(reading(0)));
        assert!(history.has_wrapped());
        assert_eq!(history.len(), 3);
        assert_eq!(history.values(), vec![1.0, 2.0, 3.0]);

        // Keep going well past capacity
        for i in 4..10 {
            history.push(reading(i));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.values(), vec![7.0, 8.0, 9.0]);
        assert_eq!(history.newest(), Some(&reading(9)));
        assert_eq!(history.oldest(), Some(&reading(7)));
    }

    #[test]
    fn test_newest_at_cursor_boundary() {
        let mut history = History::new(2);
        history.push(reading(0));
        history.push(reading(1));
        // Cursor wrapped back to slot 0; newest is in the last slot
        assert_eq!(history.newest(), Some(&reading(1)));
    }

    #[test]
    fn test_capacity_of_one() {
        let mut history = History::new(1);
        history.push(reading(0));
        history.push(reading(1));
        assert_eq!(history.len(), 1);
        assert_eq!(history.values(), vec![1.0]);

        let zero = History::new(0);
        assert_eq!(zero.capacity(), 1);
    }

    #[test]
    fn test_summaries() {
        let mut history = History::new(4);
        for i in [4, 8, 2, 6] {
            history.push(reading(i));
        }

        assert_eq!(history.summarize(Statistic::Average), Some(5.0));
        assert_eq!(history.summarize(Statistic::Min), Some(2.0));
        assert_eq!(history.summarize(Statistic::Max), Some(8.0));
        assert_eq!(history.summarize(Statistic::Last), Some(6.0));
    }

    #[test]
    fn test_statistic_filters_nan() {
        let values = [1.0, 2.0, f64::NAN, 4.0, 3.0];

        assert!((Statistic::Average.apply(&values) - 2.5).abs() < f64::EPSILON);
        assert_eq!(Statistic::Min.apply(&values), 1.0);
        assert_eq!(Statistic::Max.apply(&values), 4.0);
        assert_eq!(Statistic::Last.apply(&values), 3.0);

        assert!(Statistic::Average.apply(&[f64::NAN, f64::NAN]).is_nan());
        assert!(Statistic::Min.apply(&[]).is_nan());
    }
}
