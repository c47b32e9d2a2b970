//! Day ranges: the window of calendar days a sync run covers.

use std::fmt;

use jiff::ToSpan;
use jiff::civil::Date;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    start: Date,
    end: Date,
}

impl DayRange {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: Date, end: Date) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The `days` days ending on `end`, inclusive. A zero-day window is
    /// treated as one day.
    pub fn ending_on(end: Date, days: u32) -> Self {
        let back = i64::from(days.max(1) - 1);
        let start = end.checked_sub(back.days()).unwrap_or(end);
        Self { start, end }
    }

    #[cfg(test)]
    pub fn start(&self) -> Date {
        self.start
    }

    #[cfg(test)]
    pub fn end(&self) -> Date {
        self.end
    }

    pub fn contains(&self, day: Date) -> bool {
        day >= self.start && day <= self.end
    }

    /// Every day in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = Date> {
        let end = self.end;
        self.start
            .series(1.day())
            .take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::date;

    #[test]
    fn rejects_inverted_range() {
        assert!(DayRange::new(date(2024, 5, 2), date(2024, 5, 1)).is_none());
    }

    #[test]
    fn window_ending_on_includes_both_ends() {
        let range = DayRange::ending_on(date(2024, 5, 5), 5);
        assert_eq!(range.start(), date(2024, 5, 1));

        let days: Vec<Date> = range.days().collect();
        assert_eq!(days.len(), 5);
        assert_eq!(days[4], date(2024, 5, 5));
    }

    #[test]
    fn window_crosses_month_boundary() {
        let range = DayRange::ending_on(date(2024, 3, 1), 2);
        assert_eq!(range.start(), date(2024, 2, 29));
        assert!(range.contains(date(2024, 2, 29)));
        assert!(!range.contains(date(2024, 2, 28)));
    }

    #[test]
    fn zero_day_window_is_one_day() {
        let range = DayRange::ending_on(date(2024, 5, 5), 0);
        assert_eq!(range.days().count(), 1);
    }
}
