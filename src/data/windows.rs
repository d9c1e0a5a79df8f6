//! Date-window generation for range-limited vendor endpoints

use chrono::{Duration, Months, NaiveDateTime};

/// Width of one request window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStep {
    Hours(i64),
    Days(i64),
    Months(u32),
}

impl WindowStep {
    pub fn advance(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            WindowStep::Hours(h) => from.checked_add_signed(Duration::hours(h)),
            WindowStep::Days(d) => from.checked_add_signed(Duration::days(d)),
            WindowStep::Months(m) => from.checked_add_months(Months::new(m)),
        }
    }

    fn is_positive(&self) -> bool {
        match *self {
            WindowStep::Hours(n) | WindowStep::Days(n) => n > 0,
            WindowStep::Months(n) => n > 0,
        }
    }
}

/// Consecutive `(from, to)` windows covering `[start, end)`; the last `to` is clamped to `end`
pub fn date_windows(
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: WindowStep,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    if !step.is_positive() {
        return windows;
    }

    let mut current = start;
    while current < end {
        let next = match step.advance(current) {
            Some(next) => next.min(end),
            None => end,
        };
        windows.push((current, next));
        current = next;
    }
    windows
}

/// Windows of exactly one step that end on or before `end`; a trailing partial window is skipped
pub fn full_windows(
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: WindowStep,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut windows = Vec::new();
    if !step.is_positive() {
        return windows;
    }

    let mut current = start;
    while let Some(next) = step.advance(current) {
        if next > end {
            break;
        }
        windows.push((current, next));
        current = next;
    }
    windows
}
