//! Bitemporal validity stamps
//!
//! Every record carries a validity stamp `(timestamp_micros, asserted)`.
//! A record is *live* at query time `T` iff its latest stamp with
//! `timestamp_micros <= T` has `asserted == true`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single validity stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    /// Microseconds since the Unix epoch.
    pub timestamp_micros: i64,
    /// Whether this stamp asserts (true) or retracts (false) the record.
    pub asserted: bool,
}

impl Validity {
    /// Build an asserting stamp at `timestamp_micros`.
    pub fn asserted_at(timestamp_micros: i64) -> Self {
        Self {
            timestamp_micros,
            asserted: true,
        }
    }

    /// Build a retracting stamp at `timestamp_micros`.
    pub fn retracted_at(timestamp_micros: i64) -> Self {
        Self {
            timestamp_micros,
            asserted: false,
        }
    }

    /// An asserting stamp at the current wall-clock time.
    pub fn asserted_now() -> Self {
        Self::asserted_at(now_micros())
    }

    /// A retracting stamp at the current wall-clock time.
    pub fn retracted_now() -> Self {
        Self::retracted_at(now_micros())
    }

    /// Given the validity history of a record (any order), find whether it
    /// is live at `t`: the latest stamp with `timestamp_micros <= t` must
    /// exist and be asserting.
    pub fn live_at<'a, I>(history: I, t: i64) -> bool
    where
        I: IntoIterator<Item = &'a Validity>,
    {
        history
            .into_iter()
            .filter(|v| v.timestamp_micros <= t)
            .max_by_key(|v| v.timestamp_micros)
            .map(|v| v.asserted)
            .unwrap_or(false)
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Current wall-clock time as a [`DateTime<Utc>`].
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_at_picks_latest_stamp_not_highest_index() {
        let history = vec![
            Validity::asserted_at(100),
            Validity::retracted_at(200),
            Validity::asserted_at(50),
        ];
        assert!(!Validity::live_at(&history, 200));
        assert!(Validity::live_at(&history, 150));
        assert!(Validity::live_at(&history, 100));
        assert!(!Validity::live_at(&history, 10));
    }

    #[test]
    fn empty_history_is_never_live() {
        let history: Vec<Validity> = vec![];
        assert!(!Validity::live_at(&history, 1000));
    }

    #[test]
    fn ignores_future_stamps() {
        let history = vec![Validity::asserted_at(500)];
        assert!(!Validity::live_at(&history, 100));
    }
}
