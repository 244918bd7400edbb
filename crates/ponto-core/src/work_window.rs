use crate::types::Timestamp;
use chrono::NaiveTime;

/// Permitted operating hours, as local time of day.
///
/// Reports fact only; whether after-hours registration is allowed is the
/// controller's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkWindowPolicy {
    start: Option<NaiveTime>,
    end: Option<NaiveTime>,
}

impl WorkWindowPolicy {
    pub fn new(start: Option<NaiveTime>, end: Option<NaiveTime>) -> Self {
        Self { start, end }
    }

    /// A policy with no bounds: always within work hours.
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Inclusive on both bounds. Missing either bound means always true.
    pub fn is_within_work_hours(&self, now: Timestamp) -> bool {
        let (Some(start), Some(end)) = (self.start, self.end) else {
            return true;
        };
        let time = now.time();
        start <= time && time <= end
    }
}
