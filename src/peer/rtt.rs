//! Round-trip estimation and request pipelining.
//!
//! Every PIECE answering an in-flight REQUEST yields one RTT sample. The
//! estimator keeps a smoothed RTT and its mean deviation, TCP style:
//!
//! ```text
//! devRTT = (3 * devRTT + |sample - estRTT|) / 4
//! estRTT = (7 * estRTT + sample) / 8
//! ```
//!
//! A sample above `estRTT + devRTT` (judged against the estimate before the
//! update) is a straggler and stops the pipeline from growing.

use crate::constants::{MAX_IN_FLIGHT_REQUESTS, PIPELINE_GROWTH};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttEstimator {
    estimated: Option<Duration>,
    deviation: Duration,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one sample and reports whether it was a straggler.
    ///
    /// The first sample seeds the estimate with `deviation = sample / 2`
    /// and is never a straggler.
    pub fn observe(&mut self, sample: Duration) -> bool {
        let Some(estimated) = self.estimated else {
            self.estimated = Some(sample);
            self.deviation = sample / 2;
            return false;
        };

        let straggler = sample > estimated + self.deviation;
        let diff = if sample > estimated {
            sample - estimated
        } else {
            estimated - sample
        };
        self.deviation = (self.deviation * 3 + diff) / 4;
        self.estimated = Some((estimated * 7 + sample) / 8);
        straggler
    }

    pub fn estimated(&self) -> Option<Duration> {
        self.estimated
    }

    pub fn deviation(&self) -> Duration {
        self.deviation
    }
}

/// Number of new REQUESTs to issue after a PIECE arrives.
///
/// A straggler refills only an empty pipeline; any other sample grows it
/// by [`PIPELINE_GROWTH`] until more than [`MAX_IN_FLIGHT_REQUESTS`] are
/// outstanding.
pub fn requests_to_issue(straggler: bool, in_flight: usize) -> usize {
    if straggler {
        return usize::from(in_flight == 0);
    }
    if in_flight > MAX_IN_FLIGHT_REQUESTS {
        0
    } else {
        PIPELINE_GROWTH
    }
}
