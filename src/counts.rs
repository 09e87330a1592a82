//! Request counters and the rolling window ring.

use serde::{Deserialize, Serialize};

/// Numbers of requests and their outcomes within the current epoch.
///
/// The breaker clears its counts on every state change and, when a
/// closed-state interval is configured, as the interval's buckets rotate
/// away. Outcomes reported for requests admitted before a clearing are
/// ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Requests admitted into the current epoch.
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    /// Outcomes judged irrelevant to failure accounting.
    pub total_exclusions: u32,
    /// Successes since the last failure. Exclusions leave it untouched.
    pub consecutive_successes: u32,
    /// Failures since the last success. Exclusions leave it untouched.
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn on_exclusion(&mut self) {
        self.total_exclusions += 1;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }

    fn is_empty(&self) -> bool {
        *self == Counts::default()
    }
}

/// Aggregate counts over a ring of per-bucket counts.
///
/// The aggregate is what trip decisions consult; the buckets bound the
/// horizon it covers. Outcome updates carry the bucket age observed at
/// admission, so a late outcome lands in its original bucket while that
/// bucket is still part of the window and is dropped once it has rotated
/// away. A single bucket degenerates to the classic fixed window.
#[derive(Debug, Clone)]
pub(crate) struct RollingCounts {
    total: Counts,
    buckets: Vec<Counts>,
    age: u64,
}

impl RollingCounts {
    /// Create a window of `buckets` buckets; non-positive is coerced to one.
    pub(crate) fn new(buckets: usize) -> Self {
        Self {
            total: Counts::default(),
            buckets: vec![Counts::default(); buckets.max(1)],
            age: 0,
        }
    }

    /// Monotonic rotation counter. The head bucket is `age % len`.
    pub(crate) fn age(&self) -> u64 {
        self.age
    }

    pub(crate) fn window(&self) -> usize {
        self.buckets.len()
    }

    /// Aggregate of the live buckets.
    pub(crate) fn total(&self) -> Counts {
        self.total
    }

    /// Bucket at `offset` from the head: `0` is the head, `-1` the previous
    /// head, wrapping modulo the window length.
    pub(crate) fn bucket_at(&self, offset: i64) -> Counts {
        let len = self.buckets.len() as i64;
        self.buckets[(self.age as i64 + offset).rem_euclid(len) as usize]
    }

    fn slot(&self, age: u64) -> usize {
        (age % self.buckets.len() as u64) as usize
    }

    /// Whether the bucket tagged `at` is still part of the window.
    fn live(&self, at: u64) -> bool {
        at <= self.age && self.age - at < self.buckets.len() as u64
    }

    pub(crate) fn on_request(&mut self) {
        self.total.on_request();
        let head = self.slot(self.age);
        self.buckets[head].on_request();
    }

    pub(crate) fn on_success(&mut self, at: u64) {
        if !self.live(at) {
            return;
        }
        self.total.on_success();
        let slot = self.slot(at);
        self.buckets[slot].on_success();
    }

    pub(crate) fn on_failure(&mut self, at: u64) {
        if !self.live(at) {
            return;
        }
        self.total.on_failure();
        let slot = self.slot(at);
        self.buckets[slot].on_failure();
    }

    pub(crate) fn on_exclusion(&mut self, at: u64) {
        if !self.live(at) {
            return;
        }
        self.total.on_exclusion();
        let slot = self.slot(at);
        self.buckets[slot].on_exclusion();
    }

    pub(crate) fn clear(&mut self) {
        self.total.clear();
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.age = 0;
    }

    /// Advance the window by `periods` rotations.
    pub(crate) fn advance(&mut self, periods: u64) {
        if periods >= self.buckets.len() as u64 {
            // Every bucket rotates away; skip the bucketwise bookkeeping.
            let age = self.age + periods;
            self.clear();
            self.age = age;
        } else {
            for _ in 0..periods {
                self.roll();
            }
        }
    }

    fn roll(&mut self) {
        self.age += 1;
        let head = self.slot(self.age);
        let discarded = std::mem::take(&mut self.buckets[head]);
        if discarded.is_empty() {
            return;
        }

        self.total.requests = self.total.requests.saturating_sub(discarded.requests);
        self.total.total_successes = self
            .total
            .total_successes
            .saturating_sub(discarded.total_successes);
        self.total.total_failures = self
            .total
            .total_failures
            .saturating_sub(discarded.total_failures);
        self.total.total_exclusions = self
            .total
            .total_exclusions
            .saturating_sub(discarded.total_exclusions);
        self.rebuild_streaks();
    }

    /// Streaks cannot be subtracted bucketwise. Recompute them as the streak
    /// contained in the surviving buckets, walking newest to oldest: a
    /// bucket without failures extends a success streak in full and the walk
    /// continues, any other bucket contributes its tail streak and ends it.
    /// Empty buckets are transparent. Symmetric for failures.
    fn rebuild_streaks(&mut self) {
        let mut successes = 0;
        let mut failures = 0;
        let mut success_run = true;
        let mut failure_run = true;
        for offset in 0..self.buckets.len() as i64 {
            let bucket = self.bucket_at(-offset);
            if bucket.is_empty() {
                continue;
            }
            if success_run {
                successes += bucket.consecutive_successes;
                if bucket.total_failures > 0 {
                    success_run = false;
                }
            }
            if failure_run {
                failures += bucket.consecutive_failures;
                if bucket.total_successes > 0 {
                    failure_run = false;
                }
            }
            if !success_run && !failure_run {
                break;
            }
        }
        self.total.consecutive_successes = successes;
        self.total.consecutive_failures = failures;
    }

    /// Replace the window contents with a flat snapshot, collapsing all
    /// history into the head bucket.
    pub(crate) fn set_total(&mut self, counts: Counts) {
        self.clear();
        self.total = counts;
        let head = self.slot(self.age);
        self.buckets[head] = counts;
    }
}
