//! Analyzer status reporting and the significance filter.
//!
//! The analyzer drives a small status state machine
//! (`Initializing -> ... -> Ready`) and notifies the delegate on every
//! transition that passes the significance filter: progress-bearing
//! variants must move by at least one percent before they are worth a
//! callback, non-progress variants only report when the variant changes.

/// Where a batch of events is being read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// The remote event store.
    Backend,
    /// The delegate-persisted monthly event cache.
    Cache,
}

/// Progress notes emitted by a backend while loading events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendStatus {
    /// The backend finished its work.
    Ready,
    /// Records fetched so far.
    FetchedRecords(u64),
    /// Fraction of fetched records decoded, in `0..=1`.
    ProcessingRecords(f64),
}

/// The analyzer's externally visible state.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerStatus {
    /// Building registries and loading persisted state.
    Initializing,
    /// Writing event buckets to the delegate.
    PersistingEvents {
        /// Fraction of buckets written, in `0..=1`.
        progress: f64,
    },
    /// Writing interval states to the delegate.
    PersistingState {
        /// Fraction of states written, in `0..=1`.
        progress: f64,
    },
    /// Fetching events from a source.
    FetchingEvents {
        /// Records fetched so far.
        count: u64,
        /// Where the records come from.
        source: EventSource,
    },
    /// Decoding fetched events.
    DecodingEvents {
        /// Fraction decoded, in `0..=1`.
        progress: f64,
        /// Where the records come from.
        source: EventSource,
    },
    /// Folding events into aggregators.
    ProcessingEvents {
        /// Fraction of the batch processed, in `0..=1`.
        progress: f64,
        /// Optional human-readable detail.
        detail: Option<String>,
    },
    /// Idle and ready for queries.
    Ready,
}

/// Minimum progress delta worth a notification.
const SIGNIFICANT_PROGRESS: f64 = 0.01;

/// Minimum relative record-count change worth a notification.
const SIGNIFICANT_COUNT_RATIO: f64 = 0.01;

fn progress_moved(last: f64, new: f64) -> bool {
    (new - last).abs() >= SIGNIFICANT_PROGRESS
}

fn count_moved(last: u64, new: u64) -> bool {
    if last == 0 {
        return new != 0;
    }
    let delta = new.abs_diff(last) as f64;
    delta / last as f64 >= SIGNIFICANT_COUNT_RATIO
}

/// Suppresses insignificant status transitions.
///
/// Owned by the analyzer; every candidate notification passes through
/// [`admit`](StatusThrottle::admit) before reaching the delegate.
#[derive(Debug, Default)]
pub struct StatusThrottle {
    last: Option<AnalyzerStatus>,
}

impl StatusThrottle {
    /// Whether `status` should be reported, updating the reference point
    /// when it is.
    pub fn admit(&mut self, status: &AnalyzerStatus) -> bool {
        let significant = match &self.last {
            None => true,
            Some(last) => is_significant(last, status),
        };
        if significant {
            self.last = Some(status.clone());
        }
        significant
    }

    /// Forget the reference point; the next candidate always reports.
    pub fn clear(&mut self) {
        self.last = None;
    }
}

fn is_significant(last: &AnalyzerStatus, new: &AnalyzerStatus) -> bool {
    use AnalyzerStatus::*;
    match (last, new) {
        (PersistingEvents { progress: a }, PersistingEvents { progress: b }) => {
            progress_moved(*a, *b)
        }
        (PersistingState { progress: a }, PersistingState { progress: b }) => {
            progress_moved(*a, *b)
        }
        (
            FetchingEvents {
                count: a,
                source: src_a,
            },
            FetchingEvents {
                count: b,
                source: src_b,
            },
        ) => src_a != src_b || count_moved(*a, *b),
        (
            DecodingEvents {
                progress: a,
                source: src_a,
            },
            DecodingEvents {
                progress: b,
                source: src_b,
            },
        ) => src_a != src_b || progress_moved(*a, *b),
        (ProcessingEvents { progress: a, .. }, ProcessingEvents { progress: b, .. }) => {
            progress_moved(*a, *b)
        }
        (Initializing, Initializing) | (Ready, Ready) => false,
        // Variant change is always significant.
        _ => true,
    }
}
