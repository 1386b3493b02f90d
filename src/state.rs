//! Per-interval aggregator state and bookkeeping.
//!
//! An [`IntervalState`] owns the aggregator instances for one time
//! bucket plus the bookkeeping that makes ingestion idempotent and
//! back-fills detectable: the processed-event interval, the event count,
//! and the set of aggregator ids known to be fully populated.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregator::{Aggregator, AggregatorRegistry, terminal, terminal_mut};
use crate::calendar::DateInterval;
use crate::event::Event;

/// The aggregator instances and bookkeeping for one interval.
pub struct IntervalState {
    /// The bucket this state covers.
    pub interval: DateInterval,
    /// The span of event timestamps already folded in. Starts degenerate
    /// at `[interval.start, interval.start]`; a zero duration means no
    /// event has been processed yet.
    pub processed_event_interval: DateInterval,
    /// Number of events processed as new (back-fills excluded).
    pub event_count: u64,
    pub(crate) aggregators: BTreeMap<String, Box<dyn Aggregator>>,
    /// Ids fully populated within this interval. An instantiated id
    /// missing from this set needs a back-fill.
    pub(crate) known_aggregators: BTreeSet<String>,
}

impl IntervalState {
    /// A fresh state for `interval`.
    ///
    /// Instantiates every registry aggregator whose interval pin is
    /// absent or equal to `interval`; all of them start fully populated
    /// (there is nothing to back-fill into an empty bucket).
    pub fn new(interval: DateInterval, registry: &AggregatorRegistry) -> Self {
        let aggregators = registry.instantiate_for(&interval);
        let known_aggregators = aggregators.keys().cloned().collect();
        Self {
            interval,
            processed_event_interval: DateInterval::point(interval.start),
            event_count: 0,
            aggregators,
            known_aggregators,
        }
    }

    /// Dispatch one event to every matching aggregator.
    ///
    /// For each aggregator the registry yields the columns it was
    /// registered on; category-scoped columns only fire when the event's
    /// category matches. `is_new` distinguishes ordinary ingestion from
    /// back-fill replay: only new events advance the bookkeeping.
    pub fn add_event(&mut self, event: &Event, is_new: bool, registry: &AggregatorRegistry) {
        for (id, aggregator) in &mut self.aggregators {
            let Some(columns) = registry.columns_for(id) else {
                continue;
            };
            for column in columns {
                if column.matches(event) {
                    // The disposition only steers chains; at state level
                    // the return value is not observed.
                    let _ = aggregator.add_event(event, Some(column));
                }
            }
        }
        if is_new {
            self.event_count += 1;
            if self.processed_event_interval.duration().is_zero() && self.event_count == 1 {
                self.processed_event_interval = DateInterval::point(event.timestamp);
            } else {
                self.processed_event_interval.expand_to(event.timestamp);
            }
        }
    }

    /// Back-fill one event into the given uninitialized aggregators only,
    /// bypassing the already-processed guard and the bookkeeping.
    pub fn add_event_to(
        &mut self,
        event: &Event,
        ids: &BTreeSet<String>,
        registry: &AggregatorRegistry,
    ) {
        for (id, aggregator) in &mut self.aggregators {
            if !ids.contains(id) {
                continue;
            }
            let Some(columns) = registry.columns_for(id) else {
                continue;
            };
            for column in columns {
                if column.matches(event) {
                    let _ = aggregator.add_event(event, Some(column));
                }
            }
        }
    }

    /// Ids instantiated in this state but not yet fully populated.
    pub fn uninitialized(&self) -> BTreeSet<String> {
        self.aggregators
            .keys()
            .filter(|id| !self.known_aggregators.contains(*id))
            .cloned()
            .collect()
    }

    /// Record `ids` as fully populated within this interval. Ids not
    /// instantiated here (e.g. pinned to another interval) are ignored.
    pub fn mark_known<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if self.aggregators.contains_key(&id) {
                self.known_aggregators.insert(id);
            }
        }
    }

    /// The chain registered under `id`, if instantiated in this state.
    pub fn aggregator(&self, id: &str) -> Option<&dyn Aggregator> {
        self.aggregators.get(id).map(Box::as_ref)
    }

    /// The terminal of the chain registered under `id`.
    ///
    /// Queries resolve against the terminal: for a chain like
    /// `Filtering.then(Counting)` the observable state is the counter's.
    pub fn terminal_aggregator(&self, id: &str) -> Option<&dyn Aggregator> {
        self.aggregator(id).map(terminal)
    }

    /// Instantiated aggregator ids, in encoding order.
    pub fn aggregator_ids(&self) -> impl Iterator<Item = &str> {
        self.aggregators.keys().map(String::as_str)
    }

    /// Reset every aggregator and the bookkeeping to empty.
    pub fn reset(&mut self) {
        for aggregator in self.aggregators.values_mut() {
            terminal_mut(aggregator.as_mut()).reset();
        }
        self.processed_event_interval = DateInterval::point(self.interval.start);
        self.event_count = 0;
        self.known_aggregators = self.aggregators.keys().cloned().collect();
    }
}

impl std::fmt::Debug for IntervalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalState")
            .field("interval", &self.interval)
            .field("processed_event_interval", &self.processed_event_interval)
            .field("event_count", &self.event_count)
            .field("aggregators", &self.aggregators.keys().collect::<Vec<_>>())
            .field("known_aggregators", &self.known_aggregators)
            .finish()
    }
}
