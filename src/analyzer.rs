//! The stateful orchestrator at the heart of the engine.
//!
//! The analyzer owns the forest of interval states: the current-month
//! bucket, the all-time bucket, lazily loaded historical months, and
//! in-memory ad-hoc intervals. It reconciles the delegate-persisted
//! event cache with the backend on every reload, folds events into
//! every matching aggregator exactly once, back-fills newly registered
//! aggregators from history, and maintains the keyword search index.
//!
//! All public operations are `async` and take `&mut self`: the engine
//! is single-task cooperative, so suspension only happens at delegate
//! and backend calls and no internal locking is needed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregator::{Aggregator, AggregatorRegistry, terminal};
use crate::backend::EventBackend;
use crate::builder::{AnalyzerBuilder, AnalyzerConfig};
use crate::calendar::{
    DateInterval, all_time, is_normalized, month_interval, months_covering,
};
use crate::clock::Clock;
use crate::codec::{
    decode_events, decode_state, encode_events, encode_state, events_key, search_index_key,
    state_key,
};
use crate::delegate::AnalyticsDelegate;
use crate::error::AnalyticsError;
use crate::event::{Event, EventCategory};
use crate::search::{EventList, SearchIndex};
use crate::state::IntervalState;
use crate::status::{AnalyzerStatus, BackendStatus, EventSource, StatusThrottle};

/// The embedded event-analytics engine.
///
/// Built through [`Analyzer::builder`]; queries are served by
/// (aggregator id, interval) from interval-bucketed state, with ad-hoc
/// intervals materialized on demand from the event cache.
pub struct Analyzer {
    config: AnalyzerConfig,
    backend: Arc<dyn EventBackend>,
    delegate: Arc<dyn AnalyticsDelegate>,
    clock: Arc<dyn Clock>,
    registry: Arc<AggregatorRegistry>,
    categories: Vec<EventCategory>,
    current: IntervalState,
    accumulated: IntervalState,
    historical: HashMap<DateInterval, IntervalState>,
    non_normal_states: HashMap<DateInterval, IntervalState>,
    search_indices: HashMap<DateInterval, SearchIndex>,
    processed_event_interval: DateInterval,
    throttle: StatusThrottle,
}

impl Analyzer {
    /// Start configuring an analyzer against `backend` and `delegate`.
    pub fn builder(
        backend: Arc<dyn EventBackend>,
        delegate: Arc<dyn AnalyticsDelegate>,
    ) -> AnalyzerBuilder {
        AnalyzerBuilder::new(backend, delegate)
    }

    /// Run the initialization sequence: load the current-month and
    /// all-time states, back-fill newly registered aggregators, and
    /// reconcile cached events with the backend.
    pub(crate) async fn init(
        backend: Arc<dyn EventBackend>,
        delegate: Arc<dyn AnalyticsDelegate>,
        clock: Arc<dyn Clock>,
        config: AnalyzerConfig,
        registry: AggregatorRegistry,
        categories: Vec<EventCategory>,
    ) -> Result<Self, AnalyticsError> {
        let registry = Arc::new(registry);
        let now = clock.now();
        let this_month = month_interval(now);

        let mut analyzer = Self {
            config,
            backend,
            delegate,
            clock,
            current: IntervalState::new(this_month, &registry),
            accumulated: IntervalState::new(all_time(), &registry),
            registry,
            categories,
            historical: HashMap::new(),
            non_normal_states: HashMap::new(),
            search_indices: HashMap::new(),
            processed_event_interval: DateInterval::point(all_time().start),
            throttle: StatusThrottle::default(),
        };
        analyzer.report(AnalyzerStatus::Initializing);

        if let Some(state) = analyzer.load_state(all_time()).await? {
            analyzer.accumulated = state;
        }
        if let Some(state) = analyzer.load_state(this_month).await? {
            analyzer.current = state;
        }
        analyzer.ensure_current_state_validity(now).await?;
        analyzer.processed_event_interval = analyzer.accumulated.processed_event_interval;

        if analyzer.accumulated.event_count == 0 {
            // Nothing has ever been processed: pull the whole history.
            analyzer
                .load_and_process_events(DateInterval::new(all_time().start, now))
                .await?;
        } else {
            analyzer.check_for_new_aggregators().await?;
            let from = analyzer.processed_event_interval.end;
            if from <= now {
                analyzer
                    .load_and_process_events(DateInterval::new(from, now))
                    .await?;
            }
        }

        analyzer.report(AnalyzerStatus::Ready);
        Ok(analyzer)
    }

    /// The composed categories, including the injected `"id"` columns.
    pub fn categories(&self) -> &[EventCategory] {
        &self.categories
    }

    /// The aggregator-column registry.
    pub fn registry(&self) -> &AggregatorRegistry {
        &self.registry
    }

    /// The analyzer configuration.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The span of event timestamps processed so far.
    pub fn processed_event_interval(&self) -> DateInterval {
        self.processed_event_interval
    }

    /// The all-time state bucket.
    pub fn accumulated_state(&self) -> &IntervalState {
        &self.accumulated
    }

    /// The current-month state bucket.
    pub fn current_state(&self) -> &IntervalState {
        &self.current
    }

    /// A submission client sharing this analyzer's backend and clock,
    /// stamping the configured user identifier onto created events.
    pub fn client(&self) -> crate::client::EventClient {
        crate::client::EventClient::new(
            Arc::clone(&self.backend),
            self.config.user_identifier.clone(),
            Arc::clone(&self.clock),
        )
    }

    /// Look up the aggregator registered under `id` for `interval`.
    ///
    /// Normalized intervals resolve against the persistent buckets
    /// (current month, all-time, or a lazily loaded historical month);
    /// anything else materializes an ephemeral state from the event
    /// cache, memoized for the analyzer's lifetime. The returned
    /// reference is the head of the registered chain; use
    /// [`terminal`](crate::aggregator::terminal) or
    /// [`find_aggregator_as`](Analyzer::find_aggregator_as) to observe
    /// results.
    pub async fn find_aggregator(
        &mut self,
        id: &str,
        interval: DateInterval,
    ) -> Result<Option<&dyn Aggregator>, AnalyticsError> {
        if is_normalized(&interval) {
            let state = self.normalized_state_mut(interval).await?;
            Ok(state.aggregator(id))
        } else {
            self.ensure_adhoc_state(interval).await?;
            Ok(self
                .non_normal_states
                .get(&interval)
                .and_then(|state| state.aggregator(id)))
        }
    }

    /// Typed convenience over [`find_aggregator`](Analyzer::find_aggregator):
    /// downcasts the chain's terminal to `T`.
    pub async fn find_aggregator_as<T: 'static>(
        &mut self,
        id: &str,
        interval: DateInterval,
    ) -> Result<Option<&T>, AnalyticsError> {
        Ok(self
            .find_aggregator(id, interval)
            .await?
            .map(terminal)
            .and_then(|aggregator| aggregator.as_any().downcast_ref::<T>()))
    }

    /// The aggregators for `interval` whose registration mentions
    /// `category`, as (id, chain) pairs.
    pub async fn find_aggregators_for_category(
        &mut self,
        category: &str,
        interval: DateInterval,
    ) -> Result<Vec<(String, &dyn Aggregator)>, AnalyticsError> {
        let registry = Arc::clone(&self.registry);
        let state: &IntervalState = if is_normalized(&interval) {
            self.normalized_state_mut(interval).await?
        } else {
            self.ensure_adhoc_state(interval).await?;
            self.non_normal_states
                .get(&interval)
                .expect("ad-hoc state materialized above")
        };
        Ok(state
            .aggregators
            .iter()
            .filter(|(id, _)| registry.mentions_category(id, category))
            .map(|(id, aggregator)| (id.clone(), aggregator.as_ref()))
            .collect())
    }

    /// Retrieve the cached events within `interval`, sorted by
    /// timestamp, with the keyword index restricted to them when index
    /// maintenance is enabled. Returns `None` when no monthly bucket
    /// produced any events.
    pub async fn find_events(
        &mut self,
        interval: DateInterval,
    ) -> Result<Option<EventList>, AnalyticsError> {
        let events = self.load_cached_events(interval).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let index = if self.config.create_search_index {
            let keep: BTreeSet<Uuid> = events.iter().map(|event| event.id).collect();
            let months: BTreeSet<DateInterval> = events
                .iter()
                .map(|event| month_interval(event.timestamp))
                .collect();
            for month in &months {
                self.ensure_search_index(*month).await?;
            }
            let parts = months
                .iter()
                .filter_map(|month| self.search_indices.get(month));
            Some(SearchIndex::union(interval, parts, &keep))
        } else {
            None
        };

        Ok(Some(EventList {
            interval,
            events,
            index,
        }))
    }

    /// Keyword-search the cached events within `interval`.
    pub async fn search_events(
        &mut self,
        interval: DateInterval,
        query: &str,
    ) -> Result<Vec<Event>, AnalyticsError> {
        Ok(self
            .find_events(interval)
            .await?
            .map(|list| list.search(query).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Fetch and apply events that arrived after the processed span.
    ///
    /// Repeated calls without new backend events are a no-op for every
    /// aggregator's observable state.
    pub async fn load_new_events(&mut self) -> Result<(), AnalyticsError> {
        let now = self.clock.now();
        self.ensure_current_state_validity(now).await?;

        if self.accumulated.event_count == 0 {
            self.load_and_process_events(DateInterval::new(all_time().start, now))
                .await?;
        } else {
            let from = self.processed_event_interval.end;
            if from <= now {
                self.load_and_process_events(DateInterval::new(from, now))
                    .await?;
            }
        }
        self.report(AnalyzerStatus::Ready);
        Ok(())
    }

    /// Delete all persisted interval states, clear in-memory state, and
    /// reload the entire history from the event store.
    ///
    /// The event cache is left in place; reloading re-derives every
    /// aggregator from raw events.
    pub async fn reset(&mut self) -> Result<(), AnalyticsError> {
        let now = self.clock.now();

        let mut doomed: BTreeSet<DateInterval> = BTreeSet::new();
        doomed.insert(all_time());
        doomed.insert(self.current.interval);
        doomed.insert(month_interval(now));
        if self.accumulated.event_count > 0 {
            doomed.extend(months_covering(&self.processed_event_interval));
        }
        doomed.extend(self.historical.keys().copied());
        for interval in &doomed {
            self.delegate
                .persist(&state_key(interval), None)
                .await
                .map_err(AnalyticsError::Delegate)?;
        }

        let registry = Arc::clone(&self.registry);
        self.historical.clear();
        self.non_normal_states.clear();
        self.accumulated = IntervalState::new(all_time(), &registry);
        self.current = IntervalState::new(month_interval(now), &registry);
        self.processed_event_interval = self.accumulated.processed_event_interval;
        self.throttle.clear();

        self.ensure_current_state_validity(now).await?;
        self.load_and_process_events(DateInterval::new(all_time().start, now))
            .await?;
        self.report(AnalyzerStatus::Ready);
        Ok(())
    }

    /// Notify the delegate of a status transition, throttled through the
    /// significance filter.
    fn report(&mut self, status: AnalyzerStatus) {
        if self.throttle.admit(&status) {
            self.delegate.status_changed(&status);
        }
    }

    /// Demote a stale current-month state to `historical` and install a
    /// fresh (or reloaded) state for the month containing `now`.
    async fn ensure_current_state_validity(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<(), AnalyticsError> {
        let this_month = month_interval(now);
        if self.current.interval == this_month {
            return Ok(());
        }

        let fresh = match self.load_state(this_month).await? {
            Some(state) => state,
            None => IntervalState::new(this_month, &self.registry),
        };
        let outgoing = std::mem::replace(&mut self.current, fresh);

        let bytes = encode_state(&outgoing)?;
        self.delegate
            .persist(&state_key(&outgoing.interval), Some(bytes))
            .await
            .map_err(AnalyticsError::Delegate)?;
        self.historical.insert(outgoing.interval, outgoing);
        Ok(())
    }

    /// Load and decode a persisted state. A missing or undecodable
    /// artifact yields `None`; the caller rebuilds from history.
    async fn load_state(
        &mut self,
        interval: DateInterval,
    ) -> Result<Option<IntervalState>, AnalyticsError> {
        let key = state_key(&interval);
        let Some(bytes) = self
            .delegate
            .load(&key)
            .await
            .map_err(AnalyticsError::Delegate)?
        else {
            return Ok(None);
        };
        match decode_state(&bytes, &self.registry) {
            Ok(state) => Ok(Some(state)),
            Err(error) => {
                tracing::debug!(%key, %error, "persisted state failed to decode; treating as absent");
                Ok(None)
            }
        }
    }

    /// The resident state for a normalized interval, loading or creating
    /// it on first touch.
    async fn normalized_state_mut(
        &mut self,
        interval: DateInterval,
    ) -> Result<&mut IntervalState, AnalyticsError> {
        if interval == all_time() {
            return Ok(&mut self.accumulated);
        }
        if interval == self.current.interval {
            return Ok(&mut self.current);
        }
        if !self.historical.contains_key(&interval) {
            let state = match self.load_state(interval).await? {
                Some(state) => state,
                None => IntervalState::new(interval, &self.registry),
            };
            self.historical.insert(interval, state);
        }
        Ok(self
            .historical
            .get_mut(&interval)
            .expect("historical state inserted above"))
    }

    /// Like [`normalized_state_mut`](Self::normalized_state_mut) but
    /// never creates a fresh bucket: back-fills only touch months that
    /// already hold state.
    async fn backfill_state_mut(
        &mut self,
        interval: DateInterval,
    ) -> Result<Option<&mut IntervalState>, AnalyticsError> {
        if interval == self.current.interval {
            return Ok(Some(&mut self.current));
        }
        if !self.historical.contains_key(&interval) {
            match self.load_state(interval).await? {
                Some(state) => {
                    self.historical.insert(interval, state);
                }
                None => return Ok(None),
            }
        }
        Ok(self.historical.get_mut(&interval))
    }

    /// An already-resident state, if any.
    fn resident_state(&self, interval: &DateInterval) -> Option<&IntervalState> {
        if *interval == all_time() {
            return Some(&self.accumulated);
        }
        if *interval == self.current.interval {
            return Some(&self.current);
        }
        self.historical.get(interval)
    }

    /// Materialize (once) the ad-hoc state for a non-normalized interval
    /// by replaying the cached events it contains.
    async fn ensure_adhoc_state(&mut self, interval: DateInterval) -> Result<(), AnalyticsError> {
        if self.non_normal_states.contains_key(&interval) {
            return Ok(());
        }
        let events = self.load_cached_events(interval).await?;
        let registry = Arc::clone(&self.registry);
        let mut state = IntervalState::new(interval, &registry);
        for event in &events {
            state.add_event(event, true, &registry);
        }
        self.non_normal_states.insert(interval, state);
        Ok(())
    }

    /// Detect aggregators registered since the persisted states were
    /// written and back-fill them from the event cache, bypassing the
    /// already-processed guard for exactly those ids.
    async fn check_for_new_aggregators(&mut self) -> Result<(), AnalyticsError> {
        let uninitialized = self.accumulated.uninitialized();
        if uninitialized.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            ids = ?uninitialized,
            "back-filling newly registered aggregators from event history"
        );

        let span = self.accumulated.processed_event_interval;
        let events = self.load_cached_events(span).await?;
        let registry = Arc::clone(&self.registry);
        let total = events.len().max(1) as f64;
        let mut touched: BTreeSet<DateInterval> = BTreeSet::new();

        for (position, event) in events.iter().enumerate() {
            self.report(AnalyzerStatus::ProcessingEvents {
                progress: position as f64 / total,
                detail: Some("back-fill".to_string()),
            });
            let month = month_interval(event.timestamp);
            if let Some(state) = self.backfill_state_mut(month).await? {
                let targets: BTreeSet<String> = state
                    .uninitialized()
                    .intersection(&uninitialized)
                    .cloned()
                    .collect();
                if !targets.is_empty() {
                    state.add_event_to(event, &targets, &registry);
                    touched.insert(month);
                }
            }
            self.accumulated.add_event_to(event, &uninitialized, &registry);
        }

        for month in &touched {
            if let Some(state) = self.backfill_state_mut(*month).await? {
                state.mark_known(uninitialized.iter().cloned());
            }
        }
        self.current.mark_known(uninitialized.iter().cloned());
        self.accumulated.mark_known(uninitialized.iter().cloned());

        let mut modified = touched;
        modified.insert(all_time());
        modified.insert(self.current.interval);
        self.persist_states(&modified).await
    }

    /// Apply a batch of events, in input order, to the monthly, all-time,
    /// and containing ad-hoc states, then persist every modified bucket.
    async fn process_events(&mut self, events: Vec<Event>) -> Result<(), AnalyticsError> {
        if events.is_empty() {
            return Ok(());
        }
        let now = self.clock.now();
        let registry = Arc::clone(&self.registry);
        let total = events.len() as f64;
        let virgin = self.accumulated.event_count == 0;
        let mut modified: BTreeSet<DateInterval> = BTreeSet::new();
        let mut applied: Vec<usize> = Vec::new();

        for (position, event) in events.iter().enumerate() {
            assert!(
                event.timestamp <= now,
                "event {} is future-dated: {} is after the analyzer clock {}",
                event.id,
                event.timestamp,
                now
            );
            self.report(AnalyzerStatus::ProcessingEvents {
                progress: position as f64 / total,
                detail: None,
            });

            // Idempotence: anything inside the processed span has already
            // been folded in.
            if !virgin && self.processed_event_interval.contains(event.timestamp) {
                continue;
            }

            let month = month_interval(event.timestamp);
            {
                let state = self.normalized_state_mut(month).await?;
                state.add_event(event, true, &registry);
            }
            self.accumulated.add_event(event, true, &registry);
            for (interval, state) in self.non_normal_states.iter_mut() {
                if interval.contains(event.timestamp) {
                    state.add_event(event, true, &registry);
                }
            }
            modified.insert(month);
            applied.push(position);
        }

        let first = events.first().expect("batch checked non-empty").timestamp;
        let last = events.last().expect("batch checked non-empty").timestamp;
        if virgin {
            self.processed_event_interval = DateInterval::new(first.min(last), last.max(first));
        } else {
            self.processed_event_interval.expand_to(first);
            self.processed_event_interval.expand_to(last);
        }
        self.accumulated.processed_event_interval = self.processed_event_interval;

        if self.config.create_search_index && !applied.is_empty() {
            self.index_events(&events, &applied).await?;
        }

        modified.insert(all_time());
        self.persist_states(&modified).await
    }

    /// Fold newly applied events into the per-month keyword indices and
    /// persist the touched indices alongside their event buckets.
    async fn index_events(
        &mut self,
        events: &[Event],
        applied: &[usize],
    ) -> Result<(), AnalyticsError> {
        let extractor = self.config.keyword_extractor.clone();
        let mut touched: BTreeSet<DateInterval> = BTreeSet::new();
        for &position in applied {
            let event = &events[position];
            let month = month_interval(event.timestamp);
            self.ensure_search_index(month).await?;
            let index = self
                .search_indices
                .get_mut(&month)
                .expect("index ensured above");
            index.insert_event(event, extractor.as_ref());
            touched.insert(month);
        }
        for month in &touched {
            let index = &self.search_indices[month];
            let bytes = serde_json::to_vec(index)?;
            self.delegate
                .persist(&search_index_key(month), Some(bytes))
                .await
                .map_err(AnalyticsError::Delegate)?;
        }
        Ok(())
    }

    /// Make the index for `month` resident: load the persisted artifact,
    /// or rebuild it from the cached event bucket.
    async fn ensure_search_index(&mut self, month: DateInterval) -> Result<(), AnalyticsError> {
        if self.search_indices.contains_key(&month) {
            return Ok(());
        }
        let key = search_index_key(&month);
        let loaded = self
            .delegate
            .load(&key)
            .await
            .map_err(AnalyticsError::Delegate)?
            .and_then(|bytes| match serde_json::from_slice::<SearchIndex>(&bytes) {
                Ok(index) => Some(index),
                Err(error) => {
                    tracing::debug!(%key, %error, "persisted search index failed to decode; rebuilding");
                    None
                }
            });
        let index = match loaded {
            Some(index) => index,
            None => {
                let mut index = SearchIndex::new(month);
                let extractor = self.config.keyword_extractor.clone();
                if let Some(bucket) = self.load_event_bucket(&month).await? {
                    for event in &bucket {
                        index.insert_event(event, extractor.as_ref());
                    }
                }
                index
            }
        };
        self.search_indices.insert(month, index);
        Ok(())
    }

    /// Reconcile the event cache with the backend over `interval` and
    /// process the merged, de-duplicated, timestamp-sorted batch.
    async fn load_and_process_events(
        &mut self,
        interval: DateInterval,
    ) -> Result<(), AnalyticsError> {
        let cached = self.load_cached_events(interval).await?;
        let events = if cached.is_empty() {
            let fetched = self.fetch_from_backend(interval).await?;
            self.persist_events_to_cache(&fetched).await?;
            fetched
        } else {
            let cache_start = cached.first().expect("cache checked non-empty").timestamp;
            let cache_end = cached.last().expect("cache checked non-empty").timestamp;
            let mut merged = cached;
            if interval.start < cache_start {
                let head = self
                    .fetch_from_backend(DateInterval::new(interval.start, cache_start))
                    .await?;
                self.persist_events_to_cache(&head).await?;
                merged.extend(head);
            }
            if cache_end < interval.end {
                let tail = self
                    .fetch_from_backend(DateInterval::new(cache_end, interval.end))
                    .await?;
                self.persist_events_to_cache(&tail).await?;
                merged.extend(tail);
            }
            dedupe_sorted(merged)
        };
        self.process_events(events).await
    }

    /// Load events from the backend, mapping its progress notes onto the
    /// status stream.
    async fn fetch_from_backend(
        &mut self,
        interval: DateInterval,
    ) -> Result<Vec<Event>, AnalyticsError> {
        let backend = Arc::clone(&self.backend);
        let delegate = Arc::clone(&self.delegate);
        let throttle = &mut self.throttle;
        let mut on_status = |status: BackendStatus| {
            let mapped = match status {
                BackendStatus::FetchedRecords(count) => AnalyzerStatus::FetchingEvents {
                    count,
                    source: EventSource::Backend,
                },
                BackendStatus::ProcessingRecords(progress) => AnalyzerStatus::DecodingEvents {
                    progress,
                    source: EventSource::Backend,
                },
                BackendStatus::Ready => return,
            };
            if throttle.admit(&mapped) {
                delegate.status_changed(&mapped);
            }
        };
        backend
            .load_events(interval, &mut on_status)
            .await
            .map_err(AnalyticsError::Backend)
    }

    /// Walk the monthly event buckets intersecting `interval` (clipped
    /// to the processed span), newest first, and return the contained
    /// events sorted by timestamp.
    async fn load_cached_events(
        &mut self,
        interval: DateInterval,
    ) -> Result<Vec<Event>, AnalyticsError> {
        if self.accumulated.event_count == 0 {
            return Ok(Vec::new());
        }
        let processed = self.processed_event_interval;
        let clip_start = interval.start.max(processed.start);
        let clip_end = interval.end.min(processed.end);
        if clip_start > clip_end {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        let mut month = month_interval(clip_end);
        while month.end >= clip_start {
            if let Some(bucket) = self.load_event_bucket(&month).await? {
                let count = bucket.len() as u64;
                self.report(AnalyzerStatus::FetchingEvents {
                    count,
                    source: EventSource::Cache,
                });
                events.extend(
                    bucket
                        .into_iter()
                        .filter(|event| interval.contains(event.timestamp)),
                );
            }
            if month.start == all_time().start {
                break;
            }
            month = crate::calendar::month_before(&month);
        }
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }

    /// Load and decode one monthly event bucket. Missing or undecodable
    /// buckets read as absent.
    async fn load_event_bucket(
        &mut self,
        month: &DateInterval,
    ) -> Result<Option<Vec<Event>>, AnalyticsError> {
        let key = events_key(month);
        let Some(bytes) = self
            .delegate
            .load(&key)
            .await
            .map_err(AnalyticsError::Delegate)?
        else {
            return Ok(None);
        };
        match decode_events(&bytes) {
            Ok(events) => Ok(Some(events)),
            Err(error) => {
                tracing::debug!(%key, %error, "event bucket failed to decode; treating as absent");
                Ok(None)
            }
        }
    }

    /// Write `events` into their monthly cache buckets, merging with any
    /// existing bucket content and de-duplicating by event id.
    async fn persist_events_to_cache(&mut self, events: &[Event]) -> Result<(), AnalyticsError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buckets: BTreeMap<DateInterval, Vec<Event>> = BTreeMap::new();
        for event in events {
            buckets
                .entry(month_interval(event.timestamp))
                .or_default()
                .push(event.clone());
        }

        let total = buckets.len() as f64;
        for (position, (month, group)) in buckets.into_iter().enumerate() {
            self.report(AnalyzerStatus::PersistingEvents {
                progress: position as f64 / total,
            });
            let mut merged = self.load_event_bucket(&month).await?.unwrap_or_default();
            let mut seen: HashSet<Uuid> = merged.iter().map(|event| event.id).collect();
            for event in group {
                if seen.insert(event.id) {
                    merged.push(event);
                }
            }
            merged.sort_by_key(|event| event.timestamp);
            let bytes = encode_events(&merged)?;
            self.delegate
                .persist(&events_key(&month), Some(bytes))
                .await
                .map_err(AnalyticsError::Delegate)?;
        }
        Ok(())
    }

    /// Encode and persist the given state buckets.
    async fn persist_states(
        &mut self,
        intervals: &BTreeSet<DateInterval>,
    ) -> Result<(), AnalyticsError> {
        let total = intervals.len() as f64;
        for (position, interval) in intervals.iter().enumerate() {
            self.report(AnalyzerStatus::PersistingState {
                progress: position as f64 / total,
            });
            let Some(state) = self.resident_state(interval) else {
                continue;
            };
            let bytes = encode_state(state)?;
            self.delegate
                .persist(&state_key(interval), Some(bytes))
                .await
                .map_err(AnalyticsError::Delegate)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("current", &self.current.interval)
            .field("processed_event_interval", &self.processed_event_interval)
            .field("historical", &self.historical.len())
            .field("non_normal_states", &self.non_normal_states.len())
            .finish()
    }
}

/// Sort by timestamp and drop duplicate ids, keeping first occurrence.
fn dedupe_sorted(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|event| event.timestamp);
    let mut seen: HashSet<Uuid> = HashSet::with_capacity(events.len());
    events.retain(|event| seen.insert(event.id));
    events
}
