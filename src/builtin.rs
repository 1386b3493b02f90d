//! The built-in aggregator library.
//!
//! Roughly ten ready-made aggregators covering counting, numeric
//! statistics, grouping, date bucketing, filtering, and rewriting. All
//! stateful built-ins keep their collections in `BTreeMap`/`BTreeSet`
//! so [`Aggregator::encode`] is deterministic and order-independent.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::{Aggregator, Chain, EventDisposition};
use crate::calendar::{WeekStart, day_start, hour_start, month_start, week_start, year_interval};
use crate::event::{Event, EventColumn};
use crate::value::EventValue;

/// Stand-in for a missing payload entry.
static ABSENT: EventValue = EventValue::Absent;

/// The value an aggregator sees for an (event, column) pair: the payload
/// entry at the column's name, or `Absent` when the column is missing
/// from the payload or the registration carried no column.
fn column_value<'a>(event: &'a Event, column: Option<&EventColumn>) -> &'a EventValue {
    column
        .and_then(|column| event.value(&column.name))
        .unwrap_or(&ABSENT)
}

/// Counts every event it sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counting {
    /// Number of events folded in.
    pub value_count: u64,
}

impl Aggregator for Counting {
    fn add_event(&mut self, _event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        self.value_count += 1;
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Count, sum, running mean, and running variance of a numeric column.
///
/// Uses Welford's recurrence, so the mean and variance are updated in a
/// single pass without storing samples. Non-numeric and missing values
/// are discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    /// Number of numeric values folded in.
    pub value_count: u64,
    /// Sum of all values.
    pub sum: f64,
    /// Running mean.
    pub running_average: f64,
    /// Welford's running sum of squared deviations.
    sum_of_squared_deltas: f64,
}

impl NumericStats {
    /// Population variance of the values seen so far.
    pub fn variance(&self) -> f64 {
        if self.value_count == 0 {
            0.0
        } else {
            self.sum_of_squared_deltas / self.value_count as f64
        }
    }

    /// Standard deviation (square root of the variance).
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    fn fold(&mut self, value: f64) {
        self.value_count += 1;
        self.sum += value;
        let delta = value - self.running_average;
        self.running_average += delta / self.value_count as f64;
        self.sum_of_squared_deltas += delta * (value - self.running_average);
    }
}

impl Aggregator for NumericStats {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        match column_value(event, column).as_number() {
            Some(value) => {
                self.fold(value);
                EventDisposition::Keep
            }
            None => EventDisposition::Discard,
        }
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Keeps, per user, the most recent event seen (by arrival order).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestEvent {
    /// Latest event per `user_id`.
    pub latest: BTreeMap<String, Event>,
}

impl LatestEvent {
    /// The most recent event for `user_id`, if any.
    pub fn for_user(&self, user_id: &str) -> Option<&Event> {
        self.latest.get(user_id)
    }
}

impl Aggregator for LatestEvent {
    fn add_event(&mut self, event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        self.latest.insert(event.user_id.clone(), event.clone());
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Forwards iff a predicate on the column value holds; else discards.
///
/// Stateless: nothing is persisted, reset is a no-op. Missing values are
/// presented to the predicate as [`EventValue::Absent`].
#[derive(Clone)]
pub struct Filtering {
    predicate: Arc<dyn Fn(&EventValue) -> bool + Send + Sync>,
}

impl Filtering {
    /// Filter on the registration column's value.
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&EventValue) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for Filtering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filtering").finish_non_exhaustive()
    }
}

impl Aggregator for Filtering {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        if (self.predicate)(column_value(event, column)) {
            EventDisposition::Keep
        } else {
            EventDisposition::Discard
        }
    }

    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Like [`Filtering`] but the predicate sees the whole event.
#[derive(Clone)]
pub struct MetaFiltering {
    predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
}

impl MetaFiltering {
    /// Filter on the whole event.
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for MetaFiltering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaFiltering").finish_non_exhaustive()
    }
}

impl Aggregator for MetaFiltering {
    fn add_event(&mut self, event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        if (self.predicate)(event) {
            EventDisposition::Keep
        } else {
            EventDisposition::Discard
        }
    }

    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Rewrites the column value through a map function.
///
/// The downstream aggregator in a chain sees the rewritten event. A map
/// returning `None` discards the event; without a registration column
/// there is nothing to rewrite and the event is kept unchanged.
#[derive(Clone)]
pub struct Mapping {
    map: Arc<dyn Fn(&EventValue) -> Option<EventValue> + Send + Sync>,
}

impl Mapping {
    /// Rewrite the registration column's value.
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&EventValue) -> Option<EventValue> + Send + Sync + 'static,
    {
        Self { map: Arc::new(map) }
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping").finish_non_exhaustive()
    }
}

impl Aggregator for Mapping {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        let Some(column) = column else {
            return EventDisposition::Keep;
        };
        match (self.map)(column_value(event, Some(column))) {
            Some(mapped) => EventDisposition::Replace(event.with_value(&column.name, mapped)),
            None => EventDisposition::Discard,
        }
    }

    fn reset(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Buckets whole events by the column value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    /// Events per distinct column value.
    #[serde(with = "value_pairs")]
    pub groups: BTreeMap<EventValue, Vec<Event>>,
}

impl Aggregator for Grouping {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        let key = column_value(event, column).clone();
        self.groups.entry(key).or_default().push(event.clone());
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Counts events per distinct column value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountingByGroup {
    /// Event count per distinct column value.
    #[serde(with = "value_pairs")]
    pub counts: BTreeMap<EventValue, u64>,
}

impl CountingByGroup {
    /// The count for `key`, zero when the group is unseen.
    pub fn count(&self, key: &EventValue) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

impl Aggregator for CountingByGroup {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        let key = column_value(event, column).clone();
        *self.counts.entry(key).or_insert(0) += 1;
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The calendar unit a date-bucketing aggregator groups by.
///
/// Keys are the start-of-scope instant of the event timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateScope {
    /// Start of the UTC hour.
    Hour,
    /// Start of the UTC day.
    Day,
    /// Start of the week under the given anchor.
    Week(WeekStart),
    /// Start of the calendar month.
    Month,
    /// Start of the calendar year.
    Year,
}

impl DateScope {
    /// The bucket key for `instant`.
    pub fn bucket_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            DateScope::Hour => hour_start(instant),
            DateScope::Day => day_start(instant),
            DateScope::Week(anchor) => week_start(instant, *anchor),
            DateScope::Month => month_start(instant),
            DateScope::Year => year_interval(instant).start,
        }
    }
}

/// Buckets whole events by a calendar scope of their timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateGrouping {
    /// Bucketing scope.
    pub scope: DateScope,
    /// Events per start-of-scope instant.
    pub groups: BTreeMap<DateTime<Utc>, Vec<Event>>,
}

impl DateGrouping {
    /// Group events by `scope`.
    pub fn new(scope: DateScope) -> Self {
        Self {
            scope,
            groups: BTreeMap::new(),
        }
    }
}

impl Aggregator for DateGrouping {
    fn add_event(&mut self, event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        let key = self.scope.bucket_start(event.timestamp);
        self.groups.entry(key).or_default().push(event.clone());
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.groups.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Counts events per calendar scope of their timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountingByDate {
    /// Bucketing scope.
    pub scope: DateScope,
    /// Event count per start-of-scope instant.
    pub counts: BTreeMap<DateTime<Utc>, u64>,
}

impl CountingByDate {
    /// Count events by `scope`.
    pub fn new(scope: DateScope) -> Self {
        Self {
            scope,
            counts: BTreeMap::new(),
        }
    }

    /// The count for the bucket containing `instant`.
    pub fn count_at(&self, instant: DateTime<Utc>) -> u64 {
        self.counts
            .get(&self.scope.bucket_start(instant))
            .copied()
            .unwrap_or(0)
    }
}

impl Aggregator for CountingByDate {
    fn add_event(&mut self, event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        let key = self.scope.bucket_start(event.timestamp);
        *self.counts.entry(key).or_insert(0) += 1;
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.counts.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Tracks seen event ids and counts repeats. Always keeps the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateEventChecker {
    /// Ids seen so far.
    pub seen: BTreeSet<Uuid>,
    /// Number of repeated ids observed.
    pub duplicate_count: u64,
}

impl Aggregator for DuplicateEventChecker {
    fn add_event(&mut self, event: &Event, _column: Option<&EventColumn>) -> EventDisposition {
        if !self.seen.insert(event.id) {
            self.duplicate_count += 1;
        }
        EventDisposition::Keep
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Sugar for `Filtering(predicate).then(Counting)`: counts the events
/// whose column value satisfies the predicate.
pub fn predicate_counter<P>(predicate: P) -> Chain
where
    P: Fn(&EventValue) -> bool + Send + Sync + 'static,
{
    Filtering::new(predicate).then(Counting::default())
}

/// Serde adapter for `EventValue`-keyed maps.
///
/// JSON object keys must be strings, so the map is encoded as a sorted
/// sequence of `[key, value]` pairs. `BTreeMap` iteration keeps the
/// encoding deterministic.
mod value_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::value::EventValue;

    pub fn serialize<V, S>(map: &BTreeMap<EventValue, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<EventValue, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(EventValue, V)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Aggregator, terminal};
    use crate::event::test_fixtures::{at, event_at};

    fn numeric_event(day: u32, value: f64) -> Event {
        event_at(
            "numericEvent",
            at(2023, 1, day, 12, 0, 0),
            &[("numericValueA", EventValue::Number(value))],
        )
    }

    fn numeric_column() -> EventColumn {
        EventColumn::new("numericValueA", "numericEvent")
    }

    #[test]
    fn counting_counts_every_event() {
        let mut counting = Counting::default();
        for day in 1..=5 {
            counting.add_event(&numeric_event(day, 0.0), None);
        }
        assert_eq!(counting.value_count, 5);
    }

    #[test]
    fn numeric_stats_match_naive_reduction() {
        let samples = [3.0, -1.5, 4.25, 0.0, 10.0, 2.5];
        let mut stats = NumericStats::default();
        let column = numeric_column();
        for (i, sample) in samples.iter().enumerate() {
            stats.add_event(&numeric_event(i as u32 + 1, *sample), Some(&column));
        }

        let count = samples.len() as f64;
        let sum: f64 = samples.iter().sum();
        let mean = sum / count;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;

        assert_eq!(stats.value_count, samples.len() as u64);
        assert!((stats.sum - sum).abs() < 1e-9);
        assert!((stats.running_average - mean).abs() < 1e-9);
        assert!((stats.variance() - variance).abs() < 1e-9);
        assert!((stats.std_dev() - variance.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn numeric_stats_discard_non_numeric() {
        let mut stats = NumericStats::default();
        let column = numeric_column();
        let event = event_at(
            "numericEvent",
            at(2023, 1, 2, 0, 0, 0),
            &[("numericValueA", EventValue::Text("nope".into()))],
        );
        assert!(matches!(
            stats.add_event(&event, Some(&column)),
            EventDisposition::Discard
        ));
        let missing = event_at("numericEvent", at(2023, 1, 2, 0, 0, 1), &[]);
        assert!(matches!(
            stats.add_event(&missing, Some(&column)),
            EventDisposition::Discard
        ));
        assert_eq!(stats.value_count, 0);
    }

    #[test]
    fn latest_event_tracks_arrival_order() {
        let mut latest = LatestEvent::default();
        let first = numeric_event(5, 1.0);
        // Later arrival with an earlier timestamp still wins.
        let second = numeric_event(2, 2.0);
        latest.add_event(&first, None);
        latest.add_event(&second, None);
        assert_eq!(latest.for_user("user-1").map(|e| e.id), Some(second.id));
    }

    #[test]
    fn mapping_rewrites_for_downstream() {
        let mut chain = Mapping::new(|value| value.as_number().map(|n| EventValue::Number(n * 2.0)))
            .then(NumericStats::default());
        let column = numeric_column();
        chain.add_event(&numeric_event(1, 5.0), Some(&column));
        let stats = terminal(&chain)
            .as_any()
            .downcast_ref::<NumericStats>()
            .unwrap();
        assert_eq!(stats.sum, 10.0);
    }

    #[test]
    fn mapping_none_discards() {
        let mut chain = Mapping::new(|_| None).then(Counting::default());
        let column = numeric_column();
        chain.add_event(&numeric_event(1, 5.0), Some(&column));
        let count = terminal(&chain)
            .as_any()
            .downcast_ref::<Counting>()
            .unwrap()
            .value_count;
        assert_eq!(count, 0);
    }

    #[test]
    fn meta_filtering_sees_the_whole_event() {
        let mut chain =
            MetaFiltering::new(|event: &Event| event.category == "numericEvent")
                .then(Counting::default());
        chain.add_event(&numeric_event(1, 0.0), None);
        chain.add_event(
            &event_at("textEvent", at(2023, 1, 2, 0, 0, 0), &[]),
            None,
        );
        let count = terminal(&chain)
            .as_any()
            .downcast_ref::<Counting>()
            .unwrap()
            .value_count;
        assert_eq!(count, 1);
    }

    #[test]
    fn grouping_buckets_by_value_with_absent_key() {
        let mut grouping = Grouping::default();
        let column = EventColumn::new("label", "textEvent");
        let alpha = event_at(
            "textEvent",
            at(2023, 1, 2, 0, 0, 0),
            &[("label", EventValue::Text("alpha".into()))],
        );
        let missing = event_at("textEvent", at(2023, 1, 2, 0, 0, 1), &[]);
        grouping.add_event(&alpha, Some(&column));
        grouping.add_event(&missing, Some(&column));
        assert_eq!(grouping.groups[&EventValue::Text("alpha".into())].len(), 1);
        assert_eq!(grouping.groups[&EventValue::Absent].len(), 1);
    }

    #[test]
    fn counting_by_group_counts_distinct_values() {
        let mut counter = CountingByGroup::default();
        let column = EventColumn::new("label", "textEvent");
        for label in ["a", "b", "a", "a"] {
            let event = event_at(
                "textEvent",
                at(2023, 1, 2, 0, 0, 0),
                &[("label", EventValue::Text(label.into()))],
            );
            counter.add_event(&event, Some(&column));
        }
        assert_eq!(counter.count(&EventValue::Text("a".into())), 3);
        assert_eq!(counter.count(&EventValue::Text("b".into())), 1);
        assert_eq!(counter.count(&EventValue::Text("c".into())), 0);
    }

    #[test]
    fn counting_by_date_keys_are_scope_starts() {
        let mut counter = CountingByDate::new(DateScope::Day);
        counter.add_event(&numeric_event(3, 0.0), None);
        counter.add_event(&numeric_event(3, 1.0), None);
        counter.add_event(&numeric_event(4, 2.0), None);
        assert_eq!(counter.counts.len(), 2);
        assert_eq!(counter.counts[&at(2023, 1, 3, 0, 0, 0)], 2);
        assert_eq!(counter.counts[&at(2023, 1, 4, 0, 0, 0)], 1);
    }

    #[test]
    fn week_scope_respects_anchor() {
        // 2023-01-14 is a Saturday.
        let instant = at(2023, 1, 14, 12, 0, 0);
        assert_eq!(
            DateScope::Week(WeekStart::Monday).bucket_start(instant),
            at(2023, 1, 9, 0, 0, 0)
        );
        assert_eq!(
            DateScope::Week(WeekStart::Sunday).bucket_start(instant),
            at(2023, 1, 8, 0, 0, 0)
        );
    }

    #[test]
    fn duplicate_checker_counts_repeats_and_keeps() {
        let mut checker = DuplicateEventChecker::default();
        let event = numeric_event(1, 0.0);
        assert!(matches!(
            checker.add_event(&event, None),
            EventDisposition::Keep
        ));
        assert!(matches!(
            checker.add_event(&event, None),
            EventDisposition::Keep
        ));
        assert_eq!(checker.duplicate_count, 1);
        assert_eq!(checker.seen.len(), 1);
    }

    #[test]
    fn predicate_counter_counts_matching_values() {
        let mut chain = predicate_counter(|value| value.as_number().unwrap_or(0.0) > 1.0);
        let column = numeric_column();
        chain.add_event(&numeric_event(1, 0.5), Some(&column));
        chain.add_event(&numeric_event(2, 2.5), Some(&column));
        chain.add_event(&numeric_event(3, 3.5), Some(&column));
        let count = terminal(&chain)
            .as_any()
            .downcast_ref::<Counting>()
            .unwrap()
            .value_count;
        assert_eq!(count, 2);
    }

    // Round-trip checks for every stateful built-in: decode(encode(a)) == a.

    fn roundtrip<A>(aggregator: &A) -> A
    where
        A: Aggregator + Default + PartialEq + std::fmt::Debug,
    {
        let bytes = aggregator.encode().expect("stateful built-in must encode");
        let mut restored = A::default();
        restored.decode(&bytes).expect("decode must succeed");
        restored
    }

    #[test]
    fn stateful_builtins_roundtrip() {
        let column = numeric_column();

        let mut counting = Counting::default();
        counting.add_event(&numeric_event(1, 0.0), None);
        assert_eq!(roundtrip(&counting), counting);

        let mut stats = NumericStats::default();
        stats.add_event(&numeric_event(1, 3.25), Some(&column));
        stats.add_event(&numeric_event(2, -1.0), Some(&column));
        assert_eq!(roundtrip(&stats), stats);

        let mut latest = LatestEvent::default();
        latest.add_event(&numeric_event(1, 0.0), None);
        assert_eq!(roundtrip(&latest), latest);

        let mut grouping = Grouping::default();
        grouping.add_event(&numeric_event(1, 7.0), Some(&column));
        assert_eq!(roundtrip(&grouping), grouping);

        let mut by_group = CountingByGroup::default();
        by_group.add_event(&numeric_event(1, 7.0), Some(&column));
        assert_eq!(roundtrip(&by_group), by_group);

        let mut checker = DuplicateEventChecker::default();
        checker.add_event(&numeric_event(1, 0.0), None);
        assert_eq!(roundtrip(&checker), checker);
    }

    #[test]
    fn date_builtins_roundtrip() {
        let mut by_date = CountingByDate::new(DateScope::Day);
        by_date.add_event(&numeric_event(3, 0.0), None);
        let bytes = by_date.encode().unwrap();
        let mut restored = CountingByDate::new(DateScope::Day);
        restored.decode(&bytes).unwrap();
        assert_eq!(restored, by_date);

        let mut grouping = DateGrouping::new(DateScope::Month);
        grouping.add_event(&numeric_event(3, 0.0), None);
        let bytes = grouping.encode().unwrap();
        let mut restored = DateGrouping::new(DateScope::Month);
        restored.decode(&bytes).unwrap();
        assert_eq!(restored, grouping);
    }

    #[test]
    fn stateless_builtins_encode_nothing() {
        assert!(Filtering::new(|_| true).encode().is_none());
        assert!(MetaFiltering::new(|_| true).encode().is_none());
        assert!(Mapping::new(|v| Some(v.clone())).encode().is_none());
    }
}
