//! The aggregator capability: stateful processors that fold events into
//! summaries, composable into chains.
//!
//! An aggregator receives every (event, column) pair it was registered
//! for and decides how the event flows onward: kept, discarded, or
//! rewritten for the next aggregator in a chain. Persistence is opt-in
//! via [`Aggregator::encode`]/[`Aggregator::decode`]; chain nodes are
//! stateless and delegate persistence to their terminal.

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use crate::calendar::DateInterval;
use crate::event::{Event, EventColumn};

/// How an event flows past an aggregator in a chain.
#[derive(Debug, Clone)]
pub enum EventDisposition {
    /// Forward the event unchanged.
    Keep,
    /// Stop the chain; downstream aggregators never see the event.
    Discard,
    /// Forward a rewritten event in place of the original.
    Replace(Event),
}

/// A stateful processor that folds events into a summary.
///
/// # Contract
///
/// - [`add_event`](Aggregator::add_event) is called once per matching
///   (event, column) pair, strictly synchronously, in batch order.
/// - [`encode`](Aggregator::encode) returns `None` for stateless or
///   non-persistable aggregators; otherwise [`decode`](Aggregator::decode)
///   must be its inverse and yield equal observable state.
/// - [`reset`](Aggregator::reset) restores the empty state.
/// - [`next`](Aggregator::next) is the chain successor; `None` for leaves.
pub trait Aggregator: Send {
    /// Fold one event. `column` is the registration column the event
    /// arrived through; the synthetic `"id"` column for category-level
    /// and all-event registrations.
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition;

    /// Serialize state for persistence. `None` means nothing to persist.
    fn encode(&self) -> Option<Vec<u8>> {
        None
    }

    /// Restore state previously produced by [`encode`](Aggregator::encode).
    fn decode(&mut self, _bytes: &[u8]) -> Result<(), serde_json::Error> {
        Ok(())
    }

    /// Restore the empty state.
    fn reset(&mut self);

    /// Chain successor, if any.
    fn next(&self) -> Option<&dyn Aggregator> {
        None
    }

    /// Mutable chain successor, if any.
    fn next_mut(&mut self) -> Option<&mut dyn Aggregator> {
        None
    }

    /// Downcast access to the concrete aggregator.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast access to the concrete aggregator.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Compose with `next` into a [`Chain`]: events flow through `self`
    /// first, then -- unless discarded -- into `next`.
    fn then<B>(self, next: B) -> Chain
    where
        Self: Sized + 'static,
        B: Aggregator + 'static,
    {
        Chain::new(Box::new(self), Box::new(next))
    }
}

/// Follow [`Aggregator::next`] to the terminal aggregator of a chain.
///
/// For a leaf this is the aggregator itself.
pub fn terminal(aggregator: &dyn Aggregator) -> &dyn Aggregator {
    let mut current = aggregator;
    while let Some(next) = current.next() {
        current = next;
    }
    current
}

/// Mutable variant of [`terminal`].
pub fn terminal_mut(aggregator: &mut dyn Aggregator) -> &mut dyn Aggregator {
    let mut current = aggregator;
    while current.next_mut().is_some() {
        let step = current;
        current = step.next_mut().expect("successor checked above");
    }
    current
}

/// Composition of two aggregators where the first's output feeds the second.
///
/// The chain shares the outer registration id; queries resolve against
/// its terminal. Chain nodes hold no state of their own: encoding,
/// decoding, and reset all delegate to the terminal aggregator.
pub struct Chain {
    first: Box<dyn Aggregator>,
    second: Box<dyn Aggregator>,
}

impl Chain {
    /// Chain `first` into `second`.
    pub fn new(first: Box<dyn Aggregator>, second: Box<dyn Aggregator>) -> Self {
        Self { first, second }
    }

    /// The upstream member.
    pub fn first(&self) -> &dyn Aggregator {
        self.first.as_ref()
    }
}

impl Aggregator for Chain {
    fn add_event(&mut self, event: &Event, column: Option<&EventColumn>) -> EventDisposition {
        match self.first.add_event(event, column) {
            EventDisposition::Keep => self.second.add_event(event, column),
            EventDisposition::Discard => EventDisposition::Discard,
            EventDisposition::Replace(rewritten) => {
                match self.second.add_event(&rewritten, column) {
                    // The rewrite stays visible downstream of the chain.
                    EventDisposition::Keep => EventDisposition::Replace(rewritten),
                    EventDisposition::Discard => EventDisposition::Discard,
                    EventDisposition::Replace(again) => EventDisposition::Replace(again),
                }
            }
        }
    }

    fn encode(&self) -> Option<Vec<u8>> {
        terminal(self).encode()
    }

    fn decode(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
        terminal_mut(self).decode(bytes)
    }

    fn reset(&mut self) {
        terminal_mut(self).reset();
    }

    fn next(&self) -> Option<&dyn Aggregator> {
        Some(self.second.as_ref())
    }

    fn next_mut(&mut self) -> Option<&mut dyn Aggregator> {
        Some(self.second.as_mut())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Factory producing fresh aggregator instances for a registration id.
pub type AggregatorFactory = Arc<dyn Fn() -> Box<dyn Aggregator> + Send + Sync>;

/// A registered aggregator: id, optional interval pin, and factory.
///
/// When `interval` is set the aggregator is only instantiated for state
/// buckets whose interval equals it, pinning the aggregator to one time
/// window.
#[derive(Clone)]
pub struct AggregatorSpec {
    /// Registration id, unique within a state bucket.
    pub id: String,
    /// Optional interval pin.
    pub interval: Option<DateInterval>,
    /// Produces a fresh, empty instance.
    pub factory: AggregatorFactory,
}

impl AggregatorSpec {
    /// A spec instantiated in every state bucket.
    pub fn new<F>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Aggregator> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            interval: None,
            factory: Arc::new(factory),
        }
    }

    /// A spec pinned to state buckets whose interval equals `interval`.
    pub fn pinned<F>(id: impl Into<String>, interval: DateInterval, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Aggregator> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            interval: Some(interval),
            factory: Arc::new(factory),
        }
    }
}

impl std::fmt::Debug for AggregatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorSpec")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish()
    }
}

/// One registry entry: where an aggregator is installed and how to build it.
///
/// The registry is the analyzer's back-reference from aggregator id to
/// registration site, kept separate so aggregator instances never point
/// at their columns.
#[derive(Clone)]
pub struct AggregatorRegistration {
    /// Columns the aggregator was registered on. Category-level and
    /// all-event registrations use the synthetic `"id"` column.
    pub columns: Vec<EventColumn>,
    /// Optional interval pin copied from the spec.
    pub interval: Option<DateInterval>,
    /// Produces a fresh, empty instance.
    pub factory: AggregatorFactory,
}

/// Mapping from aggregator id to its registration.
#[derive(Clone, Default)]
pub struct AggregatorRegistry {
    entries: BTreeMap<String, AggregatorRegistration>,
}

impl AggregatorRegistry {
    /// Register `spec` on `column`.
    ///
    /// A duplicate id keeps the first factory and interval pin; the
    /// column is added to the entry if it is new, otherwise the call is
    /// a warn-logged no-op.
    pub fn register(&mut self, spec: &AggregatorSpec, column: EventColumn) {
        match self.entries.entry(spec.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(AggregatorRegistration {
                    columns: vec![column],
                    interval: spec.interval,
                    factory: Arc::clone(&spec.factory),
                });
            }
            Entry::Occupied(mut entry) => {
                let registration = entry.get_mut();
                if registration.columns.contains(&column) {
                    tracing::warn!(id = %spec.id, "duplicate aggregator registration ignored");
                } else {
                    registration.columns.push(column);
                }
            }
        }
    }

    /// Instantiate fresh aggregators for a state bucket with `interval`,
    /// honoring interval pins.
    pub fn instantiate_for(&self, interval: &DateInterval) -> BTreeMap<String, Box<dyn Aggregator>> {
        self.entries
            .iter()
            .filter(|(_, registration)| match registration.interval {
                Some(pin) => pin == *interval,
                None => true,
            })
            .map(|(id, registration)| (id.clone(), (registration.factory)()))
            .collect()
    }

    /// The columns `id` was registered on.
    pub fn columns_for(&self, id: &str) -> Option<&[EventColumn]> {
        self.entries
            .get(id)
            .map(|registration| registration.columns.as_slice())
    }

    /// The registration for `id`.
    pub fn registration(&self, id: &str) -> Option<&AggregatorRegistration> {
        self.entries.get(id)
    }

    /// Whether `id` has a column scoped to `category`.
    pub fn mentions_category(&self, id: &str, category: &str) -> bool {
        self.columns_for(id)
            .is_some_and(|columns| {
                columns
                    .iter()
                    .any(|column| column.category_name.as_deref() == Some(category))
            })
    }

    /// All registered ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of registered aggregators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{Counting, Filtering};
    use crate::calendar::month_interval;
    use crate::event::test_fixtures::{at, event_at};
    use crate::value::EventValue;

    #[test]
    fn leaf_terminal_is_itself() {
        let mut counting = Counting::default();
        let leaf: &mut dyn Aggregator = &mut counting;
        assert!(leaf.next().is_none());
        assert!(terminal(leaf).as_any().is::<Counting>());
    }

    #[test]
    fn chain_terminal_follows_to_the_end() {
        let chain = Filtering::new(|value| value.as_bool().unwrap_or(false)).then(
            Filtering::new(|value| value.as_bool().unwrap_or(false)).then(Counting::default()),
        );
        let end = terminal(&chain);
        assert!(end.as_any().is::<Counting>());
    }

    #[test]
    fn chain_discard_stops_downstream() {
        let mut chain =
            Filtering::new(|value| value.as_bool().unwrap_or(false)).then(Counting::default());
        let kept = event_at(
            "textEvent",
            at(2023, 1, 2, 0, 0, 0),
            &[("flag", EventValue::Bool(true))],
        );
        let dropped = event_at(
            "textEvent",
            at(2023, 1, 2, 0, 0, 1),
            &[("flag", EventValue::Bool(false))],
        );
        let column = EventColumn::new("flag", "textEvent");
        chain.add_event(&kept, Some(&column));
        chain.add_event(&dropped, Some(&column));
        let count = terminal(&chain)
            .as_any()
            .downcast_ref::<Counting>()
            .unwrap()
            .value_count;
        assert_eq!(count, 1);
    }

    #[test]
    fn chain_reset_clears_the_terminal() {
        let mut chain = Filtering::new(|_| true).then(Counting::default());
        let event = event_at(
            "textEvent",
            at(2023, 1, 2, 0, 0, 0),
            &[("flag", EventValue::Bool(true))],
        );
        chain.add_event(&event, None);
        chain.reset();
        let count = terminal(&chain)
            .as_any()
            .downcast_ref::<Counting>()
            .unwrap()
            .value_count;
        assert_eq!(count, 0);
    }

    #[test]
    fn registry_first_factory_wins() {
        let mut registry = AggregatorRegistry::default();
        let spec_a = AggregatorSpec::new("count", || Box::new(Counting::default()));
        let spec_b = AggregatorSpec::new("count", || {
            Box::new(Filtering::new(|_| false).then(Counting::default()))
        });
        registry.register(&spec_a, EventColumn::all_events());
        registry.register(&spec_b, EventColumn::all_events());

        let instances = registry.instantiate_for(&month_interval(at(2023, 1, 1, 0, 0, 0)));
        assert_eq!(instances.len(), 1);
        // The first factory (a plain Counting leaf) won.
        assert!(instances["count"].as_any().is::<Counting>());
    }

    #[test]
    fn registry_same_id_gathers_columns() {
        let mut registry = AggregatorRegistry::default();
        let spec = AggregatorSpec::new("stats", || Box::new(Counting::default()));
        registry.register(&spec, EventColumn::new("numericValueA", "numericEvent"));
        registry.register(&spec, EventColumn::new("numericValueB", "numericEvent"));
        assert_eq!(registry.columns_for("stats").unwrap().len(), 2);
        assert!(registry.mentions_category("stats", "numericEvent"));
        assert!(!registry.mentions_category("stats", "textEvent"));
    }

    #[test]
    fn interval_pin_limits_instantiation() {
        let january = month_interval(at(2023, 1, 1, 0, 0, 0));
        let february = month_interval(at(2023, 2, 1, 0, 0, 0));
        let mut registry = AggregatorRegistry::default();
        registry.register(
            &AggregatorSpec::pinned("january only", january, || Box::new(Counting::default())),
            EventColumn::all_events(),
        );
        registry.register(
            &AggregatorSpec::new("everywhere", || Box::new(Counting::default())),
            EventColumn::all_events(),
        );

        let in_january = registry.instantiate_for(&january);
        assert!(in_january.contains_key("january only"));
        assert!(in_january.contains_key("everywhere"));

        let in_february = registry.instantiate_for(&february);
        assert!(!in_february.contains_key("january only"));
        assert!(in_february.contains_key("everywhere"));
    }
}
