//! Keyword search over event payloads.
//!
//! The index maps lowercase word tokens to the ids of the events that
//! produced them. Queries are conjunctive prefix matches: every query
//! word must prefix-match some token posted for the event. Keywords come
//! from a configurable extractor; the default walks every `Text` value
//! in the payload.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::DateInterval;
use crate::event::Event;
use crate::value::EventValue;

/// Populates a set of raw keywords for an event.
///
/// Raw keywords are segmented into word tokens before indexing, so an
/// extractor may emit whole phrases.
pub type KeywordExtractor = Arc<dyn Fn(&Event, &mut BTreeSet<String>) + Send + Sync>;

/// The default extractor: every `Text` value in the payload is a keyword.
pub fn default_keywords(event: &Event, keywords: &mut BTreeSet<String>) {
    for value in event.data.values() {
        if let EventValue::Text(text) = value {
            keywords.insert(text.clone());
        }
    }
}

/// Lowercase word tokens of `text`: maximal alphanumeric runs.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

/// Raw keywords of `event` under `extractor` (or the default).
fn raw_keywords(event: &Event, extractor: Option<&KeywordExtractor>) -> BTreeSet<String> {
    let mut keywords = BTreeSet::new();
    match extractor {
        Some(extract) => extract(event, &mut keywords),
        None => default_keywords(event, &mut keywords),
    }
    keywords
}

/// Whether `event`'s own tokens satisfy `query` without an index.
///
/// Semantically identical to the indexed predicate restricted to one
/// event: each query word must prefix-match some token of the event.
pub fn event_matches(event: &Event, query: &str, extractor: Option<&KeywordExtractor>) -> bool {
    let tokens: BTreeSet<String> = raw_keywords(event, extractor)
        .iter()
        .flat_map(|keyword| tokenize(keyword))
        .collect();
    tokenize(query).all(|word| {
        tokens
            .range(word.clone()..)
            .take_while(|token| token.starts_with(&word))
            .next()
            .is_some()
    })
}

/// Keyword -> event-id posting map covering one interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchIndex {
    /// The interval this index covers.
    pub interval: DateInterval,
    /// Token -> posted event ids.
    keyword_map: BTreeMap<String, BTreeSet<Uuid>>,
}

impl SearchIndex {
    /// An empty index covering `interval`.
    pub fn new(interval: DateInterval) -> Self {
        Self {
            interval,
            keyword_map: BTreeMap::new(),
        }
    }

    /// Index one event's keywords.
    pub fn insert_event(&mut self, event: &Event, extractor: Option<&KeywordExtractor>) {
        for keyword in raw_keywords(event, extractor) {
            for token in tokenize(&keyword) {
                self.keyword_map.entry(token).or_default().insert(event.id);
            }
        }
    }

    /// Whether the index holds any postings.
    pub fn is_empty(&self) -> bool {
        self.keyword_map.is_empty()
    }

    /// Every event id with at least one posting.
    pub fn posted_ids(&self) -> BTreeSet<Uuid> {
        self.keyword_map
            .values()
            .flat_map(|ids| ids.iter().copied())
            .collect()
    }

    /// Whether `event_id` satisfies `query`.
    ///
    /// For every query word there must exist a token starting with that
    /// word whose posting contains the id. The empty query matches
    /// everything.
    pub fn matches(&self, query: &str, event_id: Uuid) -> bool {
        tokenize(query).all(|word| {
            self.keyword_map
                .range(word.clone()..)
                .take_while(|(token, _)| token.starts_with(&word))
                .any(|(_, ids)| ids.contains(&event_id))
        })
    }

    /// Rebuild an index over `interval` as the union of per-bucket
    /// indices, filtered to the given event ids.
    pub fn union<'a, I>(interval: DateInterval, parts: I, keep: &BTreeSet<Uuid>) -> Self
    where
        I: IntoIterator<Item = &'a SearchIndex>,
    {
        let mut merged = Self::new(interval);
        for part in parts {
            for (token, ids) in &part.keyword_map {
                let kept: BTreeSet<Uuid> = ids.intersection(keep).copied().collect();
                if !kept.is_empty() {
                    merged
                        .keyword_map
                        .entry(token.clone())
                        .or_default()
                        .extend(kept);
                }
            }
        }
        merged
    }

    /// Merge newly indexed events in and grow the interval to cover them.
    ///
    /// Callers pass only events that are genuinely new; nothing already
    /// posted is re-keyworded.
    pub fn extend(&mut self, events: &[Event], extractor: Option<&KeywordExtractor>) {
        for event in events {
            self.insert_event(event, extractor);
            self.interval.expand_to(event.timestamp);
        }
    }
}

/// A retrieved, timestamp-sorted list of events with an optional index.
#[derive(Debug, Clone)]
pub struct EventList {
    /// The interval the list was retrieved for.
    pub interval: DateInterval,
    /// Events sorted by timestamp.
    pub events: Vec<Event>,
    /// Keyword index restricted to `events`, when one was maintained.
    pub index: Option<SearchIndex>,
}

impl EventList {
    /// Events matching `query`, in timestamp order.
    ///
    /// Without an index the predicate is evaluated from each event's own
    /// tokens via the default extractor; the semantics are identical.
    pub fn search(&self, query: &str) -> Vec<&Event> {
        match &self.index {
            Some(index) => self
                .events
                .iter()
                .filter(|event| index.matches(query, event.id))
                .collect(),
            None => self
                .events
                .iter()
                .filter(|event| event_matches(event, query, None))
                .collect(),
        }
    }

    /// Number of retrieved events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
