//! Persistence codec for interval states and event buckets.
//!
//! Everything stored through the delegate is JSON. Interval states carry
//! their aggregator payloads as base64-embedded bytes produced by each
//! chain's terminal; event buckets are plain arrays. Keys follow the
//! `prefix-YYYYMMDD-YYYYMMDD` layout in UTC calendar dates.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregatorRegistry, terminal_mut};
use crate::calendar::{DateInterval, key_date};
use crate::event::Event;
use crate::state::IntervalState;

/// Key prefix for encoded interval states.
const STATE_PREFIX: &str = "state";

/// Key prefix for monthly event buckets.
const EVENTS_PREFIX: &str = "events";

/// Key prefix for per-bucket search indices.
const SEARCH_INDEX_PREFIX: &str = "keystone-search-index";

fn interval_key(prefix: &str, interval: &DateInterval) -> String {
    format!(
        "{prefix}-{}-{}",
        key_date(interval.start),
        key_date(interval.end)
    )
}

/// Delegate key for the encoded state of `interval`.
pub fn state_key(interval: &DateInterval) -> String {
    interval_key(STATE_PREFIX, interval)
}

/// Delegate key for the event bucket of `interval`.
pub fn events_key(interval: &DateInterval) -> String {
    interval_key(EVENTS_PREFIX, interval)
}

/// Delegate key for the search index covering `interval`.
pub fn search_index_key(interval: &DateInterval) -> String {
    interval_key(SEARCH_INDEX_PREFIX, interval)
}

/// Wire form of one aggregator inside an encoded state.
///
/// `state` is absent for stateless aggregators; otherwise it is the
/// base64 of the terminal's [`encode`](crate::aggregator::Aggregator::encode)
/// output.
#[derive(Debug, Serialize, Deserialize)]
struct EncodedAggregator {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    state: Option<String>,
}

/// Wire form of an [`IntervalState`].
#[derive(Debug, Serialize, Deserialize)]
struct EncodedIntervalState {
    interval: DateInterval,
    processed_event_interval: DateInterval,
    event_count: u64,
    known_aggregators: BTreeSet<String>,
    aggregators: Vec<EncodedAggregator>,
}

/// Encode an interval state for the delegate.
pub fn encode_state(state: &IntervalState) -> Result<Vec<u8>, serde_json::Error> {
    let aggregators = state
        .aggregators
        .iter()
        .map(|(id, aggregator)| EncodedAggregator {
            id: id.clone(),
            state: aggregator.encode().map(|bytes| BASE64.encode(bytes)),
        })
        .collect();
    serde_json::to_vec(&EncodedIntervalState {
        interval: state.interval,
        processed_event_interval: state.processed_event_interval,
        event_count: state.event_count,
        known_aggregators: state.known_aggregators.clone(),
        aggregators,
    })
}

/// Decode an interval state persisted by [`encode_state`].
///
/// Fresh aggregator instances come from the registry, so ids no longer
/// registered are ignored (schema shrinkage) and newly registered ids
/// come up empty and absent from `known_aggregators`, which is what the
/// back-fill detector looks for. A payload that fails to decode leaves
/// its aggregator fresh and is logged; only a malformed artifact as a
/// whole is an error.
pub fn decode_state(
    bytes: &[u8],
    registry: &AggregatorRegistry,
) -> Result<IntervalState, serde_json::Error> {
    let encoded: EncodedIntervalState = serde_json::from_slice(bytes)?;
    let mut state = IntervalState::new(encoded.interval, registry);
    state.processed_event_interval = encoded.processed_event_interval;
    state.event_count = encoded.event_count;

    for entry in encoded.aggregators {
        let Some(aggregator) = state.aggregators.get_mut(&entry.id) else {
            tracing::debug!(id = %entry.id, "skipping unregistered aggregator in persisted state");
            continue;
        };
        let Some(payload) = entry.state else {
            continue;
        };
        let Ok(raw) = BASE64.decode(&payload) else {
            tracing::warn!(id = %entry.id, "aggregator payload is not valid base64; starting fresh");
            continue;
        };
        if let Err(error) = terminal_mut(aggregator.as_mut()).decode(&raw) {
            tracing::warn!(id = %entry.id, %error, "aggregator payload failed to decode; starting fresh");
        }
    }

    // Only instantiated ids can be known; everything else needs no
    // back-fill because it no longer exists.
    let instantiated: BTreeSet<String> = state.aggregators.keys().cloned().collect();
    state.known_aggregators = encoded
        .known_aggregators
        .into_iter()
        .filter(|id| instantiated.contains(id))
        .collect();
    Ok(state)
}

/// Encode a monthly event bucket.
pub fn encode_events(events: &[Event]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(events)
}

/// Decode a monthly event bucket.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, serde_json::Error> {
    serde_json::from_slice(bytes)
}
