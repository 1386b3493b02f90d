//! Embedded event-analytics engine.
//!
//! `keystone` ingests structured events, persists them through a
//! pluggable key-value delegate, and continuously maintains a forest of
//! user-defined *aggregators* computing statistics over configurable
//! time intervals. Callers retrieve aggregator results by (id, interval)
//! and retrieve filtered event lists -- including keyword search -- for
//! arbitrary intervals. All state is interval-bucketed and persisted so
//! restarts avoid reprocessing history.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Analyzer`] | Stateful orchestrator: interval states, back-fill, reconciliation |
//! | [`AnalyzerBuilder`] | Configures categories, columns, and aggregator factories |
//! | [`Aggregator`] | Capability implemented by every statistic; chainable |
//! | [`EventBackend`] | Host-supplied durable event store |
//! | [`AnalyticsDelegate`] | Host-supplied key-value persistence + status sink |
//! | [`EventClient`] | Creates and submits events against the backend |
//! | [`EventList`] | Retrieved events with an optional keyword index |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use keystone::{
//!     AggregatorSpec, Analyzer, CategoryBuilder, Counting, MemoryBackend, MemoryDelegate,
//! };
//!
//! # async fn run() -> Result<(), keystone::AnalyticsError> {
//! let backend = Arc::new(MemoryBackend::new());
//! let delegate = Arc::new(MemoryDelegate::new());
//!
//! let mut analyzer = Analyzer::builder(backend, delegate)
//!     .aggregator(AggregatorSpec::new("All Event Count", || {
//!         Box::new(Counting::default())
//!     }))
//!     .category(CategoryBuilder::new("pageView").column("path", vec![]))
//!     .build()
//!     .await?;
//!
//! let total = analyzer
//!     .find_aggregator_as::<Counting>("All Event Count", keystone::all_time())
//!     .await?
//!     .map(|count| count.value_count)
//!     .unwrap_or(0);
//! println!("{total} events so far");
//! # Ok(())
//! # }
//! ```
//!
//! The engine is single-task cooperative: analyzer operations are
//! `async` and suspend only at delegate and backend calls, so no
//! internal locking is needed. Hosts that want parallelism put the
//! analyzer behind their own mutex.

mod aggregator;
pub use aggregator::{
    Aggregator, AggregatorFactory, AggregatorRegistration, AggregatorRegistry, AggregatorSpec,
    Chain, EventDisposition, terminal, terminal_mut,
};
mod analyzer;
pub use analyzer::Analyzer;
mod backend;
pub use backend::{BackendStatusSink, EventBackend, MemoryBackend};
mod builder;
pub use builder::{AnalyzerBuilder, AnalyzerConfig, CategoryBuilder};
mod builtin;
pub use builtin::{
    Counting, CountingByDate, CountingByGroup, DateGrouping, DateScope, DuplicateEventChecker,
    Filtering, Grouping, LatestEvent, Mapping, MetaFiltering, NumericStats, predicate_counter,
};
mod calendar;
pub use calendar::{
    DateInterval, WeekStart, all_time, day_interval, day_start, hour_start, is_normalized,
    month_after, month_before, month_interval, month_start, months_covering, week_interval,
    week_start, year_interval,
};
mod client;
pub use client::EventClient;
mod clock;
pub use clock::{Clock, FixedClock, SystemClock};
mod codec;
pub use codec::{events_key, search_index_key, state_key};
mod delegate;
pub use delegate::{AnalyticsDelegate, FsDelegate, MemoryDelegate};
mod error;
pub use error::{AnalyticsError, CollaboratorError};
mod event;
pub use event::{Event, EventCategory, EventColumn, ID_COLUMN};
mod search;
pub use search::{EventList, KeywordExtractor, SearchIndex, default_keywords};
mod state;
pub use state::IntervalState;
mod status;
pub use status::{AnalyzerStatus, BackendStatus, EventSource, StatusThrottle};
mod value;
pub use value::EventValue;
