//! Analyzer configuration and construction.
//!
//! The builder collects categories, columns, and aggregator factories,
//! enforces the `"id"` column reservation, and composes the final
//! schema: each category gets a synthetic `"id"` column appended that
//! carries its category-level aggregator specs. `build()` assembles the
//! registry and runs the full initialization sequence.

use std::sync::Arc;

use crate::aggregator::{AggregatorRegistry, AggregatorSpec};
use crate::analyzer::Analyzer;
use crate::backend::EventBackend;
use crate::clock::{Clock, SystemClock};
use crate::delegate::AnalyticsDelegate;
use crate::error::AnalyticsError;
use crate::event::{EventCategory, EventColumn, ID_COLUMN};
use crate::search::KeywordExtractor;

/// Analyzer options.
#[derive(Clone, Default)]
pub struct AnalyzerConfig {
    /// Stamped on events created via the client.
    pub user_identifier: String,
    /// Build and maintain the keyword search index.
    pub create_search_index: bool,
    /// Custom keyword extractor; the default extracts all `Text` values.
    pub keyword_extractor: Option<KeywordExtractor>,
}

impl std::fmt::Debug for AnalyzerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerConfig")
            .field("user_identifier", &self.user_identifier)
            .field("create_search_index", &self.create_search_index)
            .field(
                "keyword_extractor",
                &self.keyword_extractor.as_ref().map(|_| "custom"),
            )
            .finish()
    }
}

/// Collects the columns and aggregators of one event category.
#[derive(Clone)]
pub struct CategoryBuilder {
    name: String,
    category_specs: Vec<AggregatorSpec>,
    columns: Vec<(String, Vec<AggregatorSpec>)>,
}

impl CategoryBuilder {
    /// Start a category named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category_specs: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Register a category-level aggregator: it sees every event of this
    /// category, carried on the synthetic `"id"` column.
    pub fn aggregator(mut self, spec: AggregatorSpec) -> Self {
        self.category_specs.push(spec);
        self
    }

    /// Add a column with the aggregators registered on it.
    ///
    /// The name `"id"` is reserved; `build()` rejects it.
    pub fn column(mut self, name: impl Into<String>, specs: Vec<AggregatorSpec>) -> Self {
        self.columns.push((name.into(), specs));
        self
    }
}

/// Builds an [`Analyzer`] against a backend and delegate.
pub struct AnalyzerBuilder {
    backend: Arc<dyn EventBackend>,
    delegate: Arc<dyn AnalyticsDelegate>,
    clock: Arc<dyn Clock>,
    config: AnalyzerConfig,
    categories: Vec<CategoryBuilder>,
    all_event_specs: Vec<AggregatorSpec>,
}

impl AnalyzerBuilder {
    pub(crate) fn new(backend: Arc<dyn EventBackend>, delegate: Arc<dyn AnalyticsDelegate>) -> Self {
        Self {
            backend,
            delegate,
            clock: Arc::new(SystemClock),
            config: AnalyzerConfig::default(),
            categories: Vec::new(),
            all_event_specs: Vec::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock. Tests pin a
    /// [`FixedClock`](crate::clock::FixedClock) here.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register an aggregator over all events, regardless of category.
    pub fn aggregator(mut self, spec: AggregatorSpec) -> Self {
        self.all_event_specs.push(spec);
        self
    }

    /// Register a category.
    pub fn category(mut self, category: CategoryBuilder) -> Self {
        self.categories.push(category);
        self
    }

    /// Validate the schema, assemble the aggregator-column registry, and
    /// run the analyzer initialization sequence: load persisted states,
    /// back-fill newly registered aggregators, reconcile the event cache
    /// with the backend, and process anything new.
    ///
    /// # Errors
    ///
    /// [`AnalyticsError::ReservedColumn`] when a category registers a
    /// column named `"id"`; collaborator errors from the initial load.
    pub async fn build(self) -> Result<Analyzer, AnalyticsError> {
        let mut registry = AggregatorRegistry::default();
        for spec in &self.all_event_specs {
            registry.register(spec, EventColumn::all_events());
        }

        let mut categories = Vec::new();
        for category in &self.categories {
            let mut columns = Vec::new();
            for (column_name, specs) in &category.columns {
                if column_name == ID_COLUMN {
                    return Err(AnalyticsError::ReservedColumn {
                        category: category.name.clone(),
                    });
                }
                let column = EventColumn::new(column_name.clone(), category.name.clone());
                for spec in specs {
                    registry.register(spec, column.clone());
                }
                columns.push(column);
            }

            // The synthetic carrier for category-level aggregators goes last.
            let id_column = EventColumn::new(ID_COLUMN, category.name.clone());
            for spec in &category.category_specs {
                registry.register(spec, id_column.clone());
            }
            columns.push(id_column);

            categories.push(EventCategory {
                name: category.name.clone(),
                columns,
            });
        }

        Analyzer::init(
            self.backend,
            self.delegate,
            self.clock,
            self.config,
            registry,
            categories,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::builtin::Counting;
    use crate::clock::FixedClock;
    use crate::delegate::MemoryDelegate;
    use crate::event::test_fixtures::at;

    fn harness() -> (Arc<MemoryBackend>, Arc<MemoryDelegate>, Arc<FixedClock>) {
        (
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryDelegate::new()),
            Arc::new(FixedClock::new(at(2023, 1, 14, 23, 59, 59))),
        )
    }

    #[tokio::test]
    async fn reserved_column_fails_eagerly() {
        let (backend, delegate, clock) = harness();
        let result = Analyzer::builder(backend, delegate)
            .clock(clock)
            .category(CategoryBuilder::new("numericEvent").column("id", vec![]))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(AnalyticsError::ReservedColumn { category }) if category == "numericEvent"
        ));
    }

    #[tokio::test]
    async fn categories_gain_the_synthetic_id_column() {
        let (backend, delegate, clock) = harness();
        let analyzer = Analyzer::builder(backend, delegate)
            .clock(clock)
            .category(
                CategoryBuilder::new("numericEvent")
                    .aggregator(AggregatorSpec::new("numericEvent Count", || {
                        Box::new(Counting::default())
                    }))
                    .column("numericValueA", vec![]),
            )
            .build()
            .await
            .unwrap();

        let categories = analyzer.categories();
        assert_eq!(categories.len(), 1);
        let columns = &categories[0].columns;
        assert_eq!(columns.last().unwrap().name, ID_COLUMN);
        assert_eq!(
            columns.last().unwrap().category_name.as_deref(),
            Some("numericEvent")
        );
        // The category-level counter rides on the synthetic column.
        assert!(
            analyzer
                .registry()
                .columns_for("numericEvent Count")
                .unwrap()
                .iter()
                .any(|column| column.name == ID_COLUMN)
        );
    }

    #[tokio::test]
    async fn empty_schema_builds_and_reports_ready() {
        let (backend, delegate, clock) = harness();
        let analyzer = Analyzer::builder(backend, delegate.clone())
            .clock(clock)
            .build()
            .await
            .unwrap();
        assert!(analyzer.registry().is_empty());
        assert_eq!(
            delegate.statuses().last(),
            Some(&crate::status::AnalyzerStatus::Ready)
        );
    }
}
