//! Crate-level error types for analyzer operations and persistence.

/// Boxed error produced by a host-supplied collaborator (backend or delegate).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by analyzer APIs and the event client.
///
/// Transient collaborator failures are surfaced to the caller of the
/// provoking API; analyzer state is left unchanged and partial progress
/// already persisted remains durable. Decoding failures on persisted
/// artifacts never reach this type -- the artifact is treated as absent
/// and rebuilt from the backend.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// The remote event store failed to load or persist events.
    #[error("backend error: {0}")]
    Backend(#[source] CollaboratorError),

    /// The key-value delegate failed to load or persist an artifact.
    #[error("delegate error: {0}")]
    Delegate(#[source] CollaboratorError),

    /// Encoding an artifact for persistence failed.
    ///
    /// Decoding failures are not reported here; a persisted artifact that
    /// fails to decode is treated as absent and rebuilt.
    #[error("encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// A user schema registered a column under the reserved name `"id"`.
    ///
    /// The `"id"` column is auto-injected by the builder as the carrier
    /// for category-level aggregators and may not be registered directly.
    #[error("column name \"id\" is reserved (category {category:?})")]
    ReservedColumn {
        /// Name of the category that attempted the registration.
        category: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_column_display_names_category() {
        let err = AnalyticsError::ReservedColumn {
            category: "numericEvent".to_string(),
        };
        assert!(err.to_string().contains("numericEvent"));
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn codec_error_from_serde_json() {
        let json_err = serde_json::from_str::<u64>("not json").unwrap_err();
        let err = AnalyticsError::from(json_err);
        assert!(matches!(err, AnalyticsError::Codec(_)));
    }

    #[test]
    fn backend_error_displays_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "link down");
        let err = AnalyticsError::Backend(Box::new(inner));
        assert!(err.to_string().contains("link down"));
    }

    // Verify `Send + Sync` bounds are satisfied so errors can cross task
    // boundaries when the host drives the analyzer from a runtime.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<AnalyticsError>();
        }
    };
}
