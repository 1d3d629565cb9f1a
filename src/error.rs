use thiserror::Error;

/// Failures a reconciliation step can hit. The display text is what lands in
/// audit records, so keep it readable for an operator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote fetch failed ({resource}): {message}")]
    RemoteFetch { resource: String, message: String },
    #[error("category {remote_id} references parent {parent_id} which is not materialized")]
    DataConsistency { remote_id: i64, parent_id: i64 },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("asset fetch failed ({source_ref}): {message}")]
    AssetFetch { source_ref: String, message: String },
}

impl SyncError {
    pub fn remote(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteFetch {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn asset(source_ref: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AssetFetch {
            source_ref: source_ref.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a `CatalogStore` backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} with key `{key}` already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict { .. } => SyncError::Conflict(value.to_string()),
            other => SyncError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_maps_to_conflict() {
        let err: SyncError = StoreError::Conflict {
            entity: "position",
            key: "42".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[test]
    fn store_not_found_maps_to_storage() {
        let err: SyncError = StoreError::NotFound {
            entity: "category",
            id: 7,
        }
        .into();
        assert_eq!(err.to_string(), "storage error: category 7 not found");
    }
}
