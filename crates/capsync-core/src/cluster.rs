//! Cluster query seam.
//!
//! The discovery pipeline only needs to list definitions of a given kind in a
//! namespace, filtered by a label selector. Anything that can do that (a real
//! API server client, a directory of manifests, a test double) implements
//! [`ClusterClient`].

use async_trait::async_trait;
use thiserror::Error;

use crate::selector::LabelSelector;
use crate::types::{DefinitionKind, RawDefinition};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed object in {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Lists remote definitions.
///
/// Results must come back in the order the backing store returns them; the
/// pipeline preserves that order in the catalog.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<RawDefinition>, ClusterError>;
}
