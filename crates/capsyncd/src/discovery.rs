//! Capability discovery from the cluster.
//!
//! Lists workload and trait definitions, converts each into a capability and
//! merges the results into one catalog (workloads first, then traits, each in
//! listing order).
//!
//! Failure policy:
//! - A failed list call fails the whole discovery; no partial catalog.
//! - A definition that fails conversion is logged and skipped.
//! - Cancellation aborts with [`DiscoveryError::Cancelled`].

use capsync_core::{
    convert, Capability, ClusterClient, ClusterError, DefinitionKind, DefinitionSource,
    LabelSelector, ParameterExtractor, RawDefinition, TemplateStore,
};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("list {kind} err: {source}")]
    ClusterQuery {
        kind: DefinitionKind,
        #[source]
        source: ClusterError,
    },
    #[error("discovery cancelled")]
    Cancelled,
}

/// A definition that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDefinition {
    pub name: String,
    pub kind: DefinitionKind,
    pub reason: String,
}

/// Result of converting one definition.
#[derive(Debug)]
pub enum Outcome {
    Converted(Capability),
    Skipped(SkippedDefinition),
}

/// Catalog built by one discovery call.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Successfully converted capabilities.
    pub capabilities: Vec<Capability>,
    /// Definitions skipped because conversion failed.
    pub skipped: Vec<SkippedDefinition>,
}

impl DiscoveryResult {
    fn absorb(&mut self, outcomes: Vec<Outcome>) {
        for outcome in outcomes {
            match outcome {
                Outcome::Converted(cap) => self.capabilities.push(cap),
                Outcome::Skipped(skipped) => self.skipped.push(skipped),
            }
        }
    }
}

/// Discovery inputs shared by every call.
#[derive(Clone, Copy)]
pub struct Discovery<'a> {
    pub client: &'a dyn ClusterClient,
    pub extractor: &'a dyn ParameterExtractor,
    pub store: &'a TemplateStore,
}

impl std::fmt::Debug for Discovery<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("sync_dir", &self.store.sync_dir())
            .finish_non_exhaustive()
    }
}

impl Discovery<'_> {
    /// Build the capability catalog for `namespace` and `selector`.
    pub async fn discover(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let mut result = DiscoveryResult::default();

        let workloads = self
            .discover_kind(DefinitionKind::WorkloadDefinition, namespace, selector, cancel)
            .await?;
        result.absorb(workloads);

        let traits = self
            .discover_kind(DefinitionKind::TraitDefinition, namespace, selector, cancel)
            .await?;
        result.absorb(traits);

        debug!(
            namespace,
            selector = %selector,
            count = result.capabilities.len(),
            skipped = result.skipped.len(),
            "discovered capabilities"
        );
        Ok(result)
    }

    /// List and convert one definition kind.
    pub async fn discover_kind(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<Outcome>, DiscoveryError> {
        let definitions = self.list(kind, namespace, selector, cancel).await?;

        let mut outcomes = Vec::with_capacity(definitions.len());
        for def in definitions {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            let outcome = convert_definition(kind, def, self.store, self.extractor);
            if let Outcome::Skipped(skipped) = &outcome {
                warn!(
                    name = %skipped.name,
                    kind = %skipped.kind,
                    error = %skipped.reason,
                    "skipping definition"
                );
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn list(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawDefinition>, DiscoveryError> {
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DiscoveryError::Cancelled),
            listed = self.client.list(kind, namespace, selector) => {
                listed.map_err(|source| DiscoveryError::ClusterQuery { kind, source })
            }
        }
    }
}

/// Convert one listed definition. Does not log.
pub fn convert_definition(
    kind: DefinitionKind,
    def: RawDefinition,
    store: &TemplateStore,
    extractor: &dyn ParameterExtractor,
) -> Outcome {
    let name = def.name.clone();
    let source = match kind {
        DefinitionKind::WorkloadDefinition => DefinitionSource::workload(def),
        DefinitionKind::TraitDefinition => DefinitionSource::trait_def(def),
    };
    match convert(source, store, extractor) {
        Ok(cap) => Outcome::Converted(cap),
        Err(e) => Outcome::Skipped(SkippedDefinition {
            name,
            kind,
            reason: e.to_string(),
        }),
    }
}
