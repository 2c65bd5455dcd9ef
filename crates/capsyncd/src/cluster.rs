//! Manifest-directory cluster.
//!
//! Serves definition objects from a directory of YAML or JSON manifests, the
//! same objects an OAM control plane would store:
//!
//! ```yaml
//! apiVersion: core.oam.dev/v1alpha2
//! kind: TraitDefinition
//! metadata:
//!   name: scaler
//!   namespace: default
//!   labels: { tier: system }
//! spec:
//!   definitionRef: { name: manualscalertraits.core.oam.dev }
//!   appliesToWorkloads: [webservice]
//!   extension:
//!     template: |
//!       ...
//! ```
//!
//! The directory is re-read on every list call, in file-name order; a file may
//! hold several `---` separated documents.

use async_trait::async_trait;
use capsync_core::{ClusterClient, ClusterError, DefinitionKind, LabelSelector, RawDefinition};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Namespace of manifests that do not declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionRef {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionSpec {
    #[serde(default)]
    definition_ref: DefinitionRef,
    #[serde(default)]
    extension: Option<serde_json::Value>,
    #[serde(default)]
    applies_to_workloads: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DefinitionSpec,
}

impl Manifest {
    fn namespace(&self) -> &str {
        self.metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    fn into_definition(self) -> RawDefinition {
        RawDefinition {
            name: self.metadata.name,
            reference_name: self.spec.definition_ref.name,
            extension: self.spec.extension,
            applies_to_workloads: self.spec.applies_to_workloads,
        }
    }
}

/// A cluster backed by a directory of manifests.
#[derive(Debug, Clone)]
pub struct ManifestCluster {
    dir: PathBuf,
}

impl ManifestCluster {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn manifest_files(&self) -> Result<Vec<PathBuf>, ClusterError> {
        let io_err = |source| ClusterError::Io {
            path: self.dir.display().to_string(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            let is_manifest = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml" | "json"));
            if is_manifest && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Parse every document in a manifest file.
fn parse_manifests(path: &Path, content: &str) -> Result<Vec<Manifest>, ClusterError> {
    let malformed = |message: String| ClusterError::Malformed {
        path: path.display().to_string(),
        message,
    };
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value =
            serde_yaml::Value::deserialize(document).map_err(|e| malformed(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let manifest: Manifest =
            serde_yaml::from_value(value).map_err(|e| malformed(e.to_string()))?;
        if manifest.metadata.name.is_empty() {
            return Err(malformed(format!("{} without metadata.name", manifest.kind)));
        }
        manifests.push(manifest);
    }
    Ok(manifests)
}

#[async_trait]
impl ClusterClient for ManifestCluster {
    async fn list(
        &self,
        kind: DefinitionKind,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<RawDefinition>, ClusterError> {
        let mut definitions = Vec::new();
        for path in self.manifest_files().await? {
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| ClusterError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
            for manifest in parse_manifests(&path, &content)? {
                if manifest.kind != kind.as_str() {
                    continue;
                }
                if !namespace.is_empty() && manifest.namespace() != namespace {
                    continue;
                }
                if !selector.matches(&manifest.metadata.labels) {
                    continue;
                }
                definitions.push(manifest.into_definition());
            }
        }
        debug!(
            kind = %kind,
            namespace,
            count = definitions.len(),
            dir = %self.dir.display(),
            "listed definitions"
        );
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const WORKLOADS: &str = r#"
apiVersion: core.oam.dev/v1alpha2
kind: WorkloadDefinition
metadata:
  name: webservice
  labels:
    tier: system
spec:
  definitionRef:
    name: containerizedworkloads.core.oam.dev
  extension:
    template: |
      webservice: {
        image: string
      }
---
apiVersion: core.oam.dev/v1alpha2
kind: WorkloadDefinition
metadata:
  name: worker
  namespace: apps
spec:
  definitionRef:
    name: containerizedworkloads.core.oam.dev
"#;

    const TRAITS: &str = r#"{
  "apiVersion": "core.oam.dev/v1alpha2",
  "kind": "TraitDefinition",
  "metadata": { "name": "scaler", "labels": { "tier": "system" } },
  "spec": {
    "definitionRef": { "name": "manualscalertraits.core.oam.dev" },
    "appliesToWorkloads": ["webservice"],
    "extension": { "template": "scaler: {\n  replicas: *1 | int\n}\n" }
  }
}"#;

    fn cluster_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("10-workloads.yaml"), WORKLOADS).unwrap();
        fs::write(dir.path().join("20-traits.json"), TRAITS).unwrap();
        fs::write(dir.path().join("README.md"), "not a manifest").unwrap();
        dir
    }

    #[tokio::test]
    async fn lists_by_kind_and_namespace() {
        let dir = cluster_dir();
        let cluster = ManifestCluster::new(dir.path());
        let all = LabelSelector::everything();

        let workloads = cluster
            .list(DefinitionKind::WorkloadDefinition, "default", &all)
            .await
            .unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].name, "webservice");
        assert_eq!(
            workloads[0].reference_name,
            "containerizedworkloads.core.oam.dev"
        );
        let template = workloads[0].extension.as_ref().unwrap()["template"]
            .as_str()
            .unwrap();
        assert!(template.starts_with("webservice: {"));

        let traits = cluster
            .list(DefinitionKind::TraitDefinition, "default", &all)
            .await
            .unwrap();
        assert_eq!(traits.len(), 1);
        assert_eq!(traits[0].applies_to_workloads, vec!["webservice"]);

        let apps = cluster
            .list(DefinitionKind::WorkloadDefinition, "apps", &all)
            .await
            .unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "worker");
        assert!(apps[0].extension.is_none());
    }

    #[tokio::test]
    async fn empty_namespace_lists_everywhere_in_file_order() {
        let dir = cluster_dir();
        let cluster = ManifestCluster::new(dir.path());
        let workloads = cluster
            .list(
                DefinitionKind::WorkloadDefinition,
                "",
                &LabelSelector::everything(),
            )
            .await
            .unwrap();
        let names: Vec<&str> = workloads.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["webservice", "worker"]);
    }

    #[tokio::test]
    async fn applies_label_selector() {
        let dir = cluster_dir();
        let cluster = ManifestCluster::new(dir.path());
        let selector = LabelSelector::parse("tier!=system").unwrap();
        let workloads = cluster
            .list(DefinitionKind::WorkloadDefinition, "", &selector)
            .await
            .unwrap();
        assert_eq!(workloads.len(), 1);
        assert_eq!(workloads[0].name, "worker");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cluster = ManifestCluster::new(dir.path().join("absent"));
        let err = cluster
            .list(
                DefinitionKind::WorkloadDefinition,
                "default",
                &LabelSelector::everything(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Io { .. }));
    }

    #[tokio::test]
    async fn malformed_manifest_fails_the_listing() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bad.yaml"),
            "kind: WorkloadDefinition\nmetadata: {}\n",
        )
        .unwrap();
        let cluster = ManifestCluster::new(dir.path());
        let err = cluster
            .list(
                DefinitionKind::WorkloadDefinition,
                "default",
                &LabelSelector::everything(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Malformed { .. }));
    }
}
