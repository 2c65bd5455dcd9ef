//! Core types for capability discovery.
//!
//! A [`Capability`] is the locally usable form of a cluster definition: its
//! template has been persisted to the sync directory and its parameters have
//! been extracted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// --- Enumerations ---

/// Kind of remote definition that can be listed from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionKind {
    WorkloadDefinition,
    TraitDefinition,
}

impl DefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkloadDefinition => "WorkloadDefinition",
            Self::TraitDefinition => "TraitDefinition",
        }
    }
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability kind with kind-specific data.
///
/// Only traits carry the list of workload types they may attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapabilityKind {
    Workload,
    Trait {
        #[serde(rename = "appliesTo", default)]
        applies_to: Vec<String>,
    },
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workload => "workload",
            Self::Trait { .. } => "trait",
        }
    }

    /// Workload types a trait applies to; always empty for workloads.
    pub fn applies_to(&self) -> &[String] {
        match self {
            Self::Workload => &[],
            Self::Trait { applies_to } => applies_to,
        }
    }

    /// The remote definition kind this capability is converted from.
    pub fn definition_kind(&self) -> DefinitionKind {
        match self {
            Self::Workload => DefinitionKind::WorkloadDefinition,
            Self::Trait { .. } => DefinitionKind::TraitDefinition,
        }
    }
}

/// Value type accepted by a template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Int,
    Float,
    Number,
    Bool,
    List,
    Struct,
    Unknown,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Struct => "struct",
            Self::Unknown => "unknown",
        }
    }
}

// --- Entities ---

/// A single parameter accepted by a capability template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
    /// Single-letter flag alias for CLI rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
}

/// A fully resolved capability.
///
/// Constructed only by the definition converter, after the template has been
/// persisted and its parameters extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Definition name; also the stem of the persisted template file.
    pub name: String,
    #[serde(flatten)]
    pub kind: CapabilityKind,
    /// Name of the schema object instances of this capability conform to.
    pub crd_name: String,
    /// Absolute path of the persisted template.
    pub definition_path: PathBuf,
    pub parameters: Vec<Parameter>,
    /// Name declared inside the template itself.
    pub canonical_name: String,
}

impl Capability {
    pub fn applies_to(&self) -> &[String] {
        self.kind.applies_to()
    }

    pub fn is_trait(&self) -> bool {
        matches!(self.kind, CapabilityKind::Trait { .. })
    }
}

/// A definition as returned by the cluster, before conversion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDefinition {
    pub name: String,
    /// `spec.definitionRef.name` of the remote object.
    pub reference_name: String,
    /// Embedded extension payload (`spec.extension`), undecoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<serde_json::Value>,
    /// Declared for trait definitions only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applies_to_workloads: Vec<String>,
}
