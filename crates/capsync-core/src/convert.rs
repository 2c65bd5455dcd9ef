//! Definition conversion.
//!
//! Turns one remote definition into a [`Capability`]: decode the extension
//! payload, persist its template, extract parameters. A capability is only
//! returned when every step succeeds.

use serde::Deserialize;
use thiserror::Error;

use crate::extractor::{ExtractError, ParameterExtractor};
use crate::template_store::{StoreError, TemplateStore};
use crate::types::{Capability, CapabilityKind, RawDefinition};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to decode extension: {0}")]
    Decode(String),
    #[error("template not exist in definition")]
    MissingTemplate,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to extract parameters: {0}")]
    Extraction(#[from] ExtractError),
}

/// Decoded `spec.extension` of a definition.
#[derive(Debug, Deserialize)]
struct TemplateExtension {
    #[serde(default)]
    template: String,
}

/// Input to [`convert`].
#[derive(Debug, Clone)]
pub struct DefinitionSource {
    pub name: String,
    pub crd_name: String,
    pub extension: Option<serde_json::Value>,
    pub kind: CapabilityKind,
}

impl DefinitionSource {
    /// Source for a workload definition.
    pub fn workload(def: RawDefinition) -> Self {
        Self {
            name: def.name,
            crd_name: def.reference_name,
            extension: def.extension,
            kind: CapabilityKind::Workload,
        }
    }

    /// Source for a trait definition; carries its applicable workloads.
    pub fn trait_def(def: RawDefinition) -> Self {
        Self {
            name: def.name,
            crd_name: def.reference_name,
            extension: def.extension,
            kind: CapabilityKind::Trait {
                applies_to: def.applies_to_workloads,
            },
        }
    }
}

fn decode_template(extension: Option<serde_json::Value>) -> Result<String, ConvertError> {
    let value =
        extension.ok_or_else(|| ConvertError::Decode("definition has no extension".into()))?;
    let decoded: TemplateExtension =
        serde_json::from_value(value).map_err(|e| ConvertError::Decode(e.to_string()))?;
    Ok(decoded.template)
}

/// Convert a definition into a capability.
pub fn convert(
    source: DefinitionSource,
    store: &TemplateStore,
    extractor: &dyn ParameterExtractor,
) -> Result<Capability, ConvertError> {
    let template = decode_template(source.extension)?;
    if template.is_empty() {
        return Err(ConvertError::MissingTemplate);
    }

    let definition_path = store.persist(&source.name, &template)?;
    let extracted = extractor.extract(&definition_path)?;

    Ok(Capability {
        name: source.name,
        kind: source.kind,
        crd_name: source.crd_name,
        definition_path,
        parameters: extracted.parameters,
        canonical_name: extracted.name,
    })
}
