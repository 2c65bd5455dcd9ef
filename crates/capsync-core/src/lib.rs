pub mod cluster;
pub mod config;
pub mod convert;
pub mod extractor;
pub mod selector;
pub mod template_store;
pub mod types;

pub use cluster::{ClusterClient, ClusterError};
pub use config::Config;
pub use convert::{convert, ConvertError, DefinitionSource};
pub use extractor::{CueExtractor, ExtractError, Extracted, ParameterExtractor};
pub use selector::{LabelSelector, SelectorError};
pub use template_store::{StoreError, TemplateStore};
pub use types::*;
