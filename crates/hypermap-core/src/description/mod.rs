//! Hypermedia description of the exposed API.
//!
//! The document is a graph of classes, their properties and the operations
//! they support, plus IRI templates for operations with templated URLs. Every
//! node carries a stable identifier derived from the configured base URI and
//! the controller/operation identity, so the same model always yields the
//! same document.
pub mod builder;

pub use builder::DescriptionBuilder;

// External imports (alphabetized)
use serde::{Deserialize, Serialize};

/// Root of the description document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescription {
    #[serde(rename = "@id")]
    pub id: String,
    pub supported_classes: Vec<ClassDescription>,
}

impl ApiDescription {
    pub fn class(&self, label: &str) -> Option<&ClassDescription> {
        self.supported_classes.iter().find(|c| c.label == label)
    }

    /// Operation by its unqualified `Controller.Operation` label.
    pub fn operation(&self, label: &str) -> Option<&OperationDescription> {
        self.supported_classes
            .iter()
            .flat_map(|c| &c.supported_operations)
            .find(|o| o.label == label)
    }
}

/// A described domain class or controller resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDescription {
    #[serde(rename = "@id")]
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub supported_properties: Vec<PropertyDescription>,
    #[serde(default)]
    pub supported_operations: Vec<OperationDescription>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescription {
    #[serde(rename = "@id")]
    pub id: String,
    pub label: String,
    pub range: TypeReference,
    pub required: bool,
    pub readable: bool,
    pub writeable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Reference to a described or built-in type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeReference {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collection: bool,
}

/// One callable operation, possibly exposed under several methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescription {
    #[serde(rename = "@id")]
    pub id: String,
    pub label: String,
    pub method: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expects: Option<TypeReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<TypeReference>,
    pub media_types: Vec<String>,
    /// Base URL of the operation.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<IriTemplate>,
}

/// Templated link of an operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IriTemplate {
    #[serde(rename = "@id")]
    pub id: String,
    pub template: String,
    pub variable_representation: String,
    pub mappings: Vec<IriTemplateMapping>,
}

/// Binds one template variable to the operation argument it feeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IriTemplateMapping {
    pub variable: String,
    pub property: String,
    pub range: TypeReference,
    pub source: crate::model::ArgumentSource,
    pub required: bool,
}
