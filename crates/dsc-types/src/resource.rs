//! Self-description types: connector, catalogs, resources and artifacts.
//!
//! These are the documents returned in description responses and sent in
//! resource update messages. Identifiers are absolute URIs minted by the
//! connector that owns the element.

use serde::{Deserialize, Serialize};

use crate::contract::ContractOffer;

/// A single downloadable data item belonging to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescription {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Size of the artifact data in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    /// Hex-encoded SHA-256 of the artifact data, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// An offered resource: metadata, artifacts and the contracts it is
/// available under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Connector that publishes the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescription>,
    #[serde(default)]
    pub contract_offers: Vec<ContractOffer>,
}

/// A named group of offered resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDescription {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub offered_resources: Vec<ResourceDescription>,
}

/// The connector's self-description, returned for a description request
/// that names no element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDescription {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Information model version this connector emits.
    pub outbound_model_version: String,
    /// Information model versions this connector accepts.
    pub inbound_model_versions: Vec<String>,
    #[serde(default)]
    pub catalogs: Vec<CatalogDescription>,
}
