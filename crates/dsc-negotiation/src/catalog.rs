//! Offered catalog and copies of remote metadata.
//!
//! Local resources are registered from an offered-catalog document at
//! startup and described to peers on request. Resource descriptions
//! received from peers are saved as copies keyed by the peer's
//! identifiers, so a later update replaces the earlier copy in place.

use dsc_types::{
    normalize_uri, ArtifactDescription, CatalogDescription, ContractOffer, ResourceDescription,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::NegotiationError;
use crate::store::{find_artifact_by_uri, StoredArtifact};

/// A catalog of resources this connector offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferedCatalog {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub resources: Vec<OfferedResource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferedResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<OfferedArtifact>,
    #[serde(default)]
    pub contract_offers: Vec<ContractOffer>,
}

/// An offered artifact. Its data is either held inline or fetched from
/// `access_url` when requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferedArtifact {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub access_url: Option<String>,
}

/// An element of the local catalog, as returned to a description request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DescribedElement {
    Catalog(CatalogDescription),
    Resource(ResourceDescription),
}

/// The outcome of saving a peer's resource description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResource {
    pub resource_id: i64,
    /// Local URI minted for the copy.
    pub uri: String,
    pub artifacts: Vec<StoredArtifact>,
}

fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn mint(connector_id: &str, collection: &str) -> String {
    format!(
        "{}/{}/{}",
        normalize_uri(connector_id),
        collection,
        uuid::Uuid::new_v4()
    )
}

fn replace_offers(
    conn: &Connection,
    resource_id: i64,
    offers: &[ContractOffer],
) -> Result<(), NegotiationError> {
    conn.execute(
        "DELETE FROM contract_offers WHERE resource_id = ?1",
        params![resource_id],
    )?;
    for offer in offers {
        conn.execute(
            "INSERT INTO contract_offers (uri, resource_id, offer_json) VALUES (?1, ?2, ?3)",
            params![
                normalize_uri(&offer.id),
                resource_id,
                serde_json::to_string(offer)?
            ],
        )?;
    }
    Ok(())
}

// ── Offered catalog ──

/// Registers or refreshes an offered catalog. Returns the number of
/// resources written.
pub fn register_catalog(
    conn: &mut Connection,
    catalog: &OfferedCatalog,
    publisher: &str,
) -> Result<usize, NegotiationError> {
    let sp = conn.savepoint()?;

    let catalog_id: i64 = sp.query_row(
        "INSERT INTO catalogs (uri, title) VALUES (?1, ?2)
         ON CONFLICT(uri) DO UPDATE SET title = excluded.title
         RETURNING id",
        params![normalize_uri(&catalog.id), catalog.title],
        |row| row.get(0),
    )?;

    for resource in &catalog.resources {
        let resource_id: i64 = sp.query_row(
            "INSERT INTO resources (uri, catalog_id, title, description, keywords_json, publisher, offered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
             ON CONFLICT(uri) DO UPDATE SET
                catalog_id = excluded.catalog_id,
                title = excluded.title,
                description = excluded.description,
                keywords_json = excluded.keywords_json,
                publisher = excluded.publisher,
                offered = 1,
                updated_at = datetime('now')
             RETURNING id",
            params![
                normalize_uri(&resource.id),
                catalog_id,
                resource.title,
                resource.description,
                serde_json::to_string(&resource.keywords)?,
                publisher,
            ],
            |row| row.get(0),
        )?;

        for artifact in &resource.artifacts {
            let data = artifact.value.as_ref().map(|v| v.as_bytes().to_vec());
            let byte_size = data.as_ref().map(|d| d.len() as i64);
            let digest = data.as_deref().map(checksum);
            sp.execute(
                "INSERT INTO artifacts (uri, resource_id, title, byte_size, checksum, access_url, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(uri) DO UPDATE SET
                    resource_id = excluded.resource_id,
                    title = excluded.title,
                    byte_size = excluded.byte_size,
                    checksum = excluded.checksum,
                    access_url = excluded.access_url,
                    data = excluded.data,
                    updated_at = datetime('now')",
                params![
                    normalize_uri(&artifact.id),
                    resource_id,
                    artifact.title,
                    byte_size,
                    digest,
                    artifact.access_url,
                    data,
                ],
            )?;
        }

        replace_offers(&sp, resource_id, &resource.contract_offers)?;
    }

    sp.commit()?;
    Ok(catalog.resources.len())
}

fn describe_resource(conn: &Connection, resource_id: i64) -> Result<ResourceDescription, NegotiationError> {
    let (uri, remote_id, title, description, keywords_json, publisher) = conn.query_row(
        "SELECT uri, remote_id, title, description, keywords_json, publisher
         FROM resources WHERE id = ?1",
        params![resource_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        },
    )?;

    let mut stmt = conn.prepare(
        "SELECT uri, title, byte_size, checksum FROM artifacts
         WHERE resource_id = ?1 ORDER BY id",
    )?;
    let artifacts = stmt
        .query_map(params![resource_id], |row| {
            Ok(ArtifactDescription {
                id: row.get(0)?,
                title: row.get(1)?,
                byte_size: row.get::<_, Option<i64>>(2)?.map(|n| n.max(0) as u64),
                checksum: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT offer_json FROM contract_offers WHERE resource_id = ?1 ORDER BY id",
    )?;
    let mut contract_offers = Vec::new();
    for json in stmt.query_map(params![resource_id], |row| row.get::<_, String>(0))? {
        contract_offers.push(serde_json::from_str(&json?)?);
    }

    Ok(ResourceDescription {
        id: remote_id.unwrap_or(uri),
        title,
        description,
        keywords: serde_json::from_str(&keywords_json)?,
        publisher,
        artifacts,
        contract_offers,
    })
}

fn describe_catalog(
    conn: &Connection,
    catalog_id: i64,
    uri: String,
    title: Option<String>,
) -> Result<CatalogDescription, NegotiationError> {
    let mut stmt =
        conn.prepare("SELECT id FROM resources WHERE catalog_id = ?1 AND offered = 1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![catalog_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let offered_resources = ids
        .into_iter()
        .map(|id| describe_resource(conn, id))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CatalogDescription {
        id: uri,
        title,
        offered_resources,
    })
}

/// Describes every offered catalog.
pub fn offered_catalogs(conn: &Connection) -> Result<Vec<CatalogDescription>, NegotiationError> {
    let mut stmt = conn.prepare("SELECT id, uri, title FROM catalogs ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, uri, title)| describe_catalog(conn, id, uri, title))
        .collect()
}

/// Describes one offered element by URI.
///
/// An artifact URI resolves to the resource that owns it. Copies of
/// remote resources are never described.
pub fn find_element(
    conn: &Connection,
    uri: &str,
) -> Result<Option<DescribedElement>, NegotiationError> {
    let uri = normalize_uri(uri);

    let catalog = conn
        .query_row(
            "SELECT id, uri, title FROM catalogs WHERE uri = ?1",
            params![uri],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    if let Some((id, uri, title)) = catalog {
        return Ok(Some(DescribedElement::Catalog(describe_catalog(
            conn, id, uri, title,
        )?)));
    }

    let resource_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM resources WHERE uri = ?1 AND offered = 1",
            params![uri],
            |row| row.get(0),
        )
        .optional()?;
    let resource_id = match resource_id {
        Some(id) => Some(id),
        None => find_artifact_by_uri(conn, &uri)?
            .filter(StoredArtifact::is_local)
            .map(|artifact| artifact.resource_id),
    };

    match resource_id {
        Some(id) => Ok(Some(DescribedElement::Resource(describe_resource(conn, id)?))),
        None => Ok(None),
    }
}

// ── Remote metadata ──

/// Saves a peer's resource description as a local copy.
///
/// The resource and each artifact are matched by the peer's identifier;
/// unknown ones get a URI minted under `connector_id`. Stored contract
/// offers are replaced by the described ones. All writes happen in one
/// savepoint.
pub fn save_metadata(
    conn: &mut Connection,
    connector_id: &str,
    resource: &ResourceDescription,
) -> Result<SavedResource, NegotiationError> {
    let sp = conn.savepoint()?;
    let remote_id = normalize_uri(&resource.id);
    let keywords_json = serde_json::to_string(&resource.keywords)?;

    let existing: Option<(i64, String)> = sp
        .query_row(
            "SELECT id, uri FROM resources WHERE remote_id = ?1",
            params![remote_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (resource_id, uri) = match existing {
        Some((id, uri)) => {
            sp.execute(
                "UPDATE resources SET title = ?2, description = ?3, keywords_json = ?4,
                    publisher = ?5, updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    id,
                    resource.title,
                    resource.description,
                    keywords_json,
                    resource.publisher
                ],
            )?;
            (id, uri)
        }
        None => {
            let uri = mint(connector_id, "resources");
            sp.execute(
                "INSERT INTO resources (uri, remote_id, title, description, keywords_json, publisher)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    uri,
                    remote_id,
                    resource.title,
                    resource.description,
                    keywords_json,
                    resource.publisher
                ],
            )?;
            (sp.last_insert_rowid(), uri)
        }
    };

    let mut artifacts = Vec::with_capacity(resource.artifacts.len());
    for artifact in &resource.artifacts {
        let artifact_remote_id = normalize_uri(&artifact.id);
        let byte_size = artifact.byte_size.map(|n| n as i64);
        let updated = sp.execute(
            "UPDATE artifacts SET resource_id = ?2, title = ?3, byte_size = ?4, checksum = ?5,
                updated_at = datetime('now')
             WHERE remote_id = ?1",
            params![
                artifact_remote_id,
                resource_id,
                artifact.title,
                byte_size,
                artifact.checksum
            ],
        )?;
        if updated == 0 {
            sp.execute(
                "INSERT INTO artifacts (uri, remote_id, resource_id, title, byte_size, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    mint(connector_id, "artifacts"),
                    artifact_remote_id,
                    resource_id,
                    artifact.title,
                    byte_size,
                    artifact.checksum
                ],
            )?;
        }
        if let Some(stored) = crate::store::find_artifact_by_remote_id(&sp, &artifact_remote_id)? {
            artifacts.push(stored);
        }
    }

    replace_offers(&sp, resource_id, &resource.contract_offers)?;
    sp.commit()?;

    tracing::debug!(resource = %remote_id, artifacts = artifacts.len(), "saved remote metadata");
    Ok(SavedResource {
        resource_id,
        uri,
        artifacts,
    })
}
