//! Persistence for artifacts, agreements, pending requests and
//! subscriptions.
//!
//! All identifiers are stored in normalized form, and every lookup
//! normalizes its argument first.

use dsc_types::{normalize_uri, ContractAgreement, ContractOffer, ContractRequest};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::NegotiationError;

/// An artifact row, local or copied from a peer's description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub id: i64,
    pub uri: String,
    /// The peer's identifier for artifacts copied from a remote catalog.
    pub remote_id: Option<String>,
    pub resource_id: i64,
    pub title: Option<String>,
    pub byte_size: Option<i64>,
    pub checksum: Option<String>,
    /// Remote location the data is fetched from when not held inline.
    pub access_url: Option<String>,
    pub data: Option<Vec<u8>>,
}

impl StoredArtifact {
    /// Returns `true` if the artifact belongs to this connector's catalog.
    pub fn is_local(&self) -> bool {
        self.remote_id.is_none()
    }
}

/// A resource row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    pub id: i64,
    pub uri: String,
    pub remote_id: Option<String>,
    pub title: Option<String>,
    pub offered: bool,
    pub updated_at: String,
}

/// A persisted agreement with its current artifact links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAgreement {
    #[serde(skip)]
    pub id: i64,
    pub uri: String,
    pub remote_id: Option<String>,
    pub value: ContractAgreement,
    pub confirmed: bool,
    pub created_at: String,
    /// URIs of the linked artifacts.
    pub artifacts: Vec<String>,
}

/// A contract request this connector sent and has not settled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub message_id: String,
    pub recipient: String,
    pub request: ContractRequest,
}

/// A local party interested in updates to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub target: String,
    /// URL the updated resource is posted to.
    pub location: String,
    pub subscriber: String,
}

// ── Artifacts and resources ──

const ARTIFACT_COLUMNS: &str =
    "id, uri, remote_id, resource_id, title, byte_size, checksum, access_url, data";

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<StoredArtifact> {
    Ok(StoredArtifact {
        id: row.get(0)?,
        uri: row.get(1)?,
        remote_id: row.get(2)?,
        resource_id: row.get(3)?,
        title: row.get(4)?,
        byte_size: row.get(5)?,
        checksum: row.get(6)?,
        access_url: row.get(7)?,
        data: row.get(8)?,
    })
}

/// Finds an artifact by its own URI.
pub fn find_artifact_by_uri(
    conn: &Connection,
    uri: &str,
) -> Result<Option<StoredArtifact>, NegotiationError> {
    let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE uri = ?1");
    Ok(conn
        .query_row(&sql, params![normalize_uri(uri)], artifact_from_row)
        .optional()?)
}

/// Finds a copied artifact by the identifier its owner gave it.
pub fn find_artifact_by_remote_id(
    conn: &Connection,
    remote_id: &str,
) -> Result<Option<StoredArtifact>, NegotiationError> {
    let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE remote_id = ?1");
    Ok(conn
        .query_row(&sql, params![normalize_uri(remote_id)], artifact_from_row)
        .optional()?)
}

/// Finds an artifact this connector offers itself.
pub fn find_local_artifact(
    conn: &Connection,
    uri: &str,
) -> Result<Option<StoredArtifact>, NegotiationError> {
    Ok(find_artifact_by_uri(conn, uri)?.filter(StoredArtifact::is_local))
}

fn resource_from_row(row: &Row<'_>) -> rusqlite::Result<StoredResource> {
    Ok(StoredResource {
        id: row.get(0)?,
        uri: row.get(1)?,
        remote_id: row.get(2)?,
        title: row.get(3)?,
        offered: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Finds a copied resource by the identifier its owner gave it.
pub fn find_resource_by_remote_id(
    conn: &Connection,
    remote_id: &str,
) -> Result<Option<StoredResource>, NegotiationError> {
    Ok(conn
        .query_row(
            "SELECT id, uri, remote_id, title, offered, updated_at
             FROM resources WHERE remote_id = ?1",
            params![normalize_uri(remote_id)],
            resource_from_row,
        )
        .optional()?)
}

/// Returns the contract offers stored for the resource owning `artifact_id`.
pub fn offers_for_artifact(
    conn: &Connection,
    artifact_id: i64,
) -> Result<Vec<ContractOffer>, NegotiationError> {
    let mut stmt = conn.prepare(
        "SELECT o.offer_json FROM contract_offers o
         JOIN artifacts a ON a.resource_id = o.resource_id
         WHERE a.id = ?1
         ORDER BY o.id",
    )?;
    let rows = stmt.query_map(params![artifact_id], |row| row.get::<_, String>(0))?;

    let mut offers = Vec::new();
    for json in rows {
        offers.push(serde_json::from_str(&json?)?);
    }
    Ok(offers)
}

// ── Agreements ──

/// Inserts a new, unconfirmed agreement and returns its row id.
///
/// Only the negotiation engine writes agreements.
pub(crate) fn save_agreement(
    conn: &Connection,
    uri: &str,
    remote_id: Option<&str>,
    agreement: &ContractAgreement,
) -> Result<i64, NegotiationError> {
    let value_json = serde_json::to_string(agreement)?;
    conn.execute(
        "INSERT INTO agreements (uri, remote_id, consumer, provider, value_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            normalize_uri(uri),
            remote_id.map(normalize_uri),
            normalize_uri(&agreement.consumer),
            normalize_uri(&agreement.provider),
            value_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Marks an agreement confirmed. Returns `false` if it already was.
///
/// Only the negotiation engine writes confirmation.
pub(crate) fn mark_confirmed(conn: &Connection, agreement_id: i64) -> Result<bool, NegotiationError> {
    let changed = conn.execute(
        "UPDATE agreements SET confirmed = 1, updated_at = datetime('now')
         WHERE id = ?1 AND confirmed = 0",
        params![agreement_id],
    )?;
    Ok(changed == 1)
}

/// Links an artifact to an agreement. Returns `false` if the link existed.
///
/// The composite primary key turns the insert into an atomic
/// check-then-write.
pub fn link_artifact_to_agreement(
    conn: &Connection,
    agreement_id: i64,
    artifact_id: i64,
) -> Result<bool, NegotiationError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO agreement_artifacts (agreement_id, artifact_id) VALUES (?1, ?2)",
        params![agreement_id, artifact_id],
    )?;
    Ok(inserted == 1)
}

fn linked_artifacts(conn: &Connection, agreement_id: i64) -> Result<Vec<String>, NegotiationError> {
    let mut stmt = conn.prepare(
        "SELECT a.uri FROM agreement_artifacts l
         JOIN artifacts a ON a.id = l.artifact_id
         WHERE l.agreement_id = ?1
         ORDER BY a.uri",
    )?;
    let uris = stmt
        .query_map(params![agreement_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(uris)
}

fn load_agreement(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<Option<StoredAgreement>, NegotiationError> {
    let sql = format!(
        "SELECT id, uri, remote_id, value_json, confirmed, created_at
         FROM agreements WHERE {column} = ?1"
    );
    let row = conn
        .query_row(&sql, params![normalize_uri(value)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .optional()?;

    let Some((id, uri, remote_id, value_json, confirmed, created_at)) = row else {
        return Ok(None);
    };
    Ok(Some(StoredAgreement {
        id,
        uri,
        remote_id,
        value: serde_json::from_str(&value_json)?,
        confirmed,
        created_at,
        artifacts: linked_artifacts(conn, id)?,
    }))
}

/// Finds an agreement by its local URI.
pub fn find_agreement(
    conn: &Connection,
    uri: &str,
) -> Result<Option<StoredAgreement>, NegotiationError> {
    load_agreement(conn, "uri", uri)
}

/// Finds an agreement by the identifier the provider gave it.
pub fn find_agreement_by_remote_id(
    conn: &Connection,
    remote_id: &str,
) -> Result<Option<StoredAgreement>, NegotiationError> {
    load_agreement(conn, "remote_id", remote_id)
}

// ── Pending contract requests ──

/// Records a contract request sent in the message `message_id`.
pub fn save_pending_request(
    conn: &Connection,
    message_id: &str,
    recipient: &str,
    request: &ContractRequest,
) -> Result<(), NegotiationError> {
    conn.execute(
        "INSERT INTO pending_requests (message_id, recipient, request_json) VALUES (?1, ?2, ?3)",
        params![message_id, recipient, serde_json::to_string(request)?],
    )?;
    Ok(())
}

/// Removes and returns the pending request sent in `message_id`.
pub fn take_pending_request(
    conn: &Connection,
    message_id: &str,
) -> Result<Option<PendingRequest>, NegotiationError> {
    let row = conn
        .query_row(
            "DELETE FROM pending_requests WHERE message_id = ?1
             RETURNING recipient, request_json",
            params![message_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    match row {
        Some((recipient, json)) => Ok(Some(PendingRequest {
            message_id: message_id.to_string(),
            recipient,
            request: serde_json::from_str(&json)?,
        })),
        None => Ok(None),
    }
}

// ── Subscriptions ──

/// Registers `location` for updates to `target`. Returns `false` if the
/// subscription already existed.
pub fn add_subscription(
    conn: &Connection,
    target: &str,
    location: &str,
    subscriber: &str,
) -> Result<bool, NegotiationError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO subscriptions (target, location, subscriber) VALUES (?1, ?2, ?3)",
        params![normalize_uri(target), location, subscriber],
    )?;
    Ok(inserted == 1)
}

/// Lists the subscriptions for `target`.
pub fn subscriptions_for(
    conn: &Connection,
    target: &str,
) -> Result<Vec<Subscription>, NegotiationError> {
    let mut stmt = conn.prepare(
        "SELECT id, target, location, subscriber FROM subscriptions
         WHERE target = ?1 ORDER BY id",
    )?;
    let subscriptions = stmt
        .query_map(params![normalize_uri(target)], |row| {
            Ok(Subscription {
                id: row.get(0)?,
                target: row.get(1)?,
                location: row.get(2)?,
                subscriber: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subscriptions)
}
