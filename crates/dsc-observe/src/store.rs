//! Persistence operations for the exchange event log.
//!
//! All writes go through [`emit_event`], which serialises the payload,
//! assigns the next sequence number and inserts in a single statement.
//! Reads go through [`query_events`].

use rusqlite::{params, Connection};

use crate::error::ObserveError;
use crate::event::{EventDomain, EventPayload, ExchangeEvent};

/// Appends one event to the log of `connector_id`.
///
/// Domain, event type and entity type are taken from the payload.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(
    conn: &Connection,
    connector_id: &str,
    entity_id: &str,
    payload: &EventPayload,
) -> Result<ExchangeEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let domain = payload.domain();

    // Sequence assignment happens inside the INSERT so concurrent writers
    // cannot observe the same MAX(seq).
    let (id, seq, occurred_at) = conn.query_row(
        "INSERT INTO exchange_event_log
            (connector_id, domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at)
         VALUES (
            ?1, ?2, ?3, ?4, ?5,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM exchange_event_log WHERE connector_id = ?1),
            ?6,
            datetime('now')
         )
         RETURNING id, seq, occurred_at",
        params![
            connector_id,
            domain.as_str(),
            payload.event_type(),
            payload.entity_type(),
            entity_id,
            payload_json,
        ],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
    )?;

    tracing::debug!(event = payload.event_type(), entity = %entity_id, seq, "event recorded");

    Ok(ExchangeEvent {
        id,
        connector_id: connector_id.to_string(),
        domain: domain.as_str().to_string(),
        event_type: payload.event_type().to_string(),
        entity_type: payload.entity_type().to_string(),
        entity_id: entity_id.to_string(),
        seq,
        payload_json,
        occurred_at,
    })
}

/// Filter criteria for querying the exchange event log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub domain: Option<EventDomain>,
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Return events with a sequence number greater than this.
    pub after_seq: Option<i64>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<i64>,
}

/// Queries the event log of `connector_id`, oldest first.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn query_events(
    conn: &Connection,
    connector_id: &str,
    filter: &EventFilter,
) -> Result<Vec<ExchangeEvent>, ObserveError> {
    let mut clauses = vec!["connector_id = ?1".to_string()];
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(connector_id.to_string())];
    let mut idx = 2u32;

    if let Some(domain) = filter.domain {
        clauses.push(format!("domain = ?{idx}"));
        param_values.push(Box::new(domain.as_str().to_string()));
        idx += 1;
    }

    if let Some(ref et) = filter.event_type {
        clauses.push(format!("event_type = ?{idx}"));
        param_values.push(Box::new(et.clone()));
        idx += 1;
    }

    if let Some(ref ent_type) = filter.entity_type {
        clauses.push(format!("entity_type = ?{idx}"));
        param_values.push(Box::new(ent_type.clone()));
        idx += 1;
    }

    if let Some(ref ent_id) = filter.entity_id {
        clauses.push(format!("entity_id = ?{idx}"));
        param_values.push(Box::new(ent_id.clone()));
        idx += 1;
    }

    if let Some(after) = filter.after_seq {
        clauses.push(format!("seq > ?{idx}"));
        param_values.push(Box::new(after));
        idx += 1;
    }

    let limit = filter.limit.unwrap_or(100);
    let where_clause = clauses.join(" AND ");
    let sql = format!(
        "SELECT id, connector_id, domain, event_type, entity_type, entity_id, seq, payload_json, occurred_at
         FROM exchange_event_log
         WHERE {where_clause}
         ORDER BY seq ASC
         LIMIT ?{idx}"
    );
    param_values.push(Box::new(limit));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok(ExchangeEvent {
            id: row.get(0)?,
            connector_id: row.get(1)?,
            domain: row.get(2)?,
            event_type: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            seq: row.get(6)?,
            payload_json: row.get(7)?,
            occurred_at: row.get(8)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}
