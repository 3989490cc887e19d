// 📜 Audit Sink - every ledger mutation leaves an immutable record
//
// The sink is called synchronously with the same connection (and therefore
// the same transaction) as the data write. If it fails, the mutation fails:
// the ledger never commits without its audit trail.

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

// ============================================================================
// AUDIT ENTRY
// ============================================================================

/// What the ledger hands to the sink for each mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: String,

    /// Operation name, e.g. "allocation_added"
    pub action: String,

    pub entity_type: String,
    pub entity_id: String,

    /// One-line human-readable description
    pub summary: String,

    /// Structured {"before": ..., "after": ...} snapshot
    pub payload: serde_json::Value,

    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        summary: String,
        before: serde_json::Value,
        after: serde_json::Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        AuditEntry {
            actor: actor.to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            summary,
            payload: serde_json::json!({ "before": before, "after": after }),
            recorded_at,
        }
    }

    pub fn before(&self) -> Option<&serde_json::Value> {
        self.payload.get("before")
    }

    pub fn after(&self) -> Option<&serde_json::Value> {
        self.payload.get("after")
    }
}

// ============================================================================
// SINK CONTRACT
// ============================================================================

/// Outbound audit contract.
///
/// `conn` is the connection of the open unit of work. Sinks that persist to
/// the ledger database must write through it so the entry commits or rolls
/// back with the mutation; external sinks may ignore it.
pub trait AuditSink: Send + Sync {
    fn record(&self, conn: &Connection, entry: &AuditEntry) -> LedgerResult<()>;
}

impl<S: AuditSink + ?Sized> AuditSink for std::sync::Arc<S> {
    fn record(&self, conn: &Connection, entry: &AuditEntry) -> LedgerResult<()> {
        (**self).record(conn, entry)
    }
}

// ============================================================================
// SQLITE SINK (events table)
// ============================================================================

/// Persisted audit event, as read back from the events table
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub summary: String,
    pub data: serde_json::Value,
    pub actor: String,
}

/// Default sink: writes into the `events` table of the ledger database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAuditSink;

impl AuditSink for SqliteAuditSink {
    fn record(&self, conn: &Connection, entry: &AuditEntry) -> LedgerResult<()> {
        let data_json = serde_json::to_string(&entry.payload)?;

        conn.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, summary, data, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                entry.recorded_at.to_rfc3339(),
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.summary,
                data_json,
                entry.actor,
            ],
        )
        .map_err(|e| LedgerError::Audit(e.to_string()))?;

        Ok(())
    }
}

/// Get events for a specific entity, newest first
pub fn events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> LedgerResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, summary, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let raw = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(event_id, timestamp, event_type, entity_type, entity_id, summary, data, actor)| {
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|_| LedgerError::Corrupt {
                        column: "events.timestamp",
                        value: timestamp.clone(),
                    })?
                    .with_timezone(&Utc);

                Ok(Event {
                    event_id,
                    timestamp,
                    event_type,
                    entity_type,
                    entity_id,
                    summary,
                    data: serde_json::from_str(&data)?,
                    actor,
                })
            },
        )
        .collect()
}
