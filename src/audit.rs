//! Append-only audit trail.
//!
//! Ledgers only ever push events into an [`Outbox`]. The IPC layer drains it
//! once the ledger transaction is over and hands each event to an
//! [`AuditSink`]; a sink failure is logged and dropped, never returned.

use crate::ledger::{now_stamp, Actor, LedgerError};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

pub const LIST_DEFAULT_LIMIT: i64 = 100;
pub const LIST_MAX_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Success,
    Error,
    Warning,
}

impl AuditStatus {
    pub fn code(self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Error => "ERROR",
            AuditStatus::Warning => "WARNING",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub description: String,
    pub status: AuditStatus,
    pub error_message: Option<String>,
    pub metadata: Value,
    pub created_at: String,
}

impl AuditEvent {
    pub fn new(action: &str, entity: &str, status: AuditStatus, description: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: None,
            user_id: None,
            ip_address: None,
            user_agent: None,
            description: description.into(),
            status,
            error_message: None,
            metadata: json!({}),
            created_at: now_stamp(),
        }
    }

    pub fn success(action: &str, entity: &str, entity_id: &str, description: impl Into<String>) -> Self {
        let mut e = Self::new(action, entity, AuditStatus::Success, description);
        e.entity_id = Some(entity_id.to_string());
        e
    }

    /// Conflicts are recorded as warnings, everything else as errors.
    pub fn failure(action: &str, entity: &str, err: &LedgerError) -> Self {
        let status = if err.is_conflict() {
            AuditStatus::Warning
        } else {
            AuditStatus::Error
        };
        let mut e = Self::new(action, entity, status, format!("{action} rejected"));
        e.error_message = Some(err.to_string());
        e.metadata = json!({ "code": err.code(), "details": err.details() });
        e
    }

    pub fn with_entity_id(mut self, id: Option<&str>) -> Self {
        self.entity_id = id.map(str::to_string);
        self
    }

    /// Shallow-merges `extra` into the metadata object.
    pub fn with_metadata(mut self, extra: Value) -> Self {
        match (&mut self.metadata, extra) {
            (Value::Object(base), Value::Object(more)) => base.extend(more),
            (slot, other) => *slot = other,
        }
        self
    }

    pub fn by(mut self, actor: &Actor) -> Self {
        self.user_id = actor.user_id.clone();
        self.ip_address = actor.ip_address.clone();
        self.user_agent = actor.user_agent.clone();
        self
    }
}

/// Events produced while a ledger operation runs.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<AuditEvent>,
}

impl Outbox {
    pub fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.events)
    }
}

pub trait AuditSink {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

/// Best-effort delivery. Returns how many events were recorded.
pub fn deliver(sink: &dyn AuditSink, events: Vec<AuditEvent>) -> usize {
    let mut recorded = 0;
    for event in events {
        match sink.record(&event) {
            Ok(()) => recorded += 1,
            Err(e) => warn!(
                action = %event.action,
                entity = %event.entity,
                error = %e,
                "audit delivery failed"
            ),
        }
    }
    recorded
}

pub struct SqliteAuditSink<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteAuditSink<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn resolve_user(&self, user_id: Option<&str>) -> anyhow::Result<Option<String>> {
        let Some(uid) = user_id else {
            return Ok(None);
        };
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM users WHERE id = ?", [uid], |r| r.get(0))
            .optional()?;
        Ok(found.map(|_| uid.to_string()))
    }
}

impl AuditSink for SqliteAuditSink<'_> {
    fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        // Events may outlive the user they name.
        let user_id = self.resolve_user(event.user_id.as_deref())?;
        self.conn.execute(
            "INSERT INTO audit_logs(id, action, entity, entity_id, user_id, ip_address,
               user_agent, description, status, error_message, metadata, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                event.action,
                event.entity,
                event.entity_id,
                user_id,
                event.ip_address,
                event.user_agent,
                event.description,
                event.status.code(),
                event.error_message,
                serde_json::to_string(&event.metadata)?,
                event.created_at,
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<i64>,
}

pub fn list_events(conn: &Connection, q: &AuditQuery) -> anyhow::Result<Vec<Value>> {
    let mut sql = String::from(
        "SELECT id, action, entity, entity_id, user_id, ip_address, user_agent, description,
                status, error_message, metadata, created_at
         FROM audit_logs WHERE 1 = 1",
    );
    let mut bind: Vec<SqlValue> = Vec::new();
    if let Some(v) = &q.entity {
        sql.push_str(" AND entity = ?");
        bind.push(SqlValue::Text(v.clone()));
    }
    if let Some(v) = &q.entity_id {
        sql.push_str(" AND entity_id = ?");
        bind.push(SqlValue::Text(v.clone()));
    }
    let limit = q
        .limit
        .unwrap_or(LIST_DEFAULT_LIMIT)
        .clamp(1, LIST_MAX_LIMIT);
    sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?");
    bind.push(SqlValue::Integer(limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |row| {
            let metadata: String = row.get(10)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "action": row.get::<_, String>(1)?,
                "entity": row.get::<_, String>(2)?,
                "entityId": row.get::<_, Option<String>>(3)?,
                "userId": row.get::<_, Option<String>>(4)?,
                "ipAddress": row.get::<_, Option<String>>(5)?,
                "userAgent": row.get::<_, Option<String>>(6)?,
                "description": row.get::<_, String>(7)?,
                "status": row.get::<_, String>(8)?,
                "errorMessage": row.get::<_, Option<String>>(9)?,
                "metadata": serde_json::from_str::<Value>(&metadata).unwrap_or(Value::Null),
                "createdAt": row.get::<_, String>(11)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
