use crate::audit::{deliver, AuditEvent, SqliteAuditSink};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::ledger::error::is_unique_violation;
use crate::ledger::rules::decimal_from_json;
use crate::ledger::Actor;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::debug;

pub type HandlerResult<T> = Result<T, Value>;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> HandlerResult<&'a Connection> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Typed view over a request's params object (or a nested object like
/// `params.patch`). Every accessor answers `bad_params` for the request id.
#[derive(Clone, Copy)]
pub struct Params<'a> {
    id: &'a str,
    obj: &'a Value,
    prefix: &'a str,
}

impl<'a> Params<'a> {
    pub fn of(req: &'a Request) -> Self {
        Self {
            id: &req.id,
            obj: &req.params,
            prefix: "",
        }
    }

    /// Nested object; a missing key reads as an empty object.
    pub fn child(&self, key: &'a str) -> Self {
        static EMPTY: Value = Value::Null;
        Self {
            id: self.id,
            obj: self.obj.get(key).unwrap_or(&EMPTY),
            prefix: key,
        }
    }

    fn bad(&self, message: String) -> Value {
        err(self.id, "bad_params", message, None)
    }

    fn name(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.obj
            .get(key)
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn str(&self, key: &str) -> HandlerResult<String> {
        self.opt_str(key)
            .ok_or_else(|| self.bad(format!("missing {}", self.name(key))))
    }

    pub fn opt_i64(&self, key: &str) -> HandlerResult<Option<i64>> {
        match self.obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.bad(format!("{} must be an integer", self.name(key)))),
        }
    }

    pub fn opt_bool(&self, key: &str) -> bool {
        self.obj.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn opt_decimal(&self, key: &str) -> HandlerResult<Option<Decimal>> {
        match self.obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => decimal_from_json(v)
                .map(Some)
                .ok_or_else(|| self.bad(format!("{} must be a number", self.name(key)))),
        }
    }

    pub fn decimal(&self, key: &str) -> HandlerResult<Decimal> {
        self.opt_decimal(key)?
            .ok_or_else(|| self.bad(format!("missing {}", self.name(key))))
    }

    /// Parses an enum code; unknown codes list the accepted ones.
    pub fn opt_code<T>(
        &self,
        key: &str,
        parse: fn(&str) -> Option<T>,
        accepted: &[&str],
    ) -> HandlerResult<Option<T>> {
        let Some(raw) = self.opt_str(key) else {
            return Ok(None);
        };
        parse(&raw).map(Some).ok_or_else(|| {
            self.bad(format!(
                "{} must be one of: {}",
                self.name(key),
                accepted.join(", ")
            ))
        })
    }

    pub fn code<T>(&self, key: &str, parse: fn(&str) -> Option<T>, accepted: &[&str]) -> HandlerResult<T> {
        self.opt_code(key, parse, accepted)?
            .ok_or_else(|| self.bad(format!("missing {}", self.name(key))))
    }
}

pub fn actor(req: &Request) -> Actor {
    let p = Params::of(req).child("actor");
    Actor {
        user_id: p.opt_str("userId"),
        ip_address: p.opt_str("ipAddress"),
        user_agent: p.opt_str("userAgent"),
    }
}

/// Plumbing failures from registry/audit queries.
pub fn query_err(req: &Request, e: anyhow::Error) -> Value {
    if e.downcast_ref::<rusqlite::Error>().is_some_and(is_unique_violation) {
        return err(&req.id, "conflict", "a row with the same unique key already exists", None);
    }
    err(&req.id, "db_query_failed", format!("{e:?}"), None)
}

pub fn flush_audit(conn: &Connection, events: Vec<AuditEvent>) {
    let total = events.len();
    let recorded = deliver(&SqliteAuditSink::new(conn), events);
    debug!(total, recorded, "audit events delivered");
}
