use crate::audit::{list_events, AuditQuery};
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, query_err, Params};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let q = AuditQuery {
        entity: p.opt_str("entity"),
        entity_id: p.opt_str("entityId"),
        limit: tri!(p.opt_i64("limit")),
    };
    match list_events(conn, &q) {
        Ok(events) => ok(&req.id, json!({ "events": events })),
        Err(e) => query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
