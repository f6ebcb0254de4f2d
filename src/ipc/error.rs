use crate::ledger::LedgerError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// HTTP-equivalent status for an error code.
pub fn status_for(code: &str) -> u16 {
    match code {
        "bad_params" | "bad_json" | "no_workspace" => 400,
        "not_found" => 404,
        "conflict" => 409,
        "not_implemented" => 501,
        _ => 500,
    }
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
        "status": status_for(code),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn ledger_err(id: &str, e: &LedgerError) -> serde_json::Value {
    let mut v = err(id, e.code(), e.to_string(), e.details());
    v["error"]["status"] = json!(e.http_status());
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_keep_their_status_and_details() {
        let e = LedgerError::conflict("normal grade already exists", Some(json!({ "id": "g1" })), Some("use grades.promoteToRetake"));
        let v = ledger_err("7", &e);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "conflict");
        assert_eq!(v["error"]["status"], 409);
        assert_eq!(v["error"]["details"]["existing"]["id"], "g1");
        assert_eq!(v["error"]["details"]["hint"], "use grades.promoteToRetake");

        let v = ledger_err("8", &LedgerError::Internal("disk".into()));
        assert_eq!(v["error"]["code"], "internal");
        assert_eq!(v["error"]["status"], 500);
    }
}
