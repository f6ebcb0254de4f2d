use serde_json::{json, Value};
use thiserror::Error;

/// Failure taxonomy shared by the grade and fee ledgers.
///
/// Every variant maps to one IPC error code and one HTTP-equivalent status so
/// the transport layer never has to inspect messages.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{message}")]
    Conflict {
        message: String,
        existing: Option<Value>,
        hint: Option<String>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    #[cfg(test)]
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        LedgerError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(entity: &'static str, id: &str) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>, existing: Option<Value>, hint: Option<&str>) -> Self {
        LedgerError::Conflict {
            message: message.into(),
            existing,
            hint: hint.map(str::to_string),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "bad_params",
            LedgerError::NotFound { .. } => "not_found",
            LedgerError::Conflict { .. } => "conflict",
            LedgerError::Internal(_) => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation { .. } => 400,
            LedgerError::NotFound { .. } => 404,
            LedgerError::Conflict { .. } => 409,
            LedgerError::Internal(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }

    /// Structured payload for the caller: the conflicting row and remediation
    /// for conflicts, the missing entity for lookups.
    pub fn details(&self) -> Option<Value> {
        match self {
            LedgerError::Validation { details, .. } => details.clone(),
            LedgerError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            LedgerError::Conflict { existing, hint, .. } => {
                if existing.is_none() && hint.is_none() {
                    return None;
                }
                Some(json!({ "existing": existing, "hint": hint }))
            }
            LedgerError::Internal(_) => None,
        }
    }
}

/// Returns true when a SQLite failure is a UNIQUE/PRIMARY KEY violation.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        if is_unique_violation(&e) {
            return LedgerError::conflict(format!("unique constraint violated: {e}"), None, None);
        }
        LedgerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_codes_and_statuses() {
        let cases = [
            (LedgerError::validation("bad"), "bad_params", 400),
            (LedgerError::not_found("student", "s1"), "not_found", 404),
            (LedgerError::conflict("dup", None, None), "conflict", 409),
            (LedgerError::Internal("boom".into()), "internal", 500),
        ];
        for (e, code, status) in cases {
            assert_eq!(e.code(), code);
            assert_eq!(e.http_status(), status);
        }
    }

    #[test]
    fn not_found_names_the_entity() {
        let e = LedgerError::not_found("academic year", "ay-9");
        assert_eq!(e.to_string(), "academic year not found");
        let d = e.details().expect("details");
        assert_eq!(d["entity"], "academic year");
        assert_eq!(d["id"], "ay-9");
    }

    #[test]
    fn conflict_details_carry_existing_and_hint() {
        let e = LedgerError::conflict("dup", Some(json!({ "id": "g1" })), Some("use update"));
        let d = e.details().expect("details");
        assert_eq!(d["existing"]["id"], "g1");
        assert_eq!(d["hint"], "use update");
        assert!(LedgerError::conflict("dup", None, None).details().is_none());
    }
}
