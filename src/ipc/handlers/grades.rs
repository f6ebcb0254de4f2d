use crate::ipc::error::{ledger_err, ok};
use crate::ipc::helpers::{actor, db_conn, flush_audit, HandlerResult, Params};
use crate::ipc::types::{AppState, Request};
use crate::ledger::grades::{GradeLedger, GradePatch, Promoted, SubmitGrade};
use crate::ledger::model::{Grade, GradeKey, GradeStatus, Semester, Session};
use crate::ledger::LedgerResult;
use crate::store::{GradeFilter, SqliteStore};
use rusqlite::Connection;
use serde_json::json;

const SEMESTERS: &[&str] = &["S1", "S2"];
const SESSIONS: &[&str] = &["normal", "retake"];
const GRADE_STATUSES: &[&str] = &["valid", "retake", "invalid"];

/// Runs one ledger operation and hands its audit events to the sink once
/// the transaction is over.
fn run<'c, T>(
    conn: &'c Connection,
    req: &Request,
    op: impl FnOnce(&mut GradeLedger<SqliteStore<'c>>) -> LedgerResult<T>,
) -> LedgerResult<T> {
    let mut ledger = GradeLedger::new(SqliteStore::new(conn), actor(req));
    let out = op(&mut ledger);
    flush_audit(conn, ledger.take_events());
    out
}

fn grade_key(p: &Params<'_>) -> HandlerResult<GradeKey> {
    Ok(GradeKey {
        student_id: p.str("studentId")?,
        ue_id: p.str("ueId")?,
        academic_year_id: p.str("academicYearId")?,
        semester: p.code("semester", Semester::from_code, SEMESTERS)?,
    })
}

fn grades_json(rows: &[Grade]) -> serde_json::Value {
    json!(rows.iter().map(Grade::to_json).collect::<Vec<_>>())
}

fn promoted_json(p: &Promoted) -> serde_json::Value {
    json!({
        "grade": p.retake.to_json(),
        "source": p.source.to_json(),
        "sourceWasActive": p.source_was_active,
    })
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let input = SubmitGrade {
        key: tri!(grade_key(&p)),
        score: tri!(p.decimal("score")),
        session: tri!(p.opt_code("session", Session::from_code, SESSIONS)).unwrap_or(Session::Normal),
        status_override: tri!(p.opt_code("status", GradeStatus::from_code, GRADE_STATUSES)),
    };
    match run(conn, req, |l| l.submit_grade(input)) {
        Ok(s) => ok(
            &req.id,
            json!({
                "grade": s.grade.to_json(),
                "outcome": s.outcome.code(),
                "httpStatus": s.outcome.http_status(),
            }),
        ),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_promote(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let grade_id = tri!(p.str("gradeId"));
    let new_score = tri!(p.opt_decimal("newScore"));
    match run(conn, req, |l| l.promote_to_retake(&grade_id, new_score)) {
        Ok(promoted) => ok(&req.id, promoted_json(&promoted)),
        Err(e) => ledger_err(&req.id, &e),
    }
}

/// `patch.isRetake = true` turns the update into a promotion. Identity
/// fields in the patch are ignored.
fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let grade_id = tri!(p.str("gradeId"));
    let patch = p.child("patch");
    let score = tri!(patch.opt_decimal("score"));

    if patch.opt_bool("isRetake") {
        return match run(conn, req, |l| l.promote_to_retake(&grade_id, score)) {
            Ok(promoted) => ok(&req.id, promoted_json(&promoted)),
            Err(e) => ledger_err(&req.id, &e),
        };
    }

    let patch = GradePatch {
        score,
        status: tri!(patch.opt_code("status", GradeStatus::from_code, GRADE_STATUSES)),
    };
    match run(conn, req, |l| l.update_grade(&grade_id, patch)) {
        Ok(g) => ok(&req.id, json!({ "grade": g.to_json() })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_deactivate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let grade_id = tri!(Params::of(req).str("gradeId"));
    match run(conn, req, |l| l.deactivate_grade(&grade_id)) {
        Ok(g) => ok(&req.id, json!({ "grade": g.to_json() })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let grade_id = tri!(Params::of(req).str("gradeId"));
    match run(conn, req, |l| l.grade(&grade_id)) {
        Ok(g) => ok(&req.id, json!({ "grade": g.to_json() })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let filter = GradeFilter {
        student_id: p.opt_str("studentId"),
        ue_id: p.opt_str("ueId"),
        academic_year_id: p.opt_str("academicYearId"),
        semester: tri!(p.opt_code("semester", Semester::from_code, SEMESTERS)),
        session: tri!(p.opt_code("session", Session::from_code, SESSIONS)),
    };
    match run(conn, req, |l| l.list_grades(&filter)) {
        Ok(rows) => ok(&req.id, json!({ "grades": grades_json(&rows) })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let key = tri!(grade_key(&Params::of(req)));
    match run(conn, req, |l| l.grade_history(&key)) {
        Ok(rows) => ok(&req.id, json!({ "grades": grades_json(&rows) })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let ue_id = tri!(p.str("ueId"));
    let year = p.opt_str("academicYearId");
    match run(conn, req, |l| l.course_stats(&ue_id, year.as_deref())) {
        Ok(stats) => ok(&req.id, stats.to_json()),
        Err(e) => ledger_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.submit" => Some(handle_submit(state, req)),
        "grades.update" => Some(handle_update(state, req)),
        "grades.promoteToRetake" => Some(handle_promote(state, req)),
        "grades.deactivate" => Some(handle_deactivate(state, req)),
        "grades.get" => Some(handle_get(state, req)),
        "grades.list" => Some(handle_list(state, req)),
        "grades.history" => Some(handle_history(state, req)),
        "grades.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
