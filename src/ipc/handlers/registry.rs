use crate::ipc::error::{err, ledger_err, ok};
use crate::ipc::helpers::{db_conn, query_err, Params};
use crate::ipc::types::{AppState, Request};
use crate::ledger::rules::{check_amount, check_passing_grade};
use crate::registry;
use rust_decimal::Decimal;
use serde_json::json;

const DEFAULT_PASSING_GRADE: i64 = 50;

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let name = tri!(Params::of(req).str("name"));
    match registry::create_user(conn, &name) {
        Ok(id) => ok(&req.id, json!({ "userId": id })),
        Err(e) => query_err(req, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let first = tri!(p.str("firstName"));
    let last = tri!(p.str("lastName"));
    let student_no = p.opt_str("studentNo");
    match registry::create_student(conn, &first, &last, student_no.as_deref()) {
        Ok(id) => ok(&req.id, json!({ "studentId": id })),
        Err(e) => query_err(req, e),
    }
}

fn handle_ues_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let code = tri!(p.str("code"));
    let name = tri!(p.str("name"));
    let credits = tri!(p.opt_i64("credits")).unwrap_or(0);
    if credits < 0 {
        return err(&req.id, "bad_params", "credits must be >= 0", None);
    }
    let passing = tri!(p.opt_decimal("passingGrade")).unwrap_or(Decimal::from(DEFAULT_PASSING_GRADE));
    let passing = match check_passing_grade(passing) {
        Ok(v) => v,
        Err(e) => return ledger_err(&req.id, &e),
    };
    match registry::create_ue(conn, &code, &name, credits, passing) {
        Ok(id) => ok(&req.id, json!({ "ueId": id, "passingGrade": passing.to_string() })),
        Err(e) => query_err(req, e),
    }
}

fn handle_academic_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let label = tri!(Params::of(req).str("label"));
    match registry::create_academic_year(conn, &label) {
        Ok(id) => ok(&req.id, json!({ "academicYearId": id })),
        Err(e) => query_err(req, e),
    }
}

fn handle_fee_structures_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let name = tri!(p.str("name"));
    let amount = match check_amount(tri!(p.decimal("amount"))) {
        Ok(v) => v,
        Err(e) => return ledger_err(&req.id, &e),
    };
    let year = p.opt_str("academicYearId");
    match registry::create_fee_structure(conn, &name, amount, year.as_deref()) {
        Ok(id) => ok(&req.id, json!({ "feeStructureId": id, "amount": amount.to_string() })),
        Err(e) => query_err(req, e),
    }
}

fn handle_fee_structures_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let id = tri!(p.str("feeStructureId"));
    let amount = match check_amount(tri!(p.decimal("amount"))) {
        Ok(v) => v,
        Err(e) => return ledger_err(&req.id, &e),
    };
    match registry::update_fee_structure_amount(conn, &id, amount) {
        Ok(true) => ok(&req.id, json!({ "feeStructureId": id, "amount": amount.to_string() })),
        Ok(false) => err(
            &req.id,
            "not_found",
            "fee structure not found",
            Some(json!({ "entity": "fee structure", "id": id })),
        ),
        Err(e) => query_err(req, e),
    }
}

fn handle_list(
    state: &mut AppState,
    req: &Request,
    key: &str,
    list: fn(&rusqlite::Connection) -> anyhow::Result<Vec<serde_json::Value>>,
) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    match list(conn) {
        Ok(rows) => ok(&req.id, json!({ key: rows })),
        Err(e) => query_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_list(state, req, "users", registry::list_users)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_list(state, req, "students", registry::list_students)),
        "ues.create" => Some(handle_ues_create(state, req)),
        "ues.list" => Some(handle_list(state, req, "ues", registry::list_ues)),
        "academicYears.create" => Some(handle_academic_years_create(state, req)),
        "academicYears.list" => Some(handle_list(
            state,
            req,
            "academicYears",
            registry::list_academic_years,
        )),
        "feeStructures.create" => Some(handle_fee_structures_create(state, req)),
        "feeStructures.list" => Some(handle_list(
            state,
            req,
            "feeStructures",
            registry::list_fee_structures,
        )),
        "feeStructures.update" => Some(handle_fee_structures_update(state, req)),
        _ => None,
    }
}
