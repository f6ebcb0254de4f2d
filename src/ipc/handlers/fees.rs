use crate::ipc::error::{ledger_err, ok};
use crate::ipc::helpers::{actor, db_conn, flush_audit, Params};
use crate::ipc::types::{AppState, Request};
use crate::ledger::fees::{FeeLedger, NewPayment, PaymentPatch, Settled};
use crate::ledger::model::{FeePayment, FeeStatus, PaymentMethod};
use crate::ledger::LedgerResult;
use crate::store::{SqliteStore, StudentFeeFilter};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

const PAYMENT_METHODS: &[&str] = &["cash", "bank_transfer", "card", "check", "mobile_money", "other"];
const FEE_STATUSES: &[&str] = &["pending", "partial", "paid", "overdue"];

fn run<'c, T>(
    conn: &'c Connection,
    req: &Request,
    op: impl FnOnce(&mut FeeLedger<SqliteStore<'c>>) -> LedgerResult<T>,
) -> LedgerResult<T> {
    let mut ledger = FeeLedger::new(SqliteStore::new(conn), actor(req));
    let out = op(&mut ledger);
    flush_audit(conn, ledger.take_events());
    out
}

fn payments_json(rows: &[FeePayment]) -> serde_json::Value {
    json!(rows.iter().map(FeePayment::to_json).collect::<Vec<_>>())
}

fn settled_json(s: &Settled) -> serde_json::Value {
    json!({
        "payment": s.payment.to_json(),
        "studentFee": s.student_fee.to_json(),
    })
}

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let student_id = tri!(p.str("studentId"));
    let fee_structure_id = tri!(p.str("feeStructureId"));
    let year_id = tri!(p.str("academicYearId"));
    match run(conn, req, |l| l.assign_fee(&student_id, &fee_structure_id, &year_id)) {
        Ok(fee) => ok(&req.id, json!({ "studentFee": fee.to_json() })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let id = tri!(Params::of(req).str("studentFeeId"));
    match run(conn, req, |l| l.student_fee(&id)) {
        Ok((fee, payments)) => ok(
            &req.id,
            json!({
                "studentFee": fee.to_json(),
                "payments": payments_json(&payments),
            }),
        ),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let filter = StudentFeeFilter {
        student_id: p.opt_str("studentId"),
        academic_year_id: p.opt_str("academicYearId"),
    };
    let status = tri!(p.opt_code("status", FeeStatus::from_code, FEE_STATUSES));
    match run(conn, req, |l| l.list_student_fees(&filter, status, Utc::now())) {
        Ok(rows) => {
            let fees: Vec<serde_json::Value> = rows
                .iter()
                .map(|(fee, effective)| {
                    let mut v = fee.to_json();
                    v["status"] = json!(effective.code());
                    v["storedStatus"] = json!(fee.status.code());
                    v
                })
                .collect();
            ok(&req.id, json!({ "studentFees": fees }))
        }
        Err(e) => ledger_err(&req.id, &e),
    }
}

/// Only `patch.dueDate` is honoured; every other key is dropped.
fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let id = tri!(p.str("studentFeeId"));
    let patch = p.child("patch");
    let result = match patch.opt_str("dueDate") {
        Some(due) => run(conn, req, |l| l.update_due_date(&id, &due)),
        None => run(conn, req, |l| l.student_fee(&id).map(|(fee, _)| fee)),
    };
    match result {
        Ok(fee) => ok(&req.id, json!({ "studentFee": fee.to_json() })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let id = tri!(Params::of(req).str("studentFeeId"));
    match run(conn, req, |l| l.delete_student_fee(&id)) {
        Ok(fee) => ok(&req.id, json!({ "deleted": true, "studentFeeId": fee.id })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let id = tri!(Params::of(req).str("studentFeeId"));
    match run(conn, req, |l| l.reconcile(&id)) {
        Ok(r) => ok(
            &req.id,
            json!({
                "studentFee": r.student_fee.to_json(),
                "corrected": r.corrected,
                "previousPaidAmount": r.previous_paid.to_string(),
                "previousStatus": r.previous_status.code(),
            }),
        ),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_payment_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let input = NewPayment {
        student_fee_id: tri!(p.str("studentFeeId")),
        amount: tri!(p.decimal("amount")),
        method: tri!(p.code("paymentMethod", PaymentMethod::from_code, PAYMENT_METHODS)),
        reference: p.opt_str("reference"),
        payment_date: p.opt_str("paymentDate"),
    };
    match run(conn, req, |l| l.record_payment(input)) {
        Ok(s) => ok(&req.id, settled_json(&s)),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_payment_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let id = tri!(Params::of(req).str("studentFeeId"));
    match run(conn, req, |l| l.list_payments(&id)) {
        Ok(rows) => ok(&req.id, json!({ "payments": payments_json(&rows) })),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_payment_amend(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let p = Params::of(req);
    let id = tri!(p.str("paymentId"));
    let patch = p.child("patch");
    let patch = PaymentPatch {
        amount: tri!(patch.opt_decimal("amount")),
        method: tri!(patch.opt_code("paymentMethod", PaymentMethod::from_code, PAYMENT_METHODS)),
        reference: patch.opt_str("reference"),
        payment_date: patch.opt_str("paymentDate"),
    };
    match run(conn, req, |l| l.amend_payment(&id, patch)) {
        Ok(s) => ok(&req.id, settled_json(&s)),
        Err(e) => ledger_err(&req.id, &e),
    }
}

fn handle_payment_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = tri!(db_conn(state, req));
    let id = tri!(Params::of(req).str("paymentId"));
    match run(conn, req, |l| l.delete_payment(&id)) {
        Ok(s) => ok(
            &req.id,
            json!({
                "deleted": true,
                "paymentId": s.payment.id,
                "studentFee": s.student_fee.to_json(),
            }),
        ),
        Err(e) => ledger_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "studentFees.assign" => Some(handle_assign(state, req)),
        "studentFees.get" => Some(handle_get(state, req)),
        "studentFees.list" => Some(handle_list(state, req)),
        "studentFees.update" => Some(handle_update(state, req)),
        "studentFees.delete" => Some(handle_delete(state, req)),
        "studentFees.reconcile" => Some(handle_reconcile(state, req)),
        "feePayments.record" => Some(handle_payment_record(state, req)),
        "feePayments.list" => Some(handle_payment_list(state, req)),
        "feePayments.amend" => Some(handle_payment_amend(state, req)),
        "feePayments.delete" => Some(handle_payment_delete(state, req)),
        _ => None,
    }
}
