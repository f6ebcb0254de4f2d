//! Fee assignment and payment reconciliation.
//!
//! `StudentFee.paid_amount` is the sum of its payments at every commit, and
//! `status` is re-derived from it after each mutation. Each operation below
//! touches the payment row and its parent fee in the same transaction.

use crate::audit::{AuditEvent, Outbox};
use crate::ledger::model::{FeePayment, FeeStatus, PaymentMethod, StudentFee};
use crate::ledger::rules::{check_amount, derive_fee_status};
use crate::ledger::{days_from_now, now_stamp, parse_date_input, stamp, Actor, LedgerError, LedgerResult};
use crate::store::{FeeGateway, FeeRows, StudentFeeFilter};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// Days between assignment and the due date.
pub const DUE_DAYS: i64 = 30;

const FEE_ENTITY: &str = "StudentFee";
const PAYMENT_ENTITY: &str = "FeePayment";

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub student_fee_id: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentPatch {
    pub amount: Option<Decimal>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
    pub payment_date: Option<String>,
}

/// A payment row together with its parent fee after the write.
#[derive(Debug, Clone)]
pub struct Settled {
    pub payment: FeePayment,
    pub student_fee: StudentFee,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub student_fee: StudentFee,
    pub previous_paid: Decimal,
    pub previous_status: FeeStatus,
    pub corrected: bool,
}

pub struct FeeLedger<F> {
    gateway: F,
    actor: Actor,
    outbox: Outbox,
}

fn require_fee(rows: &dyn FeeRows, id: &str) -> LedgerResult<StudentFee> {
    rows.student_fee(id)?
        .ok_or_else(|| LedgerError::not_found("student fee", id))
}

fn normalize_date(field: &str, raw: &str) -> LedgerResult<String> {
    parse_date_input(raw)
        .map(stamp)
        .ok_or_else(|| LedgerError::validation_with(format!("{field} must be a date"), json!({ "value": raw })))
}

/// `available` is the most this payment may hold: the fee's remaining balance,
/// plus the payment's current amount when it is being amended.
fn exceeds_balance(fee: &StudentFee, available: Decimal, amount: Decimal) -> LedgerError {
    let remaining = available;
    LedgerError::validation_with(
        format!("payment amount exceeds remaining balance of {remaining}"),
        json!({
            "remaining": remaining.to_string(),
            "totalAmount": fee.total_amount.to_string(),
            "paidAmount": fee.paid_amount.to_string(),
            "amount": amount.to_string(),
        }),
    )
}

/// Moves `paid_amount` by `delta` and re-derives the status.
fn apply_delta(fee: &mut StudentFee, delta: Decimal, now: &str) {
    fee.paid_amount += delta;
    fee.status = derive_fee_status(fee.paid_amount, fee.total_amount);
    fee.updated_at = now.to_string();
}

/// Read-side status: unpaid fees past their due date show as overdue.
pub fn effective_status(fee: &StudentFee, at: DateTime<Utc>) -> FeeStatus {
    if fee.status == FeeStatus::Paid {
        return FeeStatus::Paid;
    }
    match parse_date_input(&fee.due_date) {
        Some(due) if due < at => FeeStatus::Overdue,
        _ => fee.status,
    }
}

impl<F: FeeGateway> FeeLedger<F> {
    pub fn new(gateway: F, actor: Actor) -> Self {
        Self {
            gateway,
            actor,
            outbox: Outbox::default(),
        }
    }

    pub fn take_events(&mut self) -> Vec<AuditEvent> {
        self.outbox.drain()
    }

    fn emit(&mut self, event: AuditEvent) {
        self.outbox.push(event.by(&self.actor));
    }

    fn emit_failure(&mut self, action: &str, entity: &str, id: Option<&str>, e: &LedgerError) {
        self.emit(AuditEvent::failure(action, entity, e).with_entity_id(id));
    }

    /// Snapshots the fee structure amount; later structure edits do not
    /// touch fees that were already assigned.
    pub fn assign_fee(
        &mut self,
        student_id: &str,
        fee_structure_id: &str,
        academic_year_id: &str,
    ) -> LedgerResult<StudentFee> {
        let result = self.gateway.fee_tx(|rows| {
            if !rows.student_exists(student_id)? {
                return Err(LedgerError::not_found("student", student_id));
            }
            let structure = rows
                .fee_structure(fee_structure_id)?
                .ok_or_else(|| LedgerError::not_found("fee structure", fee_structure_id))?;
            if !rows.academic_year_exists(academic_year_id)? {
                return Err(LedgerError::not_found("academic year", academic_year_id));
            }

            let duplicate = |existing: Option<serde_json::Value>| LedgerError::Validation {
                message: "fee already assigned to this student for this academic year".to_string(),
                details: Some(json!({ "existing": existing })),
            };
            if let Some(existing) = rows.student_fee_for(student_id, fee_structure_id, academic_year_id)? {
                return Err(duplicate(Some(existing.to_json())));
            }

            let now = now_stamp();
            let fee = StudentFee {
                id: Uuid::new_v4().to_string(),
                student_id: student_id.to_string(),
                fee_structure_id: structure.id.clone(),
                academic_year_id: academic_year_id.to_string(),
                total_amount: structure.amount,
                paid_amount: Decimal::ZERO,
                status: FeeStatus::Pending,
                due_date: days_from_now(DUE_DAYS),
                created_at: now.clone(),
                updated_at: now,
            };
            rows.insert_student_fee(&fee).map_err(|e| {
                if e.is_conflict() {
                    duplicate(None)
                } else {
                    e
                }
            })?;
            Ok(fee)
        });
        match &result {
            Ok(fee) => self.emit(
                AuditEvent::success("FEE_ASSIGN", FEE_ENTITY, &fee.id, "fee assigned").with_metadata(json!({
                    "studentId": fee.student_id,
                    "feeStructureId": fee.fee_structure_id,
                    "totalAmount": fee.total_amount.to_string(),
                })),
            ),
            Err(e) => self.emit_failure("FEE_ASSIGN", FEE_ENTITY, None, e),
        }
        result
    }

    /// Partial payments are fine; paying more than the remaining balance is not.
    pub fn record_payment(&mut self, input: NewPayment) -> LedgerResult<Settled> {
        let result = self.record_in_tx(&input);
        match &result {
            Ok(s) => {
                debug!(student_fee_id = %s.student_fee.id, paid = %s.student_fee.paid_amount, "payment recorded");
                self.emit(
                    AuditEvent::success("PAYMENT_RECORD", PAYMENT_ENTITY, &s.payment.id, "payment recorded")
                        .with_metadata(json!({
                            "studentFeeId": s.student_fee.id,
                            "amount": s.payment.amount.to_string(),
                            "paidAmount": s.student_fee.paid_amount.to_string(),
                            "status": s.student_fee.status.code(),
                        })),
                );
            }
            Err(e) => self.emit(
                AuditEvent::failure("PAYMENT_RECORD", PAYMENT_ENTITY, e)
                    .with_metadata(json!({ "studentFeeId": input.student_fee_id })),
            ),
        }
        result
    }

    fn record_in_tx(&mut self, input: &NewPayment) -> LedgerResult<Settled> {
        let amount = check_amount(input.amount)?;
        let payment_date = match &input.payment_date {
            Some(raw) => normalize_date("paymentDate", raw)?,
            None => now_stamp(),
        };
        let recorded_by = self.actor.user_id.clone();
        self.gateway.fee_tx(|rows| {
            let mut fee = require_fee(rows, &input.student_fee_id)?;
            if amount > fee.remaining() {
                return Err(exceeds_balance(&fee, fee.remaining(), amount));
            }

            let now = now_stamp();
            let payment = FeePayment {
                id: Uuid::new_v4().to_string(),
                student_fee_id: fee.id.clone(),
                amount,
                payment_method: input.method,
                reference: input.reference.clone(),
                payment_date,
                recorded_by,
                created_at: now.clone(),
                updated_at: now.clone(),
            };
            rows.insert_payment(&payment)?;
            apply_delta(&mut fee, amount, &now);
            rows.update_student_fee(&fee)?;
            Ok(Settled {
                payment,
                student_fee: fee,
            })
        })
    }

    /// An amount change moves the parent balance by the difference; status
    /// can fall back to pending here.
    pub fn amend_payment(&mut self, payment_id: &str, patch: PaymentPatch) -> LedgerResult<Settled> {
        let result = self.amend_in_tx(payment_id, &patch);
        match &result {
            Ok(s) => self.emit(
                AuditEvent::success("PAYMENT_AMEND", PAYMENT_ENTITY, &s.payment.id, "payment amended")
                    .with_metadata(json!({
                        "studentFeeId": s.student_fee.id,
                        "amount": s.payment.amount.to_string(),
                        "paidAmount": s.student_fee.paid_amount.to_string(),
                        "status": s.student_fee.status.code(),
                    })),
            ),
            Err(e) => self.emit_failure("PAYMENT_AMEND", PAYMENT_ENTITY, Some(payment_id), e),
        }
        result
    }

    fn amend_in_tx(&mut self, payment_id: &str, patch: &PaymentPatch) -> LedgerResult<Settled> {
        let new_amount = patch.amount.map(check_amount).transpose()?;
        let payment_date = patch
            .payment_date
            .as_deref()
            .map(|raw| normalize_date("paymentDate", raw))
            .transpose()?;
        self.gateway.fee_tx(|rows| {
            let mut payment = rows
                .payment(payment_id)?
                .ok_or_else(|| LedgerError::not_found("fee payment", payment_id))?;
            let mut fee = require_fee(rows, &payment.student_fee_id)?;
            let now = now_stamp();

            if let Some(amount) = new_amount.filter(|a| *a != payment.amount) {
                let delta = amount - payment.amount;
                if fee.paid_amount + delta > fee.total_amount {
                    return Err(exceeds_balance(&fee, payment.amount + fee.remaining(), amount));
                }
                payment.amount = amount;
                apply_delta(&mut fee, delta, &now);
                rows.update_student_fee(&fee)?;
            }
            if let Some(method) = patch.method {
                payment.payment_method = method;
            }
            if let Some(reference) = &patch.reference {
                payment.reference = Some(reference.clone());
            }
            if let Some(date) = payment_date {
                payment.payment_date = date;
            }
            payment.updated_at = now;
            rows.update_payment(&payment)?;
            Ok(Settled {
                payment,
                student_fee: fee,
            })
        })
    }

    /// Returns the removed payment and the parent fee after the refund.
    pub fn delete_payment(&mut self, payment_id: &str) -> LedgerResult<Settled> {
        let result = self.gateway.fee_tx(|rows| {
            let payment = rows
                .payment(payment_id)?
                .ok_or_else(|| LedgerError::not_found("fee payment", payment_id))?;
            let mut fee = require_fee(rows, &payment.student_fee_id)?;
            apply_delta(&mut fee, -payment.amount, &now_stamp());
            rows.update_student_fee(&fee)?;
            rows.delete_payment(&payment.id)?;
            Ok(Settled {
                payment,
                student_fee: fee,
            })
        });
        match &result {
            Ok(s) => self.emit(
                AuditEvent::success("PAYMENT_DELETE", PAYMENT_ENTITY, &s.payment.id, "payment deleted")
                    .with_metadata(json!({
                        "studentFeeId": s.student_fee.id,
                        "amount": s.payment.amount.to_string(),
                        "paidAmount": s.student_fee.paid_amount.to_string(),
                        "status": s.student_fee.status.code(),
                    })),
            ),
            Err(e) => self.emit_failure("PAYMENT_DELETE", PAYMENT_ENTITY, Some(payment_id), e),
        }
        result
    }

    /// Only the due date is writable; amounts and status belong to the ledger.
    pub fn update_due_date(&mut self, student_fee_id: &str, due_date: &str) -> LedgerResult<StudentFee> {
        let result = normalize_date("dueDate", due_date).and_then(|due| {
            self.gateway.fee_tx(|rows| {
                let mut fee = require_fee(rows, student_fee_id)?;
                fee.due_date = due;
                fee.updated_at = now_stamp();
                rows.update_student_fee(&fee)?;
                Ok(fee)
            })
        });
        match &result {
            Ok(fee) => self.emit(
                AuditEvent::success("FEE_UPDATE", FEE_ENTITY, &fee.id, "due date changed")
                    .with_metadata(json!({ "dueDate": fee.due_date })),
            ),
            Err(e) => self.emit_failure("FEE_UPDATE", FEE_ENTITY, Some(student_fee_id), e),
        }
        result
    }

    /// Payments are never cascaded; they must be deleted first.
    pub fn delete_student_fee(&mut self, student_fee_id: &str) -> LedgerResult<StudentFee> {
        let result = self.gateway.fee_tx(|rows| {
            let fee = require_fee(rows, student_fee_id)?;
            let payments = rows.payments_for(&fee.id)?;
            if !payments.is_empty() {
                return Err(LedgerError::conflict(
                    format!("student fee has {} payment(s)", payments.len()),
                    Some(json!({ "paymentIds": payments.iter().map(|p| p.id.as_str()).collect::<Vec<_>>() })),
                    Some("delete the payments first"),
                ));
            }
            rows.delete_student_fee(&fee.id)?;
            Ok(fee)
        });
        match &result {
            Ok(fee) => self.emit(AuditEvent::success("FEE_DELETE", FEE_ENTITY, &fee.id, "fee deleted")),
            Err(e) => self.emit_failure("FEE_DELETE", FEE_ENTITY, Some(student_fee_id), e),
        }
        result
    }

    /// Recomputes the running balance from the payment rows.
    pub fn reconcile(&mut self, student_fee_id: &str) -> LedgerResult<Reconciled> {
        let result = self.gateway.fee_tx(|rows| {
            let mut fee = require_fee(rows, student_fee_id)?;
            let paid: Decimal = rows.payments_for(&fee.id)?.iter().map(|p| p.amount).sum();
            let status = derive_fee_status(paid, fee.total_amount);
            let previous_paid = fee.paid_amount;
            let previous_status = fee.status;
            let corrected = paid != previous_paid || status != previous_status;
            if corrected {
                fee.paid_amount = paid;
                fee.status = status;
                fee.updated_at = now_stamp();
                rows.update_student_fee(&fee)?;
            }
            Ok(Reconciled {
                student_fee: fee,
                previous_paid,
                previous_status,
                corrected,
            })
        });
        match &result {
            Ok(r) if r.corrected => self.emit(
                AuditEvent::success("FEE_RECONCILE", FEE_ENTITY, &r.student_fee.id, "balance corrected")
                    .with_metadata(json!({
                        "previousPaid": r.previous_paid.to_string(),
                        "paidAmount": r.student_fee.paid_amount.to_string(),
                        "previousStatus": r.previous_status.code(),
                        "status": r.student_fee.status.code(),
                    })),
            ),
            Ok(_) => {}
            Err(e) => self.emit_failure("FEE_RECONCILE", FEE_ENTITY, Some(student_fee_id), e),
        }
        result
    }

    pub fn student_fee(&self, student_fee_id: &str) -> LedgerResult<(StudentFee, Vec<FeePayment>)> {
        self.gateway.fee_read(|rows| {
            let fee = require_fee(rows, student_fee_id)?;
            let payments = rows.payments_for(&fee.id)?;
            Ok((fee, payments))
        })
    }

    /// Fees with their effective status as of `at`, optionally filtered on it.
    pub fn list_student_fees(
        &self,
        filter: &StudentFeeFilter,
        status: Option<FeeStatus>,
        at: DateTime<Utc>,
    ) -> LedgerResult<Vec<(StudentFee, FeeStatus)>> {
        let fees = self.gateway.fee_read(|rows| rows.student_fees(filter))?;
        Ok(fees
            .into_iter()
            .map(|f| {
                let effective = effective_status(&f, at);
                (f, effective)
            })
            .filter(|(_, effective)| status.map_or(true, |s| s == *effective))
            .collect())
    }

    pub fn list_payments(&self, student_fee_id: &str) -> LedgerResult<Vec<FeePayment>> {
        self.gateway.fee_read(|rows| {
            let fee = require_fee(rows, student_fee_id)?;
            rows.payments_for(&fee.id)
        })
    }
}
