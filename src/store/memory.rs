//! In-memory gateway for ledger unit tests.
//!
//! A transaction works on a clone of the tables and swaps it in on success,
//! so a failed operation leaves nothing behind. The unique rules of the
//! SQLite schema are mirrored in the insert/update paths.

use crate::ledger::model::{
    Course, FeePayment, FeeStructure, Grade, GradeKey, Session, StudentFee,
};
use crate::ledger::{LedgerError, LedgerResult};
use crate::store::{
    FeeGateway, FeeRows, GradeFilter, GradeGateway, GradeRows, ReferenceRows, Scope,
    StudentFeeFilter,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    students: HashSet<String>,
    academic_years: HashSet<String>,
    courses: HashMap<String, Course>,
    fee_structures: HashMap<String, FeeStructure>,
    // Insertion order stands in for rowid.
    grades: Vec<Grade>,
    student_fees: Vec<StudentFee>,
    payments: Vec<FeePayment>,
    // The duplicate lookup misses, as if a concurrent assignment committed after it.
    stale_assignment_reads: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Tables,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_student(&mut self, id: &str) {
        self.tables.students.insert(id.to_string());
    }

    pub fn add_academic_year(&mut self, id: &str) {
        self.tables.academic_years.insert(id.to_string());
    }

    pub fn add_course(&mut self, id: &str, passing_grade: Decimal) {
        self.tables.courses.insert(
            id.to_string(),
            Course {
                id: id.to_string(),
                code: id.to_ascii_uppercase(),
                name: id.to_string(),
                passing_grade,
            },
        );
    }

    pub fn add_fee_structure(&mut self, id: &str, amount: Decimal) {
        self.tables.fee_structures.insert(
            id.to_string(),
            FeeStructure {
                id: id.to_string(),
                name: id.to_string(),
                amount,
            },
        );
    }

    pub fn set_fee_structure_amount(&mut self, id: &str, amount: Decimal) {
        if let Some(fs) = self.tables.fee_structures.get_mut(id) {
            fs.amount = amount;
        }
    }

    pub fn lag_assignment_reads(&mut self) {
        self.tables.stale_assignment_reads = true;
    }

    pub fn grades(&self) -> &[Grade] {
        &self.tables.grades
    }

    pub fn payments(&self) -> &[FeePayment] {
        &self.tables.payments
    }

    /// Bypasses the ledger, the way a generic patch endpoint would.
    pub fn force_paid_amount(&mut self, student_fee_id: &str, paid: Decimal) {
        if let Some(f) = self
            .tables
            .student_fees
            .iter_mut()
            .find(|f| f.id == student_fee_id)
        {
            f.paid_amount = paid;
        }
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut Tables) -> LedgerResult<R>) -> LedgerResult<R> {
        let mut working = self.tables.clone();
        let out = f(&mut working)?;
        self.tables = working;
        Ok(out)
    }
}

impl GradeGateway for MemoryStore {
    fn grade_tx<R>(
        &mut self,
        f: impl FnOnce(&mut dyn GradeRows) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        self.write(|t| f(t))
    }

    fn grade_read<R>(&self, f: impl FnOnce(&dyn GradeRows) -> LedgerResult<R>) -> LedgerResult<R> {
        f(&self.tables)
    }
}

impl FeeGateway for MemoryStore {
    fn fee_tx<R>(
        &mut self,
        f: impl FnOnce(&mut dyn FeeRows) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        self.write(|t| f(t))
    }

    fn fee_read<R>(&self, f: impl FnOnce(&dyn FeeRows) -> LedgerResult<R>) -> LedgerResult<R> {
        f(&self.tables)
    }
}

fn same_tuple(g: &Grade, key: &GradeKey) -> bool {
    g.key == *key
}

impl Tables {
    fn find_assignment(
        &self,
        student_id: &str,
        fee_structure_id: &str,
        academic_year_id: &str,
    ) -> Option<&StudentFee> {
        self.student_fees.iter().find(|f| {
            f.student_id == student_id
                && f.fee_structure_id == fee_structure_id
                && f.academic_year_id == academic_year_id
        })
    }

    fn check_active_unique(&self, grade: &Grade) -> LedgerResult<()> {
        if !grade.is_active() {
            return Ok(());
        }
        let clash = self.grades.iter().any(|g| {
            g.id != grade.id && g.is_active() && g.session == grade.session && same_tuple(g, &grade.key)
        });
        if clash {
            return Err(LedgerError::conflict(
                format!("an active {} grade already exists", grade.session.code()),
                None,
                None,
            ));
        }
        Ok(())
    }
}

impl ReferenceRows for Tables {
    fn student_exists(&self, id: &str) -> LedgerResult<bool> {
        Ok(self.students.contains(id))
    }

    fn academic_year_exists(&self, id: &str) -> LedgerResult<bool> {
        Ok(self.academic_years.contains(id))
    }
}

impl GradeRows for Tables {
    fn course(&self, id: &str) -> LedgerResult<Option<Course>> {
        Ok(self.courses.get(id).cloned())
    }

    fn grade(&self, id: &str) -> LedgerResult<Option<Grade>> {
        Ok(self.grades.iter().find(|g| g.id == id).cloned())
    }

    fn newest_grade(
        &self,
        key: &GradeKey,
        session: Session,
        scope: Scope,
    ) -> LedgerResult<Option<Grade>> {
        // max_by keeps the last of equal maxima, i.e. the newest insert.
        Ok(self
            .grades
            .iter()
            .filter(|g| same_tuple(g, key) && g.session == session)
            .filter(|g| match scope {
                Scope::Active => g.is_active(),
                Scope::Retired => !g.is_active(),
                Scope::Any => true,
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    fn insert_grade(&mut self, grade: &Grade) -> LedgerResult<()> {
        self.check_active_unique(grade)?;
        self.grades.push(grade.clone());
        Ok(())
    }

    fn update_grade(&mut self, grade: &Grade) -> LedgerResult<()> {
        self.check_active_unique(grade)?;
        if let Some(slot) = self.grades.iter_mut().find(|g| g.id == grade.id) {
            *slot = grade.clone();
        }
        Ok(())
    }

    fn active_grades(&self, filter: &GradeFilter) -> LedgerResult<Vec<Grade>> {
        Ok(self
            .grades
            .iter()
            .rev()
            .filter(|g| g.is_active())
            .filter(|g| filter.student_id.as_deref().map_or(true, |v| g.key.student_id == v))
            .filter(|g| filter.ue_id.as_deref().map_or(true, |v| g.key.ue_id == v))
            .filter(|g| {
                filter
                    .academic_year_id
                    .as_deref()
                    .map_or(true, |v| g.key.academic_year_id == v)
            })
            .filter(|g| filter.semester.map_or(true, |v| g.key.semester == v))
            .filter(|g| filter.session.map_or(true, |v| g.session == v))
            .cloned()
            .collect())
    }

    fn grade_history(&self, key: &GradeKey) -> LedgerResult<Vec<Grade>> {
        let mut rows: Vec<Grade> = self
            .grades
            .iter()
            .rev()
            .filter(|g| same_tuple(g, key))
            .cloned()
            .collect();
        // Stable sort keeps reverse insertion order for equal timestamps.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

impl FeeRows for Tables {
    fn fee_structure(&self, id: &str) -> LedgerResult<Option<FeeStructure>> {
        Ok(self.fee_structures.get(id).cloned())
    }

    fn student_fee(&self, id: &str) -> LedgerResult<Option<StudentFee>> {
        Ok(self.student_fees.iter().find(|f| f.id == id).cloned())
    }

    fn student_fee_for(
        &self,
        student_id: &str,
        fee_structure_id: &str,
        academic_year_id: &str,
    ) -> LedgerResult<Option<StudentFee>> {
        if self.stale_assignment_reads {
            return Ok(None);
        }
        Ok(self
            .find_assignment(student_id, fee_structure_id, academic_year_id)
            .cloned())
    }

    fn student_fees(&self, filter: &StudentFeeFilter) -> LedgerResult<Vec<StudentFee>> {
        Ok(self
            .student_fees
            .iter()
            .filter(|f| filter.student_id.as_deref().map_or(true, |v| f.student_id == v))
            .filter(|f| {
                filter
                    .academic_year_id
                    .as_deref()
                    .map_or(true, |v| f.academic_year_id == v)
            })
            .cloned()
            .collect())
    }

    fn insert_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()> {
        let dup = self
            .find_assignment(&fee.student_id, &fee.fee_structure_id, &fee.academic_year_id)
            .is_some();
        if dup {
            return Err(LedgerError::conflict("unique constraint violated", None, None));
        }
        self.student_fees.push(fee.clone());
        Ok(())
    }

    fn update_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()> {
        if let Some(slot) = self.student_fees.iter_mut().find(|f| f.id == fee.id) {
            *slot = fee.clone();
        }
        Ok(())
    }

    fn delete_student_fee(&mut self, id: &str) -> LedgerResult<()> {
        self.student_fees.retain(|f| f.id != id);
        Ok(())
    }

    fn payment(&self, id: &str) -> LedgerResult<Option<FeePayment>> {
        Ok(self.payments.iter().find(|p| p.id == id).cloned())
    }

    fn payments_for(&self, student_fee_id: &str) -> LedgerResult<Vec<FeePayment>> {
        let mut rows: Vec<FeePayment> = self
            .payments
            .iter()
            .rev()
            .filter(|p| p.student_fee_id == student_fee_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.payment_date.cmp(&a.payment_date));
        Ok(rows)
    }

    fn insert_payment(&mut self, payment: &FeePayment) -> LedgerResult<()> {
        self.payments.push(payment.clone());
        Ok(())
    }

    fn update_payment(&mut self, payment: &FeePayment) -> LedgerResult<()> {
        if let Some(slot) = self.payments.iter_mut().find(|p| p.id == payment.id) {
            *slot = payment.clone();
        }
        Ok(())
    }

    fn delete_payment(&mut self, id: &str) -> LedgerResult<()> {
        self.payments.retain(|p| p.id != id);
        Ok(())
    }
}
