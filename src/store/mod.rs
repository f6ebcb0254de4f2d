//! Persistence gateway used by the ledgers.
//!
//! The ledgers never see a concrete storage client. Each one asks its
//! gateway for a transaction and works against a narrow row trait inside it;
//! the gateway commits when the closure returns `Ok` and rolls back otherwise.

#[cfg(test)]
pub mod memory;
pub mod sqlite;

use crate::ledger::model::{
    Course, FeePayment, FeeStructure, Grade, GradeKey, Semester, Session, StudentFee,
};
use crate::ledger::LedgerResult;

pub use sqlite::SqliteStore;

/// Which rows a grade lookup may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Active,
    Retired,
    Any,
}

#[derive(Debug, Clone, Default)]
pub struct GradeFilter {
    pub student_id: Option<String>,
    pub ue_id: Option<String>,
    pub academic_year_id: Option<String>,
    pub semester: Option<Semester>,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Default)]
pub struct StudentFeeFilter {
    pub student_id: Option<String>,
    pub academic_year_id: Option<String>,
}

/// Existence checks for the rows both ledgers reference.
pub trait ReferenceRows {
    fn student_exists(&self, id: &str) -> LedgerResult<bool>;
    fn academic_year_exists(&self, id: &str) -> LedgerResult<bool>;
}

pub trait GradeRows: ReferenceRows {
    fn course(&self, id: &str) -> LedgerResult<Option<Course>>;
    fn grade(&self, id: &str) -> LedgerResult<Option<Grade>>;
    /// Newest row for the tuple and session within `scope`.
    fn newest_grade(&self, key: &GradeKey, session: Session, scope: Scope)
        -> LedgerResult<Option<Grade>>;
    fn insert_grade(&mut self, grade: &Grade) -> LedgerResult<()>;
    fn update_grade(&mut self, grade: &Grade) -> LedgerResult<()>;
    /// Current view: active rows only.
    fn active_grades(&self, filter: &GradeFilter) -> LedgerResult<Vec<Grade>>;
    /// Audit view: every row of the tuple, newest first.
    fn grade_history(&self, key: &GradeKey) -> LedgerResult<Vec<Grade>>;
}

pub trait FeeRows: ReferenceRows {
    fn fee_structure(&self, id: &str) -> LedgerResult<Option<FeeStructure>>;
    fn student_fee(&self, id: &str) -> LedgerResult<Option<StudentFee>>;
    fn student_fee_for(
        &self,
        student_id: &str,
        fee_structure_id: &str,
        academic_year_id: &str,
    ) -> LedgerResult<Option<StudentFee>>;
    fn student_fees(&self, filter: &StudentFeeFilter) -> LedgerResult<Vec<StudentFee>>;
    fn insert_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()>;
    fn update_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()>;
    fn delete_student_fee(&mut self, id: &str) -> LedgerResult<()>;
    fn payment(&self, id: &str) -> LedgerResult<Option<FeePayment>>;
    /// Newest first.
    fn payments_for(&self, student_fee_id: &str) -> LedgerResult<Vec<FeePayment>>;
    fn insert_payment(&mut self, payment: &FeePayment) -> LedgerResult<()>;
    fn update_payment(&mut self, payment: &FeePayment) -> LedgerResult<()>;
    fn delete_payment(&mut self, id: &str) -> LedgerResult<()>;
}

pub trait GradeGateway {
    /// Runs `f` in one write transaction.
    fn grade_tx<R>(
        &mut self,
        f: impl FnOnce(&mut dyn GradeRows) -> LedgerResult<R>,
    ) -> LedgerResult<R>;

    /// Read-committed access for listing and statistics.
    fn grade_read<R>(&self, f: impl FnOnce(&dyn GradeRows) -> LedgerResult<R>) -> LedgerResult<R>;
}

pub trait FeeGateway {
    fn fee_tx<R>(&mut self, f: impl FnOnce(&mut dyn FeeRows) -> LedgerResult<R>)
        -> LedgerResult<R>;

    fn fee_read<R>(&self, f: impl FnOnce(&dyn FeeRows) -> LedgerResult<R>) -> LedgerResult<R>;
}
