use crate::ledger::error::is_unique_violation;
use crate::ledger::model::{
    Course, FeePayment, FeeStatus, FeeStructure, Grade, GradeKey, GradeState, GradeStatus,
    PaymentMethod, Semester, Session, StudentFee,
};
use crate::ledger::{LedgerError, LedgerResult};
use crate::store::{
    FeeGateway, FeeRows, GradeFilter, GradeGateway, GradeRows, ReferenceRows, Scope,
    StudentFeeFilter,
};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

const GRADE_COLUMNS: &str = "id, student_id, ue_id, academic_year_id, semester, session, score, \
     status, is_active, superseded_by, created_at, updated_at";

const STUDENT_FEE_COLUMNS: &str = "id, student_id, fee_structure_id, academic_year_id, \
     total_amount, paid_amount, status, due_date, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, student_fee_id, amount, payment_method, reference, \
     payment_date, recorded_by, created_at, updated_at";

/// SQLite-backed gateway over a workspace connection.
///
/// Writes run under `BEGIN IMMEDIATE`, so a second writer on the same file
/// (another sidecar, another connection) waits for the lock before it can
/// read the rows it is about to change.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn write<R>(&self, f: impl FnOnce(&mut SqliteRows<'_>) -> LedgerResult<R>) -> LedgerResult<R> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let result = {
            let mut rows = SqliteRows { conn: &*tx };
            f(&mut rows)
        };
        match result {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    warn!(error = %rb, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl GradeGateway for SqliteStore<'_> {
    fn grade_tx<R>(
        &mut self,
        f: impl FnOnce(&mut dyn GradeRows) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        self.write(|rows| f(rows))
    }

    fn grade_read<R>(&self, f: impl FnOnce(&dyn GradeRows) -> LedgerResult<R>) -> LedgerResult<R> {
        f(&SqliteRows { conn: self.conn })
    }
}

impl FeeGateway for SqliteStore<'_> {
    fn fee_tx<R>(
        &mut self,
        f: impl FnOnce(&mut dyn FeeRows) -> LedgerResult<R>,
    ) -> LedgerResult<R> {
        self.write(|rows| f(rows))
    }

    fn fee_read<R>(&self, f: impl FnOnce(&dyn FeeRows) -> LedgerResult<R>) -> LedgerResult<R> {
        f(&SqliteRows { conn: self.conn })
    }
}

struct SqliteRows<'a> {
    conn: &'a Connection,
}

impl SqliteRows<'_> {
    fn exists(&self, sql: &str, id: &str) -> LedgerResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(sql, [id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn decimal_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn code_col<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_err(idx, format!("unknown code: {raw}")))
}

fn grade_from_row(row: &Row<'_>) -> rusqlite::Result<Grade> {
    let is_active: bool = row.get(8)?;
    let superseded_by: Option<String> = row.get(9)?;
    Ok(Grade {
        id: row.get(0)?,
        key: GradeKey {
            student_id: row.get(1)?,
            ue_id: row.get(2)?,
            academic_year_id: row.get(3)?,
            semester: code_col(row, 4, Semester::from_code)?,
        },
        session: code_col(row, 5, Session::from_code)?,
        score: decimal_col(row, 6)?,
        status: code_col(row, 7, GradeStatus::from_code)?,
        state: if is_active {
            GradeState::Active
        } else {
            GradeState::Retired { superseded_by }
        },
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn student_fee_from_row(row: &Row<'_>) -> rusqlite::Result<StudentFee> {
    Ok(StudentFee {
        id: row.get(0)?,
        student_id: row.get(1)?,
        fee_structure_id: row.get(2)?,
        academic_year_id: row.get(3)?,
        total_amount: decimal_col(row, 4)?,
        paid_amount: decimal_col(row, 5)?,
        status: code_col(row, 6, FeeStatus::from_code)?,
        due_date: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<FeePayment> {
    Ok(FeePayment {
        id: row.get(0)?,
        student_fee_id: row.get(1)?,
        amount: decimal_col(row, 2)?,
        payment_method: code_col(row, 3, PaymentMethod::from_code)?,
        reference: row.get(4)?,
        payment_date: row.get(5)?,
        recorded_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn grade_write_err(e: rusqlite::Error, grade: &Grade) -> LedgerError {
    if is_unique_violation(&e) {
        return LedgerError::conflict(
            format!("an active {} grade already exists", grade.session.code()),
            None,
            Some("reload the grade history and update the active row instead"),
        );
    }
    e.into()
}

impl ReferenceRows for SqliteRows<'_> {
    fn student_exists(&self, id: &str) -> LedgerResult<bool> {
        self.exists("SELECT 1 FROM students WHERE id = ?", id)
    }

    fn academic_year_exists(&self, id: &str) -> LedgerResult<bool> {
        self.exists("SELECT 1 FROM academic_years WHERE id = ?", id)
    }
}

impl GradeRows for SqliteRows<'_> {
    fn course(&self, id: &str) -> LedgerResult<Option<Course>> {
        let course = self
            .conn
            .query_row(
                "SELECT id, code, name, passing_grade FROM ues WHERE id = ?",
                [id],
                |row| {
                    Ok(Course {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                        passing_grade: decimal_col(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(course)
    }

    fn grade(&self, id: &str) -> LedgerResult<Option<Grade>> {
        let sql = format!("SELECT {GRADE_COLUMNS} FROM grades WHERE id = ?");
        Ok(self.conn.query_row(&sql, [id], grade_from_row).optional()?)
    }

    fn newest_grade(
        &self,
        key: &GradeKey,
        session: Session,
        scope: Scope,
    ) -> LedgerResult<Option<Grade>> {
        let scope_sql = match scope {
            Scope::Active => " AND is_active = 1",
            Scope::Retired => " AND is_active = 0",
            Scope::Any => "",
        };
        let sql = format!(
            "SELECT {GRADE_COLUMNS} FROM grades
             WHERE student_id = ? AND ue_id = ? AND academic_year_id = ?
               AND semester = ? AND session = ?{scope_sql}
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        );
        let found = self
            .conn
            .query_row(
                &sql,
                (
                    &key.student_id,
                    &key.ue_id,
                    &key.academic_year_id,
                    key.semester.code(),
                    session.code(),
                ),
                grade_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn insert_grade(&mut self, grade: &Grade) -> LedgerResult<()> {
        self.conn
            .execute(
                "INSERT INTO grades(id, student_id, ue_id, academic_year_id, semester, session,
                   score, status, is_active, superseded_by, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    grade.id,
                    grade.key.student_id,
                    grade.key.ue_id,
                    grade.key.academic_year_id,
                    grade.key.semester.code(),
                    grade.session.code(),
                    grade.score.to_string(),
                    grade.status.code(),
                    grade.is_active(),
                    grade.superseded_by(),
                    grade.created_at,
                    grade.updated_at,
                ],
            )
            .map_err(|e| grade_write_err(e, grade))?;
        Ok(())
    }

    fn update_grade(&mut self, grade: &Grade) -> LedgerResult<()> {
        self.conn
            .execute(
                "UPDATE grades
                 SET score = ?, status = ?, is_active = ?, superseded_by = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![
                    grade.score.to_string(),
                    grade.status.code(),
                    grade.is_active(),
                    grade.superseded_by(),
                    grade.updated_at,
                    grade.id,
                ],
            )
            .map_err(|e| grade_write_err(e, grade))?;
        Ok(())
    }

    fn active_grades(&self, filter: &GradeFilter) -> LedgerResult<Vec<Grade>> {
        let mut sql = format!("SELECT {GRADE_COLUMNS} FROM grades WHERE is_active = 1");
        let mut bind: Vec<Value> = Vec::new();
        let text_filters = [
            ("student_id", filter.student_id.clone()),
            ("ue_id", filter.ue_id.clone()),
            ("academic_year_id", filter.academic_year_id.clone()),
            ("semester", filter.semester.map(|s| s.code().to_string())),
            ("session", filter.session.map(|s| s.code().to_string())),
        ];
        for (column, value) in text_filters {
            if let Some(v) = value {
                sql.push_str(&format!(" AND {column} = ?"));
                bind.push(Value::Text(v));
            }
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let grades = stmt
            .query_map(params_from_iter(bind), grade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grades)
    }

    fn grade_history(&self, key: &GradeKey) -> LedgerResult<Vec<Grade>> {
        let sql = format!(
            "SELECT {GRADE_COLUMNS} FROM grades
             WHERE student_id = ? AND ue_id = ? AND academic_year_id = ? AND semester = ?
             ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let grades = stmt
            .query_map(
                (
                    &key.student_id,
                    &key.ue_id,
                    &key.academic_year_id,
                    key.semester.code(),
                ),
                grade_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grades)
    }
}

impl FeeRows for SqliteRows<'_> {
    fn fee_structure(&self, id: &str) -> LedgerResult<Option<FeeStructure>> {
        let found = self
            .conn
            .query_row(
                "SELECT id, name, amount FROM fee_structures WHERE id = ?",
                [id],
                |row| {
                    Ok(FeeStructure {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        amount: decimal_col(row, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    fn student_fee(&self, id: &str) -> LedgerResult<Option<StudentFee>> {
        let sql = format!("SELECT {STUDENT_FEE_COLUMNS} FROM student_fees WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], student_fee_from_row)
            .optional()?)
    }

    fn student_fee_for(
        &self,
        student_id: &str,
        fee_structure_id: &str,
        academic_year_id: &str,
    ) -> LedgerResult<Option<StudentFee>> {
        let sql = format!(
            "SELECT {STUDENT_FEE_COLUMNS} FROM student_fees
             WHERE student_id = ? AND fee_structure_id = ? AND academic_year_id = ?"
        );
        Ok(self
            .conn
            .query_row(
                &sql,
                (student_id, fee_structure_id, academic_year_id),
                student_fee_from_row,
            )
            .optional()?)
    }

    fn student_fees(&self, filter: &StudentFeeFilter) -> LedgerResult<Vec<StudentFee>> {
        let mut sql = format!("SELECT {STUDENT_FEE_COLUMNS} FROM student_fees WHERE 1 = 1");
        let mut bind: Vec<Value> = Vec::new();
        if let Some(v) = &filter.student_id {
            sql.push_str(" AND student_id = ?");
            bind.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.academic_year_id {
            sql.push_str(" AND academic_year_id = ?");
            bind.push(Value::Text(v.clone()));
        }
        sql.push_str(" ORDER BY due_date, rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let fees = stmt
            .query_map(params_from_iter(bind), student_fee_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fees)
    }

    fn insert_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO student_fees(id, student_id, fee_structure_id, academic_year_id,
               total_amount, paid_amount, status, due_date, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                fee.id,
                fee.student_id,
                fee.fee_structure_id,
                fee.academic_year_id,
                fee.total_amount.to_string(),
                fee.paid_amount.to_string(),
                fee.status.code(),
                fee.due_date,
                fee.created_at,
                fee.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_student_fee(&mut self, fee: &StudentFee) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE student_fees
             SET paid_amount = ?, status = ?, due_date = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                fee.paid_amount.to_string(),
                fee.status.code(),
                fee.due_date,
                fee.updated_at,
                fee.id,
            ],
        )?;
        Ok(())
    }

    fn delete_student_fee(&mut self, id: &str) -> LedgerResult<()> {
        self.conn
            .execute("DELETE FROM student_fees WHERE id = ?", [id])?;
        Ok(())
    }

    fn payment(&self, id: &str) -> LedgerResult<Option<FeePayment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM fee_payments WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], payment_from_row)
            .optional()?)
    }

    fn payments_for(&self, student_fee_id: &str) -> LedgerResult<Vec<FeePayment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM fee_payments
             WHERE student_fee_id = ?
             ORDER BY payment_date DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let payments = stmt
            .query_map([student_fee_id], payment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payments)
    }

    fn insert_payment(&mut self, payment: &FeePayment) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO fee_payments(id, student_fee_id, amount, payment_method, reference,
               payment_date, recorded_by, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                payment.id,
                payment.student_fee_id,
                payment.amount.to_string(),
                payment.payment_method.code(),
                payment.reference,
                payment.payment_date,
                payment.recorded_by,
                payment.created_at,
                payment.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_payment(&mut self, payment: &FeePayment) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE fee_payments
             SET amount = ?, payment_method = ?, reference = ?, payment_date = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                payment.amount.to_string(),
                payment.payment_method.code(),
                payment.reference,
                payment.payment_date,
                payment.updated_at,
                payment.id,
            ],
        )?;
        Ok(())
    }

    fn delete_payment(&mut self, id: &str) -> LedgerResult<()> {
        self.conn
            .execute("DELETE FROM fee_payments WHERE id = ?", [id])?;
        Ok(())
    }
}
