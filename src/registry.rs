//! Reference rows the ledgers point at: users, students, UEs, academic years
//! and fee structures. Plain create/list, no invariants beyond what the
//! schema enforces.

use crate::ledger::now_stamp;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn create_user(conn: &Connection, name: &str) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, created_at) VALUES(?, ?, ?)",
        params![id, name, now_stamp()],
    )?;
    Ok(id)
}

pub fn list_users(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM users ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_student(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    student_no: Option<&str>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, first_name, last_name, student_no, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![id, first_name, last_name, student_no, now_stamp()],
    )?;
    Ok(id)
}

pub fn list_students(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, student_no FROM students
         ORDER BY last_name, first_name, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            let first: String = r.get(1)?;
            let last: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "firstName": first,
                "lastName": last,
                "displayName": format!("{}, {}", last, first),
                "studentNo": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_ue(
    conn: &Connection,
    code: &str,
    name: &str,
    credits: i64,
    passing_grade: Decimal,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO ues(id, code, name, credits, passing_grade, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![id, code, name, credits, passing_grade.to_string(), now_stamp()],
    )?;
    Ok(id)
}

pub fn list_ues(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt =
        conn.prepare("SELECT id, code, name, credits, passing_grade FROM ues ORDER BY code")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "passingGrade": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_academic_year(conn: &Connection, label: &str) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_years(id, label, created_at) VALUES(?, ?, ?)",
        params![id, label, now_stamp()],
    )?;
    Ok(id)
}

pub fn list_academic_years(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare("SELECT id, label FROM academic_years ORDER BY label DESC")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "label": r.get::<_, String>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn create_fee_structure(
    conn: &Connection,
    name: &str,
    amount: Decimal,
    academic_year_id: Option<&str>,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = now_stamp();
    conn.execute(
        "INSERT INTO fee_structures(id, name, amount, academic_year_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![id, name, amount.to_string(), academic_year_id, now, now],
    )?;
    Ok(id)
}

/// Returns false when no such structure exists. Assigned fees keep the
/// amount they were created with.
pub fn update_fee_structure_amount(
    conn: &Connection,
    fee_structure_id: &str,
    amount: Decimal,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE fee_structures SET amount = ?, updated_at = ? WHERE id = ?",
        params![amount.to_string(), now_stamp(), fee_structure_id],
    )?;
    Ok(changed > 0)
}

pub fn list_fee_structures(conn: &Connection) -> anyhow::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, amount, academic_year_id, updated_at FROM fee_structures
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "amount": r.get::<_, String>(2)?,
                "academicYearId": r.get::<_, Option<String>>(3)?,
                "updatedAt": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
