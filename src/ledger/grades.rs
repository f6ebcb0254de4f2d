//! Grade lifecycle: submission, reactivation, retake promotion, soft delete.
//!
//! One active row per (student, UE, academic year, semester, session). Normal
//! rows are retired instead of deleted so a tuple keeps its full history;
//! retake rows only come from promotion or from a retake-session submission.

use crate::audit::{AuditEvent, AuditStatus, Outbox};
use crate::ledger::model::{Course, Grade, GradeKey, GradeState, GradeStatus, Session};
use crate::ledger::rules::{check_score, derive_grade_status};
use crate::ledger::{now_stamp, Actor, LedgerError, LedgerResult};
use crate::store::{GradeFilter, GradeGateway, GradeRows, Scope};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

const ENTITY: &str = "Grade";

#[derive(Debug, Clone)]
pub struct SubmitGrade {
    pub key: GradeKey,
    pub score: Decimal,
    pub session: Session,
    pub status_override: Option<GradeStatus>,
}

/// Which branch of `submit_grade` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Created,
    Reactivated,
    Updated,
}

impl SubmitOutcome {
    pub fn code(self) -> &'static str {
        match self {
            SubmitOutcome::Created => "created",
            SubmitOutcome::Reactivated => "reactivated",
            SubmitOutcome::Updated => "updated",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            SubmitOutcome::Created => 201,
            SubmitOutcome::Reactivated | SubmitOutcome::Updated => 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub grade: Grade,
    pub outcome: SubmitOutcome,
}

#[derive(Debug, Clone)]
pub struct Promoted {
    pub retake: Grade,
    /// The source row as it stands after promotion.
    pub source: Grade,
    pub source_was_active: bool,
}

/// Mutable grade fields. Identity fields are not representable here.
#[derive(Debug, Clone, Default)]
pub struct GradePatch {
    pub score: Option<Decimal>,
    pub status: Option<GradeStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusShare {
    pub count: usize,
    pub percent: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CourseStats {
    pub ue_id: String,
    pub total: usize,
    pub valid: StatusShare,
    pub retake: StatusShare,
    pub invalid: StatusShare,
    /// Mean over Valid rows only.
    pub valid_mean: Option<Decimal>,
}

impl CourseStats {
    pub fn to_json(&self) -> serde_json::Value {
        let share = |s: &StatusShare| json!({ "count": s.count, "percent": format!("{:.2}", s.percent) });
        json!({
            "ueId": self.ue_id,
            "total": self.total,
            "byStatus": {
                "valid": share(&self.valid),
                "retake": share(&self.retake),
                "invalid": share(&self.invalid),
            },
            "validMean": self.valid_mean.map(|m| m.to_string()),
        })
    }
}

pub struct GradeLedger<G> {
    gateway: G,
    actor: Actor,
    outbox: Outbox,
}

fn require_refs(rows: &dyn GradeRows, key: &GradeKey) -> LedgerResult<Course> {
    if !rows.student_exists(&key.student_id)? {
        return Err(LedgerError::not_found("student", &key.student_id));
    }
    let course = rows
        .course(&key.ue_id)?
        .ok_or_else(|| LedgerError::not_found("ue", &key.ue_id))?;
    if !rows.academic_year_exists(&key.academic_year_id)? {
        return Err(LedgerError::not_found("academic year", &key.academic_year_id));
    }
    Ok(course)
}

fn require_course(rows: &dyn GradeRows, ue_id: &str) -> LedgerResult<Course> {
    rows.course(ue_id)?
        .ok_or_else(|| LedgerError::not_found("ue", ue_id))
}

fn key_json(key: &GradeKey) -> serde_json::Value {
    json!({
        "studentId": key.student_id,
        "ueId": key.ue_id,
        "academicYearId": key.academic_year_id,
        "semester": key.semester.code(),
    })
}

fn share(count: usize, total: usize) -> StatusShare {
    let percent = if total == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(count as u64) * Decimal::ONE_HUNDRED / Decimal::from(total as u64)).round_dp(2)
    };
    StatusShare { count, percent }
}

impl<G: GradeGateway> GradeLedger<G> {
    pub fn new(gateway: G, actor: Actor) -> Self {
        Self {
            gateway,
            actor,
            outbox: Outbox::default(),
        }
    }

    /// Audit events collected so far, for delivery after the operation.
    pub fn take_events(&mut self) -> Vec<AuditEvent> {
        self.outbox.drain()
    }

    fn emit(&mut self, event: AuditEvent) {
        self.outbox.push(event.by(&self.actor));
    }

    /// Every call leaves an `attempt` event followed by one event for the
    /// branch that fired; both carry the status computed for the score.
    pub fn submit_grade(&mut self, input: SubmitGrade) -> LedgerResult<Submitted> {
        let mut computed = None;
        let result = self.submit_in_tx(&input, &mut computed);
        let status_code = computed.map(GradeStatus::code);
        let override_code = input.status_override.map(|s| s.code());
        self.emit(
            AuditEvent::new(
                "GRADE_SUBMIT",
                ENTITY,
                AuditStatus::Success,
                format!("grade submission ({})", input.session.code()),
            )
            .with_metadata(json!({
                "branch": "attempt",
                "key": key_json(&input.key),
                "session": input.session.code(),
                "score": input.score.to_string(),
                "status": status_code,
                "statusOverride": override_code,
            })),
        );
        match &result {
            Ok(s) => {
                debug!(grade_id = %s.grade.id, branch = s.outcome.code(), "grade submitted");
                self.emit(
                    AuditEvent::success(
                        "GRADE_SUBMIT",
                        ENTITY,
                        &s.grade.id,
                        format!("grade {} ({})", s.outcome.code(), s.grade.status.code()),
                    )
                    .with_metadata(json!({
                        "branch": s.outcome.code(),
                        "status": s.grade.status.code(),
                        "session": s.grade.session.code(),
                        "score": s.grade.score.to_string(),
                    })),
                );
            }
            Err(e) => {
                let branch = if e.is_conflict() { "conflict" } else { "rejected" };
                if e.is_conflict() {
                    info!(key = ?input.key, "normal grade already exists");
                }
                self.emit(AuditEvent::failure("GRADE_SUBMIT", ENTITY, e).with_metadata(json!({
                    "branch": branch,
                    "key": key_json(&input.key),
                    "session": input.session.code(),
                    "status": status_code,
                    "statusOverride": override_code,
                })));
            }
        }
        result
    }

    /// `computed` is set as soon as the course is known, so failed branches
    /// can still report the status the score would have had.
    fn submit_in_tx(
        &mut self,
        input: &SubmitGrade,
        computed: &mut Option<GradeStatus>,
    ) -> LedgerResult<Submitted> {
        let score = check_score(input.score)?;
        self.gateway.grade_tx(|rows| {
            let course = require_refs(rows, &input.key)?;
            let status = input
                .status_override
                .unwrap_or_else(|| derive_grade_status(score, course.passing_grade));
            *computed = Some(status);
            let now = now_stamp();

            match input.session {
                Session::Normal => {
                    if let Some(existing) = rows.newest_grade(&input.key, Session::Normal, Scope::Active)? {
                        return Err(LedgerError::conflict(
                            "normal grade already exists",
                            Some(existing.to_json()),
                            Some("use grades.update to change the score, or grades.promoteToRetake to open a retake"),
                        ));
                    }
                    if let Some(mut retired) =
                        rows.newest_grade(&input.key, Session::Normal, Scope::Retired)?
                    {
                        retired.score = score;
                        retired.status = status;
                        retired.state = GradeState::Active;
                        retired.updated_at = now;
                        rows.update_grade(&retired)?;
                        return Ok(Submitted {
                            grade: retired,
                            outcome: SubmitOutcome::Reactivated,
                        });
                    }
                }
                Session::Retake => {
                    let found = match rows.newest_grade(&input.key, Session::Retake, Scope::Active)? {
                        Some(g) => Some(g),
                        None => rows.newest_grade(&input.key, Session::Retake, Scope::Any)?,
                    };
                    if let Some(mut existing) = found {
                        // A retired retake row is brought back with the new score.
                        let outcome = if existing.is_active() {
                            SubmitOutcome::Updated
                        } else {
                            existing.state = GradeState::Active;
                            SubmitOutcome::Reactivated
                        };
                        existing.score = score;
                        existing.status = status;
                        existing.updated_at = now;
                        rows.update_grade(&existing)?;
                        return Ok(Submitted {
                            grade: existing,
                            outcome,
                        });
                    }
                }
            }

            let grade = Grade {
                id: Uuid::new_v4().to_string(),
                key: input.key.clone(),
                session: input.session,
                score,
                status,
                state: GradeState::Active,
                created_at: now.clone(),
                updated_at: now,
            };
            rows.insert_grade(&grade)?;
            Ok(Submitted {
                grade,
                outcome: SubmitOutcome::Created,
            })
        })
    }

    /// Retires the source row (if active) and opens a retake-session row for
    /// the same tuple.
    pub fn promote_to_retake(
        &mut self,
        grade_id: &str,
        new_score: Option<Decimal>,
    ) -> LedgerResult<Promoted> {
        let result = self.promote_in_tx(grade_id, new_score);
        match &result {
            Ok(p) => self.emit(
                AuditEvent::success(
                    "GRADE_RETAKE",
                    ENTITY,
                    &p.retake.id,
                    format!("retake opened from grade {}", p.source.id),
                )
                .with_metadata(json!({
                    "branch": "promoted",
                    "sourceGradeId": p.source.id,
                    "sourceWasActive": p.source_was_active,
                    "status": p.retake.status.code(),
                    "score": p.retake.score.to_string(),
                })),
            ),
            Err(e) => self.emit(
                AuditEvent::failure("GRADE_RETAKE", ENTITY, e)
                    .with_entity_id(Some(grade_id))
                    .with_metadata(json!({ "branch": if e.is_conflict() { "conflict" } else { "rejected" } })),
            ),
        }
        result
    }

    fn promote_in_tx(&mut self, grade_id: &str, new_score: Option<Decimal>) -> LedgerResult<Promoted> {
        let new_score = new_score.map(check_score).transpose()?;
        self.gateway.grade_tx(|rows| {
            let mut source = rows
                .grade(grade_id)?
                .ok_or_else(|| LedgerError::not_found("grade", grade_id))?;
            if let Some(existing) = rows.newest_grade(&source.key, Session::Retake, Scope::Active)? {
                return Err(LedgerError::conflict(
                    "retake grade already exists",
                    Some(existing.to_json()),
                    Some("update the existing retake with grades.update"),
                ));
            }
            let course = require_course(rows, &source.key.ue_id)?;
            let now = now_stamp();
            let retake_id = Uuid::new_v4().to_string();

            let source_was_active = source.is_active();
            if source_was_active {
                source.state = GradeState::Retired {
                    superseded_by: Some(retake_id.clone()),
                };
                source.updated_at = now.clone();
                rows.update_grade(&source)?;
            }

            let score = new_score.unwrap_or(source.score);
            let retake = Grade {
                id: retake_id,
                key: source.key.clone(),
                session: Session::Retake,
                score,
                status: derive_grade_status(score, course.passing_grade),
                state: GradeState::Active,
                created_at: now.clone(),
                updated_at: now,
            };
            rows.insert_grade(&retake)?;

            Ok(Promoted {
                retake,
                source,
                source_was_active,
            })
        })
    }

    /// A score change re-derives the status unless the same patch carries an
    /// explicit status.
    pub fn update_grade(&mut self, grade_id: &str, patch: GradePatch) -> LedgerResult<Grade> {
        let result = self.update_in_tx(grade_id, &patch);
        match &result {
            Ok(g) => self.emit(
                AuditEvent::success("GRADE_UPDATE", ENTITY, &g.id, "grade updated").with_metadata(json!({
                    "status": g.status.code(),
                    "score": g.score.to_string(),
                    "statusExplicit": patch.status.is_some(),
                })),
            ),
            Err(e) => self.emit(AuditEvent::failure("GRADE_UPDATE", ENTITY, e).with_entity_id(Some(grade_id))),
        }
        result
    }

    fn update_in_tx(&mut self, grade_id: &str, patch: &GradePatch) -> LedgerResult<Grade> {
        let score = patch.score.map(check_score).transpose()?;
        self.gateway.grade_tx(|rows| {
            let mut grade = rows
                .grade(grade_id)?
                .ok_or_else(|| LedgerError::not_found("grade", grade_id))?;

            if let Some(score) = score {
                grade.score = score;
                grade.status = match patch.status {
                    Some(explicit) => explicit,
                    None => {
                        let course = require_course(rows, &grade.key.ue_id)?;
                        derive_grade_status(score, course.passing_grade)
                    }
                };
            } else if let Some(explicit) = patch.status {
                grade.status = explicit;
            }
            grade.updated_at = now_stamp();
            rows.update_grade(&grade)?;
            Ok(grade)
        })
    }

    /// Soft delete. Only active rows can be deactivated.
    pub fn deactivate_grade(&mut self, grade_id: &str) -> LedgerResult<Grade> {
        let result = self.gateway.grade_tx(|rows| {
            let mut grade = rows
                .grade(grade_id)?
                .filter(Grade::is_active)
                .ok_or_else(|| LedgerError::not_found("grade", grade_id))?;
            grade.state = GradeState::Retired { superseded_by: None };
            grade.updated_at = now_stamp();
            rows.update_grade(&grade)?;
            Ok(grade)
        });
        match &result {
            Ok(g) => self.emit(AuditEvent::success("GRADE_DEACTIVATE", ENTITY, &g.id, "grade deactivated")),
            Err(e) => self.emit(AuditEvent::failure("GRADE_DEACTIVATE", ENTITY, e).with_entity_id(Some(grade_id))),
        }
        result
    }

    pub fn grade(&self, grade_id: &str) -> LedgerResult<Grade> {
        self.gateway.grade_read(|rows| {
            rows.grade(grade_id)?
                .ok_or_else(|| LedgerError::not_found("grade", grade_id))
        })
    }

    pub fn list_grades(&self, filter: &GradeFilter) -> LedgerResult<Vec<Grade>> {
        self.gateway.grade_read(|rows| rows.active_grades(filter))
    }

    /// Every row of the tuple regardless of state, newest first.
    pub fn grade_history(&self, key: &GradeKey) -> LedgerResult<Vec<Grade>> {
        self.gateway.grade_read(|rows| rows.grade_history(key))
    }

    pub fn course_stats(&self, ue_id: &str, academic_year_id: Option<&str>) -> LedgerResult<CourseStats> {
        self.gateway.grade_read(|rows| {
            require_course(rows, ue_id)?;
            let grades = rows.active_grades(&GradeFilter {
                ue_id: Some(ue_id.to_string()),
                academic_year_id: academic_year_id.map(str::to_string),
                ..GradeFilter::default()
            })?;

            let total = grades.len();
            let count = |s: GradeStatus| grades.iter().filter(|g| g.status == s).count();
            let valid_scores: Vec<Decimal> = grades
                .iter()
                .filter(|g| g.status == GradeStatus::Valid)
                .map(|g| g.score)
                .collect();
            let valid_mean = if valid_scores.is_empty() {
                None
            } else {
                let sum: Decimal = valid_scores.iter().copied().sum();
                Some((sum / Decimal::from(valid_scores.len() as u64)).round_dp(2))
            };

            Ok(CourseStats {
                ue_id: ue_id.to_string(),
                total,
                valid: share(count(GradeStatus::Valid), total),
                retake: share(count(GradeStatus::Retake), total),
                invalid: share(count(GradeStatus::Invalid), total),
                valid_mean,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::model::Semester;
    use crate::store::memory::MemoryStore;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).expect("decimal")
    }

    fn key() -> GradeKey {
        GradeKey {
            student_id: "stu-1".into(),
            ue_id: "ue-math".into(),
            academic_year_id: "ay-2026".into(),
            semester: Semester::S1,
        }
    }

    fn ledger() -> GradeLedger<MemoryStore> {
        let mut store = MemoryStore::new();
        store.add_student("stu-1");
        store.add_student("stu-2");
        store.add_academic_year("ay-2026");
        store.add_course("ue-math", d("60"));
        GradeLedger::new(store, Actor::default())
    }

    fn submit(l: &mut GradeLedger<MemoryStore>, score: &str) -> LedgerResult<Submitted> {
        l.submit_grade(SubmitGrade {
            key: key(),
            score: d(score),
            session: Session::Normal,
            status_override: None,
        })
    }

    fn active_normal_count(l: &GradeLedger<MemoryStore>) -> usize {
        l.gateway
            .grades()
            .iter()
            .filter(|g| g.key == key() && g.session == Session::Normal && g.is_active())
            .count()
    }

    #[test]
    fn duplicate_normal_submission_conflicts_and_echoes_existing() {
        let mut l = ledger();
        let first = submit(&mut l, "75").expect("create");
        assert_eq!(first.outcome, SubmitOutcome::Created);
        assert_eq!(first.outcome.http_status(), 201);
        assert_eq!(first.grade.status, GradeStatus::Valid);

        let e = submit(&mut l, "40").expect_err("duplicate");
        assert_eq!(e.http_status(), 409);
        let details = e.details().expect("details");
        assert_eq!(details["existing"]["id"], first.grade.id.as_str());
        assert!(details["hint"].as_str().unwrap_or("").contains("promoteToRetake"));

        let stored = l.grade(&first.grade.id).expect("stored");
        assert_eq!(stored.score, d("75"));

        let events = l.take_events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].metadata["branch"], "attempt");
        assert_eq!(events[0].metadata["status"], "valid");
        assert_eq!(events[1].metadata["branch"], "created");
        assert_eq!(events[1].metadata["status"], "valid");
        assert_eq!(events[2].metadata["branch"], "attempt");
        assert_eq!(events[2].metadata["score"], "40");
        assert_eq!(events[3].status, AuditStatus::Warning);
        assert_eq!(events[3].metadata["branch"], "conflict");
        assert_eq!(events[3].metadata["status"], "invalid");
    }

    #[test]
    fn deactivated_normal_row_is_reactivated_not_duplicated() {
        let mut l = ledger();
        let first = submit(&mut l, "75").expect("create");
        l.deactivate_grade(&first.grade.id).expect("deactivate");
        assert_eq!(active_normal_count(&l), 0);

        let again = submit(&mut l, "50").expect("reactivate");
        assert_eq!(again.outcome, SubmitOutcome::Reactivated);
        assert_eq!(again.outcome.http_status(), 200);
        assert_eq!(again.grade.id, first.grade.id);
        assert_eq!(again.grade.status, GradeStatus::Retake);

        let read = l.grade(&first.grade.id).expect("read");
        assert!(read.is_active());
        assert_eq!(read.score, d("50"));
        assert_eq!(l.gateway.grades().len(), 1);
    }

    #[test]
    fn promotion_retires_source_and_blocks_second_retake() {
        let mut l = ledger();
        let first = submit(&mut l, "50").expect("create");

        let promoted = l
            .promote_to_retake(&first.grade.id, Some(d("65")))
            .expect("promote");
        assert!(promoted.source_was_active);
        assert!(!promoted.source.is_active());
        assert_eq!(promoted.source.superseded_by(), Some(promoted.retake.id.as_str()));
        assert_eq!(promoted.retake.session, Session::Retake);
        assert_eq!(promoted.retake.status, GradeStatus::Valid);
        assert_eq!(promoted.retake.score, d("65"));

        let e = l
            .promote_to_retake(&first.grade.id, None)
            .expect_err("second retake");
        assert!(e.is_conflict());
        let details = e.details().expect("details");
        assert_eq!(details["existing"]["id"], promoted.retake.id.as_str());

        let history = l.grade_history(&key()).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, promoted.retake.id);
        assert_eq!(history[1].id, first.grade.id);
    }

    #[test]
    fn promotion_without_new_score_carries_source_score() {
        let mut l = ledger();
        let first = submit(&mut l, "45").expect("create");
        let promoted = l.promote_to_retake(&first.grade.id, None).expect("promote");
        assert_eq!(promoted.retake.score, d("45"));
        assert_eq!(promoted.retake.status, GradeStatus::Retake);
    }

    #[test]
    fn promotion_of_missing_grade_is_not_found() {
        let mut l = ledger();
        let e = l.promote_to_retake("nope", None).expect_err("missing");
        assert_eq!(e.http_status(), 404);
    }

    #[test]
    fn deactivated_retake_allows_another_promotion() {
        let mut l = ledger();
        let first = submit(&mut l, "30").expect("create");
        let p1 = l.promote_to_retake(&first.grade.id, None).expect("promote");
        l.deactivate_grade(&p1.retake.id).expect("retire retake");
        let p2 = l.promote_to_retake(&p1.retake.id, Some(d("70"))).expect("promote again");
        assert!(!p2.source_was_active);
        assert_eq!(p2.retake.status, GradeStatus::Valid);
    }

    #[test]
    fn retake_session_submission_updates_in_place() {
        let mut l = ledger();
        let mut input = SubmitGrade {
            key: key(),
            score: d("30"),
            session: Session::Retake,
            status_override: None,
        };
        let created = l.submit_grade(input.clone()).expect("create retake");
        assert_eq!(created.outcome, SubmitOutcome::Created);

        input.score = d("61");
        let updated = l.submit_grade(input).expect("update retake");
        assert_eq!(updated.outcome, SubmitOutcome::Updated);
        assert_eq!(updated.grade.id, created.grade.id);
        assert_eq!(updated.grade.status, GradeStatus::Valid);
        assert_eq!(l.gateway.grades().len(), 1);
    }

    #[test]
    fn retake_submission_reactivates_a_retired_retake() {
        let mut l = ledger();
        let first = submit(&mut l, "30").expect("create");
        let promoted = l.promote_to_retake(&first.grade.id, None).expect("promote");
        l.deactivate_grade(&promoted.retake.id).expect("retire retake");

        let back = l
            .submit_grade(SubmitGrade {
                key: key(),
                score: d("88"),
                session: Session::Retake,
                status_override: None,
            })
            .expect("resubmit retake");
        assert_eq!(back.outcome, SubmitOutcome::Reactivated);
        assert_eq!(back.grade.id, promoted.retake.id);
        assert!(back.grade.is_active());
        assert_eq!(back.grade.status, GradeStatus::Valid);

        let listed = l
            .list_grades(&GradeFilter {
                student_id: Some("stu-1".into()),
                ..GradeFilter::default()
            })
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].score, d("88"));
        let stats = l.course_stats("ue-math", None).expect("stats");
        assert_eq!(stats.valid.count, 1);
    }

    #[test]
    fn missing_references_name_the_entity() {
        let mut l = ledger();
        let mut input = SubmitGrade {
            key: key(),
            score: d("50"),
            session: Session::Normal,
            status_override: None,
        };
        input.key.student_id = "ghost".into();
        let e = l.submit_grade(input.clone()).expect_err("student");
        assert_eq!(e.to_string(), "student not found");

        input.key.student_id = "stu-1".into();
        input.key.ue_id = "ue-none".into();
        let e = l.submit_grade(input.clone()).expect_err("ue");
        assert_eq!(e.to_string(), "ue not found");

        input.key.ue_id = "ue-math".into();
        input.key.academic_year_id = "ay-none".into();
        let e = l.submit_grade(input).expect_err("year");
        assert_eq!(e.to_string(), "academic year not found");
    }

    #[test]
    fn out_of_range_scores_are_rejected_before_storage() {
        let mut l = ledger();
        for bad in ["100.5", "-1", "55.555"] {
            let e = submit(&mut l, bad).expect_err(bad);
            assert_eq!(e.code(), "bad_params");
        }
        assert!(l.gateway.grades().is_empty());
    }

    #[test]
    fn status_override_wins_on_submission() {
        let mut l = ledger();
        let s = l
            .submit_grade(SubmitGrade {
                key: key(),
                score: d("20"),
                session: Session::Normal,
                status_override: Some(GradeStatus::Valid),
            })
            .expect("submit");
        assert_eq!(s.grade.status, GradeStatus::Valid);
    }

    #[test]
    fn update_recomputes_status_unless_explicit() {
        let mut l = ledger();
        let g = submit(&mut l, "75").expect("create").grade;

        let u = l
            .update_grade(
                &g.id,
                GradePatch {
                    score: Some(d("43")),
                    status: None,
                },
            )
            .expect("score only");
        assert_eq!(u.status, GradeStatus::Retake);

        let u = l
            .update_grade(
                &g.id,
                GradePatch {
                    score: Some(d("10")),
                    status: Some(GradeStatus::Valid),
                },
            )
            .expect("explicit");
        assert_eq!(u.status, GradeStatus::Valid);

        let u = l
            .update_grade(
                &g.id,
                GradePatch {
                    score: Some(d("12")),
                    status: None,
                },
            )
            .expect("score only again");
        assert_eq!(u.status, GradeStatus::Invalid);
        assert_eq!(u.key, key());
    }

    #[test]
    fn deactivating_twice_is_not_found() {
        let mut l = ledger();
        let g = submit(&mut l, "75").expect("create").grade;
        l.deactivate_grade(&g.id).expect("first");
        let e = l.deactivate_grade(&g.id).expect_err("second");
        assert_eq!(e.http_status(), 404);
    }

    #[test]
    fn at_most_one_active_normal_row_across_sequences() {
        let mut l = ledger();
        let scores = ["10", "80", "55", "42", "99", "0"];
        for (i, s) in scores.iter().enumerate() {
            match submit(&mut l, s) {
                Ok(sub) => {
                    if i % 2 == 0 {
                        let _ = l.promote_to_retake(&sub.grade.id, None);
                    } else {
                        let _ = l.deactivate_grade(&sub.grade.id);
                    }
                }
                Err(e) => assert!(e.is_conflict()),
            }
            assert!(active_normal_count(&l) <= 1);
            let active_retakes = l
                .gateway
                .grades()
                .iter()
                .filter(|g| g.session == Session::Retake && g.is_active())
                .count();
            assert!(active_retakes <= 1);
        }
    }

    #[test]
    fn stats_average_valid_scores_only() {
        let mut l = ledger();
        let mut submit_for = |student: &str, score: &str| {
            let mut k = key();
            k.student_id = student.into();
            l.submit_grade(SubmitGrade {
                key: k,
                score: d(score),
                session: Session::Normal,
                status_override: None,
            })
            .expect("submit")
        };
        submit_for("stu-1", "80");
        submit_for("stu-2", "45");

        let stats = l.course_stats("ue-math", None).expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.valid.count, 1);
        assert_eq!(stats.retake.count, 1);
        assert_eq!(stats.invalid.count, 0);
        assert_eq!(stats.valid.percent, d("50"));
        assert_eq!(stats.valid_mean, Some(d("80")));

        let json = stats.to_json();
        assert_eq!(json["byStatus"]["retake"]["count"], 1);
        assert!(l.course_stats("ue-none", None).is_err());
    }

    #[test]
    fn stats_mean_is_null_without_valid_rows() {
        let l = ledger();
        let stats = l.course_stats("ue-math", Some("ay-2026")).expect("stats");
        assert_eq!(stats.total, 0);
        assert_eq!(stats.valid_mean, None);
        assert_eq!(stats.invalid.percent, Decimal::ZERO);
    }
}
