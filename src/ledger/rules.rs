use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::model::{FeeStatus, GradeStatus};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;

const MAX_SCALE: u32 = 2;

/// Lower bound of the retake band, as a fraction of the passing grade.
fn retake_floor(passing_grade: Decimal) -> Decimal {
    passing_grade * Decimal::new(7, 1)
}

/// score >= passing => Valid, 70% of passing <= score < passing => Retake,
/// anything below => Invalid.
pub fn derive_grade_status(score: Decimal, passing_grade: Decimal) -> GradeStatus {
    if score >= passing_grade {
        GradeStatus::Valid
    } else if score >= retake_floor(passing_grade) {
        GradeStatus::Retake
    } else {
        GradeStatus::Invalid
    }
}

/// Three-way rule recomputed after every fee mutation. Overdue is a
/// read-side override and never comes out of here.
pub fn derive_fee_status(paid_amount: Decimal, total_amount: Decimal) -> FeeStatus {
    if paid_amount >= total_amount {
        FeeStatus::Paid
    } else if paid_amount > Decimal::ZERO {
        FeeStatus::Partial
    } else {
        FeeStatus::Pending
    }
}

/// Accepts JSON numbers and numeric strings.
pub fn decimal_from_json(v: &Value) -> Option<Decimal> {
    let raw = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

fn check_scale(field: &str, d: Decimal) -> LedgerResult<Decimal> {
    let d = d.normalize();
    if d.scale() > MAX_SCALE {
        let mut details = serde_json::Map::new();
        details.insert(field.to_string(), Value::String(d.to_string()));
        return Err(LedgerError::validation_with(
            format!("{field} must have at most {MAX_SCALE} decimal places"),
            Value::Object(details),
        ));
    }
    Ok(d)
}

/// A score lies in [0, 100] with at most two decimals.
pub fn check_score(score: Decimal) -> LedgerResult<Decimal> {
    if score < Decimal::ZERO || score > Decimal::ONE_HUNDRED {
        return Err(LedgerError::validation_with(
            "score must be between 0 and 100",
            json!({ "score": score.to_string() }),
        ));
    }
    check_scale("score", score)
}

pub fn check_passing_grade(passing_grade: Decimal) -> LedgerResult<Decimal> {
    if passing_grade < Decimal::ZERO || passing_grade > Decimal::ONE_HUNDRED {
        return Err(LedgerError::validation_with(
            "passingGrade must be between 0 and 100",
            json!({ "passingGrade": passing_grade.to_string() }),
        ));
    }
    check_scale("passingGrade", passing_grade)
}

/// Money amounts are strictly positive with at most two decimals.
pub fn check_amount(amount: Decimal) -> LedgerResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation_with(
            "amount must be greater than 0",
            json!({ "amount": amount.to_string() }),
        ));
    }
    check_scale("amount", amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).expect("decimal")
    }

    #[test]
    fn status_thresholds_at_the_boundaries() {
        let pg = d("60");
        assert_eq!(derive_grade_status(pg, pg), GradeStatus::Valid);
        assert_eq!(derive_grade_status(d("42"), pg), GradeStatus::Retake);
        assert_eq!(derive_grade_status(d("41.99"), pg), GradeStatus::Invalid);
        assert_eq!(derive_grade_status(d("59.99"), pg), GradeStatus::Retake);
        assert_eq!(derive_grade_status(d("100"), pg), GradeStatus::Valid);
        assert_eq!(derive_grade_status(d("0"), pg), GradeStatus::Invalid);
    }

    #[test]
    fn status_is_monotonic_in_score() {
        for pg in ["0", "10", "50", "60", "75.5", "100"] {
            let pg = d(pg);
            let mut prev = 0u8;
            // 0.00 .. 100.00 in 0.25 steps
            for step in 0..=400 {
                let score = Decimal::new(step * 25, 2);
                let rank = derive_grade_status(score, pg).rank();
                assert!(rank >= prev, "rank dropped at score {score} pg {pg}");
                prev = rank;
            }
        }
    }

    #[test]
    fn fee_status_three_way_rule() {
        let total = d("1000");
        assert_eq!(derive_fee_status(Decimal::ZERO, total), FeeStatus::Pending);
        assert_eq!(derive_fee_status(d("0.01"), total), FeeStatus::Partial);
        assert_eq!(derive_fee_status(d("999.99"), total), FeeStatus::Partial);
        assert_eq!(derive_fee_status(total, total), FeeStatus::Paid);
    }

    #[test]
    fn score_validation_rejects_range_and_precision() {
        assert!(check_score(d("-0.01")).is_err());
        assert!(check_score(d("100.01")).is_err());
        assert!(check_score(d("12.345")).is_err());
        assert_eq!(check_score(d("12.50")).expect("ok"), d("12.5"));
        assert_eq!(check_score(d("0")).expect("ok"), Decimal::ZERO);
    }

    #[test]
    fn amount_validation_requires_positive() {
        assert!(check_amount(Decimal::ZERO).is_err());
        assert!(check_amount(d("-5")).is_err());
        assert!(check_amount(d("1.001")).is_err());
        assert_eq!(check_amount(d("600.00")).expect("ok"), d("600"));
    }

    #[test]
    fn decimal_from_json_accepts_numbers_and_strings() {
        assert_eq!(decimal_from_json(&json!(75)), Some(d("75")));
        assert_eq!(decimal_from_json(&json!(75.5)), Some(d("75.5")));
        assert_eq!(decimal_from_json(&json!(" 42.10 ")), Some(d("42.10")));
        assert_eq!(decimal_from_json(&json!("abc")), None);
        assert_eq!(decimal_from_json(&json!(null)), None);
        assert_eq!(decimal_from_json(&json!(true)), None);
    }
}
