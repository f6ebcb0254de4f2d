use rust_decimal::Decimal;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semester {
    S1,
    S2,
}

impl Semester {
    pub fn code(self) -> &'static str {
        match self {
            Semester::S1 => "S1",
            Semester::S2 => "S2",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S1" => Some(Semester::S1),
            "S2" => Some(Semester::S2),
            _ => None,
        }
    }
}

/// Which sitting a grade belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    Normal,
    Retake,
}

impl Session {
    pub fn code(self) -> &'static str {
        match self {
            Session::Normal => "normal",
            Session::Retake => "retake",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Session::Normal),
            "retake" => Some(Session::Retake),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GradeStatus {
    Valid,
    Retake,
    Invalid,
}

impl GradeStatus {
    pub fn code(self) -> &'static str {
        match self {
            GradeStatus::Valid => "valid",
            GradeStatus::Retake => "retake",
            GradeStatus::Invalid => "invalid",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Some(GradeStatus::Valid),
            "retake" => Some(GradeStatus::Retake),
            "invalid" => Some(GradeStatus::Invalid),
            _ => None,
        }
    }

    /// Invalid < Retake < Valid.
    #[cfg(test)]
    pub fn rank(self) -> u8 {
        match self {
            GradeStatus::Invalid => 0,
            GradeStatus::Retake => 1,
            GradeStatus::Valid => 2,
        }
    }
}

/// The identity of a grade line, minus the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GradeKey {
    pub student_id: String,
    pub ue_id: String,
    pub academic_year_id: String,
    pub semester: Semester,
}

/// Soft-delete state. A retired Normal row that was promoted points at the
/// retake row that replaced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeState {
    Active,
    Retired { superseded_by: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub id: String,
    pub key: GradeKey,
    pub session: Session,
    pub score: Decimal,
    pub status: GradeStatus,
    pub state: GradeState,
    pub created_at: String,
    pub updated_at: String,
}

impl Grade {
    pub fn is_active(&self) -> bool {
        self.state == GradeState::Active
    }

    pub fn superseded_by(&self) -> Option<&str> {
        match &self.state {
            GradeState::Retired { superseded_by } => superseded_by.as_deref(),
            GradeState::Active => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.key.student_id,
            "ueId": self.key.ue_id,
            "academicYearId": self.key.academic_year_id,
            "semester": self.key.semester.code(),
            "session": self.session.code(),
            "score": self.score.to_string(),
            "status": self.status.code(),
            "isActive": self.is_active(),
            "supersededBy": self.superseded_by(),
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

/// A course (UE). Read-only from the ledger's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: String,
    pub code: String,
    pub name: String,
    pub passing_grade: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeStructure {
    pub id: String,
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl FeeStatus {
    pub fn code(self) -> &'static str {
        match self {
            FeeStatus::Pending => "pending",
            FeeStatus::Partial => "partial",
            FeeStatus::Paid => "paid",
            FeeStatus::Overdue => "overdue",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(FeeStatus::Pending),
            "partial" => Some(FeeStatus::Partial),
            "paid" => Some(FeeStatus::Paid),
            "overdue" => Some(FeeStatus::Overdue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentFee {
    pub id: String,
    pub student_id: String,
    pub fee_structure_id: String,
    pub academic_year_id: String,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub status: FeeStatus,
    pub due_date: String,
    pub created_at: String,
    pub updated_at: String,
}

impl StudentFee {
    pub fn remaining(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "feeStructureId": self.fee_structure_id,
            "academicYearId": self.academic_year_id,
            "totalAmount": self.total_amount.to_string(),
            "paidAmount": self.paid_amount.to_string(),
            "remainingAmount": self.remaining().to_string(),
            "status": self.status.code(),
            "dueDate": self.due_date,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    Check,
    MobileMoney,
    Other,
}

impl PaymentMethod {
    pub fn code(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Check => "check",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "card" => Some(PaymentMethod::Card),
            "check" => Some(PaymentMethod::Check),
            "mobile_money" => Some(PaymentMethod::MobileMoney),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeePayment {
    pub id: String,
    pub student_fee_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
    pub payment_date: String,
    pub recorded_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FeePayment {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "studentFeeId": self.student_fee_id,
            "amount": self.amount.to_string(),
            "paymentMethod": self.payment_method.code(),
            "reference": self.reference,
            "paymentDate": self.payment_date,
            "recordedBy": self.recorded_by,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}
