//! Core domain model for LoanBridge: source loan records, destination
//! person/deal/lead views, and the normalized CRM field value type.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "loanbridge-core";

/// Destination deal identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DealId(pub i64);

impl fmt::Display for DealId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Destination person identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub i64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A CRM field value normalized at the boundary. Destination APIs return
/// custom fields either as bare scalars or as `{"id": ..., "value": ...}`
/// option objects; internal logic only ever sees this tagged form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Labeled(LabeledOption),
    Scalar(JsonValue),
}

/// An enumerated option value carrying both the option id and its display value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledOption {
    pub id: Option<i64>,
    pub value: Option<JsonValue>,
}

impl FieldValue {
    pub fn scalar(value: impl Into<JsonValue>) -> Self {
        FieldValue::Scalar(value.into())
    }

    /// Normalize a raw JSON value into the tagged form.
    pub fn from_json(raw: &JsonValue) -> Option<Self> {
        if raw.is_null() {
            return None;
        }
        if let Some(obj) = raw.as_object() {
            if obj.contains_key("id") || obj.contains_key("value") {
                return Some(FieldValue::Labeled(LabeledOption {
                    id: obj.get("id").and_then(JsonValue::as_i64),
                    value: obj.get("value").filter(|v| !v.is_null()).cloned(),
                }));
            }
        }
        Some(FieldValue::Scalar(raw.clone()))
    }

    /// The underlying scalar payload, unwrapping an option object if present.
    pub fn payload(&self) -> Option<&JsonValue> {
        match self {
            FieldValue::Scalar(v) => (!v.is_null()).then_some(v),
            FieldValue::Labeled(opt) => opt.value.as_ref(),
        }
    }

    pub fn text(&self) -> Option<String> {
        self.payload().map(|v| match v {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn number(&self) -> Option<f64> {
        let payload = self.payload()?;
        match payload {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn option_id(&self) -> Option<i64> {
        match self {
            FieldValue::Labeled(opt) => opt.id,
            FieldValue::Scalar(v) => v.as_i64(),
        }
    }
}

/// Source-system loan status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Application,
    PreApproved,
    GettingThingsRolling,
    InProcess,
    Submitted,
    CondApproval,
    Approved,
    Suspended,
    ClearToClose,
    DocsOut,
    Closed,
    Cancelled,
}

impl LoanStatus {
    /// Parse a raw status value; exact match first, then case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        let status = match normalized.as_str() {
            "application" => Self::Application,
            "pre-approved" => Self::PreApproved,
            "gtr" | "getting things rolling" => Self::GettingThingsRolling,
            "in process" | "loan in process" => Self::InProcess,
            "submitted" => Self::Submitted,
            "cond. approval" => Self::CondApproval,
            "approved" => Self::Approved,
            "suspended" => Self::Suspended,
            "clear to close" => Self::ClearToClose,
            "docs out" => Self::DocsOut,
            "closed" => Self::Closed,
            "cancelled" => Self::Cancelled,
            _ => return None,
        };
        Some(status)
    }

    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }

    /// Closing state that forces the destination deal to "won".
    pub fn is_closing(self) -> bool {
        self == Self::Closed
    }
}

/// Primary-borrower contact block nested in a loan record, optionally
/// carrying co-borrower fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BorrowerBlock {
    pub external_contact_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub annual_income: Option<f64>,
    pub coborrower_annual_income: Option<f64>,
    pub coborrower_first_name: Option<String>,
    pub coborrower_last_name: Option<String>,
    pub coborrower_email: Option<String>,
    pub coborrower_phone: Option<String>,
    pub coborrower_birthdate: Option<NaiveDate>,
}

/// A loan record fetched from the origination system. Read-only from this
/// system's perspective apart from an optional status write-back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub loan_number: Option<String>,
    pub loan_officer: Option<String>,
    pub total_amount: Option<f64>,
    pub base_loan_amount: Option<f64>,
    pub est_closing_date: Option<String>,
    pub pre_approval_sent: Option<String>,
    pub strategy_call: Option<String>,
    pub property_address: Option<String>,
    pub property_city: Option<String>,
    pub property_state: Option<String>,
    pub property_postal_code: Option<String>,
    pub property_type: Option<String>,
    pub loan_type: Option<String>,
    pub loan_purpose: Option<String>,
    pub occupancy: Option<String>,
    pub appraised_value: Option<f64>,
    pub purchase_price: Option<f64>,
    pub down_payment: Option<f64>,
    pub interest_rate: Option<f64>,
    pub term_months: Option<f64>,
    pub funding_fee: Option<String>,
    pub credit_score: Option<f64>,
    pub loan_program: Option<String>,
    pub monthly_payment: Option<f64>,
    pub principal_interest_payment: Option<f64>,
    pub homeowners_insurance: Option<f64>,
    pub supplemental_property_insurance: Option<f64>,
    pub property_tax: Option<f64>,
    pub mortgage_insurance: Option<f64>,
    pub hoa: Option<f64>,
    pub econsent: Option<String>,
    pub le_due: Option<String>,
    pub le_sent: Option<String>,
    pub le_received: Option<String>,
    pub appraisal_ordered: Option<String>,
    pub appraisal_received: Option<String>,
    pub title_received: Option<String>,
    pub insurance_received: Option<String>,
    pub cd_sent: Option<String>,
    pub cd_received: Option<String>,
    pub in_process_or_paid_off: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub borrower: BorrowerBlock,
}

impl LoanRecord {
    pub fn parsed_status(&self) -> Option<LoanStatus> {
        self.status.as_deref().and_then(LoanStatus::parse)
    }

    pub fn is_cancelled(&self) -> bool {
        self.parsed_status().is_some_and(LoanStatus::is_cancelled)
    }
}

/// Destination deal open/won/lost state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

/// A deal as read back from the destination pipeline system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRecord {
    pub id: DealId,
    pub title: Option<String>,
    pub value: Option<f64>,
    pub stage_id: Option<i64>,
    pub status: DealStatus,
    pub active: bool,
    pub person_id: Option<PersonId>,
    pub expected_close_date: Option<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, FieldValue>,
}

impl DealRecord {
    /// Terminal states that must never be overwritten or resurrected.
    pub fn is_archived_or_lost(&self) -> bool {
        !self.active || self.status == DealStatus::Lost
    }

    pub fn custom_text(&self, key: &str) -> Option<String> {
        self.custom_fields.get(key).and_then(FieldValue::text)
    }

    pub fn custom_number(&self, key: &str) -> Option<f64> {
        self.custom_fields.get(key).and_then(FieldValue::number)
    }
}

/// One email entry on a destination person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEntry {
    pub value: String,
    #[serde(default)]
    pub primary: bool,
}

/// A contact as read back from the destination pipeline system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: PersonId,
    pub name: Option<String>,
    #[serde(default)]
    pub emails: Vec<EmailEntry>,
    pub phone: Option<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, FieldValue>,
}

impl Default for DealRecord {
    fn default() -> Self {
        Self {
            id: DealId(0),
            title: None,
            value: None,
            stage_id: None,
            status: DealStatus::Open,
            active: true,
            person_id: None,
            expected_close_date: None,
            custom_fields: BTreeMap::new(),
        }
    }
}

impl Default for PersonId {
    fn default() -> Self {
        PersonId(0)
    }
}

impl PersonRecord {
    /// Exact, case-insensitive match across all stored emails.
    pub fn has_email(&self, email: &str) -> bool {
        self.emails
            .iter()
            .any(|e| e.value.eq_ignore_ascii_case(email))
    }

    pub fn custom_text(&self, key: &str) -> Option<String> {
        self.custom_fields.get(key).and_then(FieldValue::text)
    }
}

/// A pre-sales lead precursor on the destination side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: String,
    pub title: Option<String>,
    pub label: Option<FieldValue>,
    pub person_id: Option<PersonId>,
}

impl LeadRecord {
    pub fn label_text(&self) -> Option<String> {
        self.label.as_ref().and_then(FieldValue::text)
    }
}

/// Why a sync attempt deliberately did nothing. Expected, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cancelled,
    ArchivedOrLost,
    MappedDealGone,
    WrongEntity,
    DeleteEvent,
    OwnerMismatch,
    MissingRecordId,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Cancelled => "cancelled status",
            SkipReason::ArchivedOrLost => "deal archived or lost",
            SkipReason::MappedDealGone => "mapped deal unreachable",
            SkipReason::WrongEntity => "wrong entity type",
            SkipReason::DeleteEvent => "delete not implemented",
            SkipReason::OwnerMismatch => "loan officer filter",
            SkipReason::MissingRecordId => "missing record id",
        };
        f.write_str(text)
    }
}

/// Result of one resolve attempt on the expected path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    Synced { deal_id: DealId },
    Skipped { reason: SkipReason },
}

impl SyncOutcome {
    pub fn deal_id(&self) -> Option<DealId> {
        match self {
            SyncOutcome::Synced { deal_id } => Some(*deal_id),
            SyncOutcome::Skipped { .. } => None,
        }
    }
}

/// Per-record failures are capped so a large bad batch stays reportable.
pub const MAX_BATCH_ERRORS: usize = 10;

/// Aggregate result of a polling or initial-sync batch. One bad record never
/// aborts the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub success: bool,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub fn record_failure(&mut self, message: String) {
        self.failed += 1;
        if self.errors.len() < MAX_BATCH_ERRORS {
            self.errors.push(message);
        }
    }
}

/// Change kinds carried by inbound change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}
