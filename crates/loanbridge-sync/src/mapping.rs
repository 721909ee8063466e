//! Pure loan-to-deal field mapping. Everything here is deterministic over
//! its inputs; no I/O, so the translation rules are testable in isolation.

use loanbridge_core::{LoanRecord, LoanStatus};
use serde_json::json;
use tracing::warn;

use loanbridge_adapters::Fields;

use crate::config::DestSchema;

/// Pipeline stage for a source status. `None` means leave the stage alone.
pub fn map_stage(raw_status: &str, schema: &DestSchema) -> Option<i64> {
    let status = match LoanStatus::parse(raw_status) {
        Some(status) => status,
        None => {
            warn!(status = raw_status, "unmapped loan status, stage unchanged");
            return None;
        }
    };
    let stage = match status {
        LoanStatus::Application => schema.stage_application_in,
        LoanStatus::PreApproved => schema.stage_pre_approved,
        LoanStatus::GettingThingsRolling => schema.stage_getting_things_rolling,
        LoanStatus::InProcess
        | LoanStatus::Submitted
        | LoanStatus::CondApproval
        | LoanStatus::Approved
        | LoanStatus::Suspended => schema.stage_in_process,
        LoanStatus::ClearToClose | LoanStatus::DocsOut | LoanStatus::Closed => {
            schema.stage_clear_to_close
        }
        // Never advanced through the pipeline; callers guard this earlier.
        LoanStatus::Cancelled => return None,
    };
    Some(stage)
}

/// Deal label option id for a source status. Unlike stages, every status
/// keeps its own label so the board shows the fine-grained state.
pub fn map_label(raw_status: &str, schema: &DestSchema) -> Option<i64> {
    let status = match LoanStatus::parse(raw_status) {
        Some(status) => status,
        None => {
            warn!(status = raw_status, "unmapped loan status, label unchanged");
            return None;
        }
    };
    let label = match status {
        LoanStatus::Application => schema.label_application,
        LoanStatus::PreApproved => schema.label_pre_approved,
        LoanStatus::GettingThingsRolling => schema.label_getting_things_rolling,
        LoanStatus::InProcess => schema.label_in_process,
        LoanStatus::Submitted => schema.label_submitted,
        LoanStatus::CondApproval => schema.label_cond_approval,
        LoanStatus::Approved => schema.label_approved,
        LoanStatus::Suspended => schema.label_suspended,
        LoanStatus::ClearToClose => schema.label_clear_to_close,
        LoanStatus::DocsOut => schema.label_docs_out,
        LoanStatus::Closed => schema.label_closed,
        LoanStatus::Cancelled => return None,
    };
    Some(label)
}

/// Deal title: `"{borrower} - Loan # {number}"`, degrading gracefully when
/// either side is missing.
pub fn format_deal_title(loan: &LoanRecord) -> String {
    let borrower = loan
        .borrower
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or(loan.name.as_deref())
        .unwrap_or("Unknown Borrower");
    match loan.loan_number.as_deref().map(str::trim) {
        Some(number) if !number.is_empty() => format!("{borrower} - Loan # {number}"),
        _ => borrower.to_string(),
    }
}

/// Assemble a one-line property address. Prequalification files carry a
/// placeholder street that must not leak into the CRM.
pub fn format_property_address(loan: &LoanRecord) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(street) = loan.property_address.as_deref().map(str::trim) {
        if !street.is_empty() && !street.to_ascii_uppercase().contains("PREQUALIFICATION") {
            parts.push(street.to_string());
        }
    }
    if let Some(city) = loan.property_city.as_deref().map(str::trim) {
        if !city.is_empty() {
            parts.push(city.to_string());
        }
    }
    let state = loan.property_state.as_deref().map(str::trim).unwrap_or("");
    let postal = loan
        .property_postal_code
        .as_deref()
        .map(str::trim)
        .unwrap_or("");
    match (state.is_empty(), postal.is_empty()) {
        (false, false) => parts.push(format!("{state} {postal}")),
        (false, true) => parts.push(state.to_string()),
        (true, false) => parts.push(postal.to_string()),
        (true, true) => {}
    }

    if parts.is_empty() {
        None
    } else {
        Some(format!("{}, USA", parts.join(", ")))
    }
}

/// Truncate an ISO datetime to its date portion. Already-bare dates pass
/// through untouched.
pub fn date_only(raw: &str) -> &str {
    raw.split('T').next().unwrap_or(raw)
}

/// Funding-fee fields arrive as free text like `"2.15% ($7,099.75)"`; pull
/// out the first number in the text.
pub fn extract_leading_number(raw: &str) -> Option<f64> {
    let mut digits = String::new();
    let mut seen_digit = false;
    for ch in raw.chars() {
        if ch.is_ascii_digit() || (ch == '.' && seen_digit) {
            digits.push(ch);
            seen_digit = true;
        } else if ch == ',' && seen_digit {
            continue;
        } else if seen_digit {
            break;
        }
    }
    digits.parse().ok()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Down payment as a percentage of purchase price, from the gap between
/// purchase price and base loan amount.
pub fn down_payment_percent(loan: &LoanRecord) -> Option<f64> {
    let purchase = loan.purchase_price.filter(|p| *p > 0.0)?;
    let base = loan.base_loan_amount?;
    Some(round2((purchase - base) / purchase * 100.0))
}

fn occupancy_option(raw: &str, schema: &DestSchema) -> Option<i64> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "primaryresidence" | "primary residence" | "primary" => Some(schema.occupancy_primary_id),
        "secondhome" | "second home" | "secondary residence" => {
            Some(schema.occupancy_second_home_id)
        }
        "investment" | "investment property" | "investor" => Some(schema.occupancy_investment_id),
        _ => {
            warn!(occupancy = raw, "unmapped occupancy value");
            None
        }
    }
}

fn put_text(fields: &mut Fields, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        fields.insert(key.to_string(), json!(value));
    }
}

fn put_date(fields: &mut Fields, key: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        fields.insert(key.to_string(), json!(date_only(value)));
    }
}

fn put_number(fields: &mut Fields, key: &str, value: Option<f64>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), json!(value));
    }
}

/// The full deal custom-field block for a loan. Absent source values are
/// omitted entirely so an update never clears a populated destination field.
pub fn deal_custom_fields(loan: &LoanRecord, schema: &DestSchema) -> Fields {
    let mut fields = Fields::new();

    put_text(&mut fields, &schema.loan_id_key, Some(&loan.id));
    put_text(&mut fields, &schema.loan_number_key, loan.loan_number.as_deref());
    put_number(&mut fields, &schema.base_loan_amount_key, loan.base_loan_amount);
    put_date(&mut fields, &schema.pre_approval_sent_key, loan.pre_approval_sent.as_deref());
    put_date(&mut fields, &schema.strategy_call_key, loan.strategy_call.as_deref());
    put_text(&mut fields, &schema.loan_paid_off_key, loan.in_process_or_paid_off.as_deref());

    if let Some(address) = format_property_address(loan) {
        fields.insert(schema.property_address_key.clone(), json!(address));
    }
    put_text(&mut fields, &schema.property_type_key, loan.property_type.as_deref());
    put_text(&mut fields, &schema.loan_type_key, loan.loan_type.as_deref());
    put_text(&mut fields, &schema.loan_purpose_key, loan.loan_purpose.as_deref());
    if let Some(option_id) = loan
        .occupancy
        .as_deref()
        .and_then(|raw| occupancy_option(raw, schema))
    {
        fields.insert(schema.occupancy_key.clone(), json!(option_id));
    }

    put_number(&mut fields, &schema.appraised_value_key, loan.appraised_value);
    put_number(&mut fields, &schema.purchase_price_key, loan.purchase_price);
    put_number(&mut fields, &schema.down_payment_key, loan.down_payment);
    put_number(&mut fields, &schema.down_payment_percent_key, down_payment_percent(loan));
    put_number(&mut fields, &schema.interest_rate_key, loan.interest_rate);
    put_number(&mut fields, &schema.term_key, loan.term_months);
    put_number(
        &mut fields,
        &schema.funding_fee_key,
        loan.funding_fee.as_deref().and_then(extract_leading_number),
    );
    put_number(&mut fields, &schema.credit_score_key, loan.credit_score);
    put_text(&mut fields, &schema.loan_program_key, loan.loan_program.as_deref());
    put_number(&mut fields, &schema.monthly_payment_key, loan.monthly_payment);
    put_number(&mut fields, &schema.pi_payment_key, loan.principal_interest_payment);
    put_number(&mut fields, &schema.homeowners_insurance_key, loan.homeowners_insurance);
    put_number(
        &mut fields,
        &schema.supplemental_insurance_key,
        loan.supplemental_property_insurance,
    );
    put_number(&mut fields, &schema.property_tax_key, loan.property_tax);
    put_number(&mut fields, &schema.mortgage_insurance_key, loan.mortgage_insurance);
    put_number(&mut fields, &schema.hoa_key, loan.hoa);
    put_number(&mut fields, &schema.b1_income_key, loan.borrower.annual_income);
    put_number(&mut fields, &schema.b2_income_key, loan.borrower.coborrower_annual_income);

    put_date(&mut fields, &schema.econsent_key, loan.econsent.as_deref());
    put_date(&mut fields, &schema.le_due_key, loan.le_due.as_deref());
    put_date(&mut fields, &schema.le_sent_key, loan.le_sent.as_deref());
    put_date(&mut fields, &schema.le_received_key, loan.le_received.as_deref());
    put_date(&mut fields, &schema.appraisal_ordered_key, loan.appraisal_ordered.as_deref());
    put_date(&mut fields, &schema.appraisal_received_key, loan.appraisal_received.as_deref());
    put_date(&mut fields, &schema.title_received_key, loan.title_received.as_deref());
    put_date(&mut fields, &schema.insurance_received_key, loan.insurance_received.as_deref());
    put_date(&mut fields, &schema.cd_sent_key, loan.cd_sent.as_deref());
    put_date(&mut fields, &schema.cd_received_key, loan.cd_received.as_deref());

    fields
}

/// Shared core of the create and update payloads: title, amounts, stage,
/// label, close date, status, and the custom-field block.
fn deal_fields(loan: &LoanRecord, schema: &DestSchema) -> Fields {
    let mut fields = deal_custom_fields(loan, schema);

    fields.insert("title".to_string(), json!(format_deal_title(loan)));
    // value and the loan-amount custom field always move together.
    if let Some(amount) = loan.total_amount {
        fields.insert("value".to_string(), json!(amount));
        fields.insert(schema.loan_amount_key.clone(), json!(amount));
    }
    if let Some(status) = loan.status.as_deref() {
        if let Some(stage) = map_stage(status, schema) {
            fields.insert("stage_id".to_string(), json!(stage));
        }
        if let Some(label) = map_label(status, schema) {
            fields.insert(schema.deal_label_key.clone(), json!(label));
        }
        // A closed loan forces the deal won; reopening is manual-only.
        if LoanStatus::parse(status).is_some_and(LoanStatus::is_closing) {
            fields.insert("status".to_string(), json!("won"));
        }
    }
    put_date(
        &mut fields,
        "expected_close_date",
        loan.est_closing_date.as_deref(),
    );

    fields
}

/// Payload for updating an existing deal.
pub fn deal_update_fields(loan: &LoanRecord, schema: &DestSchema) -> Fields {
    deal_fields(loan, schema)
}

/// Payload for creating a deal, attached to its resolved borrower. A loan
/// with no amount yet still creates a zero-value deal.
pub fn deal_create_fields(
    loan: &LoanRecord,
    schema: &DestSchema,
    person_id: loanbridge_core::PersonId,
) -> Fields {
    let mut fields = deal_fields(loan, schema);
    fields.insert("person_id".to_string(), json!(person_id.0));
    if !fields.contains_key("value") {
        fields.insert("value".to_string(), json!(0));
        fields.insert(schema.loan_amount_key.clone(), json!(0));
    }
    fields
}

/// Minimal field seed handed to the lead-conversion endpoint; the full
/// update lands immediately afterwards.
pub fn lead_conversion_fields(
    loan: &LoanRecord,
    schema: &DestSchema,
    person_id: loanbridge_core::PersonId,
) -> Fields {
    let mut fields = Fields::new();
    fields.insert("title".to_string(), json!(format_deal_title(loan)));
    fields.insert("person_id".to_string(), json!(person_id.0));
    fields.insert("stage_id".to_string(), json!(schema.stage_application_in));
    if let Some(amount) = loan.total_amount {
        fields.insert("value".to_string(), json!(amount));
    }
    fields
}
