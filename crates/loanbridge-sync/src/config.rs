//! Destination schema wiring: custom-field hash keys, stage ids, label
//! option ids, and the handful of enumerated option ids the mapping layer
//! needs. All of it is environment-driven because the destination account
//! assigns opaque keys per installation.

use std::time::Duration;

fn env_key(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_id(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Custom-field keys and option ids on the destination account.
#[derive(Debug, Clone)]
pub struct DestSchema {
    // Deal custom-field keys.
    pub loan_id_key: String,
    pub loan_number_key: String,
    /// Mirror of the deal `value`; the two are always written together.
    pub loan_amount_key: String,
    pub deal_label_key: String,
    pub coborrower_key: String,
    pub base_loan_amount_key: String,
    pub pre_approval_sent_key: String,
    pub strategy_call_key: String,
    pub loan_paid_off_key: String,
    pub property_address_key: String,
    pub property_type_key: String,
    pub loan_type_key: String,
    pub loan_purpose_key: String,
    pub occupancy_key: String,
    pub appraised_value_key: String,
    pub purchase_price_key: String,
    pub down_payment_key: String,
    pub down_payment_percent_key: String,
    pub interest_rate_key: String,
    pub term_key: String,
    pub funding_fee_key: String,
    pub credit_score_key: String,
    pub loan_program_key: String,
    pub monthly_payment_key: String,
    pub pi_payment_key: String,
    pub homeowners_insurance_key: String,
    pub supplemental_insurance_key: String,
    pub property_tax_key: String,
    pub mortgage_insurance_key: String,
    pub hoa_key: String,
    pub b1_income_key: String,
    pub b2_income_key: String,
    pub econsent_key: String,
    pub le_due_key: String,
    pub le_sent_key: String,
    pub le_received_key: String,
    pub appraisal_ordered_key: String,
    pub appraisal_received_key: String,
    pub title_received_key: String,
    pub insurance_received_key: String,
    pub cd_sent_key: String,
    pub cd_received_key: String,

    // Person custom-field keys.
    pub contact_id_key: String,
    pub group_key: String,
    pub birthday_key: String,
    pub contact_type_key: String,

    // Pipeline stage ids.
    pub stage_application_in: i64,
    pub stage_pre_approved: i64,
    pub stage_getting_things_rolling: i64,
    pub stage_in_process: i64,
    pub stage_clear_to_close: i64,

    // Deal label option ids, one per source status.
    pub label_application: i64,
    pub label_pre_approved: i64,
    pub label_getting_things_rolling: i64,
    pub label_in_process: i64,
    pub label_submitted: i64,
    pub label_cond_approval: i64,
    pub label_approved: i64,
    pub label_suspended: i64,
    pub label_clear_to_close: i64,
    pub label_docs_out: i64,
    pub label_closed: i64,

    // Person group values. Text-valued field, so these are strings.
    pub group_lead: String,
    pub group_borrower: String,

    // Contact-type option ids. Business is protected from overwrite.
    pub contact_type_client_id: i64,
    pub contact_type_business_id: i64,

    // Occupancy option ids.
    pub occupancy_primary_id: i64,
    pub occupancy_second_home_id: i64,
    pub occupancy_investment_id: i64,

    // Commission fields and their yes-option ids.
    pub commission_key: String,
    pub self_sourced_key: String,
    pub branch_pricing_key: String,
    pub company_lead_key: String,
    pub self_sourced_yes_id: i64,
    pub branch_pricing_yes_id: i64,
    pub company_lead_yes_id: i64,
}

impl DestSchema {
    pub fn from_env() -> Self {
        Self {
            loan_id_key: env_key("DEST_KEY_LOAN_ID", "loan_record_id"),
            loan_number_key: env_key("DEST_KEY_LOAN_NUMBER", "loan_number"),
            loan_amount_key: env_key("DEST_KEY_LOAN_AMOUNT", "loan_amount"),
            deal_label_key: env_key("DEST_KEY_DEAL_LABEL", "label_ids"),
            coborrower_key: env_key("DEST_KEY_COBORROWER", "coborrower"),
            base_loan_amount_key: env_key("DEST_KEY_BASE_LOAN_AMOUNT", "base_loan_amount"),
            pre_approval_sent_key: env_key("DEST_KEY_PRE_APPROVAL_SENT", "pre_approval_sent"),
            strategy_call_key: env_key("DEST_KEY_STRATEGY_CALL", "strategy_call"),
            loan_paid_off_key: env_key("DEST_KEY_LOAN_PAID_OFF", "loan_paid_off"),
            property_address_key: env_key("DEST_KEY_PROPERTY_ADDRESS", "property_address"),
            property_type_key: env_key("DEST_KEY_PROPERTY_TYPE", "property_type"),
            loan_type_key: env_key("DEST_KEY_LOAN_TYPE", "loan_type"),
            loan_purpose_key: env_key("DEST_KEY_LOAN_PURPOSE", "loan_purpose"),
            occupancy_key: env_key("DEST_KEY_OCCUPANCY", "occupancy"),
            appraised_value_key: env_key("DEST_KEY_APPRAISED_VALUE", "appraised_value"),
            purchase_price_key: env_key("DEST_KEY_PURCHASE_PRICE", "purchase_price"),
            down_payment_key: env_key("DEST_KEY_DOWN_PAYMENT", "down_payment"),
            down_payment_percent_key: env_key(
                "DEST_KEY_DOWN_PAYMENT_PERCENT",
                "down_payment_percent",
            ),
            interest_rate_key: env_key("DEST_KEY_INTEREST_RATE", "interest_rate"),
            term_key: env_key("DEST_KEY_TERM", "term_months"),
            funding_fee_key: env_key("DEST_KEY_FUNDING_FEE", "funding_fee"),
            credit_score_key: env_key("DEST_KEY_CREDIT_SCORE", "credit_score"),
            loan_program_key: env_key("DEST_KEY_LOAN_PROGRAM", "loan_program"),
            monthly_payment_key: env_key("DEST_KEY_MONTHLY_PAYMENT", "monthly_payment"),
            pi_payment_key: env_key("DEST_KEY_PI_PAYMENT", "pi_payment"),
            homeowners_insurance_key: env_key(
                "DEST_KEY_HOMEOWNERS_INSURANCE",
                "homeowners_insurance",
            ),
            supplemental_insurance_key: env_key(
                "DEST_KEY_SUPPLEMENTAL_INSURANCE",
                "supplemental_insurance",
            ),
            property_tax_key: env_key("DEST_KEY_PROPERTY_TAX", "property_tax"),
            mortgage_insurance_key: env_key("DEST_KEY_MORTGAGE_INSURANCE", "mortgage_insurance"),
            hoa_key: env_key("DEST_KEY_HOA", "hoa_dues"),
            b1_income_key: env_key("DEST_KEY_B1_INCOME", "b1_annual_income"),
            b2_income_key: env_key("DEST_KEY_B2_INCOME", "b2_annual_income"),
            econsent_key: env_key("DEST_KEY_ECONSENT", "econsent_received"),
            le_due_key: env_key("DEST_KEY_LE_DUE", "le_due"),
            le_sent_key: env_key("DEST_KEY_LE_SENT", "le_sent"),
            le_received_key: env_key("DEST_KEY_LE_RECEIVED", "le_received"),
            appraisal_ordered_key: env_key("DEST_KEY_APPRAISAL_ORDERED", "appraisal_ordered"),
            appraisal_received_key: env_key("DEST_KEY_APPRAISAL_RECEIVED", "appraisal_received"),
            title_received_key: env_key("DEST_KEY_TITLE_RECEIVED", "title_received"),
            insurance_received_key: env_key("DEST_KEY_INSURANCE_RECEIVED", "insurance_received"),
            cd_sent_key: env_key("DEST_KEY_CD_SENT", "cd_sent"),
            cd_received_key: env_key("DEST_KEY_CD_RECEIVED", "cd_received"),

            contact_id_key: env_key("DEST_KEY_CONTACT_ID", "contact_record_id"),
            group_key: env_key("DEST_KEY_GROUP", "contact_group"),
            birthday_key: env_key("DEST_KEY_BIRTHDAY", "birthday"),
            contact_type_key: env_key("DEST_KEY_CONTACT_TYPE", "contact_type"),

            stage_application_in: env_id("DEST_STAGE_APPLICATION_IN", 1),
            stage_pre_approved: env_id("DEST_STAGE_PRE_APPROVED", 2),
            stage_getting_things_rolling: env_id("DEST_STAGE_GETTING_THINGS_ROLLING", 3),
            stage_in_process: env_id("DEST_STAGE_IN_PROCESS", 4),
            stage_clear_to_close: env_id("DEST_STAGE_CLEAR_TO_CLOSE", 5),

            label_application: env_id("DEST_LABEL_APPLICATION", 101),
            label_pre_approved: env_id("DEST_LABEL_PRE_APPROVED", 102),
            label_getting_things_rolling: env_id("DEST_LABEL_GETTING_THINGS_ROLLING", 103),
            label_in_process: env_id("DEST_LABEL_IN_PROCESS", 104),
            label_submitted: env_id("DEST_LABEL_SUBMITTED", 105),
            label_cond_approval: env_id("DEST_LABEL_COND_APPROVAL", 106),
            label_approved: env_id("DEST_LABEL_APPROVED", 107),
            label_suspended: env_id("DEST_LABEL_SUSPENDED", 108),
            label_clear_to_close: env_id("DEST_LABEL_CLEAR_TO_CLOSE", 109),
            label_docs_out: env_id("DEST_LABEL_DOCS_OUT", 110),
            label_closed: env_id("DEST_LABEL_CLOSED", 111),

            group_lead: env_key("DEST_GROUP_LEAD", "Lead"),
            group_borrower: env_key("DEST_GROUP_BORROWER", "Borrower"),

            contact_type_client_id: env_id("DEST_CONTACT_TYPE_CLIENT", 88),
            contact_type_business_id: env_id("DEST_CONTACT_TYPE_BUSINESS", 89),

            occupancy_primary_id: env_id("DEST_OCCUPANCY_PRIMARY", 120),
            occupancy_second_home_id: env_id("DEST_OCCUPANCY_SECOND_HOME", 121),
            occupancy_investment_id: env_id("DEST_OCCUPANCY_INVESTMENT", 122),

            commission_key: env_key("DEST_KEY_COMMISSION", "commission"),
            self_sourced_key: env_key("DEST_KEY_SELF_SOURCED", "self_sourced"),
            branch_pricing_key: env_key("DEST_KEY_BRANCH_PRICING", "branch_pricing"),
            company_lead_key: env_key("DEST_KEY_COMPANY_LEAD", "company_lead"),
            self_sourced_yes_id: env_id("DEST_OPT_SELF_SOURCED_YES", 91),
            branch_pricing_yes_id: env_id("DEST_OPT_BRANCH_PRICING_YES", 137),
            company_lead_yes_id: env_id("DEST_OPT_COMPANY_LEAD_YES", 139),
        }
    }
}

/// Runtime knobs for the sync service itself, as opposed to the two remote
/// connections.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entity name change events must carry to be processed.
    pub entity_name: String,
    /// When non-empty, loans owned by anyone else are skipped.
    pub owner_filter: String,
    pub store_path: String,
    /// Cron expression for the scheduled polling sweep.
    pub poll_cron: String,
    pub poll_window_hours: i64,
    pub poll_batch_limit: usize,
    pub initial_sync_limit: usize,
    /// How deep the archived listing is scanned during duplicate checks.
    pub archived_scan_limit: usize,
    pub http_timeout: Duration,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            entity_name: env_key("LOANBRIDGE_ENTITY_NAME", "Loan"),
            owner_filter: std::env::var("ORIGINATION_OWNER_FILTER").unwrap_or_default(),
            store_path: env_key("LOANBRIDGE_STORE_PATH", "data/deal_mappings.json"),
            poll_cron: env_key("LOANBRIDGE_POLL_CRON", "0 0 * * * *"),
            poll_window_hours: env_id("LOANBRIDGE_POLL_WINDOW_HOURS", 24),
            poll_batch_limit: env_id("LOANBRIDGE_POLL_BATCH_LIMIT", 200) as usize,
            initial_sync_limit: env_id("LOANBRIDGE_INITIAL_SYNC_LIMIT", 1000) as usize,
            archived_scan_limit: env_id("LOANBRIDGE_ARCHIVED_SCAN_LIMIT", 500) as usize,
            http_timeout: Duration::from_secs(env_id("LOANBRIDGE_HTTP_TIMEOUT_SECS", 20) as u64),
        }
    }
}
