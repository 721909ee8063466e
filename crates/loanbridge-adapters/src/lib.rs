//! Collaborator interfaces for the two external CRMs, plus their reqwest
//! implementations. The sync core only ever talks to the traits here, so
//! tests can substitute in-memory fakes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbridge_core::{
    DealId, DealRecord, DealStatus, EmailEntry, FieldValue, LeadRecord, LoanRecord, PersonId,
    PersonRecord,
};
use reqwest::StatusCode;
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "loanbridge-adapters";

/// Outbound field payload for create/update calls.
pub type Fields = JsonMap<String, JsonValue>;

#[derive(Debug, Error)]
pub enum CrmError {
    /// Remote 404. For mapped-deal fetches this means "archived, skip".
    #[error("record not found: {0}")]
    NotFound(String),
    /// Network failure, timeout, or 5xx. Transient; the next tick retries.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CrmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CrmError::NotFound(_))
    }

    fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        if status == StatusCode::NOT_FOUND {
            CrmError::NotFound(url.to_string())
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            CrmError::Unavailable(format!("{status} for {url}"))
        } else {
            CrmError::Api {
                status: status.as_u16(),
                message: format!("{url}: {}", body.chars().take(200).collect::<String>()),
            }
        }
    }
}

impl From<reqwest::Error> for CrmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            CrmError::Unavailable(err.to_string())
        } else {
            CrmError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

/// Destination pipeline CRM operations consumed by the resolvers.
#[async_trait]
pub trait PipelineCrm: Send + Sync {
    async fn get_deal(&self, id: DealId) -> Result<DealRecord, CrmError>;
    async fn search_deals(&self, term: &str, fields: &str) -> Result<Vec<DealRecord>, CrmError>;
    async fn create_deal(&self, fields: &Fields) -> Result<DealId, CrmError>;
    async fn update_deal(&self, id: DealId, fields: &Fields) -> Result<(), CrmError>;
    async fn list_person_deals(&self, person_id: PersonId) -> Result<Vec<DealRecord>, CrmError>;
    /// Archived deals are excluded from normal listing and search, so they
    /// have their own endpoint.
    async fn list_archived_deals(&self, limit: usize) -> Result<Vec<DealRecord>, CrmError>;

    async fn get_person(&self, id: PersonId) -> Result<PersonRecord, CrmError>;
    async fn search_persons(&self, term: &str, fields: &str) -> Result<Vec<PersonRecord>, CrmError>;
    async fn create_person(&self, fields: &Fields) -> Result<PersonId, CrmError>;
    async fn update_person(&self, id: PersonId, fields: &Fields) -> Result<(), CrmError>;

    async fn list_person_leads(&self, person_id: PersonId) -> Result<Vec<LeadRecord>, CrmError>;
    async fn convert_lead_to_deal(
        &self,
        lead_id: &str,
        initial_fields: &Fields,
    ) -> Result<DealId, CrmError>;
}

/// Source loan-origination system operations.
#[async_trait]
pub trait OriginationSource: Send + Sync {
    async fn get_loan(&self, id: &str) -> Result<LoanRecord, CrmError>;
    /// Records modified since the cutoff, filtered server-side to the
    /// subscribed operator. `modified_since = None` means no time filter.
    async fn list_loans(
        &self,
        modified_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LoanRecord>, CrmError>;
    /// Optional status write-back (e.g. marking a loan Cancelled).
    async fn update_loan_status(&self, id: &str, status: &str) -> Result<(), CrmError>;
}

/// Flatten the destination search envelope. `data` is either a bare list or
/// `{"items": [...]}`, and each entry may nest the record under `item`.
pub fn normalize_search_items(data: &JsonValue) -> Vec<JsonValue> {
    let entries: Vec<JsonValue> = match data {
        JsonValue::Array(items) => items.clone(),
        JsonValue::Object(obj) => obj
            .get("items")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .map(|entry| match entry.get("item") {
            Some(inner) => inner.clone(),
            None => entry,
        })
        .collect()
}

fn id_or_value_i64(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        JsonValue::Object(obj) => obj.get("value").and_then(id_or_value_i64),
        _ => None,
    }
}

const DEAL_STANDARD_KEYS: &[&str] = &[
    "id",
    "title",
    "value",
    "stage_id",
    "status",
    "active",
    "person_id",
    "expected_close_date",
    "custom_fields",
    "label",
    "currency",
    "org_id",
    "add_time",
    "update_time",
];

/// Parse a deal payload. Custom fields live either under a `custom_fields`
/// object or as opaque hash keys at the record root; both are normalized
/// into the tagged field map.
pub fn parse_deal(raw: &JsonValue) -> Result<DealRecord, CrmError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CrmError::Malformed("deal payload is not an object".into()))?;
    let id = obj
        .get("id")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| CrmError::Malformed("deal payload missing id".into()))?;

    let status = match obj.get("status").and_then(JsonValue::as_str) {
        Some("won") => DealStatus::Won,
        Some("lost") => DealStatus::Lost,
        _ => DealStatus::Open,
    };

    let mut custom_fields = BTreeMap::new();
    if let Some(nested) = obj.get("custom_fields").and_then(JsonValue::as_object) {
        for (key, value) in nested {
            if let Some(normalized) = FieldValue::from_json(value) {
                custom_fields.insert(key.clone(), normalized);
            }
        }
    }
    for (key, value) in obj {
        if DEAL_STANDARD_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(normalized) = FieldValue::from_json(value) {
            custom_fields.entry(key.clone()).or_insert(normalized);
        }
    }

    Ok(DealRecord {
        id: DealId(id),
        title: obj
            .get("title")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        value: obj.get("value").and_then(value_as_f64),
        stage_id: obj.get("stage_id").and_then(JsonValue::as_i64),
        status,
        active: obj.get("active").and_then(JsonValue::as_bool).unwrap_or(true),
        person_id: obj.get("person_id").and_then(id_or_value_i64).map(PersonId),
        expected_close_date: obj
            .get("expected_close_date")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        custom_fields,
    })
}

fn value_as_f64(raw: &JsonValue) -> Option<f64> {
    match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const PERSON_STANDARD_KEYS: &[&str] =
    &["id", "name", "email", "phone", "custom_fields", "label", "add_time", "update_time"];

pub fn parse_person(raw: &JsonValue) -> Result<PersonRecord, CrmError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CrmError::Malformed("person payload is not an object".into()))?;
    let id = obj
        .get("id")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| CrmError::Malformed("person payload missing id".into()))?;

    let mut emails = Vec::new();
    match obj.get("email") {
        Some(JsonValue::Array(entries)) => {
            for entry in entries {
                match entry {
                    JsonValue::Object(email_obj) => {
                        if let Some(value) = email_obj.get("value").and_then(JsonValue::as_str) {
                            emails.push(EmailEntry {
                                value: value.to_string(),
                                primary: email_obj
                                    .get("primary")
                                    .and_then(JsonValue::as_bool)
                                    .unwrap_or(false),
                            });
                        }
                    }
                    JsonValue::String(value) => emails.push(EmailEntry {
                        value: value.clone(),
                        primary: false,
                    }),
                    _ => {}
                }
            }
        }
        Some(JsonValue::String(value)) => emails.push(EmailEntry {
            value: value.clone(),
            primary: true,
        }),
        _ => {}
    }

    let phone = match obj.get("phone") {
        Some(JsonValue::Array(entries)) => entries.iter().find_map(|entry| match entry {
            JsonValue::Object(phone_obj) => phone_obj
                .get("value")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            JsonValue::String(value) => Some(value.clone()),
            _ => None,
        }),
        Some(JsonValue::String(value)) => Some(value.clone()),
        _ => None,
    };

    let mut custom_fields = BTreeMap::new();
    if let Some(nested) = obj.get("custom_fields").and_then(JsonValue::as_object) {
        for (key, value) in nested {
            if let Some(normalized) = FieldValue::from_json(value) {
                custom_fields.insert(key.clone(), normalized);
            }
        }
    }
    for (key, value) in obj {
        if PERSON_STANDARD_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(normalized) = FieldValue::from_json(value) {
            custom_fields.entry(key.clone()).or_insert(normalized);
        }
    }

    Ok(PersonRecord {
        id: PersonId(id),
        name: obj
            .get("name")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        emails,
        phone,
        custom_fields,
    })
}

pub fn parse_lead(raw: &JsonValue) -> Result<LeadRecord, CrmError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CrmError::Malformed("lead payload is not an object".into()))?;
    let id = match obj.get("id") {
        Some(JsonValue::String(s)) => s.clone(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => return Err(CrmError::Malformed("lead payload missing id".into())),
    };
    Ok(LeadRecord {
        id,
        title: obj
            .get("title")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        label: obj.get("label").and_then(FieldValue::from_json),
        person_id: obj.get("person_id").and_then(id_or_value_i64).map(PersonId),
    })
}

/// Connection settings for the destination pipeline CRM.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: String,
    /// Newer API surface hosting lead conversion and the archived listing.
    pub base_url_v2: String,
    pub api_token: String,
    pub timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("PIPELINE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.pipeline.example/v1".to_string());
        let base_url_v2 = std::env::var("PIPELINE_API_BASE_URL_V2")
            .unwrap_or_else(|_| base_url.replace("/v1", "/v2"));
        Self {
            base_url,
            base_url_v2,
            api_token: std::env::var("PIPELINE_API_TOKEN").unwrap_or_default(),
            timeout: http_timeout_from_env(),
        }
    }
}

pub(crate) fn http_timeout_from_env() -> Duration {
    let secs = std::env::var("LOANBRIDGE_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    Duration::from_secs(secs)
}

/// reqwest-backed destination client. Every call carries the api token as a
/// query parameter and shares one bounded-timeout client.
#[derive(Debug)]
pub struct PipelineClient {
    config: PipelineConfig,
    client: reqwest::Client,
}

#[derive(Debug, serde::Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: JsonValue,
}

impl PipelineClient {
    pub fn new(config: PipelineConfig) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()
            .map_err(|err| CrmError::Unavailable(err.to_string()))?;
        Ok(Self { config, client })
    }

    async fn call(
        &self,
        method: reqwest::Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Fields>,
    ) -> Result<JsonValue, CrmError> {
        let mut request = self
            .client
            .request(method, url)
            .query(&[("api_token", self.config.api_token.as_str())])
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CrmError::from_status(status, url, &text));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&text)
            .map_err(|err| CrmError::Malformed(format!("{url}: {err}")))?;
        if envelope.success == Some(false) {
            return Err(CrmError::Api {
                status: status.as_u16(),
                message: format!("{url}: success=false"),
            });
        }
        Ok(envelope.data)
    }

    fn created_id(data: &JsonValue, what: &str) -> Result<i64, CrmError> {
        data.get("id")
            .and_then(JsonValue::as_i64)
            .ok_or_else(|| CrmError::Malformed(format!("{what} create response missing id")))
    }
}

#[async_trait]
impl PipelineCrm for PipelineClient {
    async fn get_deal(&self, id: DealId) -> Result<DealRecord, CrmError> {
        let url = format!("{}/deals/{id}", self.config.base_url);
        let data = self.call(reqwest::Method::GET, &url, &[], None).await?;
        parse_deal(&data)
    }

    async fn search_deals(&self, term: &str, fields: &str) -> Result<Vec<DealRecord>, CrmError> {
        let url = format!("{}/deals/search", self.config.base_url);
        let query = [("term", term.to_string()), ("fields", fields.to_string())];
        let data = self.call(reqwest::Method::GET, &url, &query, None).await?;
        let items = normalize_search_items(&data);
        debug!(term, results = items.len(), "deal search");
        Ok(items.iter().filter_map(|item| parse_deal(item).ok()).collect())
    }

    async fn create_deal(&self, fields: &Fields) -> Result<DealId, CrmError> {
        let url = format!("{}/deals", self.config.base_url);
        let data = self
            .call(reqwest::Method::POST, &url, &[], Some(fields))
            .await?;
        Self::created_id(&data, "deal").map(DealId)
    }

    async fn update_deal(&self, id: DealId, fields: &Fields) -> Result<(), CrmError> {
        let url = format!("{}/deals/{id}", self.config.base_url);
        self.call(reqwest::Method::PUT, &url, &[], Some(fields))
            .await?;
        Ok(())
    }

    async fn list_person_deals(&self, person_id: PersonId) -> Result<Vec<DealRecord>, CrmError> {
        let url = format!("{}/persons/{person_id}/deals", self.config.base_url);
        let data = self.call(reqwest::Method::GET, &url, &[], None).await?;
        let items = normalize_search_items(&data);
        Ok(items.iter().filter_map(|item| parse_deal(item).ok()).collect())
    }

    async fn list_archived_deals(&self, limit: usize) -> Result<Vec<DealRecord>, CrmError> {
        let url = format!("{}/deals/archived", self.config.base_url_v2);
        let query = [("limit", limit.to_string())];
        let data = self.call(reqwest::Method::GET, &url, &query, None).await?;
        let items = normalize_search_items(&data);
        Ok(items.iter().filter_map(|item| parse_deal(item).ok()).collect())
    }

    async fn get_person(&self, id: PersonId) -> Result<PersonRecord, CrmError> {
        let url = format!("{}/persons/{id}", self.config.base_url);
        let data = self.call(reqwest::Method::GET, &url, &[], None).await?;
        parse_person(&data)
    }

    async fn search_persons(&self, term: &str, fields: &str) -> Result<Vec<PersonRecord>, CrmError> {
        let url = format!("{}/persons/search", self.config.base_url);
        let query = [("term", term.to_string()), ("fields", fields.to_string())];
        let data = self.call(reqwest::Method::GET, &url, &query, None).await?;
        let items = normalize_search_items(&data);
        Ok(items
            .iter()
            .filter_map(|item| parse_person(item).ok())
            .collect())
    }

    async fn create_person(&self, fields: &Fields) -> Result<PersonId, CrmError> {
        let url = format!("{}/persons", self.config.base_url);
        let data = self
            .call(reqwest::Method::POST, &url, &[], Some(fields))
            .await?;
        Self::created_id(&data, "person").map(PersonId)
    }

    async fn update_person(&self, id: PersonId, fields: &Fields) -> Result<(), CrmError> {
        let url = format!("{}/persons/{id}", self.config.base_url);
        self.call(reqwest::Method::PUT, &url, &[], Some(fields))
            .await?;
        Ok(())
    }

    async fn list_person_leads(&self, person_id: PersonId) -> Result<Vec<LeadRecord>, CrmError> {
        let url = format!("{}/leads", self.config.base_url);
        let query = [
            ("person_id", person_id.to_string()),
            ("status", "open".to_string()),
        ];
        let data = self.call(reqwest::Method::GET, &url, &query, None).await?;
        let items = normalize_search_items(&data);
        Ok(items.iter().filter_map(|item| parse_lead(item).ok()).collect())
    }

    async fn convert_lead_to_deal(
        &self,
        lead_id: &str,
        initial_fields: &Fields,
    ) -> Result<DealId, CrmError> {
        let url = format!("{}/leads/{lead_id}/convert/deal", self.config.base_url_v2);
        let data = self
            .call(reqwest::Method::POST, &url, &[], Some(initial_fields))
            .await?;
        Self::created_id(&data, "lead conversion").map(DealId)
    }
}

/// Connection settings for the source loan-origination system.
#[derive(Debug, Clone)]
pub struct OriginationConfig {
    pub base_url: String,
    pub api_token: String,
    /// Only records owned by this operator are synced.
    pub owner_filter: String,
    pub timeout: Duration,
}

impl OriginationConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ORIGINATION_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.origination.example".to_string()),
            api_token: std::env::var("ORIGINATION_API_TOKEN").unwrap_or_default(),
            owner_filter: std::env::var("ORIGINATION_OWNER_FILTER").unwrap_or_default(),
            timeout: http_timeout_from_env(),
        }
    }
}

/// reqwest-backed source client.
#[derive(Debug)]
pub struct OriginationClient {
    config: OriginationConfig,
    client: reqwest::Client,
}

impl OriginationClient {
    pub fn new(config: OriginationConfig) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()
            .map_err(|err| CrmError::Unavailable(err.to_string()))?;
        Ok(Self { config, client })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<JsonValue, CrmError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_token)
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CrmError::from_status(status, url, &text));
        }
        serde_json::from_str(&text).map_err(|err| CrmError::Malformed(format!("{url}: {err}")))
    }
}

#[async_trait]
impl OriginationSource for OriginationClient {
    async fn get_loan(&self, id: &str) -> Result<LoanRecord, CrmError> {
        let url = format!("{}/loans/{id}", self.config.base_url);
        let data = self.get_json(&url, &[]).await?;
        serde_json::from_value(data).map_err(|err| CrmError::Malformed(format!("{url}: {err}")))
    }

    async fn list_loans(
        &self,
        modified_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LoanRecord>, CrmError> {
        let url = format!("{}/loans", self.config.base_url);
        let mut query = vec![
            ("owner", self.config.owner_filter.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(cutoff) = modified_since {
            query.push(("modified_since", cutoff.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        let data = self.get_json(&url, &query).await?;
        let records = data
            .get("records")
            .cloned()
            .unwrap_or(data);
        serde_json::from_value(records).map_err(|err| CrmError::Malformed(format!("{url}: {err}")))
    }

    async fn update_loan_status(&self, id: &str, status: &str) -> Result<(), CrmError> {
        let url = format!("{}/loans/{id}", self.config.base_url);
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.config.api_token)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;
        let status_code = response.status();
        if !status_code.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CrmError::from_status(status_code, &url, &text));
        }
        Ok(())
    }
}
