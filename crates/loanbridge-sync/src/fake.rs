//! In-memory stand-ins for the two remote systems, shared across the
//! resolver test modules. Records are stored as raw JSON and run through
//! the same parsers the real clients use.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbridge_adapters::{parse_deal, parse_lead, parse_person, CrmError, Fields, OriginationSource, PipelineCrm};
use loanbridge_core::{DealId, DealRecord, LeadRecord, LoanRecord, PersonId, PersonRecord};
use serde_json::{json, Value as JsonValue};

#[derive(Default)]
struct CrmState {
    persons: BTreeMap<i64, JsonValue>,
    deals: BTreeMap<i64, JsonValue>,
    leads: Vec<JsonValue>,
    next_person: i64,
    next_deal: i64,
    person_creates: usize,
    person_updates: usize,
    deal_creates: usize,
    deal_updates: usize,
    unreachable_deals: HashSet<i64>,
    fail_lead_conversion: bool,
}

pub struct FakeCrm {
    state: Mutex<CrmState>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CrmState {
                next_person: 1,
                next_deal: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CrmState> {
        self.state.lock().unwrap()
    }

    pub fn seed_person(&self, mut record: JsonValue) -> PersonId {
        let mut state = self.lock();
        let id = state.next_person;
        state.next_person += 1;
        record["id"] = json!(id);
        state.persons.insert(id, record);
        PersonId(id)
    }

    pub fn seed_deal(&self, mut record: JsonValue) -> DealId {
        let mut state = self.lock();
        let id = state.next_deal;
        state.next_deal += 1;
        record["id"] = json!(id);
        if record.get("active").is_none() {
            record["active"] = json!(true);
        }
        if record.get("status").is_none() {
            record["status"] = json!("open");
        }
        state.deals.insert(id, record);
        DealId(id)
    }

    pub fn seed_archived_deal(&self, mut record: JsonValue) -> DealId {
        record["active"] = json!(false);
        self.seed_deal(record)
    }

    pub fn seed_lead(&self, record: JsonValue) {
        self.lock().leads.push(record);
    }

    /// Make `get_deal` return 404 for this id, as the remote does once a
    /// deal is hard-deleted.
    pub fn make_deal_unreachable(&self, id: DealId) {
        self.lock().unreachable_deals.insert(id.0);
    }

    pub fn fail_lead_conversions(&self) {
        self.lock().fail_lead_conversion = true;
    }

    pub fn raw_deal(&self, id: DealId) -> Option<JsonValue> {
        self.lock().deals.get(&id.0).cloned()
    }

    pub fn person_create_count(&self) -> usize {
        self.lock().person_creates
    }

    pub fn person_update_count(&self) -> usize {
        self.lock().person_updates
    }

    pub fn deal_create_count(&self) -> usize {
        self.lock().deal_creates
    }

    pub fn deal_update_count(&self) -> usize {
        self.lock().deal_updates
    }
}

fn value_contains(value: &JsonValue, term: &str) -> bool {
    match value {
        JsonValue::String(s) => s.to_ascii_lowercase().contains(&term.to_ascii_lowercase()),
        JsonValue::Number(n) => n.to_string().contains(term),
        JsonValue::Array(items) => items.iter().any(|v| value_contains(v, term)),
        JsonValue::Object(obj) => obj.values().any(|v| value_contains(v, term)),
        _ => false,
    }
}

fn merge_fields(record: &mut JsonValue, fields: &Fields) {
    if let Some(obj) = record.as_object_mut() {
        for (key, value) in fields {
            obj.insert(key.clone(), value.clone());
        }
    }
}

fn is_active(record: &JsonValue) -> bool {
    record.get("active").and_then(JsonValue::as_bool).unwrap_or(true)
}

#[async_trait]
impl PipelineCrm for FakeCrm {
    async fn get_deal(&self, id: DealId) -> Result<DealRecord, CrmError> {
        let state = self.lock();
        if state.unreachable_deals.contains(&id.0) {
            return Err(CrmError::NotFound(format!("deal {id}")));
        }
        let raw = state
            .deals
            .get(&id.0)
            .ok_or_else(|| CrmError::NotFound(format!("deal {id}")))?;
        parse_deal(raw)
    }

    async fn search_deals(&self, term: &str, _fields: &str) -> Result<Vec<DealRecord>, CrmError> {
        let state = self.lock();
        Ok(state
            .deals
            .values()
            .filter(|raw| is_active(raw) && value_contains(raw, term))
            .filter_map(|raw| parse_deal(raw).ok())
            .collect())
    }

    async fn create_deal(&self, fields: &Fields) -> Result<DealId, CrmError> {
        let mut state = self.lock();
        let id = state.next_deal;
        state.next_deal += 1;
        state.deal_creates += 1;
        let mut record = json!({"id": id, "active": true, "status": "open"});
        merge_fields(&mut record, fields);
        record["id"] = json!(id);
        state.deals.insert(id, record);
        Ok(DealId(id))
    }

    async fn update_deal(&self, id: DealId, fields: &Fields) -> Result<(), CrmError> {
        let mut state = self.lock();
        state.deal_updates += 1;
        let record = state
            .deals
            .get_mut(&id.0)
            .ok_or_else(|| CrmError::NotFound(format!("deal {id}")))?;
        merge_fields(record, fields);
        Ok(())
    }

    async fn list_person_deals(&self, person_id: PersonId) -> Result<Vec<DealRecord>, CrmError> {
        let state = self.lock();
        Ok(state
            .deals
            .values()
            .filter(|raw| is_active(raw))
            .filter_map(|raw| parse_deal(raw).ok())
            .filter(|deal| deal.person_id == Some(person_id))
            .collect())
    }

    async fn list_archived_deals(&self, limit: usize) -> Result<Vec<DealRecord>, CrmError> {
        let state = self.lock();
        Ok(state
            .deals
            .values()
            .filter(|raw| !is_active(raw))
            .filter_map(|raw| parse_deal(raw).ok())
            .take(limit)
            .collect())
    }

    async fn get_person(&self, id: PersonId) -> Result<PersonRecord, CrmError> {
        let state = self.lock();
        let raw = state
            .persons
            .get(&id.0)
            .ok_or_else(|| CrmError::NotFound(format!("person {id}")))?;
        parse_person(raw)
    }

    async fn search_persons(&self, term: &str, fields: &str) -> Result<Vec<PersonRecord>, CrmError> {
        let state = self.lock();
        Ok(state
            .persons
            .values()
            .filter(|raw| match fields {
                "email" => raw.get("email").is_some_and(|v| value_contains(v, term)),
                "name" => raw.get("name").is_some_and(|v| value_contains(v, term)),
                _ => value_contains(raw, term),
            })
            .filter_map(|raw| parse_person(raw).ok())
            .collect())
    }

    async fn create_person(&self, fields: &Fields) -> Result<PersonId, CrmError> {
        let mut state = self.lock();
        let id = state.next_person;
        state.next_person += 1;
        state.person_creates += 1;
        let mut record = json!({"id": id});
        merge_fields(&mut record, fields);
        record["id"] = json!(id);
        state.persons.insert(id, record);
        Ok(PersonId(id))
    }

    async fn update_person(&self, id: PersonId, fields: &Fields) -> Result<(), CrmError> {
        let mut state = self.lock();
        state.person_updates += 1;
        let record = state
            .persons
            .get_mut(&id.0)
            .ok_or_else(|| CrmError::NotFound(format!("person {id}")))?;
        merge_fields(record, fields);
        Ok(())
    }

    async fn list_person_leads(&self, person_id: PersonId) -> Result<Vec<LeadRecord>, CrmError> {
        let state = self.lock();
        Ok(state
            .leads
            .iter()
            .filter_map(|raw| parse_lead(raw).ok())
            .filter(|lead| lead.person_id == Some(person_id))
            .collect())
    }

    async fn convert_lead_to_deal(
        &self,
        lead_id: &str,
        initial_fields: &Fields,
    ) -> Result<DealId, CrmError> {
        {
            let state = self.lock();
            if state.fail_lead_conversion {
                return Err(CrmError::Api {
                    status: 422,
                    message: "lead conversion unavailable".into(),
                });
            }
        }
        let id = self.create_deal(initial_fields).await?;
        let mut state = self.lock();
        state.deal_creates -= 1; // counted as a conversion, not a create
        state
            .leads
            .retain(|raw| parse_lead(raw).map(|l| l.id != lead_id).unwrap_or(true));
        Ok(id)
    }
}

#[derive(Default)]
struct SourceState {
    loans: BTreeMap<String, LoanRecord>,
    status_writes: Vec<(String, String)>,
}

pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn seed_loan(&self, loan: LoanRecord) {
        self.state
            .lock()
            .unwrap()
            .loans
            .insert(loan.id.clone(), loan);
    }

    pub fn status_writes(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().status_writes.clone()
    }
}

#[async_trait]
impl OriginationSource for FakeSource {
    async fn get_loan(&self, id: &str) -> Result<LoanRecord, CrmError> {
        self.state
            .lock()
            .unwrap()
            .loans
            .get(id)
            .cloned()
            .ok_or_else(|| CrmError::NotFound(format!("loan {id}")))
    }

    async fn list_loans(
        &self,
        modified_since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LoanRecord>, CrmError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .loans
            .values()
            .filter(|loan| match modified_since {
                Some(cutoff) => loan.last_modified.is_some_and(|m| m >= cutoff),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_loan_status(&self, id: &str, status: &str) -> Result<(), CrmError> {
        self.state
            .lock()
            .unwrap()
            .status_writes
            .push((id.to_string(), status.to_string()));
        Ok(())
    }
}
