//! Borrower-to-contact resolution. Email is the primary identity key; the
//! external contact id is the fallback, and a bare name is the last resort
//! for files that carry neither.

use anyhow::{bail, Context, Result};
use loanbridge_adapters::{Fields, PipelineCrm};
use loanbridge_core::{FieldValue, LoanRecord, PersonId, PersonRecord};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::config::DestSchema;

/// Resolve the primary borrower to a destination person, creating one if
/// needed, and promote them from Lead to Borrower.
pub async fn resolve_primary(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    loan: &LoanRecord,
) -> Result<PersonId> {
    let borrower = &loan.borrower;
    let email = trimmed(borrower.email.as_deref());
    let contact_id = trimmed(borrower.external_contact_id.as_deref());

    if let Some(email) = email {
        if let Some(person) = find_by_email(crm, email).await? {
            debug!(person_id = %person.id, email, "matched borrower by email");
            promote_existing(crm, schema, &person, contact_id, None).await?;
            return Ok(person.id);
        }
    }

    if let Some(contact_id) = contact_id {
        if let Some(person) = find_by_external_id(crm, schema, contact_id).await? {
            debug!(person_id = %person.id, contact_id, "matched borrower by external contact id");
            // The stored email drifted from the source; keep both addresses.
            let missing_email = email.filter(|e| !person.has_email(e));
            if let Some(new_email) = missing_email {
                warn!(
                    person_id = %person.id,
                    new_email,
                    "borrower email changed at source, appending"
                );
            }
            promote_existing(crm, schema, &person, Some(contact_id), missing_email).await?;
            return Ok(person.id);
        }
    }

    if email.is_none() && contact_id.is_none() {
        let name = match trimmed(borrower.name.as_deref()).or_else(|| trimmed(loan.name.as_deref()))
        {
            Some(name) => name,
            None => bail!("borrower on loan {} has no email, name, or contact id", loan.id),
        };
        warn!(
            loan_id = %loan.id,
            name,
            "borrower has neither email nor contact id, matching by name only"
        );
        if let Some(person) = find_by_exact_name(crm, name).await? {
            promote_existing(crm, schema, &person, None, None).await?;
            return Ok(person.id);
        }
    }

    let person_id = create_borrower(crm, schema, loan).await?;
    info!(%person_id, loan_id = %loan.id, "created borrower contact");
    Ok(person_id)
}

/// Resolve the co-borrower, if the loan names one with an email address.
/// Without an email there is no safe dedupe key, so none is created.
pub async fn resolve_coborrower(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    loan: &LoanRecord,
) -> Result<Option<PersonId>> {
    let borrower = &loan.borrower;
    let email = match trimmed(borrower.coborrower_email.as_deref()) {
        Some(email) => email,
        None => return Ok(None),
    };

    if let Some(person) = find_by_email(crm, email).await? {
        debug!(person_id = %person.id, email, "matched co-borrower by email");
        return Ok(Some(person.id));
    }

    let name = match (
        trimmed(borrower.coborrower_first_name.as_deref()),
        trimmed(borrower.coborrower_last_name.as_deref()),
    ) {
        (Some(first), Some(last)) => format!("{first} {last}"),
        (Some(first), None) => first.to_string(),
        (None, Some(last)) => last.to_string(),
        (None, None) => email.to_string(),
    };

    let mut fields = Fields::new();
    fields.insert("name".to_string(), json!(name));
    fields.insert("email".to_string(), json!(email));
    if let Some(phone) = trimmed(borrower.coborrower_phone.as_deref()) {
        fields.insert("phone".to_string(), json!(phone));
    }
    if let Some(birthdate) = borrower.coborrower_birthdate {
        fields.insert(schema.birthday_key.clone(), json!(birthdate.to_string()));
    }
    fields.insert(schema.group_key.clone(), json!([schema.group_borrower]));
    fields.insert(
        schema.contact_type_key.clone(),
        json!(schema.contact_type_client_id),
    );

    let person_id = crm
        .create_person(&fields)
        .await
        .context("creating co-borrower contact")?;
    info!(%person_id, loan_id = %loan.id, "created co-borrower contact");
    Ok(Some(person_id))
}

fn trimmed(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Current group memberships. The field is a list, though older records
/// sometimes carry a bare string.
fn group_memberships(person: &PersonRecord, group_key: &str) -> Vec<String> {
    match person
        .custom_fields
        .get(group_key)
        .and_then(FieldValue::payload)
    {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(str::to_string)
            .collect(),
        Some(JsonValue::String(one)) => vec![one.clone()],
        _ => Vec::new(),
    }
}

/// Email search with confirmation. The search endpoint matches substrings,
/// so every candidate is verified against its full email list.
async fn find_by_email(crm: &dyn PipelineCrm, email: &str) -> Result<Option<PersonRecord>> {
    let candidates = crm
        .search_persons(email, "email")
        .await
        .context("searching persons by email")?;
    for candidate in candidates {
        if candidate.has_email(email) {
            return Ok(Some(candidate));
        }
        let full = crm
            .get_person(candidate.id)
            .await
            .context("confirming person email match")?;
        if full.has_email(email) {
            return Ok(Some(full));
        }
    }
    Ok(None)
}

async fn find_by_external_id(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    contact_id: &str,
) -> Result<Option<PersonRecord>> {
    let candidates = crm
        .search_persons(contact_id, "custom_fields")
        .await
        .context("searching persons by external contact id")?;
    Ok(candidates.into_iter().find(|candidate| {
        candidate
            .custom_text(&schema.contact_id_key)
            .is_some_and(|stored| stored == contact_id)
    }))
}

async fn find_by_exact_name(crm: &dyn PipelineCrm, name: &str) -> Result<Option<PersonRecord>> {
    let candidates = crm
        .search_persons(name, "name")
        .await
        .context("searching persons by name")?;
    Ok(candidates.into_iter().find(|candidate| {
        candidate
            .name
            .as_deref()
            .is_some_and(|stored| stored.trim().eq_ignore_ascii_case(name))
    }))
}

/// One consolidated update for an existing contact: Lead -> Borrower group
/// promotion, Client contact type unless already Business, external-id
/// backfill, and an optional appended email. No-ops issue no write.
async fn promote_existing(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    person: &PersonRecord,
    contact_id: Option<&str>,
    append_email: Option<&str>,
) -> Result<()> {
    let mut fields = Fields::new();

    // Group is multi-valued; drop only the Lead marker and keep every other
    // membership.
    let groups = group_memberships(person, &schema.group_key);
    let has_lead = groups
        .iter()
        .any(|g| g.eq_ignore_ascii_case(&schema.group_lead));
    let has_borrower = groups
        .iter()
        .any(|g| g.eq_ignore_ascii_case(&schema.group_borrower));
    if has_lead || !has_borrower {
        let mut merged: Vec<String> = groups
            .into_iter()
            .filter(|g| !g.eq_ignore_ascii_case(&schema.group_lead))
            .collect();
        if !has_borrower {
            merged.push(schema.group_borrower.clone());
        }
        fields.insert(schema.group_key.clone(), json!(merged));
    }

    let contact_type = person
        .custom_fields
        .get(&schema.contact_type_key)
        .and_then(|v| v.option_id());
    let is_business = contact_type == Some(schema.contact_type_business_id);
    if !is_business && contact_type != Some(schema.contact_type_client_id) {
        fields.insert(
            schema.contact_type_key.clone(),
            json!(schema.contact_type_client_id),
        );
    }

    if let Some(contact_id) = contact_id {
        let stored = person.custom_text(&schema.contact_id_key);
        match stored.as_deref() {
            Some(stored) if stored == contact_id => {}
            // Linkage is written once; a differing stored id is logged,
            // never overwritten.
            Some(stored) => {
                warn!(
                    person_id = %person.id,
                    stored,
                    contact_id,
                    "external contact id drifted, leaving stored linkage"
                );
            }
            None => {
                fields.insert(schema.contact_id_key.clone(), json!(contact_id));
            }
        }
    }

    if let Some(new_email) = append_email {
        // The source address is authoritative: it becomes primary and the
        // stale entries lose the flag.
        let mut emails: Vec<JsonValue> = person
            .emails
            .iter()
            .map(|e| json!({"value": e.value, "primary": false}))
            .collect();
        emails.push(json!({"value": new_email, "primary": true}));
        fields.insert("email".to_string(), json!(emails));
    }

    if fields.is_empty() {
        return Ok(());
    }
    crm.update_person(person.id, &fields)
        .await
        .context("promoting borrower contact")?;
    Ok(())
}

async fn create_borrower(
    crm: &dyn PipelineCrm,
    schema: &DestSchema,
    loan: &LoanRecord,
) -> Result<PersonId> {
    let borrower = &loan.borrower;
    let name = trimmed(borrower.name.as_deref())
        .map(str::to_string)
        .or_else(|| trimmed(loan.name.as_deref()).map(str::to_string))
        .or_else(|| trimmed(borrower.external_contact_id.as_deref()).map(str::to_string))
        .unwrap_or_else(|| "Unknown Borrower".to_string());

    let mut fields = Fields::new();
    fields.insert("name".to_string(), json!(name));
    if let Some(email) = trimmed(borrower.email.as_deref()) {
        fields.insert("email".to_string(), json!(email));
    }
    if let Some(phone) = trimmed(borrower.phone.as_deref()) {
        fields.insert("phone".to_string(), json!(phone));
    }
    if let Some(contact_id) = trimmed(borrower.external_contact_id.as_deref()) {
        fields.insert(schema.contact_id_key.clone(), json!(contact_id));
    }
    if let Some(birthdate) = borrower.birthdate {
        fields.insert(schema.birthday_key.clone(), json!(birthdate.to_string()));
    }
    fields.insert(schema.group_key.clone(), json!([schema.group_borrower]));
    fields.insert(
        schema.contact_type_key.clone(),
        json!(schema.contact_type_client_id),
    );

    crm.create_person(&fields)
        .await
        .context("creating borrower contact")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCrm;
    use loanbridge_core::BorrowerBlock;
    use serde_json::json;

    fn schema() -> DestSchema {
        DestSchema::from_env()
    }

    fn loan_with(borrower: BorrowerBlock) -> LoanRecord {
        LoanRecord {
            id: "a0X001".into(),
            borrower,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn email_match_wins_and_promotes_lead_to_borrower() {
        let s = schema();
        let crm = FakeCrm::new();
        let existing = crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
            (s.group_key.clone()): s.group_lead,
        }));

        let loan = loan_with(BorrowerBlock {
            email: Some("JANE@example.com".into()),
            external_contact_id: Some("003AAA".into()),
            name: Some("Jane Doe".into()),
            ..Default::default()
        });

        let id = resolve_primary(&crm, &s, &loan).await.unwrap();
        assert_eq!(id, existing);
        assert_eq!(crm.person_create_count(), 0);

        let person = crm.get_person(existing).await.unwrap();
        assert_eq!(
            group_memberships(&person, &s.group_key),
            vec![s.group_borrower.clone()]
        );
        assert_eq!(
            person.custom_text(&s.contact_id_key).as_deref(),
            Some("003AAA")
        );
    }

    #[tokio::test]
    async fn promotion_keeps_unrelated_group_memberships() {
        let s = schema();
        let crm = FakeCrm::new();
        let existing = crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "jane@example.com", "primary": true}],
            (s.group_key.clone()): [s.group_lead, "VIP"],
        }));

        let loan = loan_with(BorrowerBlock {
            email: Some("jane@example.com".into()),
            ..Default::default()
        });
        resolve_primary(&crm, &s, &loan).await.unwrap();

        let person = crm.get_person(existing).await.unwrap();
        let groups = group_memberships(&person, &s.group_key);
        assert!(groups.iter().any(|g| g == "VIP"));
        assert!(groups.iter().any(|g| g == &s.group_borrower));
        assert!(!groups.iter().any(|g| g == &s.group_lead));
    }

    #[tokio::test]
    async fn business_contact_type_is_never_overwritten() {
        let s = schema();
        let crm = FakeCrm::new();
        let existing = crm.seed_person(json!({
            "name": "Doe Holdings LLC",
            "email": [{"value": "office@doeholdings.example"}],
            (s.contact_type_key.clone()): {"id": s.contact_type_business_id, "value": "Business"},
        }));

        let loan = loan_with(BorrowerBlock {
            email: Some("office@doeholdings.example".into()),
            ..Default::default()
        });
        resolve_primary(&crm, &s, &loan).await.unwrap();

        let person = crm.get_person(existing).await.unwrap();
        assert_eq!(
            person
                .custom_fields
                .get(&s.contact_type_key)
                .and_then(|v| v.option_id()),
            Some(s.contact_type_business_id)
        );
    }

    #[tokio::test]
    async fn external_id_fallback_appends_the_new_email() {
        let s = schema();
        let crm = FakeCrm::new();
        let existing = crm.seed_person(json!({
            "name": "Jane Doe",
            "email": [{"value": "old@example.com", "primary": true}],
            (s.contact_id_key.clone()): "003AAA",
        }));

        let loan = loan_with(BorrowerBlock {
            email: Some("new@example.com".into()),
            external_contact_id: Some("003AAA".into()),
            ..Default::default()
        });

        let id = resolve_primary(&crm, &s, &loan).await.unwrap();
        assert_eq!(id, existing);
        let person = crm.get_person(existing).await.unwrap();
        assert!(person.has_email("old@example.com"));
        assert!(person.has_email("new@example.com"));

        // The source address takes over as primary.
        let primary: Vec<&str> = person
            .emails
            .iter()
            .filter(|e| e.primary)
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(primary, vec!["new@example.com"]);
    }

    #[tokio::test]
    async fn unknown_borrower_is_created_as_client_borrower() {
        let s = schema();
        let crm = FakeCrm::new();
        let loan = loan_with(BorrowerBlock {
            email: Some("jane@example.com".into()),
            name: Some("Jane Doe".into()),
            phone: Some("555-0100".into()),
            external_contact_id: Some("003AAA".into()),
            ..Default::default()
        });

        let id = resolve_primary(&crm, &s, &loan).await.unwrap();
        assert_eq!(crm.person_create_count(), 1);

        let person = crm.get_person(id).await.unwrap();
        assert_eq!(person.name.as_deref(), Some("Jane Doe"));
        assert!(person.has_email("jane@example.com"));
        assert_eq!(
            group_memberships(&person, &s.group_key),
            vec![s.group_borrower.clone()]
        );
        assert_eq!(
            person
                .custom_fields
                .get(&s.contact_type_key)
                .and_then(|v| v.option_id()),
            Some(s.contact_type_client_id)
        );
    }

    #[tokio::test]
    async fn resolving_twice_is_idempotent() {
        let s = schema();
        let crm = FakeCrm::new();
        let loan = loan_with(BorrowerBlock {
            email: Some("jane@example.com".into()),
            name: Some("Jane Doe".into()),
            ..Default::default()
        });

        let first = resolve_primary(&crm, &s, &loan).await.unwrap();
        let writes_after_first = crm.person_update_count();
        let second = resolve_primary(&crm, &s, &loan).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(crm.person_create_count(), 1);
        // The second pass finds nothing to change and writes nothing.
        assert_eq!(crm.person_update_count(), writes_after_first);
    }

    #[tokio::test]
    async fn coborrower_without_email_resolves_to_none() {
        let s = schema();
        let crm = FakeCrm::new();
        let loan = loan_with(BorrowerBlock {
            coborrower_first_name: Some("John".into()),
            coborrower_last_name: Some("Doe".into()),
            ..Default::default()
        });
        let resolved = resolve_coborrower(&crm, &s, &loan).await.unwrap();
        assert_eq!(resolved, None);
        assert_eq!(crm.person_create_count(), 0);
    }

    #[tokio::test]
    async fn coborrower_with_email_is_created_once() {
        let s = schema();
        let crm = FakeCrm::new();
        let loan = loan_with(BorrowerBlock {
            coborrower_first_name: Some("John".into()),
            coborrower_last_name: Some("Doe".into()),
            coborrower_email: Some("john@example.com".into()),
            ..Default::default()
        });

        let first = resolve_coborrower(&crm, &s, &loan).await.unwrap().unwrap();
        let second = resolve_coborrower(&crm, &s, &loan).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(crm.person_create_count(), 1);

        let person = crm.get_person(first).await.unwrap();
        assert_eq!(person.name.as_deref(), Some("John Doe"));
    }
}
