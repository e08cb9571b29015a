//! Scripted in-memory CRM used by the engine, negotiator and linker tests.
//!
//! Mimics the validation quirks the real service shows: phone encodings that
//! pass on update but fail on create, duplicate-email conflicts, per-field
//! rejections and transport failures.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::crm::{
    AttachmentUpload, CrmBackend, CrmError, CrmRecord, EntityType, Filter, Payload, SearchQuery,
};

#[derive(Debug, Clone)]
pub enum Call {
    Search(EntityType, Filter),
    Fetch(EntityType, String),
    Create(EntityType, Payload),
    Update(EntityType, String, Payload),
    Attachment(AttachmentUpload),
    Related(EntityType, String, String),
    Unrelate(EntityType, String, String, String),
}

#[derive(Default)]
pub struct FakeState {
    pub records: Vec<(EntityType, CrmRecord)>,
    pub calls: Vec<Call>,
    next_id: u32,
    /// Any create carrying phone data fails with a phone validation error.
    pub reject_phones_on_create: bool,
    /// Rendered phone numbers accepted on update. `None` accepts everything.
    pub accept_phone: Option<fn(&str) -> bool>,
    pub conflict_on_duplicate_email: bool,
    /// Payloads containing any of these keys are rejected with a 400.
    pub rejected_fields: Vec<&'static str>,
    /// Searches that come back empty before the store is consulted, as if a
    /// concurrent request created the record right after we looked.
    pub empty_searches: usize,
    pub timeout_on_search: bool,
    pub timeout_on_update: bool,
    pub fail_attachment_upload: bool,
    /// Updates carrying `phoneNumberData` fail phone validation; only the
    /// scalar `phoneNumber` field is accepted.
    pub scalar_phone_only: bool,
    /// `(id, link, foreign_id)` relationship rows.
    pub relations: Vec<(String, String, String)>,
}

pub struct FakeCrm {
    state: Mutex<FakeState>,
}

impl FakeCrm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_record(self, entity: EntityType, value: Value) -> Self {
        let record: CrmRecord = serde_json::from_value(value).unwrap();
        self.state.lock().unwrap().records.push((entity, record));
        self
    }

    pub fn with_relation(self, id: &str, link: &str, foreign_id: &str) -> Self {
        self.state.lock().unwrap().relations.push((
            id.to_string(),
            link.to_string(),
            foreign_id.to_string(),
        ));
        self
    }

    pub fn relations(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().relations.clone()
    }

    pub fn configure(self, f: impl FnOnce(&mut FakeState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn creates(&self) -> Vec<Payload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(_, p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, Payload)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(_, id, p) => Some((id, p)),
                _ => None,
            })
            .collect()
    }

    pub fn attachments(&self) -> Vec<AttachmentUpload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Attachment(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn record(&self, entity: EntityType, id: &str) -> Option<CrmRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|(e, r)| *e == entity && r.id == id)
            .map(|(_, r)| r.clone())
    }

    pub fn count(&self, entity: EntityType) -> usize {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|(e, _)| *e == entity)
            .count()
    }
}

fn matches(filter: &Filter, record: &CrmRecord) -> bool {
    match filter {
        Filter::Contains { field, value } => {
            let needle = value.to_lowercase();
            let mut haystacks: Vec<String> = record
                .fields
                .get(*field)
                .and_then(Value::as_str)
                .map(|s| vec![s.to_lowercase()])
                .unwrap_or_default();
            if *field == "emailAddress" {
                if let Some(items) = record.fields.get("emailAddressData").and_then(Value::as_array) {
                    haystacks.extend(
                        items
                            .iter()
                            .filter_map(|i| i.get("emailAddress")?.as_str())
                            .map(str::to_lowercase),
                    );
                }
            }
            haystacks.iter().any(|h| h.contains(&needle))
        }
        Filter::And(items) => items.iter().all(|f| matches(f, record)),
        Filter::Or(items) => items.iter().any(|f| matches(f, record)),
    }
}

fn rendered_phones(payload: &Payload) -> Vec<String> {
    let mut phones: Vec<String> = payload
        .get("phoneNumberData")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("phoneNumber")?.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if let Some(p) = payload.get("phoneNumber").and_then(Value::as_str) {
        phones.push(p.to_string());
    }
    phones
}

fn phone_rejection() -> CrmError {
    CrmError::Rejected {
        status: 400,
        body: r#"{"messageTranslation":{"label":"validationFailure","data":{"field":"phoneNumber","type":"valid"}}}"#
            .to_string(),
    }
}

impl FakeState {
    fn check_fields(&self, payload: &Payload) -> Result<(), CrmError> {
        if let Some(field) = self.rejected_fields.iter().find(|f| payload.contains_key(**f)) {
            return Err(CrmError::Rejected {
                status: 400,
                body: format!(r#"{{"field":"{field}","type":"valid"}}"#),
            });
        }
        Ok(())
    }

    fn check_update_phones(&self, payload: &Payload) -> Result<(), CrmError> {
        if self.scalar_phone_only && payload.contains_key("phoneNumberData") {
            return Err(phone_rejection());
        }
        if let Some(accept) = self.accept_phone {
            if rendered_phones(payload).iter().any(|p| !accept(p)) {
                return Err(phone_rejection());
            }
        }
        Ok(())
    }
}

fn apply(entity: EntityType, record: &mut CrmRecord, payload: &Payload) {
    for (key, value) in payload {
        record.fields.insert(key.clone(), value.clone());
    }

    if let Some(items) = payload.get("phoneNumberData").and_then(Value::as_array) {
        let primary = items
            .iter()
            .find(|i| i.get("primary").and_then(Value::as_bool) == Some(true))
            .or(items.first())
            .and_then(|i| i.get("phoneNumber").cloned());
        if let Some(p) = primary {
            record.fields.insert("phoneNumber".into(), p);
        }
    }
    if let Some(items) = payload.get("emailAddressData").and_then(Value::as_array) {
        if let Some(e) = items
            .iter()
            .find(|i| i.get("primary").and_then(Value::as_bool) == Some(true))
            .and_then(|i| i.get("emailAddress").cloned())
        {
            record.fields.insert("emailAddress".into(), e);
        }
    }

    if entity == EntityType::Contact {
        let name = [record.text("firstName"), record.text("lastName")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        record.fields.insert("name".into(), json!(name));
    }
}

#[async_trait]
impl CrmBackend for FakeCrm {
    async fn search(
        &self,
        entity: EntityType,
        query: &SearchQuery,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Search(entity, query.filter.clone()));
        if state.timeout_on_search {
            return Err(CrmError::Timeout);
        }
        if state.empty_searches > 0 {
            state.empty_searches -= 1;
            return Ok(Vec::new());
        }
        Ok(state
            .records
            .iter()
            .filter(|(e, r)| *e == entity && matches(&query.filter, r))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn fetch(&self, entity: EntityType, id: &str) -> Result<CrmRecord, CrmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Fetch(entity, id.to_string()));
        state
            .records
            .iter()
            .find(|(e, r)| *e == entity && r.id == id)
            .map(|(_, r)| r.clone())
            .ok_or_else(|| CrmError::NotFound(format!("{entity} {id}")))
    }

    async fn create(&self, entity: EntityType, payload: &Payload) -> Result<String, CrmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create(entity, payload.clone()));

        state.check_fields(payload)?;
        if state.reject_phones_on_create && !rendered_phones(payload).is_empty() {
            return Err(phone_rejection());
        }
        if state.conflict_on_duplicate_email {
            if let Some(email) = payload.get("emailAddress").and_then(Value::as_str) {
                let duplicate = state.records.iter().any(|(e, r)| {
                    *e == entity
                        && r.text("emailAddress")
                            .is_some_and(|s| s.eq_ignore_ascii_case(email))
                });
                if duplicate {
                    return Err(CrmError::Conflict {
                        body: r#"{"reason":"Duplicate"}"#.to_string(),
                    });
                }
            }
        }

        state.next_id += 1;
        let id = format!("{}-{}", entity.as_str().to_lowercase(), state.next_id);
        let mut record = CrmRecord {
            id: id.clone(),
            fields: Default::default(),
        };
        apply(entity, &mut record, payload);
        state.records.push((entity, record));
        Ok(id)
    }

    async fn update(
        &self,
        entity: EntityType,
        id: &str,
        payload: &Payload,
    ) -> Result<(), CrmError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::Update(entity, id.to_string(), payload.clone()));

        if state.timeout_on_update {
            return Err(CrmError::Timeout);
        }
        state.check_fields(payload)?;
        state.check_update_phones(payload)?;

        let (_, record) = state
            .records
            .iter_mut()
            .find(|(e, r)| *e == entity && r.id == id)
            .ok_or_else(|| CrmError::NotFound(format!("{entity} {id}")))?;
        apply(entity, record, payload);
        Ok(())
    }

    async fn create_attachment(&self, upload: &AttachmentUpload) -> Result<String, CrmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Attachment(upload.clone()));
        if state.fail_attachment_upload {
            return Err(CrmError::Rejected {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        state.next_id += 1;
        Ok(format!("attachment-{}", state.next_id))
    }

    async fn related(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::Related(entity, id.to_string(), link.to_string()));
        if state.timeout_on_search {
            return Err(CrmError::Timeout);
        }
        let foreign: Vec<String> = state
            .relations
            .iter()
            .filter(|(i, l, _)| i == id && l == link)
            .map(|(_, _, f)| f.clone())
            .collect();
        Ok(state
            .records
            .iter()
            .filter(|(_, r)| foreign.contains(&r.id))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn unrelate(
        &self,
        entity: EntityType,
        id: &str,
        link: &str,
        foreign_id: &str,
    ) -> Result<(), CrmError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Unrelate(
            entity,
            id.to_string(),
            link.to_string(),
            foreign_id.to_string(),
        ));
        let before = state.relations.len();
        state
            .relations
            .retain(|(i, l, f)| !(i == id && l == link && f == foreign_id));
        if state.relations.len() == before {
            return Err(CrmError::NotFound(format!("{entity} {id} {link} {foreign_id}")));
        }
        Ok(())
    }
}
