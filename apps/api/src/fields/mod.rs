//! Typed field maps, the boundary between the loosely structured input from the
//! NLU layer and the reconciliation engine.
//!
//! Every entity type has a fixed set of recognized CRM field names. Input is
//! parsed against that set once; anything unknown or malformed is rejected per
//! field and reported, without sinking the rest of the map.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::crm::{CrmRecord, EntityType, Payload};

pub mod entries;
pub mod normalize;

pub use entries::{enforce_single_primary, EmailEntry, PhoneEntry, PhoneKind};
pub use normalize::{normalize_email, normalize_phone};

pub type FieldName = &'static str;

pub const FIRST_NAME: FieldName = "firstName";
pub const LAST_NAME: FieldName = "lastName";
pub const NAME: FieldName = "name";
pub const EMAIL_ADDRESS: FieldName = "emailAddress";
pub const EMAIL_ADDRESS_DATA: FieldName = "emailAddressData";
pub const PHONE_NUMBER: FieldName = "phoneNumber";
pub const PHONE_NUMBER_DATA: FieldName = "phoneNumberData";

// ────────────────────────────────────────────────────────────────────────────
// Recognized fields
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Email,
    Flag,
    Phones,
    Emails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Contact,
    Account,
    Both,
}

struct FieldDef {
    name: FieldName,
    kind: FieldKind,
    scope: Scope,
}

const fn field_def(name: FieldName, kind: FieldKind, scope: Scope) -> FieldDef {
    FieldDef { name, kind, scope }
}

const RECOGNIZED: &[FieldDef] = &[
    field_def(FIRST_NAME, FieldKind::Text, Scope::Contact),
    field_def(LAST_NAME, FieldKind::Text, Scope::Contact),
    field_def("salutationName", FieldKind::Text, Scope::Contact),
    field_def("title", FieldKind::Text, Scope::Contact),
    field_def("cCurrentTitle", FieldKind::Text, Scope::Contact),
    field_def("cCurrentCompany", FieldKind::Text, Scope::Contact),
    field_def("cSkills", FieldKind::Text, Scope::Contact),
    field_def("cLinkedInURL", FieldKind::Text, Scope::Contact),
    field_def("addressStreet", FieldKind::Text, Scope::Contact),
    field_def("addressCity", FieldKind::Text, Scope::Contact),
    field_def("addressState", FieldKind::Text, Scope::Contact),
    field_def("addressPostalCode", FieldKind::Text, Scope::Contact),
    field_def("addressCountry", FieldKind::Text, Scope::Contact),
    field_def("accountId", FieldKind::Text, Scope::Contact),
    field_def("doNotCall", FieldKind::Flag, Scope::Contact),
    field_def(NAME, FieldKind::Text, Scope::Account),
    field_def("website", FieldKind::Text, Scope::Account),
    field_def("industry", FieldKind::Text, Scope::Account),
    field_def("type", FieldKind::Text, Scope::Account),
    field_def("sicCode", FieldKind::Text, Scope::Account),
    field_def("billingAddressStreet", FieldKind::Text, Scope::Account),
    field_def("billingAddressCity", FieldKind::Text, Scope::Account),
    field_def("billingAddressState", FieldKind::Text, Scope::Account),
    field_def("billingAddressPostalCode", FieldKind::Text, Scope::Account),
    field_def("billingAddressCountry", FieldKind::Text, Scope::Account),
    field_def("shippingAddressStreet", FieldKind::Text, Scope::Account),
    field_def("shippingAddressCity", FieldKind::Text, Scope::Account),
    field_def("shippingAddressState", FieldKind::Text, Scope::Account),
    field_def("shippingAddressPostalCode", FieldKind::Text, Scope::Account),
    field_def("shippingAddressCountry", FieldKind::Text, Scope::Account),
    field_def("description", FieldKind::Text, Scope::Both),
    field_def(EMAIL_ADDRESS, FieldKind::Email, Scope::Both),
    field_def(EMAIL_ADDRESS_DATA, FieldKind::Emails, Scope::Both),
    field_def(PHONE_NUMBER_DATA, FieldKind::Phones, Scope::Both),
];

fn lookup(entity: EntityType, name: &str) -> Option<&'static FieldDef> {
    RECOGNIZED.iter().find(|s| {
        s.name == name
            && match s.scope {
                Scope::Both => true,
                Scope::Contact => entity == EntityType::Contact,
                Scope::Account => entity == EntityType::Account,
            }
    })
}

/// Fields that identify a record and are never touched by a plain merge.
pub fn identity_fields(entity: EntityType) -> &'static [FieldName] {
    match entity {
        EntityType::Contact => &[FIRST_NAME, LAST_NAME],
        EntityType::Account => &[NAME],
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Values
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Phones(Vec<PhoneEntry>),
    Emails(Vec<EmailEntry>),
}

impl FieldValue {
    /// JSON for the CRM. Phones are rendered by the format negotiator instead.
    pub fn to_crm(&self) -> Option<Value> {
        match self {
            FieldValue::Text(s) => Some(Value::String(s.clone())),
            FieldValue::Flag(b) => Some(Value::Bool(*b)),
            FieldValue::Emails(entries) => {
                Some(Value::Array(entries.iter().map(EmailEntry::to_crm).collect()))
            }
            FieldValue::Phones(_) => None,
        }
    }

    /// True when `record` already stores this exact value under `name`.
    pub fn matches_stored(&self, name: &str, record: &CrmRecord) -> bool {
        match self {
            FieldValue::Text(incoming) => match record.fields.get(name).and_then(value_as_text) {
                Some(stored) if name == EMAIL_ADDRESS => stored.eq_ignore_ascii_case(incoming),
                Some(stored) => stored == *incoming,
                None => false,
            },
            FieldValue::Flag(incoming) => {
                record.fields.get(name).and_then(Value::as_bool) == Some(*incoming)
            }
            FieldValue::Phones(incoming) => stored_phones(record) == *incoming,
            FieldValue::Emails(incoming) => {
                let stored = stored_emails(record);
                stored.len() == incoming.len()
                    && stored.iter().zip(incoming).all(|(s, i)| {
                        s.address.eq_ignore_ascii_case(&i.address)
                            && s.is_primary == i.is_primary
                            && s.opt_out == i.opt_out
                            && s.invalid == i.invalid
                    })
            }
        }
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

/// Phone collection as stored on `record`, canonicalized to 10-digit numbers.
/// Falls back to the scalar `phoneNumber` when no collection was returned.
pub fn stored_phones(record: &CrmRecord) -> Vec<PhoneEntry> {
    if let Some(items) = record.fields.get(PHONE_NUMBER_DATA).and_then(Value::as_array) {
        return items
            .iter()
            .filter_map(|item| {
                let number = normalize_phone(item.get("phoneNumber")?.as_str()?).ok()?;
                Some(PhoneEntry {
                    number,
                    kind: item
                        .get("type")
                        .and_then(Value::as_str)
                        .map(PhoneKind::parse)
                        .unwrap_or_default(),
                    is_primary: flag(item.get("primary")),
                    opt_out: flag(item.get("optOut")),
                    invalid: flag(item.get("invalid")),
                })
            })
            .collect();
    }

    record
        .text(PHONE_NUMBER)
        .and_then(|raw| normalize_phone(raw).ok())
        .map(|number| vec![PhoneEntry::new(number, PhoneKind::Mobile, true)])
        .unwrap_or_default()
}

/// Email collection as stored on `record`, falling back to the scalar `emailAddress`.
pub fn stored_emails(record: &CrmRecord) -> Vec<EmailEntry> {
    if let Some(items) = record.fields.get(EMAIL_ADDRESS_DATA).and_then(Value::as_array) {
        return items
            .iter()
            .filter_map(|item| {
                Some(EmailEntry {
                    address: item.get("emailAddress")?.as_str()?.trim().to_string(),
                    is_primary: flag(item.get("primary")),
                    opt_out: flag(item.get("optOut")),
                    invalid: flag(item.get("invalid")),
                })
            })
            .collect();
    }

    record
        .text(EMAIL_ADDRESS)
        .map(|address| vec![EmailEntry::new(address.to_string(), true)])
        .unwrap_or_default()
}

// ────────────────────────────────────────────────────────────────────────────
// FieldMap
// ────────────────────────────────────────────────────────────────────────────

/// Ordered map from recognized CRM field name to value. Inserting an existing
/// name replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldMap {
    entries: Vec<(FieldName, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: FieldName, value: FieldValue) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    pub fn names(&self) -> Vec<FieldName> {
        self.entries.iter().map(|(n, _)| *n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn phones(&self) -> Option<&[PhoneEntry]> {
        match self.get(PHONE_NUMBER_DATA) {
            Some(FieldValue::Phones(entries)) if !entries.is_empty() => Some(entries),
            _ => None,
        }
    }

    /// The scalar `emailAddress`, else the primary of `emailAddressData`.
    pub fn primary_email(&self) -> Option<&str> {
        if let Some(email) = self.text(EMAIL_ADDRESS) {
            return Some(email);
        }
        match self.get(EMAIL_ADDRESS_DATA) {
            Some(FieldValue::Emails(entries)) => entries
                .iter()
                .find(|e| e.is_primary)
                .map(|e| e.address.as_str()),
            _ => None,
        }
    }

    /// Full name for contacts, `name` for accounts.
    pub fn display_name(&self, entity: EntityType) -> Option<String> {
        let parts: Vec<&str> = identity_fields(entity)
            .iter()
            .filter_map(|f| self.text(f))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }

    /// Every identity field for `entity` is present.
    pub fn has_full_identity(&self, entity: EntityType) -> bool {
        identity_fields(entity).iter().all(|f| self.text(f).is_some())
    }

    pub fn identity(&self, entity: EntityType) -> FieldMap {
        let ids = identity_fields(entity);
        self.filtered(|name| ids.contains(&name))
    }

    pub fn without_identity(&self, entity: EntityType) -> FieldMap {
        let ids = identity_fields(entity);
        self.filtered(|name| !ids.contains(&name))
    }

    pub fn without_phones(&self) -> FieldMap {
        self.filtered(|name| name != PHONE_NUMBER_DATA)
    }

    fn filtered(&self, keep: impl Fn(FieldName) -> bool) -> FieldMap {
        self.entries
            .iter()
            .filter(|(n, _)| keep(*n))
            .cloned()
            .collect()
    }

    /// Request body with every non-phone field.
    pub fn to_payload(&self) -> Payload {
        self.entries
            .iter()
            .filter_map(|(name, value)| value.to_crm().map(|v| (name.to_string(), v)))
            .collect()
    }
}

impl FromIterator<(FieldName, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (FieldName, FieldValue)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl IntoIterator for FieldMap {
    type Item = (FieldName, FieldValue);
    type IntoIter = std::vec::IntoIter<(FieldName, FieldValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Boundary parsing
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedField {
    pub field: String,
    pub reason: String,
}

impl RejectedField {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFields {
    pub fields: FieldMap,
    pub rejected: Vec<RejectedField>,
}

/// Validates a flat key/value map from the NLU layer against the recognized
/// fields for `entity`. Null and blank values are treated as unset and skipped.
pub fn parse_fields(entity: EntityType, input: &Map<String, Value>) -> ParsedFields {
    let mut parsed = ParsedFields::default();
    let has_phone_collection = input.contains_key(PHONE_NUMBER_DATA);

    for (key, value) in input {
        if value.is_null() {
            continue;
        }

        // A scalar phone is shorthand for a one-entry primary Mobile collection.
        if key == PHONE_NUMBER {
            if has_phone_collection {
                continue;
            }
            match scalar_text(value).map(|raw| normalize_phone(&raw)) {
                Some(Ok(number)) => parsed.fields.insert(
                    PHONE_NUMBER_DATA,
                    FieldValue::Phones(vec![PhoneEntry::new(number, PhoneKind::Mobile, true)]),
                ),
                Some(Err(e)) => parsed.rejected.push(RejectedField::new(key, e.to_string())),
                None => {}
            }
            continue;
        }

        let Some(def) = lookup(entity, key) else {
            parsed.rejected.push(RejectedField::new(
                key.as_str(),
                format!("not a recognized {entity} field"),
            ));
            continue;
        };

        match parse_value(def, value, &mut parsed.rejected) {
            Ok(Some(v)) => parsed.fields.insert(def.name, v),
            Ok(None) => {}
            Err(reason) => parsed.rejected.push(RejectedField::new(def.name, reason)),
        }
    }

    parsed
}

fn scalar_text(value: &Value) -> Option<String> {
    value_as_text(value).filter(|s| !s.is_empty())
}

fn parse_value(
    def: &FieldDef,
    value: &Value,
    rejected: &mut Vec<RejectedField>,
) -> Result<Option<FieldValue>, String> {
    match def.kind {
        FieldKind::Text => match value {
            Value::String(_) | Value::Number(_) => Ok(scalar_text(value).map(FieldValue::Text)),
            _ => Err("expected a text value".to_string()),
        },
        FieldKind::Email => match scalar_text(value) {
            Some(raw) => normalize_email(&raw)
                .map(|email| Some(FieldValue::Text(email)))
                .map_err(|e| e.to_string()),
            None => Ok(None),
        },
        FieldKind::Flag => parse_flag(value)
            .map(|b| Some(FieldValue::Flag(b)))
            .ok_or_else(|| "expected true or false".to_string()),
        FieldKind::Phones => {
            let items = value.as_array().ok_or("expected a list of phone numbers")?;
            let mut entries = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match parse_phone_entry(item) {
                    Ok(entry) => entries.push(entry),
                    Err(reason) => rejected.push(RejectedField::new(
                        format!("{}[{i}]", def.name),
                        reason,
                    )),
                }
            }
            enforce_single_primary(&mut entries);
            Ok((!entries.is_empty()).then_some(FieldValue::Phones(entries)))
        }
        FieldKind::Emails => {
            let items = value.as_array().ok_or("expected a list of email addresses")?;
            let mut entries = Vec::new();
            for (i, item) in items.iter().enumerate() {
                match parse_email_entry(item) {
                    Ok(entry) => entries.push(entry),
                    Err(reason) => rejected.push(RejectedField::new(
                        format!("{}[{i}]", def.name),
                        reason,
                    )),
                }
            }
            enforce_single_primary(&mut entries);
            Ok((!entries.is_empty()).then_some(FieldValue::Emails(entries)))
        }
    }
}

fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_phone_entry(item: &Value) -> Result<PhoneEntry, String> {
    let raw = match item {
        Value::Object(obj) => obj.get("phoneNumber").and_then(scalar_text),
        other => scalar_text(other),
    }
    .ok_or("missing phoneNumber")?;

    let number = normalize_phone(&raw).map_err(|e| e.to_string())?;
    Ok(PhoneEntry {
        number,
        kind: item
            .get("type")
            .and_then(Value::as_str)
            .map(PhoneKind::parse)
            .unwrap_or_default(),
        is_primary: flag(item.get("primary")),
        opt_out: flag(item.get("optOut")),
        invalid: flag(item.get("invalid")),
    })
}

fn parse_email_entry(item: &Value) -> Result<EmailEntry, String> {
    let raw = match item {
        Value::Object(obj) => obj.get("emailAddress").and_then(scalar_text),
        other => scalar_text(other),
    }
    .ok_or("missing emailAddress")?;

    let address = normalize_email(&raw).map_err(|e| e.to_string())?;
    Ok(EmailEntry {
        address,
        is_primary: flag(item.get("primary")),
        opt_out: flag(item.get("optOut")),
        invalid: flag(item.get("invalid")),
    })
}
