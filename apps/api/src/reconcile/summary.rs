//! Markdown rendering of a reconciliation for chat and UI display.

use std::fmt::Write;

use serde_json::Value;

use crate::crm::{CrmRecord, EntityType};
use crate::fields::RejectedField;
use crate::reconcile::outcome::{ReconcileReport, ReconciliationOutcome, UnresolvedField};

pub fn render_summary(report: &ReconcileReport, rejected: &[RejectedField]) -> String {
    let entity = report.entity;
    let label = |id: &str| match &report.record_name {
        Some(name) => format!("{entity} **{name}** (`{id}`)"),
        None => format!("{entity} `{id}`"),
    };

    let mut out = match &report.outcome {
        ReconciliationOutcome::Created { id } => format!("Created {}.", label(id)),
        ReconciliationOutcome::CreatedPartial { id, unresolved } => {
            let mut s = format!("Created {}, but some fields were not saved:", label(id));
            push_unresolved(&mut s, unresolved);
            s
        }
        ReconciliationOutcome::UpdatedExisting {
            id,
            changed,
            unresolved,
        } => {
            let mut s = if changed.is_empty() {
                format!("{} is already up to date.", label(id))
            } else {
                format!("Updated {}: {}.", label(id), changed.join(", "))
            };
            if !unresolved.is_empty() {
                s.push_str("\n\nNot saved:");
                push_unresolved(&mut s, unresolved);
            }
            s
        }
        ReconciliationOutcome::Conflict {
            existing_id,
            reason,
        } => format!(
            "A matching {} already exists and could not be updated: {reason}",
            label(existing_id)
        ),
        ReconciliationOutcome::Failed { reason } => {
            format!("Could not save the {entity}: {reason}")
        }
    };

    if !rejected.is_empty() {
        out.push_str("\n\nIgnored input:");
        for r in rejected {
            let _ = write!(out, "\n- `{}`: {}", r.field, r.reason);
        }
    }
    out
}

const CONTACT_DETAILS: &[(&str, &str)] = &[
    ("Email", "emailAddress"),
    ("Title", "cCurrentTitle"),
    ("Current Company", "cCurrentCompany"),
    ("Skills", "cSkills"),
    ("LinkedIn", "cLinkedInURL"),
    ("Street Address", "addressStreet"),
    ("City", "addressCity"),
    ("State", "addressState"),
    ("Postal Code", "addressPostalCode"),
    ("Country", "addressCountry"),
    ("Created", "createdAt"),
    ("Modified", "modifiedAt"),
];

const ACCOUNT_DETAILS: &[(&str, &str)] = &[
    ("Industry", "industry"),
    ("Type", "type"),
    ("Email", "emailAddress"),
    ("Website", "website"),
    ("SIC Code", "sicCode"),
    ("Description", "description"),
];

const BILLING_ADDRESS: &[&str] = &[
    "billingAddressStreet",
    "billingAddressCity",
    "billingAddressState",
    "billingAddressPostalCode",
    "billingAddressCountry",
];

/// Markdown card for one stored record. Empty fields are skipped.
pub fn render_details(entity: EntityType, record: &CrmRecord) -> String {
    let name = record.display_name();
    let mut out = format!(
        "**{entity} Details: {}**\n",
        if name.is_empty() { "Unknown" } else { name.as_str() }
    );

    push_phones(&mut out, record);
    let fields = match entity {
        EntityType::Contact => CONTACT_DETAILS,
        EntityType::Account => ACCOUNT_DETAILS,
    };
    for (label, field) in fields {
        if let Some(value) = record.text(field) {
            let _ = write!(out, "\n**{label}:** {value}");
        }
    }

    if entity == EntityType::Account {
        let billing: Vec<&str> = BILLING_ADDRESS.iter().filter_map(|f| record.text(f)).collect();
        if !billing.is_empty() {
            let _ = write!(out, "\n**Billing Address:** {}", billing.join(", "));
        }
    }
    out
}

/// Every entry of `phoneNumberData`, or the scalar `phoneNumber` when there is
/// no collection.
fn push_phones(out: &mut String, record: &CrmRecord) {
    let entries = record
        .fields
        .get("phoneNumberData")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty());

    match entries {
        Some(items) => {
            out.push_str("\n**Phone:**");
            for item in items {
                let number = item.get("phoneNumber").and_then(Value::as_str).unwrap_or("");
                let kind = item.get("type").and_then(Value::as_str).unwrap_or("Unknown");
                let primary = item.get("primary").and_then(Value::as_bool) == Some(true);
                let _ = write!(
                    out,
                    "\n- {number} ({kind}){}",
                    if primary { " (Primary)" } else { "" }
                );
            }
        }
        None => {
            if let Some(phone) = record.text("phoneNumber") {
                let _ = write!(out, "\n**Phone:** {phone}");
            }
        }
    }
}

fn push_unresolved(out: &mut String, unresolved: &[UnresolvedField]) {
    for u in unresolved {
        let _ = write!(out, "\n- `{}`: {}", u.field, u.reason);
    }
}
