//! Contact ↔ account links.
//!
//! A contact has one primary account (`accountId`) and any number of associated
//! accounts through the `accounts` relationship.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::crm::{CrmBackend, CrmError, CrmRecord, EntityType, Payload};
use crate::matching::MatchResolver;

/// Primary-account fields, tried in order. Some CRM layouts only expose the
/// relation by name.
const ACCOUNT_LINK_FIELDS: [&str; 2] = ["accountId", "account"];

/// Many-to-many relationship between contacts and accounts.
const ACCOUNTS_LINK: &str = "accounts";

#[derive(Debug, Clone, Serialize)]
pub struct AccountLink {
    pub contact_id: String,
    pub contact_name: String,
    pub account_id: String,
    pub account_name: String,
    /// Field the CRM accepted for the link.
    pub field: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountUnlink {
    pub contact_id: String,
    pub contact_name: String,
    /// Associated account removed. `None` when the primary account was cleared.
    pub account: Option<AccountSummary>,
    /// Primary-account field cleared, if that is what happened.
    pub cleared_field: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub id: String,
    /// `None` when the account could not be loaded.
    pub name: Option<String>,
}

impl AccountSummary {
    fn from_record(record: &CrmRecord) -> Self {
        let name = record.display_name();
        Self {
            id: record.id.clone(),
            name: (!name.is_empty()).then_some(name),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactAccounts {
    pub contact_id: String,
    pub contact_name: String,
    pub primary: Option<AccountSummary>,
    pub associated: Vec<AccountSummary>,
}

#[derive(Debug, Error)]
pub enum RelationError {
    #[error("no contact matches '{0}'")]
    ContactNotFound(String),

    #[error("no account matches '{0}'")]
    AccountNotFound(String),

    #[error(transparent)]
    Crm(#[from] CrmError),
}

async fn resolve(
    resolver: &MatchResolver,
    entity: EntityType,
    criteria: &str,
) -> Result<CrmRecord, RelationError> {
    let found = resolver.best_match(entity, criteria).await?;
    found.map(|c| c.record).ok_or_else(|| {
        let criteria = criteria.trim().to_string();
        match entity {
            EntityType::Contact => RelationError::ContactNotFound(criteria),
            EntityType::Account => RelationError::AccountNotFound(criteria),
        }
    })
}

/// Writes `value` to the contact's primary-account field, falling back to the
/// by-name field when the CRM rejects the first. Returns the field written.
async fn write_primary_account(
    crm: &dyn CrmBackend,
    contact_id: &str,
    value: Value,
) -> Result<&'static str, CrmError> {
    let [preferred, fallback] = ACCOUNT_LINK_FIELDS;

    let mut payload = Payload::new();
    payload.insert(preferred.to_string(), value.clone());
    match crm.update(EntityType::Contact, contact_id, &payload).await {
        Ok(()) => return Ok(preferred),
        Err(e) if e.is_transport() => return Err(e),
        Err(e) => warn!("CRM rejected {preferred} on Contact {contact_id}: {e}"),
    }

    let mut payload = Payload::new();
    payload.insert(fallback.to_string(), value);
    crm.update(EntityType::Contact, contact_id, &payload).await?;
    Ok(fallback)
}

/// Resolves both sides by criteria and points the contact at the account.
pub async fn link_contact_to_account(
    crm: &dyn CrmBackend,
    resolver: &MatchResolver,
    contact: &str,
    account: &str,
) -> Result<AccountLink, RelationError> {
    let contact_record = resolve(resolver, EntityType::Contact, contact).await?;
    let account_record = resolve(resolver, EntityType::Account, account).await?;

    let field = write_primary_account(crm, &contact_record.id, json!(account_record.id)).await?;
    info!(
        "Linked Contact {} to Account {} via {field}",
        contact_record.id, account_record.id
    );

    Ok(AccountLink {
        contact_name: contact_record.display_name(),
        contact_id: contact_record.id,
        account_name: account_record.display_name(),
        account_id: account_record.id,
        field,
    })
}

/// With `account`, removes that associated account from the contact. Without
/// one, clears the contact's primary account.
pub async fn unlink_contact_from_account(
    crm: &dyn CrmBackend,
    resolver: &MatchResolver,
    contact: &str,
    account: Option<&str>,
) -> Result<AccountUnlink, RelationError> {
    let contact_record = resolve(resolver, EntityType::Contact, contact).await?;

    let (account, cleared_field) = match account {
        Some(account) => {
            let account_record = resolve(resolver, EntityType::Account, account).await?;
            crm.unrelate(
                EntityType::Contact,
                &contact_record.id,
                ACCOUNTS_LINK,
                &account_record.id,
            )
            .await?;
            info!(
                "Removed Account {} from Contact {}",
                account_record.id, contact_record.id
            );
            (Some(AccountSummary::from_record(&account_record)), None)
        }
        None => {
            let field = write_primary_account(crm, &contact_record.id, Value::Null).await?;
            info!("Cleared primary account of Contact {} via {field}", contact_record.id);
            (None, Some(field))
        }
    };

    Ok(AccountUnlink {
        contact_name: contact_record.display_name(),
        contact_id: contact_record.id,
        account,
        cleared_field,
    })
}

/// The contact's primary account plus every associated account.
///
/// A primary account that cannot be loaded is reported by id alone, and a
/// relationship listing the CRM refuses is treated as empty. Transport failures
/// still fail the call.
pub async fn contact_accounts(
    crm: &dyn CrmBackend,
    resolver: &MatchResolver,
    contact: &str,
) -> Result<ContactAccounts, RelationError> {
    let contact_record = resolve(resolver, EntityType::Contact, contact).await?;

    let primary_id = ACCOUNT_LINK_FIELDS
        .iter()
        .find_map(|f| contact_record.text(f))
        .map(str::to_string);
    let primary = match primary_id {
        Some(id) => match crm.fetch(EntityType::Account, &id).await {
            Ok(record) => Some(AccountSummary::from_record(&record)),
            Err(e) if e.is_transport() => return Err(e.into()),
            Err(e) => {
                warn!("Primary account {id} of Contact {} not loaded: {e}", contact_record.id);
                Some(AccountSummary { id, name: None })
            }
        },
        None => None,
    };

    let associated = match crm
        .related(EntityType::Contact, &contact_record.id, ACCOUNTS_LINK)
        .await
    {
        Ok(records) => records.iter().map(AccountSummary::from_record).collect(),
        Err(e) if e.is_transport() => return Err(e.into()),
        Err(e) => {
            warn!("Associated accounts of Contact {} not listed: {e}", contact_record.id);
            Vec::new()
        }
    };

    Ok(ContactAccounts {
        contact_name: contact_record.display_name(),
        contact_id: contact_record.id,
        primary,
        associated,
    })
}
