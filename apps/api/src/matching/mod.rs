//! Match resolution: turns free-text criteria (a name, an email or a website)
//! into a CRM search and orders the results so the first one is the best match.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::crm::{CrmBackend, CrmError, CrmRecord, EntityType, Filter, SearchQuery};

const CONTACT_SELECT: &[&str] = &[
    "id",
    "name",
    "firstName",
    "lastName",
    "emailAddress",
    "phoneNumberData",
    "cSkills",
    "cCurrentTitle",
    "cLinkedInURL",
    "addressStreet",
    "addressCity",
    "addressState",
    "addressPostalCode",
    "addressCountry",
    "cCurrentCompany",
    "accountId",
];

const ACCOUNT_SELECT: &[&str] = &[
    "id",
    "name",
    "emailAddress",
    "phoneNumber",
    "website",
    "industry",
    "type",
    "billingAddressCity",
    "billingAddressState",
    "description",
];

/// Similarity of a candidate to the search criteria. Orders best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRank {
    Exact,
    Partial,
    ServiceOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub record: CrmRecord,
    pub rank: MatchRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CriteriaKind {
    Email,
    Website,
    Name,
}

fn classify(entity: EntityType, criteria: &str) -> CriteriaKind {
    if criteria.contains('@') {
        return CriteriaKind::Email;
    }
    let lower = criteria.to_ascii_lowercase();
    let looks_like_site = lower.starts_with("http")
        || (criteria.contains('.') && !criteria.contains(char::is_whitespace));
    if entity == EntityType::Account && looks_like_site {
        CriteriaKind::Website
    } else {
        CriteriaKind::Name
    }
}

/// Builds the search for `criteria`. `None` when there is nothing to search for.
pub fn build_query(entity: EntityType, criteria: &str) -> Option<SearchQuery> {
    let criteria = criteria.trim();
    if criteria.is_empty() {
        return None;
    }

    let filter = match (entity, classify(entity, criteria)) {
        (_, CriteriaKind::Email) => Filter::contains("emailAddress", criteria),
        (_, CriteriaKind::Website) => Filter::contains("website", criteria),
        (EntityType::Account, CriteriaKind::Name) => Filter::contains("name", criteria),
        (EntityType::Contact, CriteriaKind::Name) => {
            let tokens: Vec<&str> = criteria.split_whitespace().collect();
            if let [first, last] = tokens.as_slice() {
                Filter::And(vec![
                    Filter::contains("firstName", *first),
                    Filter::contains("lastName", *last),
                ])
            } else {
                Filter::Or(vec![
                    Filter::contains("firstName", criteria),
                    Filter::contains("lastName", criteria),
                ])
            }
        }
    };

    let select = match entity {
        EntityType::Contact => CONTACT_SELECT,
        EntityType::Account => ACCOUNT_SELECT,
    };
    Some(SearchQuery::new(filter, select))
}

fn collapse(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn rank_one(entity: EntityType, criteria: &str, record: &CrmRecord) -> MatchRank {
    match classify(entity, criteria) {
        CriteriaKind::Email => match record.text("emailAddress") {
            Some(email) if email.eq_ignore_ascii_case(criteria) => MatchRank::Exact,
            Some(email) if email.to_lowercase().contains(&criteria.to_lowercase()) => {
                MatchRank::Partial
            }
            _ => MatchRank::ServiceOrder,
        },
        CriteriaKind::Website => match record.text("website") {
            Some(site) if site.eq_ignore_ascii_case(criteria) => MatchRank::Exact,
            Some(site) if site.to_lowercase().contains(&criteria.to_lowercase()) => {
                MatchRank::Partial
            }
            _ => MatchRank::ServiceOrder,
        },
        CriteriaKind::Name => {
            let wanted = collapse(criteria);
            let name = collapse(&record.display_name());
            if name == wanted {
                MatchRank::Exact
            } else if !name.is_empty() && wanted.split(' ').all(|t| name.contains(t)) {
                MatchRank::Partial
            } else {
                MatchRank::ServiceOrder
            }
        }
    }
}

/// Orders `records` best first. The sort is stable, so service order breaks ties.
pub fn rank_candidates(
    entity: EntityType,
    criteria: &str,
    records: Vec<CrmRecord>,
) -> Vec<MatchCandidate> {
    let criteria = criteria.trim();
    let mut candidates: Vec<MatchCandidate> = records
        .into_iter()
        .map(|record| MatchCandidate {
            rank: rank_one(entity, criteria, &record),
            record,
        })
        .collect();
    candidates.sort_by_key(|c| c.rank);
    candidates
}

#[derive(Clone)]
pub struct MatchResolver {
    crm: Arc<dyn CrmBackend>,
}

impl MatchResolver {
    pub fn new(crm: Arc<dyn CrmBackend>) -> Self {
        Self { crm }
    }

    /// Ranked candidates for `criteria`. An empty list means nothing matched;
    /// only transport or service errors are returned as `Err`.
    pub async fn search(
        &self,
        entity: EntityType,
        criteria: &str,
    ) -> Result<Vec<MatchCandidate>, CrmError> {
        let Some(query) = build_query(entity, criteria) else {
            return Ok(Vec::new());
        };

        info!("Searching {entity} for '{}'", criteria.trim());
        let records = self.crm.search(entity, &query).await?;
        Ok(rank_candidates(entity, criteria, records))
    }

    pub async fn best_match(
        &self,
        entity: EntityType,
        criteria: &str,
    ) -> Result<Option<MatchCandidate>, CrmError> {
        Ok(self.search(entity, criteria).await?.into_iter().next())
    }
}
