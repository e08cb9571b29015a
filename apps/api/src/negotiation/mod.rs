//! Phone format negotiation.
//!
//! The CRM's phone validator accepts an undocumented subset of encodings, and
//! creation-time validation is stricter than update-time validation. Rather than
//! guess a fixed rule, the negotiator writes each candidate encoding in priority
//! order and keeps the first one the service accepts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::crm::{CrmBackend, CrmError, EntityType, Payload};
use crate::fields::{PhoneEntry, PhoneKind, PHONE_NUMBER, PHONE_NUMBER_DATA};

pub mod handlers;

/// Longest CRM response body kept per rejected attempt.
const MAX_REASON_LEN: usize = 200;

// ────────────────────────────────────────────────────────────────────────────
// Encodings
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneEncoding {
    /// `+15552001234`
    International,
    /// `+1-555-200-1234`
    InternationalDashed,
    /// `555-200-1234`
    Dashed,
    /// `(555) 200-1234`
    Parenthesized,
    /// `555.200.1234`
    Dotted,
    /// `5552001234`
    Bare,
    /// `1-555-200-1234`
    LeadingOneDashed,
}

impl PhoneEncoding {
    /// Renders a canonical 10-digit number. Anything else is passed through untouched.
    pub fn render(self, digits: &str) -> String {
        if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return digits.to_string();
        }
        let (area, exchange, line) = (&digits[..3], &digits[3..6], &digits[6..]);
        match self {
            PhoneEncoding::International => format!("+1{digits}"),
            PhoneEncoding::InternationalDashed => format!("+1-{area}-{exchange}-{line}"),
            PhoneEncoding::Dashed => format!("{area}-{exchange}-{line}"),
            PhoneEncoding::Parenthesized => format!("({area}) {exchange}-{line}"),
            PhoneEncoding::Dotted => format!("{area}.{exchange}.{line}"),
            PhoneEncoding::Bare => digits.to_string(),
            PhoneEncoding::LeadingOneDashed => format!("1-{area}-{exchange}-{line}"),
        }
    }
}

/// Priority-ordered encodings. `preferred` (one that already worked in this
/// conversation) jumps to the front.
pub fn candidate_encodings(
    international_first: bool,
    preferred: Option<PhoneEncoding>,
) -> Vec<PhoneEncoding> {
    use PhoneEncoding::*;

    let mut order = if international_first {
        vec![
            International,
            InternationalDashed,
            Dashed,
            Parenthesized,
            Dotted,
            Bare,
            LeadingOneDashed,
        ]
    } else {
        vec![
            Dashed,
            Parenthesized,
            Dotted,
            Bare,
            International,
            InternationalDashed,
            LeadingOneDashed,
        ]
    };

    if let Some(p) = preferred {
        order.retain(|e| *e != p);
        order.insert(0, p);
    }
    order
}

/// `{"phoneNumberData": [...]}` with every entry rendered in `encoding`.
pub fn phone_payload(entries: &[PhoneEntry], encoding: PhoneEncoding) -> Payload {
    let data = entries
        .iter()
        .map(|e| e.to_crm(&encoding.render(&e.number)))
        .collect();
    let mut payload = Payload::new();
    payload.insert(PHONE_NUMBER_DATA.to_string(), Value::Array(data));
    payload
}

/// How the number travels in the update body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneShape {
    /// `phoneNumberData: [{phoneNumber, type, primary}, ...]`
    Collection,
    /// `phoneNumber: "..."`. Some layouts only validate the plain field, and it
    /// can only carry one number.
    Scalar,
}

fn shaped_payload(entries: &[PhoneEntry], encoding: PhoneEncoding, shape: PhoneShape) -> Payload {
    match (shape, entries) {
        (PhoneShape::Scalar, [entry]) => {
            let mut payload = Payload::new();
            payload.insert(
                PHONE_NUMBER.to_string(),
                Value::String(encoding.render(&entry.number)),
            );
            payload
        }
        _ => phone_payload(entries, encoding),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkingFormat {
    pub encoding: PhoneEncoding,
    pub shape: PhoneShape,
    /// Numbers exactly as written to the CRM.
    pub rendered: Vec<String>,
    /// Write requests issued, including the successful one.
    pub attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedAttempt {
    pub encoding: PhoneEncoding,
    pub shape: PhoneShape,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("CRM rejected every phone format ({} tried)", attempts.len())]
    Exhausted { attempts: Vec<RejectedAttempt> },

    #[error("CRM unreachable while attaching phone: {0}")]
    Transport(CrmError),

    #[error("no phone numbers to attach")]
    Empty,
}

impl NegotiationError {
    /// One-line explanation for outcome reports.
    pub fn summary(&self) -> String {
        match self {
            NegotiationError::Exhausted { attempts } => {
                let tried: Vec<String> = attempts
                    .iter()
                    .map(|a| {
                        let label = match a.shape {
                            PhoneShape::Collection => format!("{:?}", a.encoding),
                            PhoneShape::Scalar => format!("{:?}/scalar", a.encoding),
                        };
                        match a.status {
                            Some(status) => format!("{label} ({status})"),
                            None => label,
                        }
                    })
                    .collect();
                format!("CRM rejected every phone format tried: {}", tried.join(", "))
            }
            other => other.to_string(),
        }
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_REASON_LEN) {
        Some((cut, _)) => format!("{}…", &body[..cut]),
        None => body.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Negotiator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FormatNegotiator {
    crm: Arc<dyn CrmBackend>,
    international_first: bool,
}

impl FormatNegotiator {
    pub fn new(crm: Arc<dyn CrmBackend>, international_first: bool) -> Self {
        Self {
            crm,
            international_first,
        }
    }

    pub fn candidates(&self, preferred: Option<PhoneEncoding>) -> Vec<PhoneEncoding> {
        candidate_encodings(self.international_first, preferred)
    }

    /// Attaches a single phone number to an existing record.
    pub async fn attach_phone(
        &self,
        entity: EntityType,
        id: &str,
        digits: &str,
        kind: PhoneKind,
        is_primary: bool,
    ) -> Result<WorkingFormat, NegotiationError> {
        let entry = PhoneEntry::new(digits.to_string(), kind, is_primary);
        self.attach_phones(entity, id, &[entry], None).await
    }

    /// Writes the whole phone collection to an existing record, one update per
    /// candidate encoding, stopping at the first accepted write.
    ///
    /// The collection shape goes first. A single number then gets a second round
    /// through the scalar `phoneNumber` field. Rejections (4xx/5xx) move on to the
    /// next candidate. Transport failures stop immediately.
    pub async fn attach_phones(
        &self,
        entity: EntityType,
        id: &str,
        entries: &[PhoneEntry],
        preferred: Option<PhoneEncoding>,
    ) -> Result<WorkingFormat, NegotiationError> {
        if entries.is_empty() {
            return Err(NegotiationError::Empty);
        }

        let candidates = self.candidates(preferred);
        let shapes: &[PhoneShape] = if entries.len() == 1 {
            &[PhoneShape::Collection, PhoneShape::Scalar]
        } else {
            &[PhoneShape::Collection]
        };
        let total = candidates.len() * shapes.len();
        let mut rejected = Vec::new();

        let attempts: Vec<(PhoneShape, PhoneEncoding)> = shapes
            .iter()
            .flat_map(|shape| candidates.iter().map(move |encoding| (*shape, *encoding)))
            .collect();
        for (i, (shape, encoding)) in attempts.into_iter().enumerate() {
            let payload = shaped_payload(entries, encoding, shape);
            info!(
                "Trying phone format {}/{total} ({encoding:?}, {shape:?}) on {entity} {id}",
                i + 1
            );

            match self.crm.update(entity, id, &payload).await {
                Ok(()) => {
                    info!("Phone format {encoding:?} ({shape:?}) accepted for {entity} {id}");
                    return Ok(WorkingFormat {
                        encoding,
                        shape,
                        rendered: entries.iter().map(|e| encoding.render(&e.number)).collect(),
                        attempts: i + 1,
                    });
                }
                Err(e) if e.is_transport() => {
                    warn!("Aborting phone negotiation for {entity} {id}: {e}");
                    return Err(NegotiationError::Transport(e));
                }
                Err(e) => {
                    warn!("Phone format {encoding:?} ({shape:?}) rejected for {entity} {id}: {e}");
                    rejected.push(RejectedAttempt {
                        encoding,
                        shape,
                        status: e.status(),
                        reason: truncate(&e.to_string()),
                    });
                }
            }
        }

        Err(NegotiationError::Exhausted { attempts: rejected })
    }
}
