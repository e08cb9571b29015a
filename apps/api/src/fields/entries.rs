//! Multi-valued phone and email collections.
//!
//! A record owns zero or more entries; when any exist exactly one is primary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhoneKind {
    #[default]
    Mobile,
    Work,
    Home,
    Main,
    Other,
}

impl PhoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhoneKind::Mobile => "Mobile",
            PhoneKind::Work => "Office",
            PhoneKind::Home => "Home",
            PhoneKind::Main => "Main",
            PhoneKind::Other => "Other",
        }
    }

    /// Lenient parse of the CRM's type labels. Unknown labels become `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mobile" | "cell" => PhoneKind::Mobile,
            "work" | "office" => PhoneKind::Work,
            "home" => PhoneKind::Home,
            "main" => PhoneKind::Main,
            _ => PhoneKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneEntry {
    /// Canonical 10-digit number. Re-encoded by the format negotiator on write.
    pub number: String,
    pub kind: PhoneKind,
    pub is_primary: bool,
    pub opt_out: bool,
    pub invalid: bool,
}

impl PhoneEntry {
    pub fn new(number: String, kind: PhoneKind, is_primary: bool) -> Self {
        Self {
            number,
            kind,
            is_primary,
            opt_out: false,
            invalid: false,
        }
    }

    /// `phoneNumberData` element with the number rendered as `rendered`.
    pub fn to_crm(&self, rendered: &str) -> Value {
        json!({
            "phoneNumber": rendered,
            "type": self.kind.as_str(),
            "primary": self.is_primary,
            "optOut": self.opt_out,
            "invalid": self.invalid,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEntry {
    pub address: String,
    pub is_primary: bool,
    pub opt_out: bool,
    pub invalid: bool,
}

impl EmailEntry {
    pub fn new(address: String, is_primary: bool) -> Self {
        Self {
            address,
            is_primary,
            opt_out: false,
            invalid: false,
        }
    }

    /// `emailAddressData` element.
    pub fn to_crm(&self) -> Value {
        json!({
            "emailAddress": self.address,
            "primary": self.is_primary,
            "optOut": self.opt_out,
            "invalid": self.invalid,
        })
    }
}

pub trait PrimaryFlag {
    fn is_primary(&self) -> bool;
    fn set_primary(&mut self, primary: bool);
}

impl PrimaryFlag for PhoneEntry {
    fn is_primary(&self) -> bool {
        self.is_primary
    }
    fn set_primary(&mut self, primary: bool) {
        self.is_primary = primary;
    }
}

impl PrimaryFlag for EmailEntry {
    fn is_primary(&self) -> bool {
        self.is_primary
    }
    fn set_primary(&mut self, primary: bool) {
        self.is_primary = primary;
    }
}

/// Leaves exactly one primary entry: the first one flagged, or the first entry
/// when none was flagged. No-op on an empty collection.
pub fn enforce_single_primary<T: PrimaryFlag>(entries: &mut [T]) {
    let keep = entries.iter().position(|e| e.is_primary()).unwrap_or(0);
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.set_primary(i == keep);
    }
}
