use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationError {
    #[error("phone number has {digits} digits, at least 10 are required")]
    TooShort { digits: usize },

    #[error("'{value}' is not a valid email address")]
    Malformed { value: String },
}

/// Canonicalizes a free-form phone number to 10 digits.
///
/// 10 digits pass through, 11 digits with a leading `1` drop the country code,
/// anything longer keeps the last 10.
pub fn normalize_phone(raw: &str) -> Result<String, NormalizationError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        n if n < 10 => Err(NormalizationError::TooShort { digits: n }),
        10 => Ok(digits),
        11 if digits.starts_with('1') => Ok(digits[1..].to_string()),
        n => Ok(digits[n - 10..].to_string()),
    }
}

/// Validates an email address and lower-cases its domain.
pub fn normalize_email(raw: &str) -> Result<String, NormalizationError> {
    let trimmed = raw.trim();
    let malformed = || NormalizationError::Malformed {
        value: trimmed.to_string(),
    };

    let (local, domain) = trimmed.split_once('@').ok_or_else(malformed)?;
    if local.is_empty() || domain.contains('@') || trimmed.chars().any(char::is_whitespace) {
        return Err(malformed());
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(malformed());
    }

    Ok(format!("{local}@{}", domain.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_ten_digits_any_punctuation() {
        for raw in ["555-200-1234", "(555) 200-1234", "555.200.1234", "5552001234"] {
            assert_eq!(normalize_phone(raw).unwrap(), "5552001234", "input {raw}");
        }
    }

    #[test]
    fn test_phone_leading_country_code_dropped() {
        assert_eq!(normalize_phone("+1 (612) 875-4460").unwrap(), "6128754460");
        assert_eq!(normalize_phone("1-612-875-4460").unwrap(), "6128754460");
    }

    #[test]
    fn test_phone_longer_numbers_keep_last_ten() {
        assert_eq!(normalize_phone("011 612 875 4460").unwrap(), "6128754460");
        assert_eq!(normalize_phone("21 612 875 4460").unwrap(), "6128754460");
        // 11 digits not starting with 1 also keep the last 10
        assert_eq!(normalize_phone("26128754460").unwrap(), "6128754460");
    }

    #[test]
    fn test_phone_too_short() {
        assert_eq!(
            normalize_phone("875-4460"),
            Err(NormalizationError::TooShort { digits: 7 })
        );
        assert_eq!(
            normalize_phone("call me"),
            Err(NormalizationError::TooShort { digits: 0 })
        );
    }

    #[test]
    fn test_email_domain_lowercased() {
        assert_eq!(
            normalize_email("  John.Smith@ACME.Com ").unwrap(),
            "John.Smith@acme.com"
        );
    }

    #[test]
    fn test_email_malformed() {
        for raw in ["johnacme.com", "@acme.com", "john@acme", "john@@acme.com", "john@acme..com", "jo hn@acme.com"] {
            assert!(
                matches!(normalize_email(raw), Err(NormalizationError::Malformed { .. })),
                "input {raw}"
            );
        }
    }
}
