//! Pure validators for user-submitted strings.

use std::sync::OnceLock;

use regex::Regex;

/// Normalize and validate a phone number.
///
/// Strips everything except digits and `+`, then accepts only `+` followed by
/// 10-15 digits. Returns the normalized string.
pub fn validate_phone(raw: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\+\d{10,15}$").expect("static phone pattern"));

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    re.is_match(&cleaned).then_some(cleaned)
}

/// Shallow bank-details check: at least 3 whitespace-separated tokens and the
/// first token is an all-digit account number. Bank and holder names are not
/// verified semantically.
pub fn validate_bank_details(details: &str) -> bool {
    let mut parts = details.split_whitespace();
    let Some(first) = parts.next() else {
        return false;
    };
    if !first.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    parts.count() >= 2
}

/// Informational country lookup from the dialing prefix. Never gates logic.
pub fn classify_country(phone: &str) -> &'static str {
    if phone.starts_with("+234") {
        "Nigeria"
    } else if phone.starts_with("+1") {
        "USA/Canada"
    } else if phone.starts_with("+44") {
        "UK"
    } else if phone.starts_with("+91") {
        "India"
    } else {
        "Unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_is_normalized_then_validated() {
        assert_eq!(
            validate_phone("+234 816 775 7987").as_deref(),
            Some("+2348167757987")
        );
        assert_eq!(
            validate_phone("+1 (555) 010-2345").as_deref(),
            Some("+15550102345")
        );
    }

    #[test]
    fn phone_rejects_malformed_input() {
        assert_eq!(validate_phone("invalid"), None);
        assert_eq!(validate_phone("2348167757987"), None); // missing +
        assert_eq!(validate_phone("+123456789"), None); // 9 digits, too short
        assert_eq!(validate_phone("+1234567890123456"), None); // 16 digits, too long
        assert_eq!(validate_phone("+234+8167757987"), None); // stray +
        assert_eq!(validate_phone(""), None);
    }

    #[test]
    fn bank_details_need_numeric_account_and_three_tokens() {
        assert!(validate_bank_details("9131085651 OPay Bashir Rabiu"));
        assert!(!validate_bank_details("invalid"));
        assert!(!validate_bank_details("abc Bank Name")); // first token not numeric
        assert!(!validate_bank_details("9131085651 OPay")); // only two tokens
        assert!(!validate_bank_details(""));
    }

    #[test]
    fn country_prefix_lookup() {
        assert_eq!(classify_country("+2348167757987"), "Nigeria");
        assert_eq!(classify_country("+15550102345"), "USA/Canada");
        assert_eq!(classify_country("+447700900123"), "UK");
        assert_eq!(classify_country("+919876543210"), "India");
        assert_eq!(classify_country("+4915112345678"), "Unknown");
    }
}
