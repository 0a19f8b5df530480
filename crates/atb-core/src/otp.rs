//! Naive OTP text classifier.
//!
//! The rule is deliberately permissive: missing a real login code costs a
//! sale, relaying a harmless message costs nothing. Any standalone 5- or
//! 6-digit number matches, so "Meeting at 12345 Main St" is a known false
//! positive. Do not tighten the rule without revisiting that trade-off.

use std::sync::OnceLock;

use regex::Regex;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\b\d{5}\b",                // standalone 5-digit code
            r"\b\d{6}\b",                // standalone 6-digit code
            r"(?i)code.*\d{5,6}",        // "code: 12345"
            r"(?i)verification.*\d{5,6}", // "verification code 12345"
            r"(?i)login.*\d{5,6}",       // "login code 12345"
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static OTP pattern"))
        .collect()
    })
}

/// True if the text plausibly contains a one-time passcode.
pub fn is_probable_otp(text: &str) -> bool {
    patterns().iter().any(|re| re.is_match(text))
}
