use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_PATTERN: Regex = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref PHONE_PATTERN: Regex =
        Regex::new(r"\b(?:\+?1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})\b").unwrap();
    static ref SSN_PATTERN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref CREDIT_CARD_PATTERN: Regex = Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").unwrap();
}

const REDACTED: &str = "<redacted>";

/// C9 redaction stage. Applies a fixed set of PII patterns plus any
/// operator-supplied custom patterns to an attribute value; the original
/// value is never retained once a pattern matches.
pub struct Redactor {
    custom_patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new(custom_patterns: &[String]) -> Result<Self, regex::Error> {
        let compiled = custom_patterns.iter().map(|p| Regex::new(p)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { custom_patterns: compiled })
    }

    pub fn redact(&self, value: &str) -> String {
        if EMAIL_PATTERN.is_match(value)
            || PHONE_PATTERN.is_match(value)
            || SSN_PATTERN.is_match(value)
            || CREDIT_CARD_PATTERN.is_match(value)
            || self.custom_patterns.iter().any(|p| p.is_match(value))
        {
            return REDACTED.to_string();
        }
        value.to_string()
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self { custom_patterns: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email() {
        let redactor = Redactor::default();
        assert_eq!(redactor.redact("john@example.com"), "<redacted>");
    }

    #[test]
    fn redacts_ssn() {
        let redactor = Redactor::default();
        assert_eq!(redactor.redact("123-45-6789"), "<redacted>");
    }

    #[test]
    fn redacts_credit_card() {
        let redactor = Redactor::default();
        assert_eq!(redactor.redact("4111 1111 1111 1111"), "<redacted>");
    }

    #[test]
    fn leaves_non_pii_values_untouched() {
        let redactor = Redactor::default();
        assert_eq!(redactor.redact("SELECT"), "SELECT");
    }

    #[test]
    fn applies_custom_patterns() {
        let redactor = Redactor::new(&[r"secret-\d+".to_string()]).unwrap();
        assert_eq!(redactor.redact("secret-42"), "<redacted>");
    }
}
