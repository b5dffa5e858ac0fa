//! Subscriber email address validation
//!
//! Addresses accepted by the subscription surface follow the RFC 5321
//! `Mailbox` production without the legacy forms nobody subscribes with:
//!
//! ```text
//! Mailbox     = Local-part "@" Domain
//! Local-part  = Dot-string
//! Dot-string  = Atom *("." Atom)
//! Domain      = sub-domain *("." sub-domain)
//! sub-domain  = Let-dig [Ldh-str]
//! ```
//!
//! Quoted local parts and address literals are rejected.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_PART_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

/// Reasons an email address is refused before it reaches the subscription
/// manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email address must not be blank")]
    Blank,

    #[error("Email address exceeds {MAX_ADDRESS_LEN} octets")]
    TooLong,

    #[error("Email address is missing an '@'")]
    MissingAtSign,

    #[error("Local-part exceeds {MAX_LOCAL_PART_LEN} octets")]
    LocalPartTooLong,

    #[error("Domain exceeds {MAX_DOMAIN_LEN} octets")]
    DomainTooLong,

    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
}

/// A syntactically valid subscriber address
///
/// The domain is lowercased on parse so that `User@Example.COM` and
/// `User@example.com` map to the same subscriber. The local-part is kept as
/// given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Validate and normalise `input`
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::Blank);
        }

        if trimmed.len() > MAX_ADDRESS_LEN {
            return Err(ValidationError::TooLong);
        }

        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or(ValidationError::MissingAtSign)?;

        if local.len() > MAX_LOCAL_PART_LEN {
            return Err(ValidationError::LocalPartTooLong);
        }
        if domain.len() > MAX_DOMAIN_LEN {
            return Err(ValidationError::DomainTooLong);
        }

        validate_local_part(local)?;
        validate_domain(domain)?;

        Ok(Self(format!("{local}@{}", domain.to_ascii_lowercase())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the '@'
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }
}

fn validate_local_part(local: &str) -> Result<(), ValidationError> {
    if local.is_empty() {
        return Err(ValidationError::InvalidLocalPart(
            "Empty local-part".to_string(),
        ));
    }

    if local.starts_with('.') || local.ends_with('.') {
        return Err(ValidationError::InvalidLocalPart(
            "Dot-string cannot start or end with '.'".to_string(),
        ));
    }

    if local.contains("..") {
        return Err(ValidationError::InvalidLocalPart(
            "Dot-string cannot contain consecutive dots".to_string(),
        ));
    }

    if let Some(ch) = local.chars().find(|&ch| ch != '.' && !is_atext(ch)) {
        return Err(ValidationError::InvalidLocalPart(format!(
            "Invalid character '{ch}' in atom"
        )));
    }

    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.is_empty() {
        return Err(ValidationError::InvalidDomain("Empty domain".to_string()));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(ValidationError::InvalidDomain(
                "Empty sub-domain".to_string(),
            ));
        }

        if label.len() > MAX_LABEL_LEN {
            return Err(ValidationError::InvalidDomain(format!(
                "Sub-domain '{label}' exceeds {MAX_LABEL_LEN} octets"
            )));
        }

        if !label.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-') {
            return Err(ValidationError::InvalidDomain(format!(
                "Invalid character in sub-domain '{label}'"
            )));
        }

        // Let-dig at both ends
        if label.starts_with('-') || label.ends_with('-') {
            return Err(ValidationError::InvalidDomain(format!(
                "Sub-domain '{label}' cannot start or end with '-'"
            )));
        }
    }

    Ok(())
}

/// atext as defined by RFC 5322 section 3.2.3
const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for EmailAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_valid_addresses() {
        for input in [
            "user@example.com",
            "first.last@sub.example.co.kr",
            "user+tag@example.com",
            "o'brien@example.ie",
            "user@localhost",
            "x@a-b.example",
        ] {
            assert!(EmailAddress::parse(input).is_ok(), "{input} should parse");
        }
    }

    #[test]
    fn test_domain_is_lowercased_and_input_trimmed() {
        let address = EmailAddress::parse("  Alice@Example.COM \n").unwrap();
        assert_eq!(address.as_str(), "Alice@example.com");
        assert_eq!(address.domain(), "example.com");
    }

    #[test]
    fn test_blank_input() {
        assert_eq!(EmailAddress::parse(""), Err(ValidationError::Blank));
        assert_eq!(EmailAddress::parse("   \t"), Err(ValidationError::Blank));
    }

    #[test]
    fn test_malformed_addresses() {
        assert_eq!(
            EmailAddress::parse("no-at-sign.example.com"),
            Err(ValidationError::MissingAtSign)
        );
        assert!(matches!(
            EmailAddress::parse("@example.com"),
            Err(ValidationError::InvalidLocalPart(_))
        ));
        assert!(matches!(
            EmailAddress::parse("a..b@example.com"),
            Err(ValidationError::InvalidLocalPart(_))
        ));
        assert!(matches!(
            EmailAddress::parse("a b@example.com"),
            Err(ValidationError::InvalidLocalPart(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@"),
            Err(ValidationError::InvalidDomain(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@exa_mple.com"),
            Err(ValidationError::InvalidDomain(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@-example.com"),
            Err(ValidationError::InvalidDomain(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@example..com"),
            Err(ValidationError::InvalidDomain(_))
        ));
        assert!(matches!(
            EmailAddress::parse("user@a@b.com"),
            Err(ValidationError::InvalidLocalPart(_))
        ));
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(65);
        assert_eq!(
            EmailAddress::parse(&format!("{local}@example.com")),
            Err(ValidationError::LocalPartTooLong)
        );

        let long = format!("user@{}.com", "a".repeat(250));
        assert_eq!(EmailAddress::parse(&long), Err(ValidationError::TooLong));
    }

    #[test]
    fn test_try_from_string_validates() {
        assert!(EmailAddress::try_from("not an email".to_string()).is_err());
        assert_eq!(
            String::from(EmailAddress::try_from("a@b.c".to_string()).unwrap()),
            "a@b.c"
        );
    }
}
