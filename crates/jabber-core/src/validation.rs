//! Injection-safety checks applied to addresses, aliases, and message bodies

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

pub const MAX_ADDRESS_LENGTH: usize = 200;
pub const MAX_ALIAS_LENGTH: usize = 50;
pub const MAX_BODY_LENGTH: usize = 8192;

/// Characters never accepted in an address
const ADDRESS_FORBIDDEN: &[char] = &[
    '<', '>', '&', '"', '\'', ';', '|', '`', '$', '(', ')', '{', '}', '[', ']', '\\',
];

/// Characters never accepted in a persisted message body
const BODY_FORBIDDEN: &[char] = &['<', '>', '`', '$', '{', '}', '\\', ';', '|'];

static ADDRESS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@/]+@[^@/]+(?:/.*)?$").expect("address pattern compiles"));

static ALIAS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("alias pattern compiles"));

/// Validate an address of the form `local@domain[/resource]`
///
/// Returns the trimmed address on success.
pub fn validate_address(address: &str) -> Result<&str, ValidationError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ValidationError::EmptyAddress);
    }
    if address.chars().count() > MAX_ADDRESS_LENGTH {
        return Err(ValidationError::AddressTooLong {
            max: MAX_ADDRESS_LENGTH,
        });
    }
    if let Some(c) = address.chars().find(|c| ADDRESS_FORBIDDEN.contains(c)) {
        return Err(ValidationError::AddressForbiddenChar(c));
    }
    if !ADDRESS_PATTERN.is_match(address) {
        return Err(ValidationError::MalformedAddress(address.to_string()));
    }
    Ok(address)
}

/// Validate a directory alias; returns the trimmed alias
pub fn validate_alias(alias: &str) -> Result<&str, ValidationError> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Err(ValidationError::EmptyAlias);
    }
    if alias.chars().count() > MAX_ALIAS_LENGTH {
        return Err(ValidationError::AliasTooLong {
            max: MAX_ALIAS_LENGTH,
        });
    }
    if !ALIAS_PATTERN.is_match(alias) {
        return Err(ValidationError::MalformedAlias(alias.to_string()));
    }
    Ok(alias)
}

/// Validate an inbound message body before it is persisted
///
/// Line breaks and tabs are allowed; every other control character is not.
pub fn validate_message_body(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::EmptyBody);
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(ValidationError::BodyTooLong {
            max: MAX_BODY_LENGTH,
        });
    }
    for c in body.chars() {
        if BODY_FORBIDDEN.contains(&c) {
            return Err(ValidationError::BodyForbiddenChar(c));
        }
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
            return Err(ValidationError::BodyControlChar(c as u32));
        }
    }
    Ok(())
}

/// Strip a `/resource` suffix from an address
pub fn bare_address(address: &str) -> &str {
    address.split('/').next().unwrap_or(address)
}

/// Local part of an address, if it has one
pub fn local_part(address: &str) -> Option<&str> {
    address.split_once('@').map(|(local, _)| local)
}

/// Domain of an address without any resource
pub fn domain_part(address: &str) -> Option<&str> {
    bare_address(address).split_once('@').map(|(_, domain)| domain)
}
