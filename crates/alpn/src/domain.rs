//! Challenge domain normalization and validation
//!
//! TLS-ALPN-01 challenges are issued per exact DNS name, so the registry
//! keys on a canonical form: ASCII-lowercased, with the optional root dot
//! stripped. Validation happens once at arm time; the handshake path only
//! normalizes.

use crate::errors::ChallengeError;

/// Maximum total length of a DNS name, excluding the root dot
const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Normalize and validate a domain for use as a challenge key
///
/// Lowercases the name, strips a single trailing root dot, and checks DNS
/// name syntax: non-empty labels of at most 63 characters, alphanumeric
/// plus interior hyphens, at most 253 characters overall. Wildcard names
/// are rejected along with any other non-LDH character.
///
/// # Errors
///
/// Returns [`ChallengeError::InvalidDomain`] with the offending input.
pub fn normalize_domain(raw: &str) -> Result<String, ChallengeError> {
    let name = lookup_key(raw);

    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ChallengeError::InvalidDomain(raw.to_string()));
    }

    for label in name.split('.') {
        if label.is_empty()
            || label.len() > MAX_LABEL_LEN
            || label.starts_with('-')
            || label.ends_with('-')
            || !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(ChallengeError::InvalidDomain(raw.to_string()));
        }
    }

    Ok(name)
}

/// Canonical lookup form of a server name: lowercased, root dot stripped
///
/// Unlike [`normalize_domain`] this never fails; a malformed name simply
/// misses the registry.
pub(crate) fn lookup_key(raw: &str) -> String {
    raw.strip_suffix('.').unwrap_or(raw).to_ascii_lowercase()
}
