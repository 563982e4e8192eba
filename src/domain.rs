//! Domain normalization.
//!
//! The normalized domain is the uniqueness key for organizations, so every
//! store backend goes through [`normalize_domain`] before touching storage.

use crate::store::StoreError;

/// Reduces a URL-ish string to a canonical lowercase host.
///
/// Strips scheme, userinfo, path, query, fragment, port, surrounding dots and
/// any leading `www.` labels. Fails with [`StoreError::InvalidDomain`] when
/// nothing usable remains.
///
/// Idempotent: `normalize_domain(normalize_domain(d)?) == normalize_domain(d)`.
pub fn normalize_domain(raw: &str) -> Result<String, StoreError> {
    let lowered = raw.trim().to_lowercase();
    let mut rest = lowered.as_str();

    if let Some(idx) = rest.find("://") {
        let scheme = &rest[..idx];
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            rest = &rest[idx + 3..];
        }
    } else if let Some(stripped) = rest.strip_prefix("//") {
        rest = stripped;
    }

    // authority ends at the first path, query or fragment delimiter
    if let Some(end) = rest.find(['/', '?', '#']) {
        rest = &rest[..end];
    }
    if let Some(at) = rest.rfind('@') {
        rest = &rest[at + 1..];
    }
    if let Some(colon) = rest.find(':') {
        rest = &rest[..colon];
    }

    let mut host = rest.trim();
    loop {
        let before = host.len();
        if let Some(stripped) = host.strip_prefix("www.") {
            host = stripped;
        }
        host = host.trim_matches('.');
        if host.len() == before {
            break;
        }
    }

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(StoreError::InvalidDomain(raw.to_string()));
    }

    Ok(host.to_string())
}
