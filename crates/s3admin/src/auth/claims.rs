//! Claim extraction from provider payloads.
//!
//! Provider claims are untrusted and arbitrarily shaped, so every lookup
//! treats a missing or mistyped value as absent rather than as an error.

use serde_json::{Map, Value};

use super::token::Identity;

/// Decoded claims of an ID token or userinfo response.
pub type ClaimsMap = Map<String, Value>;

/// Which claims feed which identity field.
#[derive(Debug, Clone, Default)]
pub struct ClaimMapping {
    pub username: String,
    pub email: String,
    pub name: String,
    /// Dot-separated path to the roles array. Roles are ignored when unset.
    pub roles: Option<String>,
}

/// Walk a dot-separated path through nested objects.
///
/// Returns `None` when a segment is missing or an intermediate value is not an object.
pub fn lookup_path<'a>(claims: &'a ClaimsMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next().filter(|s| !s.is_empty())?;
    let mut current = claims.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

/// Top-level string claim, or an empty string.
pub fn extract_string(claims: &ClaimsMap, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Roles at `path`. Non-string elements are dropped.
pub fn extract_roles(claims: &ClaimsMap, path: &str) -> Vec<String> {
    lookup_path(claims, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build an identity using the configured claim names.
pub fn identity_from_claims(claims: &ClaimsMap, mapping: &ClaimMapping) -> Identity {
    let roles = match mapping.roles.as_deref() {
        Some(path) if !path.is_empty() => extract_roles(claims, path),
        _ => Vec::new(),
    };

    Identity {
        username: extract_string(claims, &mapping.username),
        email: extract_string(claims, &mapping.email),
        name: extract_string(claims, &mapping.name),
        roles,
    }
}
