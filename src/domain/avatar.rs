//! Avatar value classification.
//!
//! Profiles carry one avatar slot that may hold a storage key waiting to be
//! resolved, a URL that can be shown directly, or a legacy public storage URL
//! that predates storage keys and should be migrated.

const LEGACY_PUBLIC_MARKER: &str = "/object/public/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarRef<'a> {
    /// Displayable as-is.
    Resolved(&'a str),
    /// Storage key that must go through the resolver.
    Reference(&'a str),
    /// Displayable public URL from which a canonical storage key is derived.
    Legacy { url: &'a str, key: String },
}

impl<'a> AvatarRef<'a> {
    /// Classify a stored avatar value; blank values classify as `None`.
    pub fn classify(value: &'a str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if value.starts_with("data:") || value.starts_with("blob:") {
            return Some(AvatarRef::Resolved(value));
        }

        if is_http(value) {
            return Some(match legacy_key(value) {
                Some(key) => AvatarRef::Legacy { url: value, key },
                None => AvatarRef::Resolved(value),
            });
        }

        Some(AvatarRef::Reference(value.trim_start_matches('/')))
    }
}

/// Derive the canonical storage key from a legacy public URL.
///
/// Deterministic: the same URL always yields the same key.
pub fn legacy_key(url: &str) -> Option<String> {
    let (_, tail) = url.split_once(LEGACY_PUBLIC_MARKER)?;
    let path = tail
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

fn is_http(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
