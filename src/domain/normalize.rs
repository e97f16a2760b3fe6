//! Raw record → canonical profile conversion.
//!
//! Derived identity strings follow a fixed fallback chain so that the same
//! `{first_name, last_name, username, email}` always yield the same
//! `display_name` and `initials`, whatever the backend sent alongside them.
//!
//! Initials:
//! 1. first and last name: first letter of each;
//! 2. first name only: first two letters of it;
//! 3. last name only: first two letters of it;
//! 4. otherwise tokenise `username`, else the email local part, else the raw
//!    display name on whitespace, `.`, `_` and `-`, then take the first letter
//!    of the first two tokens (or the first two letters of a lone token);
//!    `"??"` when nothing is available.
//!
//! Display name: `"first last"` (trimmed) when either name exists, else the
//! username, else the email local part, else `"User"`.

use crate::domain::{
    entities::{RawProfile, UserProfile},
    types::{AccountStatus, Role},
};

pub const FALLBACK_DISPLAY_NAME: &str = "User";
pub const FALLBACK_INITIALS: &str = "??";

/// Identity inputs after blank values have been discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFields<'a> {
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub username: Option<&'a str>,
    pub email: Option<&'a str>,
    pub display_name: Option<&'a str>,
}

impl<'a> IdentityFields<'a> {
    pub fn from_raw(raw: &'a RawProfile) -> Self {
        Self {
            first_name: present(raw.first_name.as_deref()),
            last_name: present(raw.last_name.as_deref()),
            username: present(raw.username.as_deref()),
            email: present(raw.email.as_deref()),
            display_name: present(raw.display_name.as_deref()),
        }
    }

    /// Inputs of an already-normalized profile. The stored display name is
    /// derived output, so it never feeds back in.
    pub fn from_profile(profile: &'a UserProfile) -> Self {
        Self {
            first_name: present(profile.first_name.as_deref()),
            last_name: present(profile.last_name.as_deref()),
            username: present(profile.username.as_deref()),
            email: present(profile.email.as_deref()),
            display_name: None,
        }
    }

    fn email_local_part(&self) -> Option<&'a str> {
        self.email
            .and_then(|email| email.split('@').next())
            .and_then(|local| present(Some(local)))
    }
}

/// Convert a raw record into the canonical profile shape. Pure.
pub fn normalize(raw: &RawProfile) -> UserProfile {
    let fields = IdentityFields::from_raw(raw);

    let avatar = present(raw.avatar_path.as_deref()).or_else(|| present(raw.avatar_url.as_deref()));

    UserProfile {
        id: raw.id.clone(),
        auth_id: owned(raw.auth_id.as_deref()),
        email: fields.email.map(str::to_string),
        first_name: fields.first_name.map(str::to_string),
        last_name: fields.last_name.map(str::to_string),
        display_name: derive_display_name(&fields),
        initials: derive_initials(&fields),
        username: fields.username.map(str::to_string),
        avatar_url: avatar.map(str::to_string),
        verified: raw.verified.unwrap_or(false),
        role: Role::parse_lenient(raw.role.as_deref()),
        account_status: AccountStatus::parse_lenient(raw.account_status.as_deref()),
        loading: false,
        error: None,
    }
}

/// Recompute `display_name` and `initials` after a profile's identity fields
/// were edited in place. Idempotent on normalized profiles.
///
/// When no name, username or email is left, initials that came from the raw
/// display name are kept as long as the profile already had no such source.
pub fn rederive(mut profile: UserProfile) -> UserProfile {
    let fields = IdentityFields::from_profile(&profile);
    let display_name = derive_display_name(&fields);
    let initials = derive_initials(&fields);

    let had_source = profile.display_name != FALLBACK_DISPLAY_NAME;
    if initials != FALLBACK_INITIALS || had_source {
        profile.initials = initials;
    }
    profile.display_name = display_name;
    profile
}

pub fn derive_display_name(fields: &IdentityFields<'_>) -> String {
    if fields.first_name.is_some() || fields.last_name.is_some() {
        let joined = format!(
            "{} {}",
            fields.first_name.unwrap_or_default(),
            fields.last_name.unwrap_or_default()
        );
        return joined.trim().to_string();
    }

    fields
        .username
        .or_else(|| fields.email_local_part())
        .unwrap_or(FALLBACK_DISPLAY_NAME)
        .to_string()
}

pub fn derive_initials(fields: &IdentityFields<'_>) -> String {
    match (fields.first_name, fields.last_name) {
        (Some(first), Some(last)) => format!("{}{}", leading(first, 1), leading(last, 1)),
        (Some(first), None) => leading(first, 2),
        (None, Some(last)) => leading(last, 2),
        (None, None) => {
            let source = fields
                .username
                .or_else(|| fields.email_local_part())
                .or(fields.display_name);
            source
                .and_then(initials_from_tokens)
                .unwrap_or_else(|| FALLBACK_INITIALS.to_string())
        }
    }
}

fn initials_from_tokens(source: &str) -> Option<String> {
    let mut tokens = source
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | '_' | '-'))
        .filter(|token| !token.is_empty());

    match (tokens.next(), tokens.next()) {
        (Some(first), Some(second)) => Some(format!("{}{}", leading(first, 1), leading(second, 1))),
        (Some(only), None) => Some(leading(only, 2)),
        _ => None,
    }
}

fn leading(value: &str, count: usize) -> String {
    value
        .chars()
        .take(count)
        .flat_map(char::to_uppercase)
        .collect()
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn owned(value: Option<&str>) -> Option<String> {
    present(value).map(str::to_string)
}
