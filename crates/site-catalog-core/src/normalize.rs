//! Tolerant field extraction from a single fragment.
//!
//! Fragments are not guaranteed to be valid JSON, so fields are pulled out
//! with anchored regexes instead of a parser. Only the first occurrence of
//! each key counts.
//!
//! | Field | Key | Required |
//! |-------|-----|----------|
//! | `id` | `"id"` (integer) | yes |
//! | `name` | `"name"` (string) | yes, empty becomes [`PLACEHOLDER_NAME`] |
//! | login URL | `"urlLogonApp"` | no |
//! | home URL | `"urlHomeApp"` | no |
//!
//! The record's `url` is the login URL when non-empty, otherwise the home
//! URL when non-empty, otherwise `""`. Whitespace-only values count as
//! empty. Values that are kept are stored exactly as captured.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::models::InstitutionRecord;

/// Name used when a fragment carries an empty `name` value.
pub const PLACEHOLDER_NAME: &str = "Untitled";

static ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""id"\s*:\s*(-?\d+)"#).unwrap());
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| string_field("name"));
static LOGON_URL_RE: LazyLock<Regex> = LazyLock::new(|| string_field("urlLogonApp"));
static HOME_URL_RE: LazyLock<Regex> = LazyLock::new(|| string_field("urlHomeApp"));

fn string_field(key: &str) -> Regex {
    Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(key))).unwrap()
}

/// Why a fragment produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing or invalid id")]
    MissingId,
    #[error("missing name")]
    MissingName,
}

/// Extract an [`InstitutionRecord`] from one fragment.
pub fn normalize_fragment(fragment: &str) -> Result<InstitutionRecord, FieldError> {
    let id = extract_id(fragment).ok_or(FieldError::MissingId)?;
    let name = extract_string(&NAME_RE, fragment).ok_or(FieldError::MissingName)?;

    let name = if name.trim().is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        name
    };

    let url = [&*LOGON_URL_RE, &*HOME_URL_RE]
        .into_iter()
        .filter_map(|re| extract_string(re, fragment))
        .find(|u| !u.trim().is_empty())
        .unwrap_or_default();

    Ok(InstitutionRecord { id, name, url })
}

/// First integer after `"id"`. Zero, negative, and out-of-range values are absent.
fn extract_id(fragment: &str) -> Option<i64> {
    let caps = ID_RE.captures(fragment)?;
    caps[1].parse::<i64>().ok().filter(|id| *id > 0)
}

fn extract_string(re: &Regex, fragment: &str) -> Option<String> {
    let caps = re.captures(fragment)?;
    Some(unescape(&caps[1]))
}

/// Decode JSON string escapes, falling back to the raw text when the value
/// is not a valid JSON string body (stray control characters, bad `\u`).
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}
