//! Phone number normalization and recipient deduplication.
//!
//! All recipient numbers are normalized to E.164 before anything else looks
//! at them: the opt-out registry, deduplication, and the provider all key on
//! the normalized form. Only US/Canada (`+1`) numbers are accepted.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Newtype for a normalized E.164 phone number (`+1` followed by 10 digits).
///
/// Construct via [`normalize_number`] so the invariant holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct E164(String);

impl E164 {
    /// Wrap an already-normalized number without re-validating.
    ///
    /// Intended for rehydrating values that were normalized before being
    /// persisted. Returns `None` if the value is not in E.164 form, which
    /// would indicate corruption upstream.
    pub fn from_normalized(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if is_valid_e164(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for E164 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw recipient as submitted by the caller, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecipient {
    pub phone_number: String,
    pub contact_name: Option<String>,
    /// Template variables for this recipient. The key `name` is reserved:
    /// when absent it is filled from `contact_name` at render time.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// A recipient that survived normalization, keyed by its E.164 number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecipient {
    pub phone_number: E164,
    pub contact_name: Option<String>,
    pub variables: BTreeMap<String, String>,
}

/// Result of normalizing and deduplicating a raw recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedRecipients {
    /// Unique valid recipients, in first-occurrence order.
    pub recipients: Vec<NormalizedRecipient>,
    /// Raw inputs that could not be normalized, in input order.
    pub invalid_numbers: Vec<String>,
    /// How many later duplicates of an already-seen number were folded.
    pub duplicates_removed: usize,
}

/// Normalize a raw phone number to E.164.
///
/// - Strips every non-digit character.
/// - A 10-digit result is prefixed `+1`.
/// - An 11-digit result beginning with `1` is prefixed `+`.
/// - Anything else is rejected.
pub fn normalize_number(raw: &str) -> Option<E164> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let formatted = match digits.len() {
        10 => format!("+1{digits}"),
        11 if digits.starts_with('1') => format!("+{digits}"),
        _ => return None,
    };

    debug_assert!(is_valid_e164(&formatted));
    Some(E164(formatted))
}

/// `+1` followed by exactly 10 digits.
fn is_valid_e164(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("+1") else {
        return false;
    };
    rest.len() == 10 && rest.chars().all(|c| c.is_ascii_digit())
}

/// Normalize, validate, and deduplicate a recipient list.
///
/// Iterates the input in order and keeps the first occurrence per normalized
/// number; later duplicates are folded silently rather than rejected. Rejected
/// raw numbers are reported in `invalid_numbers` and produce no recipient.
pub fn prepare_recipients(raw: Vec<RawRecipient>) -> NormalizedRecipients {
    let mut result = NormalizedRecipients::default();
    let mut seen: HashSet<E164> = HashSet::new();

    for entry in raw {
        let Some(number) = normalize_number(&entry.phone_number) else {
            result.invalid_numbers.push(entry.phone_number);
            continue;
        };

        if !seen.insert(number.clone()) {
            result.duplicates_removed += 1;
            continue;
        }

        result.recipients.push(NormalizedRecipient {
            phone_number: number,
            contact_name: entry.contact_name,
            variables: entry.variables,
        });
    }

    result
}
