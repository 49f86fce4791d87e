/// Input validators for API token attributes
/// Features:
/// 1. DoS Protection: length limits on every caller-supplied string
/// 2. Log hygiene: control characters are rejected
/// 3. Permission actions: restricted charset, trimmed and de-duplicated

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_NAME_LENGTH: usize = 256;
const MAX_DESCRIPTION_LENGTH: usize = 1024;
const MAX_ACTION_LENGTH: usize = 256;

lazy_static! {
    // e.g. `api::article.article.find`, `plugin::upload.read`
    static ref ACTION_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.:/\-]+$").unwrap();
}

/// Validates a token name
/// - Trims surrounding whitespace
/// - Rejects empty and overly long names
/// - Rejects control characters
pub fn is_valid_token_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("name".to_string()));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("name".to_string(), MAX_NAME_LENGTH));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidFormat("name".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Validates an optional description. Blank descriptions collapse to `None`.
pub fn is_valid_description(description: Option<&str>) -> Result<Option<String>, ValidationError> {
    let trimmed = match description.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(trimmed) => trimmed,
    };

    if trimmed.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(ValidationError::TooLong(
            "description".to_string(),
            MAX_DESCRIPTION_LENGTH,
        ));
    }

    // Newlines and tabs are fine in free text
    if trimmed
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\t' && c != '\r')
    {
        return Err(ValidationError::InvalidFormat("description".to_string()));
    }

    Ok(Some(trimmed.to_string()))
}

/// Normalises requested permission actions into a set keyed by action.
///
/// Duplicates collapse; every action must be non-empty, within length limits
/// and made of `[A-Za-z0-9_.:/-]`.
pub fn normalize_actions(actions: &[String]) -> Result<BTreeSet<String>, ValidationError> {
    let mut normalized = BTreeSet::new();

    for action in actions {
        let trimmed = action.trim();

        if trimmed.is_empty() {
            return Err(ValidationError::EmptyField("permission action".to_string()));
        }

        if trimmed.len() > MAX_ACTION_LENGTH {
            return Err(ValidationError::TooLong(
                "permission action".to_string(),
                MAX_ACTION_LENGTH,
            ));
        }

        if !ACTION_REGEX.is_match(trimmed) {
            return Err(ValidationError::InvalidFormat(format!(
                "permission action '{}'",
                trimmed
            )));
        }

        normalized.insert(trimmed.to_string());
    }

    Ok(normalized)
}
