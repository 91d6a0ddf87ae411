use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;

use crate::errors::SessionError;

/// Maximum length accepted for room and participant identifiers.
pub const MAX_IDENTIFIER_LEN: usize = 50;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("identifier pattern is valid"));

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(s)
}

/// Room names: 1-50 characters of `[a-zA-Z0-9_-]`.
pub fn validate_room_name(s: &str) -> bool {
    is_valid_identifier(s)
}

/// Participant names follow the same policy as room names.
pub fn validate_participant_name(s: &str) -> bool {
    is_valid_identifier(s)
}

/// Check both identifiers and return the first violation as a `Validation` error.
pub fn validate_identifiers(room: &str, participant: &str) -> Result<(), SessionError> {
    if !validate_room_name(room) {
        return Err(SessionError::Validation(format!(
            "room name '{room}' must be 1-{MAX_IDENTIFIER_LEN} letters, digits, '-' or '_'"
        )));
    }
    if !validate_participant_name(participant) {
        return Err(SessionError::Validation(format!(
            "participant name '{participant}' must be 1-{MAX_IDENTIFIER_LEN} letters, digits, '-' or '_'"
        )));
    }
    Ok(())
}

/// Generate a throwaway identity such as `user-4821`.
pub fn generate_random_identity() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("user-{n}")
}
