use crate::error::StoreError;

pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Session names double as directory names: non-empty, at most 64 chars of
/// `[A-Za-z0-9_-]`.
pub fn validate_session_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_SESSION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
