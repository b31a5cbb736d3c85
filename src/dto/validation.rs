//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted display name, counted in characters after trimming.
pub const MAX_DISPLAY_NAME_CHARS: usize = 20;

/// Characters room codes are drawn from. Confusable glyphs (I, O, 0, 1) are left out.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Number of characters in a room code.
pub const ROOM_CODE_LEN: usize = 4;

/// Validates that a display name is non-empty once trimmed and not too long.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Alice")   // Ok
/// validate_display_name("   ")     // Err - blank
/// validate_display_name(&"x".repeat(21)) // Err - too long
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that a room code has the right length and only uses the code alphabet.
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code contains characters outside the code alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Canonical form of a client-supplied room code.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
