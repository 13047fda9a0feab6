//! Validation helpers for user input.

use validator::ValidationError;

/// Characters room codes are drawn from; `0`, `O`, `1` and `I` are left out.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Exact length of a room code.
pub const ROOM_CODE_LENGTH: usize = 6;
/// Longest nickname accepted, in characters.
pub const NICKNAME_MAX_CHARS: usize = 20;
/// Symbols a player may pick as avatar.
pub const AVATARS: [&str; 12] = [
    "😊", "😎", "🥰", "😏", "🤗", "😇", "🔥", "💕", "✨", "🌟", "💫", "🎭",
];

/// Trim and uppercase a code typed by a user.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Validates that a room code has exactly six characters from [`ROOM_CODE_ALPHABET`].
///
/// # Examples
///
/// ```ignore
/// validate_room_code("AB23CD") // Ok
/// validate_room_code("AB23C")  // Err - too short
/// validate_room_code("AB23C0") // Err - `0` is not in the alphabet
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LENGTH} characters (got {})",
                code.chars().count()
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

/// Validates a nickname: 1 to 20 characters once surrounding whitespace is removed.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let count = nickname.trim().chars().count();
    if count == 0 || count > NICKNAME_MAX_CHARS {
        let mut err = ValidationError::new("nickname_length");
        err.message = Some(
            format!("Nickname must be 1 to {NICKNAME_MAX_CHARS} characters (got {count})").into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Validates that the avatar is one of [`AVATARS`].
pub fn validate_avatar(avatar: &str) -> Result<(), ValidationError> {
    if AVATARS.contains(&avatar) {
        return Ok(());
    }
    let mut err = ValidationError::new("avatar_unknown");
    err.message = Some(format!("Unknown avatar `{avatar}`").into());
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_code_valid() {
        assert!(validate_room_code("AB23CD").is_ok());
        assert!(validate_room_code("ZZZZZZ").is_ok());
        assert!(validate_room_code("234567").is_ok());
    }

    #[test]
    fn test_validate_room_code_invalid_length() {
        assert!(validate_room_code("AB23C").is_err()); // too short
        assert!(validate_room_code("AB23CDE").is_err()); // too long
        assert!(validate_room_code("").is_err()); // empty
    }

    #[test]
    fn test_validate_room_code_ambiguous_glyphs() {
        assert!(validate_room_code("AB23C0").is_err()); // zero
        assert!(validate_room_code("AB23CO").is_err()); // letter O
        assert!(validate_room_code("AB23C1").is_err()); // one
        assert!(validate_room_code("AB23CI").is_err()); // letter I
        assert!(validate_room_code("ab23cd").is_err()); // lowercase
    }

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code("  ab23cd \n"), "AB23CD");
    }

    #[test]
    fn test_validate_nickname_counts_characters() {
        assert!(validate_nickname("Alice").is_ok());
        assert!(validate_nickname("ÉléonoreÉléonoreÉléo").is_ok()); // 20 chars, more bytes
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname("abcdefghijklmnopqrstu").is_err());
    }

    #[test]
    fn test_validate_avatar() {
        assert!(validate_avatar("✨").is_ok());
        assert!(validate_avatar("🦀").is_err());
    }
}
