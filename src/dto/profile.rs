//! Profile submitted on the profile screen.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::dto::validation::{validate_avatar, validate_nickname};

/// Nickname and avatar a device submits before entering the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Trimmed display name.
    pub nickname: String,
    /// One of the fixed avatars.
    pub avatar: String,
}

impl PlayerProfile {
    /// Build a profile, trimming the nickname.
    pub fn new(nickname: impl AsRef<str>, avatar: impl Into<String>) -> Self {
        Self {
            nickname: nickname.as_ref().trim().to_string(),
            avatar: avatar.into(),
        }
    }
}

impl Validate for PlayerProfile {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_nickname(&self.nickname) {
            errors.add("nickname", e);
        }
        if let Err(e) = validate_avatar(&self.avatar) {
            errors.add("avatar", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_nickname() {
        let profile = PlayerProfile::new("  Alice ", "😊");
        assert_eq!(profile.nickname, "Alice");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn reports_every_invalid_field() {
        let errors = PlayerProfile::new("", "🦀").validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("nickname"));
        assert!(fields.contains_key("avatar"));
    }
}
