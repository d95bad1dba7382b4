//! Chat users.

use serde::{Deserialize, Serialize};

use super::UserId;

/// A chat user known to the bot.
///
/// A user whose `display_name` is empty has not identified themselves yet and
/// is refused by every operation that requires authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        User {
            id,
            display_name: display_name.into(),
        }
    }

    /// A user known only by their chat identity.
    pub fn unidentified(id: UserId) -> Self {
        User {
            id,
            display_name: String::new(),
        }
    }

    pub fn is_identified(&self) -> bool {
        !self.display_name.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unidentified_user_has_empty_name() {
        let user = User::unidentified(UserId::new("u1"));
        assert!(!user.is_identified());
    }

    #[test]
    fn whitespace_name_counts_as_unidentified() {
        let user = User::new(UserId::new("u1"), "   ");
        assert!(!user.is_identified());
    }

    #[test]
    fn named_user_is_identified() {
        assert!(User::new(UserId::new("u1"), "Alice").is_identified());
    }
}
