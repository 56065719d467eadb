//! Allowlist Authorization
//!
//! Every turn is checked against an [`AccessPolicy`] before any model or
//! transport traffic happens. The policy is three id lists: users allowed
//! to talk to the relay, group chats it may be used in, and admins who
//! bypass both lists. An empty list means that dimension is unrestricted,
//! so the default policy is fully open.
//!
//! Violations are ordinary typed errors. The caller decides what, if
//! anything, to tell the chat.

use thiserror::Error;

use crate::chat::{ChatContext, ConversationId, UserId};

/// Why a turn was refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    /// The sending user is not on the allowlist
    #[error("user {0} is not on the allowlist")]
    UserNotAllowed(UserId),

    /// The group chat is not on the allowlist
    #[error("group chat {0} is not on the allowlist")]
    GroupNotAllowed(ConversationId),
}

/// Who may talk to the relay, and where
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    allowed_users: Vec<UserId>,
    allowed_groups: Vec<i64>,
    admins: Vec<UserId>,
}

impl AccessPolicy {
    /// Policy with explicit allowlists
    #[must_use]
    pub fn new(allowed_users: Vec<UserId>, allowed_groups: Vec<i64>, admins: Vec<UserId>) -> Self {
        Self {
            allowed_users,
            allowed_groups,
            admins,
        }
    }

    /// Policy that admits everyone everywhere
    #[must_use]
    pub fn open() -> Self {
        Self::default()
    }

    /// Whether `user` is an admin
    #[must_use]
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }

    /// Check whether `user` may run a turn in `chat`
    ///
    /// Admins always pass. Otherwise the user allowlist applies, and for
    /// shared chats the group allowlist applies on top of it.
    ///
    /// # Errors
    ///
    /// Returns the first allowlist the request fails.
    pub fn check(&self, user: UserId, chat: &ChatContext) -> Result<(), AuthzError> {
        if self.is_admin(user) {
            return Ok(());
        }
        if !self.allowed_users.is_empty() && !self.allowed_users.contains(&user) {
            return Err(AuthzError::UserNotAllowed(user));
        }
        if chat.kind.is_shared() && !self.allowed_groups.is_empty() {
            let permitted = group_id(&chat.conversation)
                .is_some_and(|gid| self.allowed_groups.contains(&gid));
            if !permitted {
                return Err(AuthzError::GroupNotAllowed(chat.conversation.clone()));
            }
        }
        Ok(())
    }
}

/// Numeric group id of a shared conversation.
///
/// Thread conversations carry the group id before the `_` separator.
fn group_id(conversation: &ConversationId) -> Option<i64> {
    conversation
        .as_str()
        .split('_')
        .next()
        .and_then(|part| part.parse::<i64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatContext;

    fn policy() -> AccessPolicy {
        AccessPolicy::new(
            vec![UserId(10), UserId(20)],
            vec![-500],
            vec![UserId(1)],
        )
    }

    #[test]
    fn test_open_policy_admits_anyone() {
        let open = AccessPolicy::open();
        let chat = ChatContext::group(-999);
        assert!(open.check(UserId(12345), &chat).is_ok());
    }

    #[test]
    fn test_user_allowlist() {
        let policy = policy();
        let direct = ChatContext::direct(UserId(10));
        assert!(policy.check(UserId(10), &direct).is_ok());

        let err = policy
            .check(UserId(99), &ChatContext::direct(UserId(99)))
            .unwrap_err();
        assert_eq!(err, AuthzError::UserNotAllowed(UserId(99)));
    }

    #[test]
    fn test_group_allowlist() {
        let policy = policy();
        assert!(policy.check(UserId(10), &ChatContext::group(-500)).is_ok());

        let err = policy
            .check(UserId(10), &ChatContext::group(-600))
            .unwrap_err();
        assert!(matches!(err, AuthzError::GroupNotAllowed(_)));
    }

    #[test]
    fn test_thread_inherits_group_permission() {
        let policy = policy();
        assert!(policy
            .check(UserId(20), &ChatContext::thread(-500, 7))
            .is_ok());
        assert!(policy
            .check(UserId(20), &ChatContext::thread(-600, 7))
            .is_err());
    }

    #[test]
    fn test_group_list_ignored_for_direct_chats() {
        let policy = policy();
        assert!(policy.check(UserId(20), &ChatContext::direct(UserId(20))).is_ok());
    }

    #[test]
    fn test_admin_bypasses_both_lists() {
        let policy = policy();
        assert!(policy.check(UserId(1), &ChatContext::group(-600)).is_ok());
        assert!(policy.check(UserId(1), &ChatContext::direct(UserId(1))).is_ok());
    }

    #[test]
    fn test_empty_user_list_open_but_group_list_enforced() {
        let policy = AccessPolicy::new(Vec::new(), vec![-500], Vec::new());
        assert!(policy.check(UserId(7), &ChatContext::direct(UserId(7))).is_ok());
        assert!(policy.check(UserId(7), &ChatContext::group(-500)).is_ok());
        assert!(policy.check(UserId(7), &ChatContext::group(-501)).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = AuthzError::UserNotAllowed(UserId(5));
        assert_eq!(err.to_string(), "user 5 is not on the allowlist");
    }
}
