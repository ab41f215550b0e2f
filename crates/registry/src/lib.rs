use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registration failures. The display strings are part of the external
/// contract and are surfaced verbatim to clients.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Username is required")]
    MissingUsername,
    #[error("Role is required")]
    MissingRole,
    #[error("Username already exists")]
    DuplicateUsername,
}

/// A registered user. `username` is stored trimmed and is unique across the
/// roster (case-sensitive exact match).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub role: String,
    pub newsletter: bool,
}

/// Abstract user store trait
pub trait UserStore {
    /// Validate and append a new user. Validation short-circuits on the
    /// first failed check, in contract order.
    fn register(
        &self,
        username: &str,
        role: &str,
        newsletter: bool,
    ) -> Result<(), RegistrationError>;

    /// Whether the trimmed username is already registered.
    fn contains(&self, username: &str) -> bool;

    fn list(&self) -> Vec<UserRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validation checks in contract order; the first violated predicate wins.
/// `username` must already be trimmed by the caller.
fn first_violation(
    username: &str,
    role: &str,
    users: &[UserRecord],
) -> Option<RegistrationError> {
    let checks = [
        (username.is_empty(), RegistrationError::MissingUsername),
        (role.is_empty(), RegistrationError::MissingRole),
        (
            users.iter().any(|u| u.username == username),
            RegistrationError::DuplicateUsername,
        ),
    ];

    checks
        .into_iter()
        .find_map(|(violated, error)| violated.then_some(error))
}

/// In-memory roster backend. Append-only for the lifetime of the process;
/// nothing is persisted.
pub struct MemoryRegistry {
    users: Arc<RwLock<Vec<UserRecord>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self {
            users: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl UserStore for MemoryRegistry {
    fn register(
        &self,
        username: &str,
        role: &str,
        newsletter: bool,
    ) -> Result<(), RegistrationError> {
        let username = username.trim();

        // Uniqueness check and append share one write guard; concurrent
        // registrations serialize here.
        let mut users = self.users.write();
        if let Some(violation) = first_violation(username, role, &users) {
            return Err(violation);
        }

        users.push(UserRecord {
            username: username.to_string(),
            role: role.to_string(),
            newsletter,
        });
        Ok(())
    }

    fn contains(&self, username: &str) -> bool {
        let needle = username.trim();
        self.users.read().iter().any(|u| u.username == needle)
    }

    fn list(&self) -> Vec<UserRecord> {
        self.users.read().clone()
    }

    fn len(&self) -> usize {
        self.users.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_registration_succeeds_then_duplicates_fail() {
        let roster = MemoryRegistry::new();

        roster.register("validuser", "student", true).unwrap();
        assert!(roster.contains("validuser"));
        assert_eq!(roster.len(), 1);

        // Any role/newsletter combination still collides on the username.
        let err = roster.register("validuser", "teacher", false).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateUsername);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn empty_username_is_rejected() {
        let roster = MemoryRegistry::new();
        let err = roster.register("", "student", false).unwrap_err();
        assert_eq!(err, RegistrationError::MissingUsername);
        assert!(roster.is_empty());
    }

    #[test]
    fn whitespace_only_username_is_rejected() {
        let roster = MemoryRegistry::new();
        let err = roster.register("   ", "student", false).unwrap_err();
        assert_eq!(err, RegistrationError::MissingUsername);
    }

    #[test]
    fn empty_role_is_rejected() {
        let roster = MemoryRegistry::new();
        let err = roster.register("testuser", "", false).unwrap_err();
        assert_eq!(err, RegistrationError::MissingRole);
        assert!(roster.is_empty());
    }

    #[test]
    fn username_check_precedes_role_check() {
        let roster = MemoryRegistry::new();
        let err = roster.register("", "", false).unwrap_err();
        assert_eq!(err, RegistrationError::MissingUsername);
    }

    #[test]
    fn usernames_are_trimmed_before_uniqueness_and_storage() {
        let roster = MemoryRegistry::new();

        roster.register("  alice  ", "student", false).unwrap();
        assert_eq!(roster.list()[0].username, "alice");

        let err = roster.register("alice", "teacher", true).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateUsername);
        assert!(roster.contains("  alice "));
    }

    #[test]
    fn uniqueness_is_case_sensitive() {
        let roster = MemoryRegistry::new();
        roster.register("Alice", "student", false).unwrap();
        roster.register("alice", "student", false).unwrap();
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn repeated_attempts_deterministically_report_duplicate() {
        let roster = MemoryRegistry::new();
        roster.register("duplicate_user", "student", false).unwrap();

        for _ in 0..3 {
            let err = roster
                .register("duplicate_user", "student", false)
                .unwrap_err();
            assert_eq!(err, RegistrationError::DuplicateUsername);
        }
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn records_keep_insertion_order_and_fields() {
        let roster = MemoryRegistry::new();
        roster.register("first", "student", true).unwrap();
        roster.register("second", "teacher", false).unwrap();

        let users = roster.list();
        assert_eq!(
            users,
            vec![
                UserRecord {
                    username: "first".to_string(),
                    role: "student".to_string(),
                    newsletter: true,
                },
                UserRecord {
                    username: "second".to_string(),
                    role: "teacher".to_string(),
                    newsletter: false,
                },
            ]
        );
    }

    #[test]
    fn concurrent_registrations_of_same_username_admit_one_winner() {
        let roster = Arc::new(MemoryRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let roster = roster.clone();
                thread::spawn(move || roster.register("racer", "student", false).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(roster.len(), 1);
    }
}
