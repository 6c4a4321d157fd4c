use serde::{Deserialize, Serialize};

/// Role carried by an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Organizer,
    Buyer,
}

/// Caller identity threaded explicitly into every core operation.
///
/// There is deliberately no ambient "current user" lookup anywhere in the
/// domain crates; whoever invokes an operation says who they are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub subject: String,
    pub role: Role,
}

impl Caller {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            subject: subject.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("caller {subject} is not authorized for this resource")]
    Unauthorized { subject: String },
}

/// Authorization predicates consumed by destructive operations.
///
/// Admins bypass ownership; everyone else must be the event's organizer.
pub struct OwnershipGuard;

impl OwnershipGuard {
    pub fn ensure_event_owner(caller: &Caller, organizer_id: &str) -> Result<(), AccessError> {
        if caller.is_admin() || caller.subject == organizer_id {
            Ok(())
        } else {
            Err(AccessError::Unauthorized {
                subject: caller.subject.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organizer_owns_own_event() {
        let caller = Caller::new("org-1", Role::Organizer);
        assert!(OwnershipGuard::ensure_event_owner(&caller, "org-1").is_ok());
        assert!(OwnershipGuard::ensure_event_owner(&caller, "org-2").is_err());
    }

    #[test]
    fn test_admin_bypasses_ownership() {
        let caller = Caller::new("root", Role::Admin);
        assert!(OwnershipGuard::ensure_event_owner(&caller, "org-2").is_ok());
    }
}
