use async_trait::async_trait;
use std::sync::RwLock;

use crate::models::Subject;

/// External identity capability. Agents re-check the subject at every
/// scheduled run; a `None` answer is a hard stop for the consulting agent,
/// not an error.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_subject(&self) -> Option<Subject>;
}

/// Identity provider with an externally toggled subject. Used by the dev
/// binary and by tests to simulate sign-in and sign-out.
pub struct StaticIdentity {
    subject: RwLock<Option<Subject>>,
}

impl StaticIdentity {
    pub fn signed_in(subject: Subject) -> Self {
        Self {
            subject: RwLock::new(Some(subject)),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            subject: RwLock::new(None),
        }
    }

    pub fn sign_in(&self, subject: Subject) {
        *self.subject.write().unwrap() = Some(subject);
    }

    pub fn sign_out(&self) {
        *self.subject.write().unwrap() = None;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_subject(&self) -> Option<Subject> {
        self.subject.read().unwrap().clone()
    }
}
