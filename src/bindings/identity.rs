use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of generated client ids and consumer group names, injected into
/// a binding at init.
pub trait IdentityProvider: Send + Sync {
    fn client_id(&self) -> String;
    fn group_name(&self) -> String;
}

/// Random uuid-based identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentity;

impl IdentityProvider for RandomIdentity {
    fn client_id(&self) -> String {
        format!("relayhub-{}", Uuid::new_v4())
    }

    fn group_name(&self) -> String {
        format!("group-{}", Uuid::new_v4())
    }
}

/// Deterministic `<prefix>-client-<n>` / `<prefix>-group-<n>` identities.
#[derive(Debug, Default)]
pub struct SequentialIdentity {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdentity {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(0),
        }
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl IdentityProvider for SequentialIdentity {
    fn client_id(&self) -> String {
        format!("{}-client-{}", self.prefix, self.bump())
    }

    fn group_name(&self) -> String {
        format!("{}-group-{}", self.prefix, self.bump())
    }
}
