//! Access Control Adapters
//!
//! Implements the `AccessControl` port. Permission logic itself lives
//! outside this crate; these adapters decide from a fixed policy and keep an
//! audit trail.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{AccessContext, AccessControl, Action, EntityType, RecordId};
use crate::error::Result;

/// Grants every request and drops audit records.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAccess;

#[async_trait]
impl AccessControl for AllowAllAccess {
    async fn authorize(
        &self,
        _ctx: &AccessContext,
        _resource: &EntityType,
        _action: Action,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn log_access(
        &self,
        _ctx: &AccessContext,
        _action: Action,
        _resource: &EntityType,
        _resource_id: Option<RecordId>,
    ) {
    }
}

/// Refuses a fixed set of (resource, action) pairs and grants the rest.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: HashSet<(EntityType, Action)>,
}

impl DenyList {
    pub fn new(denied: HashSet<(EntityType, Action)>) -> Self {
        Self { denied }
    }
}

#[async_trait]
impl AccessControl for DenyList {
    async fn authorize(
        &self,
        _ctx: &AccessContext,
        resource: &EntityType,
        action: Action,
    ) -> Result<bool> {
        Ok(!self.denied.contains(&(resource.clone(), action)))
    }

    async fn log_access(
        &self,
        _ctx: &AccessContext,
        _action: Action,
        _resource: &EntityType,
        _resource_id: Option<RecordId>,
    ) {
    }
}

/// One audited access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    pub user_id: RecordId,
    pub org_id: RecordId,
    pub action: Action,
    pub resource: EntityType,
    pub resource_id: Option<RecordId>,
    pub at: DateTime<Utc>,
}

/// Audit layer over another access policy.
///
/// Decisions come from the wrapped policy. Every decision and every logged
/// access goes to `tracing`; logged accesses are also kept in memory.
pub struct LoggingAccessAuditor {
    policy: Arc<dyn AccessControl>,
    entries: RwLock<Vec<AccessLogEntry>>,
    denied: AtomicU64,
}

impl LoggingAccessAuditor {
    pub fn new(policy: Arc<dyn AccessControl>) -> Self {
        Self {
            policy,
            entries: RwLock::new(Vec::new()),
            denied: AtomicU64::new(0),
        }
    }

    /// Auditor over a `DenyList`.
    pub fn denying(denied: HashSet<(EntityType, Action)>) -> Self {
        Self::new(Arc::new(DenyList::new(denied)))
    }

    /// Logged accesses, oldest first.
    pub fn entries(&self) -> Vec<AccessLogEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of refused authorizations.
    pub fn denied_count(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LoggingAccessAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingAccessAuditor")
            .field("entries", &self.len())
            .field("denied", &self.denied_count())
            .finish()
    }
}

#[async_trait]
impl AccessControl for LoggingAccessAuditor {
    async fn authorize(
        &self,
        ctx: &AccessContext,
        resource: &EntityType,
        action: Action,
    ) -> Result<bool> {
        let allowed = self.policy.authorize(ctx, resource, action).await?;
        if !allowed {
            self.denied.fetch_add(1, Ordering::Relaxed);
            warn!(
                user_id = %ctx.user_id,
                org_id = %ctx.org_id,
                resource = %resource,
                action = %action,
                "Authorization refused"
            );
        }
        Ok(allowed)
    }

    async fn log_access(
        &self,
        ctx: &AccessContext,
        action: Action,
        resource: &EntityType,
        resource_id: Option<RecordId>,
    ) {
        info!(
            user_id = %ctx.user_id,
            action = %action,
            resource = %resource,
            resource_id = ?resource_id.map(|id| id.to_string()),
            "Access"
        );
        self.entries.write().push(AccessLogEntry {
            user_id: ctx.user_id,
            org_id: ctx.org_id,
            action,
            resource: resource.clone(),
            resource_id,
            at: Utc::now(),
        });
        self.policy.log_access(ctx, action, resource, resource_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AccessContext {
        AccessContext::new(RecordId::new(), RecordId::new())
    }

    #[tokio::test]
    async fn test_allow_all() {
        let access = AllowAllAccess;
        assert!(access
            .authorize(&ctx(), &EntityType::document(), Action::Delete)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_auditor_records_entries() {
        let auditor = LoggingAccessAuditor::new(Arc::new(AllowAllAccess));
        assert!(auditor.is_empty());

        let id = RecordId::new();
        auditor
            .log_access(&ctx(), Action::Read, &EntityType::document(), Some(id))
            .await;
        auditor
            .log_access(&ctx(), Action::Create, &EntityType::topic(), None)
            .await;

        let entries = auditor.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].resource_id, Some(id));
        assert_eq!(entries[1].resource, EntityType::topic());

        auditor.clear();
        assert!(auditor.is_empty());
    }

    #[tokio::test]
    async fn test_deny_list() {
        let denied = [(EntityType::document(), Action::Delete)].into_iter().collect();
        let auditor = LoggingAccessAuditor::denying(denied);

        assert!(!auditor
            .authorize(&ctx(), &EntityType::document(), Action::Delete)
            .await
            .unwrap());
        assert!(auditor
            .authorize(&ctx(), &EntityType::document(), Action::Read)
            .await
            .unwrap());
        assert_eq!(auditor.denied_count(), 1);
    }
}
