//! Access-checked repository decorator.
//!
//! Writes are authorized against the `AccessControl` collaborator before they
//! reach the inner repository; every successful call is logged for audit.
//! Reads are audited but not gated.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, warn};

use super::traits::{DocumentQueries, Repository};
use crate::domain::{
    AccessContext, AccessControl, Action, EntityType, Fields, Filter, QueryOptions, Record,
    RecordId, WriteOp, WriteOutcome,
};
use crate::error::{Error, Result};

/// Calls slower than this are logged at warn.
const SLOW_CALL: Duration = Duration::from_secs(1);

pub struct SecuredRepository<R> {
    inner: R,
    ctx: AccessContext,
    access: Arc<dyn AccessControl>,
}

impl<R: Repository> SecuredRepository<R> {
    pub fn new(inner: R, ctx: AccessContext, access: Arc<dyn AccessControl>) -> Self {
        Self { inner, ctx, access }
    }

    pub fn context(&self) -> &AccessContext {
        &self.ctx
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn authorize(&self, resource: &EntityType, action: Action) -> Result<()> {
        if self.access.authorize(&self.ctx, resource, action).await? {
            return Ok(());
        }
        warn!(
            user_id = %self.ctx.user_id,
            org_id = %self.ctx.org_id,
            resource = %resource,
            action = %action,
            "Access denied"
        );
        Err(Error::AccessDenied {
            user_id: self.ctx.user_id.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Run `call`, then audit it if it succeeded.
    async fn audited<T, Fut>(
        &self,
        method: &'static str,
        action: Action,
        resource_id: impl Fn(&T) -> Option<RecordId> + Send,
        call: Fut,
    ) -> Result<T>
    where
        T: Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let result = self.observed(method, call).await;
        if let Ok(value) = &result {
            self.access
                .log_access(&self.ctx, action, self.inner.entity_type(), resource_id(value))
                .await;
        }
        result
    }

    /// Run `call`, logging failures and slow completions.
    async fn observed<T, Fut>(&self, method: &'static str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + Send,
    {
        let started = Instant::now();
        let result = call.await;

        let elapsed = started.elapsed();
        if elapsed > SLOW_CALL {
            warn!(method, elapsed_ms = elapsed.as_millis() as u64, "Slow repository call");
        }
        if let Err(e) = &result {
            error!(method, entity_type = %self.inner.entity_type(), error = %e, "Repository call failed");
        }
        result
    }
}

fn no_id<T>(_: &T) -> Option<RecordId> {
    None
}

#[async_trait]
impl<R: Repository> Repository for SecuredRepository<R> {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        self.audited("find_by_id", Action::Read, |_| Some(id), self.inner.find_by_id(id))
            .await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.audited("find_many", Action::Read, no_id, self.inner.find_many(filter, options))
            .await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        self.authorize(self.inner.entity_type(), Action::Create).await?;
        self.audited(
            "create",
            Action::Create,
            |record: &Record| Some(record.id),
            self.inner.create(fields),
        )
        .await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        self.authorize(self.inner.entity_type(), Action::Update).await?;
        self.audited("update", Action::Update, |_| Some(id), self.inner.update(id, fields))
            .await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.authorize(self.inner.entity_type(), Action::Delete).await?;
        self.audited("delete", Action::Delete, |_| Some(id), self.inner.delete(id))
            .await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        // Distinct (target, action) pairs in first-seen order
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for op in &ops {
            let target = (op.entity_type().clone(), write_action(op));
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
        for (entity_type, action) in &targets {
            self.authorize(entity_type, *action).await?;
        }

        let outcomes = self.observed("transaction", self.inner.transaction(ops)).await?;
        for (entity_type, action) in &targets {
            self.access
                .log_access(&self.ctx, *action, entity_type, None)
                .await;
        }
        Ok(outcomes)
    }
}

fn write_action(op: &WriteOp) -> Action {
    match op {
        WriteOp::Create { .. } => Action::Create,
        WriteOp::Update { .. } => Action::Update,
        WriteOp::Delete { .. } => Action::Delete,
    }
}

#[async_trait]
impl<R: DocumentQueries> DocumentQueries for SecuredRepository<R> {
    async fn find_by_organization(
        &self,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.audited(
            "find_by_organization",
            Action::Read,
            no_id,
            self.inner.find_by_organization(org_id, options),
        )
        .await
    }

    async fn find_by_owner(
        &self,
        owner_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.audited(
            "find_by_owner",
            Action::Read,
            no_id,
            self.inner.find_by_owner(owner_id, options),
        )
        .await
    }

    async fn find_by_topic(
        &self,
        topic_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.audited(
            "find_by_topic",
            Action::Read,
            no_id,
            self.inner.find_by_topic(topic_id, options),
        )
        .await
    }

    async fn find_related_documents(
        &self,
        document_id: RecordId,
        max_depth: usize,
    ) -> Result<Vec<Record>> {
        self.audited(
            "find_related_documents",
            Action::Read,
            |_| Some(document_id),
            self.inner.find_related_documents(document_id, max_depth),
        )
        .await
    }

    async fn search(
        &self,
        query: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.audited(
            "search",
            Action::Read,
            no_id,
            self.inner.search(query, org_id, options),
        )
        .await
    }

    async fn find_by_status(
        &self,
        status: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.audited(
            "find_by_status",
            Action::Read,
            no_id,
            self.inner.find_by_status(status, org_id, options),
        )
        .await
    }

    async fn create_with_summary(
        &self,
        document: Fields,
        summary: Fields,
    ) -> Result<(Record, Record)> {
        self.authorize(self.inner.entity_type(), Action::Create).await?;
        self.authorize(&EntityType::summary(), Action::Create).await?;
        self.audited(
            "create_with_summary",
            Action::Create,
            |(doc, _): &(Record, Record)| Some(doc.id),
            self.inner.create_with_summary(document, summary),
        )
        .await
    }

    async fn update_with_version(
        &self,
        id: RecordId,
        changes: Fields,
        change_description: Option<&str>,
    ) -> Result<Record> {
        self.authorize(self.inner.entity_type(), Action::Update).await?;
        self.authorize(&EntityType::document_version(), Action::Create).await?;
        self.audited(
            "update_with_version",
            Action::Update,
            |_| Some(id),
            self.inner.update_with_version(id, changes, change_description),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AllowAllAccess, InMemoryStore, LoggingAccessAuditor};
    use crate::domain::Persistence;
    use crate::repository::{BaseRepository, DocumentRepository};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    fn ctx() -> AccessContext {
        AccessContext::new(RecordId::new(), RecordId::new())
    }

    #[tokio::test]
    async fn test_allowed_writes_are_audited() {
        let auditor = Arc::new(LoggingAccessAuditor::new(Arc::new(AllowAllAccess)));
        let store = Arc::new(InMemoryStore::new());
        let repo = SecuredRepository::new(
            BaseRepository::new(EntityType::topic(), store),
            ctx(),
            auditor.clone(),
        );

        let created = repo.create(fields(json!({"name": "t"}))).await.unwrap();
        repo.find_by_id(created.id).await.unwrap();

        let entries = auditor.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, Action::Create);
        assert_eq!(entries[0].resource_id, Some(created.id));
        assert_eq!(entries[1].action, Action::Read);
    }

    #[tokio::test]
    async fn test_denied_write_never_reaches_store() {
        let denied: HashSet<(EntityType, Action)> =
            [(EntityType::document(), Action::Update)].into_iter().collect();
        let auditor = Arc::new(LoggingAccessAuditor::denying(denied));
        let store = Arc::new(InMemoryStore::new());
        let repo = SecuredRepository::new(DocumentRepository::new(store.clone()), ctx(), auditor.clone());

        let doc = repo.create(fields(json!({"title": "a"}))).await.unwrap();
        let ops_before = store.operation_count();

        let result = repo
            .update_with_version(doc.id, fields(json!({"title": "b"})), None)
            .await;
        assert_matches!(result, Err(Error::AccessDenied { .. }));
        assert_eq!(store.operation_count(), ops_before);
        assert_eq!(auditor.denied_count(), 1);
    }

    #[tokio::test]
    async fn test_transaction_checks_each_target() {
        let denied: HashSet<(EntityType, Action)> =
            [(EntityType::summary(), Action::Delete)].into_iter().collect();
        let auditor = Arc::new(LoggingAccessAuditor::denying(denied));
        let repo = SecuredRepository::new(
            BaseRepository::new(EntityType::document(), Arc::new(InMemoryStore::new())),
            ctx(),
            auditor,
        );

        let ops = vec![
            WriteOp::Create {
                entity_type: EntityType::document(),
                id: RecordId::new(),
                fields: Fields::new(),
            },
            WriteOp::Delete {
                entity_type: EntityType::summary(),
                id: RecordId::new(),
            },
        ];
        assert_matches!(repo.transaction(ops).await, Err(Error::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_transaction_audits_each_target_action() {
        let auditor = Arc::new(LoggingAccessAuditor::new(Arc::new(AllowAllAccess)));
        let store = Arc::new(InMemoryStore::new());
        let repo = SecuredRepository::new(
            BaseRepository::new(EntityType::document(), store.clone()),
            ctx(),
            auditor.clone(),
        );
        let stale = store.create(&EntityType::summary(), Fields::new()).await.unwrap();

        let ops = vec![
            WriteOp::Create {
                entity_type: EntityType::document(),
                id: RecordId::new(),
                fields: Fields::new(),
            },
            WriteOp::Create {
                entity_type: EntityType::document(),
                id: RecordId::new(),
                fields: Fields::new(),
            },
            WriteOp::Delete {
                entity_type: EntityType::summary(),
                id: stale.id,
            },
        ];
        repo.transaction(ops).await.unwrap();

        let audited: Vec<(EntityType, Action)> = auditor
            .entries()
            .into_iter()
            .map(|entry| (entry.resource, entry.action))
            .collect();
        assert_eq!(
            audited,
            vec![
                (EntityType::document(), Action::Create),
                (EntityType::summary(), Action::Delete),
            ]
        );
    }
}
