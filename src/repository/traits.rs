//! Repository capability traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{EntityType, Fields, Filter, QueryOptions, Record, RecordId, WriteOp, WriteOutcome};
use crate::error::Result;

/// CRUD operations for one entity type.
///
/// Decorators (caching, metrics, access checks) implement this trait by
/// wrapping another implementation and delegating each call.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Entity type this repository serves.
    fn entity_type(&self) -> &EntityType;

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>>;

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>>;

    async fn create(&self, fields: Fields) -> Result<Record>;

    /// Returns `None` if no record has this id.
    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>>;

    async fn delete(&self, id: RecordId) -> Result<bool>;

    /// Apply all writes atomically. Ops may target other entity types.
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>>;
}

/// Document-specific queries and compound writes.
#[async_trait]
pub trait DocumentQueries: Repository {
    async fn find_by_organization(
        &self,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>>;

    async fn find_by_owner(&self, owner_id: RecordId, options: &QueryOptions)
        -> Result<Vec<Record>>;

    /// Documents linked to a topic through `document_topic` rows.
    async fn find_by_topic(&self, topic_id: RecordId, options: &QueryOptions)
        -> Result<Vec<Record>>;

    /// Documents reachable over graph relationships within `max_depth` hops,
    /// nearest first, excluding the starting document.
    async fn find_related_documents(
        &self,
        document_id: RecordId,
        max_depth: usize,
    ) -> Result<Vec<Record>>;

    /// Case-insensitive title/content search within an organization.
    async fn search(
        &self,
        query: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>>;

    async fn find_by_status(
        &self,
        status: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>>;

    /// Create a document and its summary in one transaction.
    async fn create_with_summary(&self, document: Fields, summary: Fields)
        -> Result<(Record, Record)>;

    /// Snapshot the current document into `document_version`, then apply
    /// `changes`, in one transaction.
    async fn update_with_version(
        &self,
        id: RecordId,
        changes: Fields,
        change_description: Option<&str>,
    ) -> Result<Record>;
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for Arc<R> {
    fn entity_type(&self) -> &EntityType {
        (**self).entity_type()
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        (**self).find_by_id(id).await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        (**self).find_many(filter, options).await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        (**self).create(fields).await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        (**self).update(id, fields).await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        (**self).delete(id).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        (**self).transaction(ops).await
    }
}

/// Registered repository as handed out by the factory.
///
/// Carries the document capability alongside the generic one when the
/// registered implementation supports it.
#[derive(Clone)]
pub struct RepositoryHandle {
    repository: Arc<dyn Repository>,
    documents: Option<Arc<dyn DocumentQueries>>,
}

impl RepositoryHandle {
    pub fn new<R: Repository + 'static>(repository: R) -> Self {
        Self {
            repository: Arc::new(repository),
            documents: None,
        }
    }

    pub fn from_arc(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            documents: None,
        }
    }

    pub fn document<R: DocumentQueries + 'static>(repository: R) -> Self {
        let repository = Arc::new(repository);
        Self {
            repository: repository.clone(),
            documents: Some(repository),
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        self.repository.entity_type()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Document queries, if the registered repository supports them.
    pub fn documents(&self) -> Option<&Arc<dyn DocumentQueries>> {
        self.documents.as_ref()
    }
}

impl std::fmt::Debug for RepositoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryHandle")
            .field("entity_type", self.entity_type())
            .field("documents", &self.documents.is_some())
            .finish()
    }
}
