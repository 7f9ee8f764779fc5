//! Metrics-recording repository decorator.

use async_trait::async_trait;

use super::traits::{DocumentQueries, Repository};
use crate::domain::{
    EntityType, Fields, Filter, QueryOptions, Record, RecordId, WriteOp, WriteOutcome,
};
use crate::error::Result;
use crate::metrics::MetricsRegistry;

/// Records one operation per call into the registry's metrics for the inner
/// repository's entity type.
///
/// The metrics instance is looked up at call time, so reconfiguring an
/// entity's metrics takes effect on the next call.
pub struct InstrumentedRepository<R> {
    inner: R,
    metrics: MetricsRegistry,
}

impl<R: Repository> InstrumentedRepository<R> {
    pub fn new(inner: R, metrics: MetricsRegistry) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: Repository> Repository for InstrumentedRepository<R> {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_by_id(id))
            .await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_many(filter, options))
            .await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        self.metrics
            .track(self.entity_type(), self.inner.create(fields))
            .await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.update(id, fields))
            .await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.metrics
            .track(self.entity_type(), self.inner.delete(id))
            .await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        self.metrics
            .track(self.entity_type(), self.inner.transaction(ops))
            .await
    }
}

#[async_trait]
impl<R: DocumentQueries> DocumentQueries for InstrumentedRepository<R> {
    async fn find_by_organization(
        &self,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_by_organization(org_id, options))
            .await
    }

    async fn find_by_owner(
        &self,
        owner_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_by_owner(owner_id, options))
            .await
    }

    async fn find_by_topic(
        &self,
        topic_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_by_topic(topic_id, options))
            .await
    }

    async fn find_related_documents(
        &self,
        document_id: RecordId,
        max_depth: usize,
    ) -> Result<Vec<Record>> {
        self.metrics
            .track(
                self.entity_type(),
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
        self.metrics
            .track(self.entity_type(), self.inner.search(query, org_id, options))
            .await
    }

    async fn find_by_status(
        &self,
        status: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.metrics
            .track(self.entity_type(), self.inner.find_by_status(status, org_id, options))
            .await
    }

    async fn create_with_summary(
        &self,
        document: Fields,
        summary: Fields,
    ) -> Result<(Record, Record)> {
        self.metrics
            .track(self.entity_type(), self.inner.create_with_summary(document, summary))
            .await
    }

    async fn update_with_version(
        &self,
        id: RecordId,
        changes: Fields,
        change_description: Option<&str>,
    ) -> Result<Record> {
        self.metrics
            .track(
                self.entity_type(),
                self.inner.update_with_version(id, changes, change_description),
            )
            .await
    }
}
