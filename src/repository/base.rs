//! Plain CRUD repository over the persistence port.

use std::sync::Arc;

use async_trait::async_trait;

use super::traits::Repository;
use crate::domain::{
    EntityType, Fields, Filter, Persistence, QueryOptions, Record, RecordId, WriteOp, WriteOutcome,
};
use crate::error::Result;

/// Thin caller of `Persistence` for one entity type.
#[derive(Clone)]
pub struct BaseRepository {
    entity_type: EntityType,
    store: Arc<dyn Persistence>,
}

impl BaseRepository {
    pub fn new(entity_type: EntityType, store: Arc<dyn Persistence>) -> Self {
        Self { entity_type, store }
    }

    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }
}

#[async_trait]
impl Repository for BaseRepository {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        self.store.find_by_id(&self.entity_type, id).await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.store.find_many(&self.entity_type, filter, options).await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        self.store.create(&self.entity_type, fields).await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        self.store.update(&self.entity_type, id, fields).await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.store.delete(&self.entity_type, id).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        self.store.run_in_transaction(ops).await
    }
}
