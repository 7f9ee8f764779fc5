//! Document Repository
//!
//! Document queries on top of the generic CRUD repository. Relationship
//! and topic lookups are resolved through the `graph_relationship` and
//! `document_topic` entity types.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::base::BaseRepository;
use super::traits::{DocumentQueries, Repository};
use crate::domain::{
    EntityType, Fields, Filter, Persistence, QueryOptions, Record, RecordId, WriteOp, WriteOutcome,
};
use crate::error::{Error, Result};

/// Fields matched by `search`.
pub const SEARCH_FIELDS: &[&str] = &["title", "content"];

/// Default hop limit for `find_related_documents`.
pub const DEFAULT_RELATION_DEPTH: usize = 2;

#[derive(Clone)]
pub struct DocumentRepository {
    base: BaseRepository,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self {
            base: BaseRepository::new(EntityType::document(), store),
        }
    }

    fn store(&self) -> &Arc<dyn Persistence> {
        self.base.store()
    }

    /// Target ids of relationships whose source is `source`.
    async fn related_ids(&self, source: RecordId) -> Result<Vec<RecordId>> {
        let edges = self
            .store()
            .find_many(
                &EntityType::graph_relationship(),
                &Filter::new().eq("source_id", source),
                &QueryOptions::new(),
            )
            .await?;
        Ok(edges.iter().filter_map(|edge| edge.get_id("target_id")).collect())
    }
}

fn missing_document(id: RecordId) -> Error {
    Error::RecordNotFound {
        entity_type: EntityType::document().to_string(),
        id: id.to_string(),
    }
}

fn created_record(outcome: Option<WriteOutcome>) -> Result<Record> {
    outcome
        .and_then(WriteOutcome::into_record)
        .ok_or_else(|| Error::Persistence("transaction returned no record".into()))
}

#[async_trait]
impl Repository for DocumentRepository {
    fn entity_type(&self) -> &EntityType {
        self.base.entity_type()
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        self.base.find_by_id(id).await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.base.find_many(filter, options).await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        self.base.create(fields).await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        self.base.update(id, fields).await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        self.base.delete(id).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        self.base.transaction(ops).await
    }
}

#[async_trait]
impl DocumentQueries for DocumentRepository {
    async fn find_by_organization(
        &self,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.base
            .find_many(&Filter::new().eq("org_id", org_id), options)
            .await
    }

    async fn find_by_owner(
        &self,
        owner_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.base
            .find_many(&Filter::new().eq("owner_id", owner_id), options)
            .await
    }

    async fn find_by_topic(
        &self,
        topic_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let links = self
            .store()
            .find_many(
                &EntityType::document_topic(),
                &Filter::new().eq("topic_id", topic_id),
                &QueryOptions::new(),
            )
            .await?;

        let mut seen = HashSet::new();
        let mut documents = Vec::with_capacity(links.len());
        for document_id in links.iter().filter_map(|link| link.get_id("document_id")) {
            if !seen.insert(document_id) {
                continue;
            }
            if let Some(document) = self.base.find_by_id(document_id).await? {
                documents.push(document);
            }
        }

        Ok(options.apply(documents))
    }

    async fn find_related_documents(
        &self,
        document_id: RecordId,
        max_depth: usize,
    ) -> Result<Vec<Record>> {
        let mut visited = HashSet::from([document_id]);
        let mut frontier = VecDeque::from([(document_id, 0usize)]);
        let mut related = Vec::new();

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for target in self.related_ids(current).await? {
                if !visited.insert(target) {
                    continue;
                }
                // Edges may point at non-document graph entities
                if let Some(document) = self.base.find_by_id(target).await? {
                    related.push(document);
                    frontier.push_back((target, depth + 1));
                }
            }
        }

        debug!(
            document_id = %document_id,
            max_depth,
            found = related.len(),
            "Resolved related documents"
        );
        Ok(related)
    }

    async fn search(
        &self,
        query: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let filter = Filter::new().eq("org_id", org_id).text(SEARCH_FIELDS, query);
        self.base.find_many(&filter, options).await
    }

    async fn find_by_status(
        &self,
        status: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let filter = Filter::new().eq("org_id", org_id).eq("status", status);
        self.base.find_many(&filter, options).await
    }

    async fn create_with_summary(
        &self,
        document: Fields,
        mut summary: Fields,
    ) -> Result<(Record, Record)> {
        let document_id = RecordId::new();
        summary.insert("document_id".into(), Value::from(document_id));

        let mut outcomes = self
            .base
            .transaction(vec![
                WriteOp::Create {
                    entity_type: EntityType::document(),
                    id: document_id,
                    fields: document,
                },
                WriteOp::Create {
                    entity_type: EntityType::summary(),
                    id: RecordId::new(),
                    fields: summary,
                },
            ])
            .await?
            .into_iter();

        let document = created_record(outcomes.next())?;
        let summary = created_record(outcomes.next())?;
        Ok((document, summary))
    }

    async fn update_with_version(
        &self,
        id: RecordId,
        changes: Fields,
        change_description: Option<&str>,
    ) -> Result<Record> {
        let current = self
            .base
            .find_by_id(id)
            .await?
            .ok_or_else(|| missing_document(id))?;

        let mut snapshot = Fields::new();
        snapshot.insert("document_id".into(), Value::from(id));
        snapshot.insert("version".into(), Value::from(current.version + 1));
        for field in ["title", "content"] {
            snapshot.insert(
                field.into(),
                current.get(field).cloned().unwrap_or(Value::Null),
            );
        }
        snapshot.insert(
            "change_description".into(),
            change_description.map(Value::from).unwrap_or(Value::Null),
        );

        let outcomes = self
            .base
            .transaction(vec![
                WriteOp::Create {
                    entity_type: EntityType::document_version(),
                    id: RecordId::new(),
                    fields: snapshot,
                },
                WriteOp::Update {
                    entity_type: EntityType::document(),
                    id,
                    fields: changes,
                    expected_version: Some(current.version),
                },
            ])
            .await?;

        outcomes
            .into_iter()
            .nth(1)
            .and_then(WriteOutcome::into_record)
            .ok_or_else(|| missing_document(id))
    }
}

// =============================================================================
// Tests
// =============================================================================
