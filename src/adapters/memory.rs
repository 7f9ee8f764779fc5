//! In-Memory Persistence Adapter
//!
//! Reference implementation of the `Persistence` port backed by hash maps.
//! Used by the test suite and by the binary's `--in-memory` mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{
    EntityType, Fields, Filter, Persistence, QueryOptions, Record, RecordId, WriteOp, WriteOutcome,
};
use crate::error::{Error, Result};

type Tables = HashMap<EntityType, BTreeMap<RecordId, Record>>;

/// Thread-safe in-memory store.
///
/// Transactions run against a staged copy of the tables and replace them
/// only if every write succeeds.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    operations: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of port calls served, including failed ones.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Make every subsequent call fail with a persistence error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of stored records of `entity_type`.
    pub fn count(&self, entity_type: &EntityType) -> usize {
        self.tables
            .read()
            .get(entity_type)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    fn begin(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::Persistence("in-memory store unavailable".into()));
        }
        Ok(())
    }
}

fn apply_op(tables: &mut Tables, op: WriteOp) -> Result<WriteOutcome> {
    match op {
        WriteOp::Create {
            entity_type,
            id,
            fields,
        } => {
            let table = tables.entry(entity_type.clone()).or_default();
            if table.contains_key(&id) {
                return Err(Error::Persistence(format!(
                    "duplicate {} id {}",
                    entity_type, id
                )));
            }
            let record = Record::new(entity_type, id, fields);
            table.insert(id, record.clone());
            Ok(WriteOutcome::Created(record))
        }
        WriteOp::Update {
            entity_type,
            id,
            fields,
            expected_version,
        } => {
            let existing = tables.get_mut(&entity_type).and_then(|t| t.get_mut(&id));
            match (existing, expected_version) {
                (None, Some(_)) => Err(Error::RecordNotFound {
                    entity_type: entity_type.to_string(),
                    id: id.to_string(),
                }),
                (None, None) => Ok(WriteOutcome::Updated(None)),
                (Some(record), Some(expected)) if record.version != expected => {
                    Err(Error::VersionConflict {
                        entity_type: entity_type.to_string(),
                        id: id.to_string(),
                        expected,
                        actual: record.version,
                    })
                }
                (Some(record), _) => {
                    record.apply(fields);
                    Ok(WriteOutcome::Updated(Some(record.clone())))
                }
            }
        }
        WriteOp::Delete { entity_type, id } => {
            let removed = tables
                .get_mut(&entity_type)
                .map(|t| t.remove(&id).is_some())
                .unwrap_or(false);
            Ok(WriteOutcome::Deleted(removed))
        }
    }
}

#[async_trait]
impl Persistence for InMemoryStore {
    async fn create(&self, entity_type: &EntityType, fields: Fields) -> Result<Record> {
        self.begin()?;
        let op = WriteOp::Create {
            entity_type: entity_type.clone(),
            id: RecordId::new(),
            fields,
        };
        let outcome = apply_op(&mut self.tables.write(), op)?;
        outcome
            .into_record()
            .ok_or_else(|| Error::Internal("create produced no record".into()))
    }

    async fn find_by_id(&self, entity_type: &EntityType, id: RecordId) -> Result<Option<Record>> {
        self.begin()?;
        Ok(self
            .tables
            .read()
            .get(entity_type)
            .and_then(|t| t.get(&id))
            .cloned())
    }

    async fn find_many(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.begin()?;
        let matched: Vec<Record> = self
            .tables
            .read()
            .get(entity_type)
            .map(|t| t.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        Ok(options.apply(matched))
    }

    async fn update(
        &self,
        entity_type: &EntityType,
        id: RecordId,
        fields: Fields,
    ) -> Result<Option<Record>> {
        self.begin()?;
        let op = WriteOp::Update {
            entity_type: entity_type.clone(),
            id,
            fields,
            expected_version: None,
        };
        Ok(apply_op(&mut self.tables.write(), op)?.into_record())
    }

    async fn delete(&self, entity_type: &EntityType, id: RecordId) -> Result<bool> {
        self.begin()?;
        let op = WriteOp::Delete {
            entity_type: entity_type.clone(),
            id,
        };
        match apply_op(&mut self.tables.write(), op)? {
            WriteOutcome::Deleted(removed) => Ok(removed),
            _ => Err(Error::Internal("delete produced no outcome".into())),
        }
    }

    async fn run_in_transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        self.begin()?;
        let mut tables = self.tables.write();
        let mut staged = tables.clone();

        let count = ops.len();
        let outcomes = ops
            .into_iter()
            .map(|op| apply_op(&mut staged, op))
            .collect::<Result<Vec<_>>>()?;

        *tables = staged;
        debug!(ops = count, "Committed in-memory transaction");
        Ok(outcomes)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::Relaxed))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SortDirection;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_find_many_orders_by_creation_time() {
        let store = InMemoryStore::new();
        let topic = EntityType::topic();
        let mut created = Vec::new();
        for i in 0..5 {
            let rec = store.create(&topic, fields(json!({"name": i}))).await.unwrap();
            created.push(rec.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let newest_first = store
            .find_many(
                &topic,
                &Filter::new(),
                &QueryOptions::new().order_by("created_at", SortDirection::Desc),
            )
            .await
            .unwrap();
        created.reverse();
        assert_eq!(newest_first.iter().map(|r| r.id).collect::<Vec<_>>(), created);
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = InMemoryStore::new();
        let topic = EntityType::topic();
        let created = store.create(&topic, fields(json!({"name": "a"}))).await.unwrap();
        assert_eq!(created.version, 1);

        let updated = store
            .update(&topic, created.id, fields(json!({"name": "b"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.get_str("name"), Some("b"));

        assert!(store
            .update(&topic, RecordId::new(), Fields::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_transaction_is_atomic() {
        let store = InMemoryStore::new();
        let doc = EntityType::document();
        let created = store.create(&doc, fields(json!({"title": "a"}))).await.unwrap();

        let ops = vec![
            WriteOp::Create {
                entity_type: EntityType::summary(),
                id: RecordId::new(),
                fields: Fields::new(),
            },
            WriteOp::Update {
                entity_type: doc.clone(),
                id: created.id,
                fields: fields(json!({"title": "b"})),
                expected_version: Some(7),
            },
        ];
        let result = store.run_in_transaction(ops).await;
        assert_matches!(
            result,
            Err(Error::VersionConflict {
                expected: 7,
                actual: 1,
                ..
            })
        );

        // Nothing from the failed transaction is visible
        assert_eq!(store.count(&EntityType::summary()), 0);
        let current = store.find_by_id(&doc, created.id).await.unwrap().unwrap();
        assert_eq!(current.get_str("title"), Some("a"));
    }

    #[tokio::test]
    async fn test_versioned_update_of_missing_record() {
        let store = InMemoryStore::new();
        let ops = vec![WriteOp::Update {
            entity_type: EntityType::document(),
            id: RecordId::new(),
            fields: Fields::new(),
            expected_version: Some(1),
        }];
        assert_matches!(
            store.run_in_transaction(ops).await,
            Err(Error::RecordNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_find_many_applies_options() {
        let store = InMemoryStore::new();
        let topic = EntityType::topic();
        for rank in [3, 1, 2] {
            store
                .create(&topic, fields(json!({"rank": rank, "kind": "x"})))
                .await
                .unwrap();
        }

        let options = QueryOptions::new()
            .order_by("rank", crate::domain::SortDirection::Desc)
            .limit(2);
        let found = store
            .find_many(&topic, &Filter::new().eq("kind", "x"), &options)
            .await
            .unwrap();
        let ranks: Vec<_> = found.iter().filter_map(|r| r.get("rank")).cloned().collect();
        assert_eq!(ranks, vec![json!(3), json!(2)]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);

        let err = store.find_by_id(&EntityType::user(), RecordId::new()).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(!store.health_check().await.unwrap());
        assert_eq!(store.operation_count(), 1);
    }
}
