//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the repository layer depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! persistence and authorization backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Repository Layer                          │
//! │   (caching, metrics, access checks around CRUD calls)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Ports (Traits)                         │
//! │        Persistence            │        AccessControl         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Adapters (Implementations)                │
//! │   PgStore │ InMemoryStore │ AllowAllAccess │ Auditor         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Column values of a record, keyed by field name.
pub type Fields = serde_json::Map<String, Value>;

// =============================================================================
// Value Objects
// =============================================================================

/// Entity type identifier (value object).
///
/// Used as the registration key for repositories and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn organization() -> Self {
        Self::new("organization")
    }

    pub fn user() -> Self {
        Self::new("user")
    }

    pub fn document() -> Self {
        Self::new("document")
    }

    pub fn document_version() -> Self {
        Self::new("document_version")
    }

    pub fn summary() -> Self {
        Self::new("summary")
    }

    pub fn topic() -> Self {
        Self::new("topic")
    }

    pub fn document_topic() -> Self {
        Self::new("document_topic")
    }

    pub fn graph_entity() -> Self {
        Self::new("graph_entity")
    }

    pub fn graph_relationship() -> Self {
        Self::new("graph_relationship")
    }

    pub fn collection() -> Self {
        Self::new("collection")
    }

    pub fn security_role() -> Self {
        Self::new("security_role")
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Record identifier (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidQuery(format!("invalid record id '{}': {}", s, e)))
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::String(id.0.to_string())
    }
}

/// A persisted row of some entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub entity_type: EntityType,
    pub fields: Fields,
    /// Incremented by the persistence backend on every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a fresh record at version 1.
    pub fn new(entity_type: EntityType, id: RecordId, fields: Fields) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type,
            fields,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Get a field holding a record identifier.
    pub fn get_id(&self, field: &str) -> Option<RecordId> {
        self.get_str(field).and_then(|s| s.parse().ok())
    }

    /// Merge `fields` into the record and bump its version.
    pub fn apply(&mut self, fields: Fields) {
        for (key, value) in fields {
            self.fields.insert(key, value);
        }
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Query Types
// =============================================================================

/// Case-insensitive substring match over one or more text fields (ORed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearch {
    pub fields: Vec<String>,
    pub needle: String,
}

impl TextSearch {
    pub fn matches(&self, record: &Record) -> bool {
        let needle = self.needle.to_lowercase();
        self.fields.iter().any(|field| {
            record
                .get_str(field)
                .map(|value| value.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    }
}

/// Record filter: field equality plus an optional text search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub equals: BTreeMap<String, Value>,
    pub text_search: Option<TextSearch>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Require `needle` to appear in any of `fields`.
    pub fn text(mut self, fields: &[&str], needle: impl Into<String>) -> Self {
        self.text_search = Some(TextSearch {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            needle: needle.into(),
        });
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        let equal = self
            .equals
            .iter()
            .all(|(field, value)| record.fields.get(field) == Some(value));
        equal && self.text_search.as_ref().map_or(true, |s| s.matches(record))
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Pagination and ordering options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub order_by: Vec<OrderBy>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sort and paginate records in memory.
    pub fn apply(&self, mut records: Vec<Record>) -> Vec<Record> {
        if !self.order_by.is_empty() {
            records.sort_by(|a, b| {
                for order in &self.order_by {
                    let ord = compare_by_field(a, b, &order.field);
                    let ord = match order.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = self.offset.unwrap_or(0);
        let iter = records.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// Record columns that order by the record itself rather than by `fields`.
pub const RECORD_COLUMNS: &[&str] = &["id", "version", "created_at", "updated_at"];

fn compare_by_field(a: &Record, b: &Record, field: &str) -> Ordering {
    match field {
        "id" => a.id.cmp(&b.id),
        "version" => a.version.cmp(&b.version),
        "created_at" => a.created_at.cmp(&b.created_at),
        "updated_at" => a.updated_at.cmp(&b.updated_at),
        _ => compare_values(a.get(field), b.get(field)),
    }
}

/// Total order over optional JSON scalars (missing and null sort first).
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// A single write inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create {
        entity_type: EntityType,
        id: RecordId,
        fields: Fields,
    },
    Update {
        entity_type: EntityType,
        id: RecordId,
        fields: Fields,
        /// Fail with `VersionConflict` unless the stored version matches.
        expected_version: Option<i64>,
    },
    Delete {
        entity_type: EntityType,
        id: RecordId,
    },
}

impl WriteOp {
    pub fn entity_type(&self) -> &EntityType {
        match self {
            WriteOp::Create { entity_type, .. }
            | WriteOp::Update { entity_type, .. }
            | WriteOp::Delete { entity_type, .. } => entity_type,
        }
    }
}

/// Result of a single write inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Created(Record),
    Updated(Option<Record>),
    Deleted(bool),
}

impl WriteOutcome {
    /// The record produced by a create or update, if any.
    pub fn into_record(self) -> Option<Record> {
        match self {
            WriteOutcome::Created(record) => Some(record),
            WriteOutcome::Updated(record) => record,
            WriteOutcome::Deleted(_) => None,
        }
    }
}

// =============================================================================
// Persistence Port
// =============================================================================

/// Port for the relational store.
///
/// Implementations own transaction and durability guarantees; the repository
/// layer treats every error they return as opaque and propagates it.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert a new record with a generated identifier.
    async fn create(&self, entity_type: &EntityType, fields: Fields) -> Result<Record>;

    /// Find a record by identifier.
    async fn find_by_id(&self, entity_type: &EntityType, id: RecordId) -> Result<Option<Record>>;

    /// Find all records matching a filter.
    async fn find_many(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Record>>;

    /// Merge fields into an existing record. Returns `None` if absent.
    async fn update(
        &self,
        entity_type: &EntityType,
        id: RecordId,
        fields: Fields,
    ) -> Result<Option<Record>>;

    /// Delete a record. Returns whether a record was removed.
    async fn delete(&self, entity_type: &EntityType, id: RecordId) -> Result<bool>;

    /// Apply all writes atomically, or none of them.
    async fn run_in_transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>>;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// Access Control Port
// =============================================================================

/// Operation kind checked by access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Read => write!(f, "read"),
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// Caller identity attached to secured repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessContext {
    pub user_id: RecordId,
    pub org_id: RecordId,
}

impl AccessContext {
    pub fn new(user_id: RecordId, org_id: RecordId) -> Self {
        Self { user_id, org_id }
    }
}

/// Port for the authorization and audit collaborator.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Decide whether the caller may perform `action` on `resource`.
    async fn authorize(
        &self,
        ctx: &AccessContext,
        resource: &EntityType,
        action: Action,
    ) -> Result<bool>;

    /// Record an access for audit.
    async fn log_access(
        &self,
        ctx: &AccessContext,
        action: Action,
        resource: &EntityType,
        resource_id: Option<RecordId>,
    );
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: Value) -> Record {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        Record::new(EntityType::document(), RecordId::new(), fields)
    }

    #[test]
    fn test_entity_type() {
        let entity = EntityType::new("document");
        assert_eq!(entity, EntityType::document());
        assert_eq!(entity.as_str(), "document");
        assert_eq!(entity.to_string(), "document");
    }

    #[test]
    fn test_record_id_roundtrip_through_str() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_record_apply_bumps_version() {
        let mut rec = record(json!({"title": "a", "status": "draft"}));
        assert_eq!(rec.version, 1);

        let mut changes = Fields::new();
        changes.insert("status".into(), json!("published"));
        rec.apply(changes);

        assert_eq!(rec.version, 2);
        assert_eq!(rec.get_str("status"), Some("published"));
        assert_eq!(rec.get_str("title"), Some("a"));
    }

    #[test]
    fn test_filter_equality() {
        let org = RecordId::new();
        let rec = record(json!({"org_id": org.to_string(), "status": "draft"}));

        assert!(Filter::new().eq("org_id", org).matches(&rec));
        assert!(Filter::new()
            .eq("org_id", org)
            .eq("status", "draft")
            .matches(&rec));
        assert!(!Filter::new().eq("status", "published").matches(&rec));
        assert!(!Filter::new().eq("missing", "x").matches(&rec));
    }

    #[test]
    fn test_filter_text_search_is_case_insensitive() {
        let rec = record(json!({"title": "Quarterly Report", "content": "numbers"}));

        assert!(Filter::new()
            .text(&["title", "content"], "quarterly")
            .matches(&rec));
        assert!(Filter::new().text(&["title", "content"], "NUMB").matches(&rec));
        assert!(!Filter::new().text(&["title"], "numbers").matches(&rec));
    }

    #[test]
    fn test_query_options_sort_and_paginate() {
        let records: Vec<Record> = (0..5)
            .map(|i| record(json!({"rank": i, "name": format!("n{}", i)})))
            .collect();

        let options = QueryOptions::new()
            .order_by("rank", SortDirection::Desc)
            .offset(1)
            .limit(2);
        let result = options.apply(records);

        let ranks: Vec<i64> = result
            .iter()
            .map(|r| r.get("rank").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(ranks, vec![3, 2]);
    }

    #[test]
    fn test_orders_by_record_columns() {
        let base = Utc::now();
        let records: Vec<Record> = (0..5)
            .map(|i| {
                let mut rec = record(json!({"created_at": "shadowed"}));
                rec.created_at = base + chrono::Duration::milliseconds(i * 2);
                rec.version = 5 - i;
                rec
            })
            .collect();
        let newest_first: Vec<RecordId> = records.iter().rev().map(|r| r.id).collect();

        let result = QueryOptions::new()
            .order_by("created_at", SortDirection::Desc)
            .apply(records.clone());
        assert_eq!(result.iter().map(|r| r.id).collect::<Vec<_>>(), newest_first);

        let by_version = QueryOptions::new()
            .order_by("version", SortDirection::Asc)
            .apply(records.clone());
        assert_eq!(by_version.iter().map(|r| r.id).collect::<Vec<_>>(), newest_first);

        let mut by_id: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        by_id.sort();
        let result = QueryOptions::new().order_by("id", SortDirection::Asc).apply(records);
        assert_eq!(result.iter().map(|r| r.id).collect::<Vec<_>>(), by_id);
    }

    #[test]
    fn test_missing_fields_sort_first() {
        let with = record(json!({"rank": 1}));
        let without = record(json!({}));
        let result = QueryOptions::new()
            .order_by("rank", SortDirection::Asc)
            .apply(vec![with.clone(), without.clone()]);
        assert_eq!(result[0].id, without.id);
        assert_eq!(result[1].id, with.id);
    }

    #[test]
    fn test_write_outcome_into_record() {
        let rec = record(json!({}));
        assert_eq!(
            WriteOutcome::Created(rec.clone()).into_record(),
            Some(rec.clone())
        );
        assert_eq!(WriteOutcome::Updated(None).into_record(), None);
        assert_eq!(WriteOutcome::Deleted(true).into_record(), None);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Create.to_string(), "create");
        assert_eq!(Action::Delete.to_string(), "delete");
    }
}
