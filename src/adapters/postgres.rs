//! PostgreSQL Persistence Adapter
//!
//! Implements the `Persistence` port over a single JSONB table:
//!
//! ```text
//! entity_records
//! ┌─────────────┬──────┬────────────┬─────────┬────────────┬────────────┐
//! │ entity_type │  id  │ data JSONB │ version │ created_at │ updated_at │
//! └─────────────┴──────┴────────────┴─────────┴────────────┴────────────┘
//!   primary key (entity_type, id), GIN index on data
//! ```
//!
//! Equality filters use JSONB containment (`data @> $n`), text search uses
//! `ILIKE` on `data ->> field`. Field names only reach SQL text after
//! validation; all values are bound.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    EntityType, Fields, Filter, Persistence, QueryOptions, Record, RecordId, SortDirection,
    WriteOp, WriteOutcome, RECORD_COLUMNS,
};
use crate::error::{Error, Result};

const COLUMNS: &str = "entity_type, id, data, version, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the records table and its index if they do not exist.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_records (
                entity_type TEXT NOT NULL,
                id UUID NOT NULL,
                data JSONB NOT NULL DEFAULT '{}'::jsonb,
                version BIGINT NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (entity_type, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS entity_records_data_idx ON entity_records USING GIN (data)",
        )
        .execute(&self.pool)
        .await?;

        debug!("entity_records schema ready");
        Ok(())
    }
}

/// Field names are restricted to identifier characters.
fn validate_field(field: &str) -> Result<&str> {
    let valid = !field.is_empty()
        && field.len() <= 63
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(field)
    } else {
        Err(Error::InvalidQuery(format!("invalid field name: {:?}", field)))
    }
}

/// Escape LIKE wildcards so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn record_from_row(row: &PgRow) -> Result<Record> {
    let Json(data): Json<Value> = row.try_get("data")?;
    let fields = match data {
        Value::Object(map) => map,
        other => {
            return Err(Error::Persistence(format!(
                "record data is not an object: {}",
                other
            )))
        }
    };
    let entity_type: String = row.try_get("entity_type")?;
    let id: Uuid = row.try_get("id")?;

    Ok(Record {
        id: RecordId(id),
        entity_type: EntityType::new(entity_type),
        fields,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn build_select<'a>(
    entity_type: &'a EntityType,
    filter: &'a Filter,
    options: &'a QueryOptions,
) -> Result<QueryBuilder<'a, Postgres>> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM entity_records WHERE entity_type = ", COLUMNS));
    qb.push_bind(entity_type.as_str());

    if !filter.equals.is_empty() {
        let contained: Fields = filter
            .equals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        qb.push(" AND data @> ");
        qb.push_bind(Json(Value::Object(contained)));
    }

    if let Some(search) = &filter.text_search {
        if search.fields.is_empty() {
            return Err(Error::InvalidQuery("text search needs at least one field".into()));
        }
        let pattern = like_pattern(&search.needle);
        qb.push(" AND (");
        for (i, field) in search.fields.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("data ->> '{}' ILIKE ", validate_field(field)?));
            qb.push_bind(pattern.clone());
        }
        qb.push(")");
    }

    if !options.order_by.is_empty() {
        qb.push(" ORDER BY ");
        for (i, order) in options.order_by.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            let field = validate_field(&order.field)?;
            if RECORD_COLUMNS.contains(&field) {
                qb.push(field);
            } else {
                qb.push(format!("data -> '{}'", field));
            }
            qb.push(match order.direction {
                SortDirection::Asc => " ASC NULLS FIRST",
                SortDirection::Desc => " DESC NULLS LAST",
            });
        }
    }

    if let Some(limit) = options.limit {
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);
    }
    if let Some(offset) = options.offset {
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);
    }

    Ok(qb)
}

async fn apply_op(conn: &mut PgConnection, op: WriteOp) -> Result<WriteOutcome> {
    match op {
        WriteOp::Create {
            entity_type,
            id,
            fields,
        } => {
            let row = sqlx::query(&format!(
                "INSERT INTO entity_records (entity_type, id, data) VALUES ($1, $2, $3) RETURNING {}",
                COLUMNS
            ))
            .bind(entity_type.as_str())
            .bind(id.as_uuid())
            .bind(Json(Value::Object(fields)))
            .fetch_one(&mut *conn)
            .await?;
            Ok(WriteOutcome::Created(record_from_row(&row)?))
        }
        WriteOp::Update {
            entity_type,
            id,
            fields,
            expected_version,
        } => {
            if let Some(expected) = expected_version {
                let current: Option<i64> = sqlx::query_scalar(
                    "SELECT version FROM entity_records WHERE entity_type = $1 AND id = $2 FOR UPDATE",
                )
                .bind(entity_type.as_str())
                .bind(id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?;

                match current {
                    None => {
                        return Err(Error::RecordNotFound {
                            entity_type: entity_type.to_string(),
                            id: id.to_string(),
                        })
                    }
                    Some(actual) if actual != expected => {
                        return Err(Error::VersionConflict {
                            entity_type: entity_type.to_string(),
                            id: id.to_string(),
                            expected,
                            actual,
                        })
                    }
                    Some(_) => {}
                }
            }

            let row = sqlx::query(&format!(
                r#"
                UPDATE entity_records
                SET data = data || $3, version = version + 1, updated_at = now()
                WHERE entity_type = $1 AND id = $2
                RETURNING {}
                "#,
                COLUMNS
            ))
            .bind(entity_type.as_str())
            .bind(id.as_uuid())
            .bind(Json(Value::Object(fields)))
            .fetch_optional(&mut *conn)
            .await?;
            Ok(WriteOutcome::Updated(
                row.as_ref().map(record_from_row).transpose()?,
            ))
        }
        WriteOp::Delete { entity_type, id } => {
            let result = sqlx::query("DELETE FROM entity_records WHERE entity_type = $1 AND id = $2")
                .bind(entity_type.as_str())
                .bind(id.as_uuid())
                .execute(&mut *conn)
                .await?;
            Ok(WriteOutcome::Deleted(result.rows_affected() > 0))
        }
    }
}

#[async_trait]
impl Persistence for PgStore {
    #[instrument(skip(self, fields), fields(entity_type = %entity_type))]
    async fn create(&self, entity_type: &EntityType, fields: Fields) -> Result<Record> {
        let mut conn = self.pool.acquire().await?;
        let op = WriteOp::Create {
            entity_type: entity_type.clone(),
            id: RecordId::new(),
            fields,
        };
        apply_op(&mut conn, op)
            .await?
            .into_record()
            .ok_or_else(|| Error::Internal("insert returned no row".into()))
    }

    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn find_by_id(&self, entity_type: &EntityType, id: RecordId) -> Result<Option<Record>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM entity_records WHERE entity_type = $1 AND id = $2",
            COLUMNS
        ))
        .bind(entity_type.as_str())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self, filter, options), fields(entity_type = %entity_type))]
    async fn find_many(
        &self,
        entity_type: &EntityType,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let mut qb = build_select(entity_type, filter, options)?;
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self, fields), fields(entity_type = %entity_type))]
    async fn update(
        &self,
        entity_type: &EntityType,
        id: RecordId,
        fields: Fields,
    ) -> Result<Option<Record>> {
        let mut conn = self.pool.acquire().await?;
        let op = WriteOp::Update {
            entity_type: entity_type.clone(),
            id,
            fields,
            expected_version: None,
        };
        Ok(apply_op(&mut conn, op).await?.into_record())
    }

    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn delete(&self, entity_type: &EntityType, id: RecordId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let op = WriteOp::Delete {
            entity_type: entity_type.clone(),
            id,
        };
        match apply_op(&mut conn, op).await? {
            WriteOutcome::Deleted(removed) => Ok(removed),
            _ => Err(Error::Internal("delete produced no outcome".into())),
        }
    }

    #[instrument(skip(self, ops), fields(ops = ops.len()))]
    async fn run_in_transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(ops.len());
        for op in ops {
            // Dropping `tx` on error rolls back
            outcomes.push(apply_op(&mut tx, op).await?);
        }
        tx.commit().await?;
        Ok(outcomes)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_field() {
        assert!(validate_field("org_id").is_ok());
        assert!(validate_field("title2").is_ok());
        assert!(validate_field("").is_err());
        assert!(validate_field("title'; DROP TABLE x; --").is_err());
        assert!(validate_field("a-b").is_err());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("db"), "%db%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_select_sql() {
        let entity = EntityType::document();
        let filter = Filter::new().eq("status", "draft").text(&["title", "content"], "rust");
        let options = QueryOptions::new()
            .order_by("created_at", SortDirection::Desc)
            .order_by("title", SortDirection::Asc)
            .limit(10)
            .offset(20);

        let qb = build_select(&entity, &filter, &options).unwrap();
        let sql = qb.sql();
        assert!(sql.contains("entity_type = $1"));
        assert!(sql.contains("data @> $2"));
        assert!(sql.contains("data ->> 'title' ILIKE $3 OR data ->> 'content' ILIKE $4"));
        assert!(sql.contains("ORDER BY created_at DESC NULLS LAST, data -> 'title' ASC NULLS FIRST"));
        assert!(sql.ends_with("LIMIT $5 OFFSET $6"));
    }

    #[test]
    fn test_select_rejects_bad_order_field() {
        let entity = EntityType::document();
        let options = QueryOptions::new().order_by("title desc; --", SortDirection::Asc);
        assert!(matches!(
            build_select(&entity, &Filter::new(), &options),
            Err(Error::InvalidQuery(_))
        ));
    }
}
