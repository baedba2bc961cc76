//! Generic resource handler factory.
//!
//! The five CRUD operations are written once, parameterized by a
//! [`Resource`] descriptor, and work identically for tours, users, reviews
//! and bookings; no per-type conditionals live here. Each resource
//! declares its table, its API-field whitelist, a fixed set of read-scope
//! predicates (soft-delete and secret filtering made explicit, rather than
//! ambient query hooks), and a `hydrate` step performing read-time
//! reference expansion.

use async_trait::async_trait;
use axum::response::Response;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;

use crate::api::error::ApiError;
use crate::api::respond;
use crate::db::DbPool;
use crate::query::{project_fields, BindValue, QueryFeatures};

/// Descriptor for a CRUD-managed entity type.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    const TABLE: &'static str;
    /// API field name -> column, the whitelist for filtering and sorting
    const FIELD_MAP: &'static [(&'static str, &'static str)];
    /// Fixed predicates applied to every read path
    const READ_SCOPE: &'static [&'static str] = &[];

    /// Flat database row
    type Row: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin;
    /// Serialized read model, produced by `hydrate`
    type Out: Serialize + Send;
    type Create: DeserializeOwned + Send;
    type Update: DeserializeOwned + Send;

    /// Validate and persist a new record.
    async fn insert(pool: &DbPool, body: Self::Create) -> Result<Self::Row, ApiError>;

    /// Merge request-body fields over the fetched row and persist.
    async fn apply_update(
        pool: &DbPool,
        row: Self::Row,
        body: Self::Update,
    ) -> Result<Self::Row, ApiError>;

    /// Read-time pipeline: expand references, compute projections.
    /// Must preserve row order.
    async fn hydrate(pool: &DbPool, rows: Vec<Self::Row>) -> Result<Vec<Self::Out>, ApiError>;

    /// Extra population applied only to single-record reads
    /// (e.g. a tour's reverse-referenced reviews).
    async fn decorate_one(_pool: &DbPool, _out: &mut Self::Out) -> Result<(), ApiError> {
        Ok(())
    }

    /// Fired after insert and update (e.g. rating recompute).
    async fn after_write(_pool: &DbPool, _row: &Self::Row) -> Result<(), ApiError> {
        Ok(())
    }

    /// Fired after a successful delete.
    async fn after_delete(_pool: &DbPool, _row: &Self::Row) -> Result<(), ApiError> {
        Ok(())
    }

    /// Fetch one row by id, under the resource's read scope.
    async fn fetch(pool: &DbPool, id: &str) -> Result<Option<Self::Row>, ApiError> {
        let mut sql = format!("SELECT * FROM {} WHERE id = ?", Self::TABLE);
        for predicate in Self::READ_SCOPE {
            sql.push_str(" AND ");
            sql.push_str(predicate);
        }
        let row = sqlx::query_as::<_, Self::Row>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Delete by id, returning the removed row. Default is a hard delete;
    /// soft-deleting resources (users) override this.
    async fn remove(pool: &DbPool, id: &str) -> Result<Option<Self::Row>, ApiError> {
        let Some(row) = Self::fetch(pool, id).await? else {
            return Ok(None);
        };
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", Self::TABLE))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(Some(row))
    }
}

fn bind_all<'q, R>(
    mut query: sqlx::query::QueryAs<'q, sqlx::Sqlite, R, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, R, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            BindValue::Num(n) => query.bind(*n),
            BindValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

/// Insert a record from the request body; 201 with the created record.
pub async fn create_one<R: Resource>(pool: &DbPool, body: R::Create) -> Result<Response, ApiError> {
    let row = R::insert(pool, body).await?;
    R::after_write(pool, &row).await?;
    let out = hydrate_one::<R>(pool, row).await?;
    Ok(respond::created(out))
}

/// Fetch by id; 404 when absent.
pub async fn get_one<R: Resource>(pool: &DbPool, id: &str) -> Result<Response, ApiError> {
    let row = R::fetch(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("No document found with this ID"))?;
    let mut out = hydrate_one::<R>(pool, row).await?;
    R::decorate_one(pool, &mut out).await?;
    Ok(respond::success(out))
}

/// Merge request-body fields into the record; 404 when absent.
pub async fn update_one<R: Resource>(
    pool: &DbPool,
    id: &str,
    body: R::Update,
) -> Result<Response, ApiError> {
    let row = R::fetch(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("No document found with this ID"))?;
    let row = R::apply_update(pool, row, body).await?;
    R::after_write(pool, &row).await?;
    let out = hydrate_one::<R>(pool, row).await?;
    Ok(respond::success(out))
}

/// Remove by id; 404 when absent, 204 with empty body on success.
pub async fn delete_one<R: Resource>(pool: &DbPool, id: &str) -> Result<Response, ApiError> {
    let row = R::remove(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("No document found with this ID"))?;
    R::after_delete(pool, &row).await?;
    Ok(respond::no_content())
}

/// List, optionally scoped to a parent resource (nested collections),
/// applying the query feature builder; 200 with count and list.
pub async fn get_all<R: Resource>(
    pool: &DbPool,
    params: &HashMap<String, String>,
    parent: Option<(&str, &str)>,
) -> Result<Response, ApiError> {
    let features = QueryFeatures::parse(params, R::FIELD_MAP);
    let (sql, binds) = features.build_select(R::TABLE, R::READ_SCOPE, parent);

    let query = bind_all(sqlx::query_as::<_, R::Row>(&sql), &binds);
    let rows = query.fetch_all(pool).await?;

    let outs = R::hydrate(pool, rows).await?;
    let mut values = Vec::with_capacity(outs.len());
    for out in &outs {
        let mut value = serde_json::to_value(out)
            .map_err(|e| ApiError::internal("Serialization failed").with_detail(e.to_string()))?;
        if let Some(fields) = &features.fields {
            project_fields(&mut value, fields);
        }
        values.push(value);
    }

    Ok(respond::success_list(values.len(), values))
}

async fn hydrate_one<R: Resource>(pool: &DbPool, row: R::Row) -> Result<R::Out, ApiError> {
    let mut outs = R::hydrate(pool, vec![row]).await?;
    outs
        .pop()
        .ok_or_else(|| ApiError::internal("Hydration dropped a record"))
}
