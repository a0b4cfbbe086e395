//! Fluent query builder over a model type (§6 "Repository layer"),
//! grounded on `original_source/framework/include/blaze/repository.h`'s
//! `where`/`order_by`/`limit`/`offset`/`all`/`first` chain. This crate
//! targets SQL backends, so the builder renders parameterized Postgres/
//! MySQL placeholders rather than reflecting over a schema at runtime.

use super::{
    pool::{DbError, Pool, PoolConnection},
    result::{Cell, DbResult, FromRow},
};
use std::{marker::PhantomData, sync::Arc};

/// A fluent, immutable query builder for `T` (§6). Each method returns a
/// new builder; build one up, then call [`Repository::all`],
/// [`Repository::first`] or [`Repository::count`] to execute it.
pub struct Repository<C: PoolConnection, T: FromRow> {
    table: &'static str,
    conditions: Vec<(String, Cell)>,
    order_by: Option<(&'static str, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    _model: PhantomData<fn() -> (C, T)>,
}

/// How a repository executes its built query against a connection (§6
/// `save`/`update`/`remove`/`count`). Implemented per driver so the
/// parameter-placeholder syntax (`$1` vs `?`) and row decoding stay
/// driver-specific while the builder above stays generic.
pub trait RepositoryBackend<T: FromRow>: PoolConnection {
    fn select(
        &mut self,
        table: &str,
        conditions: &[(String, Cell)],
        order_by: Option<(&str, bool)>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> crate::pipeline::BoxFuture<'_, Result<Vec<T>, DbError>>;

    fn count(
        &mut self,
        table: &str,
        conditions: &[(String, Cell)],
    ) -> crate::pipeline::BoxFuture<'_, Result<u64, DbError>>;

    fn insert(&mut self, table: &str, values: &[(&str, Cell)]) -> crate::pipeline::BoxFuture<'_, Result<Cell, DbError>>;

    fn update_by_id(
        &mut self,
        table: &str,
        id: &Cell,
        values: &[(&str, Cell)],
    ) -> crate::pipeline::BoxFuture<'_, Result<(), DbError>>;

    fn delete_by_id(&mut self, table: &str, id: &Cell) -> crate::pipeline::BoxFuture<'_, Result<(), DbError>>;
}

impl<C, T> Repository<C, T>
where
    C: RepositoryBackend<T>,
    T: FromRow + Send + 'static,
{
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            conditions: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
            _model: PhantomData,
        }
    }

    /// Adds an equality condition, ANDed with any others (§6 `where`).
    pub fn where_eq(mut self, column: &str, value: impl Into<Cell>) -> Self {
        self.conditions.push((column.to_string(), value.into()));
        self
    }

    /// Orders results by `column`, ascending unless `descending` is set
    /// (§6 `order_by`).
    pub fn order_by(mut self, column: &'static str, descending: bool) -> Self {
        self.order_by = Some((column, descending));
        self
    }

    /// Caps the number of returned rows (§6 `limit`).
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skips the first `n` matching rows (§6 `offset`).
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Runs the built query, returning every matching row as `T` (§6 `all`).
    pub async fn all(&self, pool: &Arc<Pool<C>>) -> DbResult<Vec<T>> {
        let mut lease = pool.acquire().await?;
        lease
            .select(self.table, &self.conditions, self.order_by, self.limit, self.offset)
            .await
            .map_err(Into::into)
    }

    /// Runs the built query, returning the first matching row, if any
    /// (§6 `first`/`find`).
    pub async fn first(&self, pool: &Arc<Pool<C>>) -> DbResult<Option<T>> {
        let mut lease = pool.acquire().await?;
        let rows = lease
            .select(self.table, &self.conditions, self.order_by, Some(1), self.offset)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Counts matching rows without fetching them (§6 `count`).
    pub async fn count(&self, pool: &Arc<Pool<C>>) -> DbResult<u64> {
        let mut lease = pool.acquire().await?;
        lease.count(self.table, &self.conditions).await.map_err(Into::into)
    }

    /// Inserts a new row (§6 `save`). Returns the generated primary key.
    pub async fn save(pool: &Arc<Pool<C>>, table: &'static str, values: &[(&str, Cell)]) -> DbResult<Cell> {
        let mut lease = pool.acquire().await?;
        lease.insert(table, values).await.map_err(Into::into)
    }

    /// Updates the row identified by `id` (§6 `update`).
    pub async fn update(pool: &Arc<Pool<C>>, table: &'static str, id: Cell, values: &[(&str, Cell)]) -> DbResult<()> {
        let mut lease = pool.acquire().await?;
        lease.update_by_id(table, &id, values).await.map_err(Into::into)
    }

    /// Deletes the row identified by `id` (§6 `remove`).
    pub async fn remove(pool: &Arc<Pool<C>>, table: &'static str, id: Cell) -> DbResult<()> {
        let mut lease = pool.acquire().await?;
        lease.delete_by_id(table, &id).await.map_err(Into::into)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}
impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}
impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}
impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}
