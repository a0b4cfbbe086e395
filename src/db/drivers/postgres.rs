//! Postgres driver (§4.9), built on `tokio-postgres`. Implements
//! [`PoolConnection`] for lifecycle management and
//! [`RepositoryBackend`](crate::db::repository::RepositoryBackend) for the
//! fluent query builder, translating the driver-agnostic [`Cell`] into
//! Postgres wire parameters.

use crate::{
    db::{
        pool::{DbError, PoolConnection},
        repository::RepositoryBackend,
        result::{Cell, FromRow, Row},
    },
    pipeline::BoxFuture,
};
use bytes::BytesMut;
use std::error::Error as StdError;
use tokio_postgres::{
    types::{to_sql_checked, IsNull, ToSql, Type},
    NoTls,
};

/// One Postgres connection, reconnectable from its own connection string
/// (§4.9 "reconnect-once-if-dead").
pub struct PgConnection {
    client: tokio_postgres::Client,
    conninfo: String,
}

impl PgConnection {
    pub async fn connect(conninfo: impl Into<String>) -> Result<Self, DbError> {
        let conninfo = conninfo.into();
        let (client, connection) = tokio_postgres::connect(&conninfo, NoTls)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres driving task ended");
            }
        });

        Ok(Self { client, conninfo })
    }

    pub async fn query(&mut self, sql: &str, params: &[Cell]) -> Result<Vec<Row>, DbError> {
        let bound: Vec<CellParam<'_>> = params.iter().map(CellParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(rows.iter().map(row_from_pg).collect())
    }

    pub async fn execute(&mut self, sql: &str, params: &[Cell]) -> Result<u64, DbError> {
        let bound: Vec<CellParam<'_>> = params.iter().map(CellParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        self.client
            .execute(sql, &refs)
            .await
            .map_err(|e| DbError::Query(e.to_string()))
    }
}

impl PoolConnection for PgConnection {
    fn is_alive(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { !self.client.is_closed() })
    }

    fn reconnect(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let fresh = PgConnection::connect(self.conninfo.clone()).await?;
            *self = fresh;
            Ok(())
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("BEGIN", &[]).await.map(|_| ()) })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("COMMIT", &[]).await.map(|_| ()) })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("ROLLBACK", &[]).await.map(|_| ()) })
    }
}

impl<T: FromRow + Send + 'static> RepositoryBackend<T> for PgConnection {
    fn select(
        &mut self,
        table: &str,
        conditions: &[(String, Cell)],
        order_by: Option<(&str, bool)>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> BoxFuture<'_, Result<Vec<T>, DbError>> {
        let (sql, params) = build_select(table, conditions, order_by, limit, offset);
        Box::pin(async move {
            let rows = self.query(&sql, &params).await?;
            rows.iter()
                .map(T::from_row)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DbError::Query(e.to_string()))
        })
    }

    fn count(&mut self, table: &str, conditions: &[(String, Cell)]) -> BoxFuture<'_, Result<u64, DbError>> {
        let mut sql = format!("SELECT count(*) FROM {table}");
        let params: Vec<Cell> = conditions.iter().map(|(_, v)| v.clone()).collect();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause(conditions));
        }
        Box::pin(async move {
            let rows = self.query(&sql, &params).await?;
            match rows.first().and_then(|r| r.get::<i64>(0).ok()) {
                Some(n) => Ok(n as u64),
                None => Ok(0),
            }
        })
    }

    fn insert(&mut self, table: &str, values: &[(&str, Cell)]) -> BoxFuture<'_, Result<Cell, DbError>> {
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
            columns.join(", "),
            placeholders.join(", ")
        );
        let params: Vec<Cell> = values.iter().map(|(_, v)| v.clone()).collect();
        Box::pin(async move {
            let rows = self.query(&sql, &params).await?;
            rows.first()
                .and_then(|r| r.cell(0).cloned())
                .ok_or_else(|| DbError::Query("insert returned no row".into()))
        })
    }

    fn update_by_id(&mut self, table: &str, id: &Cell, values: &[(&str, Cell)]) -> BoxFuture<'_, Result<(), DbError>> {
        let assignments: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{col} = ${}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ${}",
            assignments.join(", "),
            values.len() + 1
        );
        let mut params: Vec<Cell> = values.iter().map(|(_, v)| v.clone()).collect();
        params.push(id.clone());
        Box::pin(async move { self.execute(&sql, &params).await.map(|_| ()) })
    }

    fn delete_by_id(&mut self, table: &str, id: &Cell) -> BoxFuture<'_, Result<(), DbError>> {
        let sql = format!("DELETE FROM {table} WHERE id = $1");
        let params = vec![id.clone()];
        Box::pin(async move { self.execute(&sql, &params).await.map(|_| ()) })
    }
}

fn where_clause(conditions: &[(String, Cell)]) -> String {
    conditions
        .iter()
        .enumerate()
        .map(|(i, (col, _))| format!("{col} = ${}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn build_select(
    table: &str,
    conditions: &[(String, Cell)],
    order_by: Option<(&str, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
) -> (String, Vec<Cell>) {
    let mut sql = format!("SELECT * FROM {table}");
    let params: Vec<Cell> = conditions.iter().map(|(_, v)| v.clone()).collect();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause(conditions));
    }
    if let Some((col, desc)) = order_by {
        sql.push_str(&format!(" ORDER BY {col} {}", if desc { "DESC" } else { "ASC" }));
    }
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    if let Some(n) = offset {
        sql.push_str(&format!(" OFFSET {n}"));
    }
    (sql, params)
}

fn row_from_pg(row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let cells = (0..row.len()).map(|i| cell_from_pg(row, i)).collect();
    Row::new(columns, cells)
}

fn cell_from_pg(row: &tokio_postgres::Row, index: usize) -> Cell {
    let ty = row.columns()[index].type_();
    match *ty {
        Type::BOOL => row.get::<_, Option<bool>>(index).map(Cell::Bool).unwrap_or(Cell::Null),
        Type::INT2 => row
            .get::<_, Option<i16>>(index)
            .map(|v| Cell::Int(v as i64))
            .unwrap_or(Cell::Null),
        Type::INT4 => row
            .get::<_, Option<i32>>(index)
            .map(|v| Cell::Int(v as i64))
            .unwrap_or(Cell::Null),
        Type::INT8 => row.get::<_, Option<i64>>(index).map(Cell::Int).unwrap_or(Cell::Null),
        Type::FLOAT4 => row
            .get::<_, Option<f32>>(index)
            .map(|v| Cell::Float(v as f64))
            .unwrap_or(Cell::Null),
        Type::FLOAT8 => row.get::<_, Option<f64>>(index).map(Cell::Float).unwrap_or(Cell::Null),
        Type::BYTEA => row.get::<_, Option<Vec<u8>>>(index).map(Cell::Bytes).unwrap_or(Cell::Null),
        _ => row.get::<_, Option<String>>(index).map(Cell::Text).unwrap_or(Cell::Null),
    }
}

/// Adapts a [`Cell`] to `tokio-postgres`'s [`ToSql`], delegating to the
/// matching native type's encoding.
struct CellParam<'a>(&'a Cell);

impl ToSql for CellParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self.0 {
            Cell::Null => Ok(IsNull::Yes),
            Cell::Bool(v) => v.to_sql(ty, out),
            Cell::Int(v) => v.to_sql(ty, out),
            Cell::Float(v) => v.to_sql(ty, out),
            Cell::Text(v) => v.to_sql(ty, out),
            Cell::Bytes(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
