//! MySQL driver (§4.9), built on `mysql_async`. Lighter than the Postgres
//! adapter since `mysql_async`'s [`Value`](mysql_async::Value) already
//! matches [`Cell`]'s shape closely enough to convert directly rather than
//! dispatching on a reported column type.

use crate::{
    db::{
        pool::{DbError, PoolConnection},
        result::{Cell, Row},
    },
    pipeline::BoxFuture,
};
use mysql_async::{prelude::Queryable, Conn, Opts, Value};

/// One MySQL connection, reconnectable from its own connection options.
pub struct MysqlConnection {
    conn: Conn,
    opts: Opts,
}

impl MysqlConnection {
    pub async fn connect(url: impl AsRef<str>) -> Result<Self, DbError> {
        let opts = Opts::from_url(url.as_ref()).map_err(|e| DbError::Query(e.to_string()))?;
        let conn = Conn::new(opts.clone()).await.map_err(|e| DbError::Query(e.to_string()))?;
        Ok(Self { conn, opts })
    }

    pub async fn query(&mut self, sql: &str, params: &[Cell]) -> Result<Vec<Row>, DbError> {
        let values: Vec<Value> = params.iter().map(cell_to_value).collect();
        let rows: Vec<mysql_async::Row> = self
            .conn
            .exec(sql, values)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(rows.iter().map(row_from_mysql).collect())
    }

    pub async fn execute(&mut self, sql: &str, params: &[Cell]) -> Result<u64, DbError> {
        let values: Vec<Value> = params.iter().map(cell_to_value).collect();
        self.conn
            .exec_drop(sql, values)
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(self.conn.affected_rows())
    }
}

impl PoolConnection for MysqlConnection {
    fn is_alive(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.conn.ping().await.is_ok() })
    }

    fn reconnect(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let conn = Conn::new(self.opts.clone())
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
            self.conn = conn;
            Ok(())
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("START TRANSACTION", &[]).await.map(|_| ()) })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("COMMIT", &[]).await.map(|_| ()) })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { self.execute("ROLLBACK", &[]).await.map(|_| ()) })
    }
}

fn cell_to_value(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::NULL,
        Cell::Bool(v) => Value::Int(*v as i64),
        Cell::Int(v) => Value::Int(*v),
        Cell::Float(v) => Value::Double(*v),
        Cell::Text(v) => Value::Bytes(v.clone().into_bytes()),
        Cell::Bytes(v) => Value::Bytes(v.clone()),
    }
}

fn value_to_cell(value: &Value) -> Cell {
    match value {
        Value::NULL => Cell::Null,
        Value::Bytes(b) => String::from_utf8(b.clone())
            .map(Cell::Text)
            .unwrap_or_else(|e| Cell::Bytes(e.into_bytes())),
        Value::Int(v) => Cell::Int(*v),
        Value::UInt(v) => Cell::Int(*v as i64),
        Value::Float(v) => Cell::Float(*v as f64),
        Value::Double(v) => Cell::Float(*v),
        _ => Cell::Null,
    }
}

fn row_from_mysql(row: &mysql_async::Row) -> Row {
    let columns: Vec<String> = row.columns_ref().iter().map(|c| c.name_str().into_owned()).collect();
    let cells: Vec<Cell> = (0..row.len())
        .map(|i| row.as_ref(i).map(value_to_cell).unwrap_or(Cell::Null))
        .collect();
    Row::new(columns, cells)
}
