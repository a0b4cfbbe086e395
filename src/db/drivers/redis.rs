//! Redis driver (§4.9): a pool-facing shim over `redis`'s async
//! multiplexed connection. Redis has no table-oriented transaction model,
//! so `begin`/`commit`/`rollback` are no-ops here — callers that need
//! atomicity reach for `MULTI`/`EXEC` directly via [`RedisConnection::cmd`].

use crate::{db::pool::{DbError, PoolConnection}, pipeline::BoxFuture};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};

pub struct RedisConnection {
    conn: MultiplexedConnection,
    client: Client,
}

impl RedisConnection {
    pub async fn connect(url: impl AsRef<str>) -> Result<Self, DbError> {
        let client = Client::open(url.as_ref()).map_err(|e| DbError::Query(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(Self { conn, client })
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, DbError> {
        self.conn.get(key).await.map_err(|e| DbError::Query(e.to_string()))
    }

    pub async fn set(&mut self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.set(key, value).await.map_err(|e| DbError::Query(e.to_string()))
    }

    pub async fn del(&mut self, key: &str) -> Result<(), DbError> {
        self.conn.del(key).await.map_err(|e| DbError::Query(e.to_string()))
    }

    /// Runs an arbitrary command for cases the typed helpers above don't
    /// cover, e.g. `MULTI`/`EXEC` pipelines.
    pub fn cmd(&mut self, name: &str) -> redis::Cmd {
        redis::cmd(name)
    }

    pub fn connection(&mut self) -> &mut MultiplexedConnection {
        &mut self.conn
    }
}

impl PoolConnection for RedisConnection {
    fn is_alive(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut self.conn)
                .await
                .is_ok()
        })
    }

    fn reconnect(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            self.conn = self
                .client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| DbError::Query(e.to_string()))?;
            Ok(())
        })
    }

    fn begin(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { Ok(()) })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { Ok(()) })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move { Ok(()) })
    }
}
