//! Pooled database gateway (§4.9): a generic connection pool with a
//! circuit breaker and FIFO-fair waiters, driven by concrete drivers for
//! Postgres, MySQL and Redis, plus a fluent repository layer over it.

pub mod breaker;
pub mod pool;
pub mod repository;
pub mod result;

pub mod drivers {
    pub mod mysql;
    pub mod postgres;
    pub mod redis;
}
