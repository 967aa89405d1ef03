//! Database connection pooling and the user table queries built on it.

pub mod pool;

pub use pool::{DbPool, PooledConn};
