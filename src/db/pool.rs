//! A small counting-semaphore connection pool for the `mysql` sync client.
//!
//! The upstream pool sizes its semaphore to the *configured* pool size, so
//! a handle that silently fails to open at startup becomes a permit nobody
//! can ever redeem — the pool looks full but `acquire` blocks forever once
//! every working handle is checked out. This pool sizes the semaphore to
//! the number of handles that actually opened instead (see DESIGN.md).

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

use mysql::{Conn, Opts, OptsBuilder};

use crate::config::DbConfig;
use crate::error::{Result, ServerError};
use crate::logging::Logger;
use crate::log_error;

struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }

    fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }
}

/// A pool of open `mysql::Conn` handles, acquired and released via RAII.
pub struct DbPool {
    conns: Mutex<VecDeque<Conn>>,
    sem: Semaphore,
}

impl DbPool {
    /// Opens up to `config.pool_size` connections. Returns
    /// `Err(ServerError::PoolInit)` if none could be opened.
    pub fn new(config: &DbConfig, logger: &Logger) -> Result<Arc<DbPool>> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .db_name(Some(config.database.clone()))
            .into();

        let mut conns = VecDeque::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            match Conn::new(opts.clone()) {
                Ok(conn) => conns.push_back(conn),
                Err(e) => log_error!(logger, "failed to open database connection: {e}"),
            }
        }
        if conns.is_empty() {
            return Err(ServerError::PoolInit);
        }

        let sem = Semaphore::new(conns.len());
        Ok(Arc::new(DbPool {
            conns: Mutex::new(conns),
            sem,
        }))
    }

    /// Checks out a connection, blocking until one is free.
    pub fn acquire(self: &Arc<Self>) -> PooledConn {
        self.sem.wait();
        let conn = self
            .conns
            .lock()
            .unwrap()
            .pop_front()
            .expect("semaphore accounting guarantees a queued connection");
        PooledConn {
            pool: Arc::clone(self),
            conn: Some(conn),
        }
    }

    pub fn free_count(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    /// A pool with no backing connections, for tests and benches that
    /// exercise code paths which take a `DbPool` but never call
    /// `acquire` (e.g. parsing a GET request). Calling `acquire` on it
    /// blocks forever.
    pub fn disconnected() -> Arc<DbPool> {
        Arc::new(DbPool {
            conns: Mutex::new(VecDeque::new()),
            sem: Semaphore::new(0),
        })
    }
}

/// An RAII guard returning its connection to the pool on drop.
pub struct PooledConn {
    pool: Arc<DbPool>,
    conn: Option<Conn>,
}

impl Deref for PooledConn {
    type Target = Conn;

    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("conn taken only on drop")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("conn taken only on drop")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.conns.lock().unwrap().push_back(conn);
            self.pool.sem.post();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_opened_connections_fails_construction() {
        let config = DbConfig {
            host: "203.0.113.1".into(), // reserved/unroutable, connect fails fast-ish
            port: 1,
            user: "nobody".into(),
            password: String::new(),
            database: "none".into(),
            pool_size: 0,
        };
        let logger = Logger::discard();
        let result = DbPool::new(&config, &logger);
        assert!(matches!(result, Err(ServerError::PoolInit)));
    }
}
