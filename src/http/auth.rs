//! Login/register form handling backed by the user table.
//!
//! Grounded on `HttpRequest::_userVerify`/`_userRegister`, but bound
//! parameters replace the original's `snprintf`-built SQL (see DESIGN.md).

use mysql::prelude::Queryable;

use crate::db::DbPool;
use crate::logging::Logger;
use crate::{log_debug, log_error, log_info, log_warn};
use std::sync::Arc;

/// Checks `username`/`password` against the `user` table.
pub fn verify_user(pool: &Arc<DbPool>, logger: &Logger, username: &str, password: &str) -> bool {
    if username.is_empty() {
        log_error!(logger, "no username!");
        return false;
    }
    log_debug!(logger, "verify username: {username}");
    let mut conn = pool.acquire();
    let row: Option<(String, String)> = match conn.exec_first(
        "SELECT username, password FROM user WHERE username = ? LIMIT 1",
        (username,),
    ) {
        Ok(row) => row,
        Err(e) => {
            log_error!(logger, "user lookup failed: {e}");
            return false;
        }
    };
    match row {
        Some((_, stored_password)) if stored_password == password => true,
        Some(_) => {
            log_info!(logger, "wrong password!");
            false
        }
        None => false,
    }
}

/// Inserts a new row into the `user` table. Returns `false` if the
/// username is already taken or the insert otherwise fails.
pub fn register_user(pool: &Arc<DbPool>, logger: &Logger, username: &str, password: &str) -> bool {
    log_debug!(logger, "new user register: {username}");
    let mut conn = pool.acquire();
    let existing: Option<String> = match conn.exec_first(
        "SELECT username FROM user WHERE username = ? LIMIT 1",
        (username,),
    ) {
        Ok(row) => row,
        Err(e) => {
            log_error!(logger, "register lookup failed: {e}");
            return false;
        }
    };
    if existing.is_some() {
        log_warn!(logger, "username already taken: {username}");
        return false;
    }
    match conn.exec_drop(
        "INSERT INTO user(username, password) VALUES (?, ?)",
        (username, password),
    ) {
        Ok(()) => true,
        Err(e) => {
            log_error!(logger, "register failed: {e}");
            false
        }
    }
}
