#![deny(rust_2018_idioms, unused_imports)]
#![allow(dead_code)]

//! `edgeweb` is a single-process, reactor-style HTTP/1.1 server for static
//! files and a small login/registration form backed by a relational
//! database. It owns one `mio::Poll` instance on a dedicated reactor
//! thread and hands readiness events off to a fixed worker pool.

pub mod blocking_queue;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod http;
pub mod logging;
pub mod mux;
pub mod net;
pub mod server;
pub mod timer;
pub mod worker_pool;
