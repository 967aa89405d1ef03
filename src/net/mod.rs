//! Thin traits over `mio`/`std` TCP types so connection handling can run
//! against a fake stream in tests.

pub mod tcp_listener;
pub mod tcp_stream;
