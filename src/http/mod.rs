//! HTTP/1.1 request parsing and response construction.

pub mod auth;
pub mod mime;
pub mod request;
pub mod response;

pub use request::Request;
pub use response::Response;
