//! HTTP middleware: request ids, request logging and JSON error responses.

pub mod error;
pub mod logging;
