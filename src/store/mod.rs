//! Persistence layer for pending announcements and scheduled jobs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::*;
