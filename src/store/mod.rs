//! Persistence layer — libSQL-backed storage for leads, messages, properties,
//! and visits.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
