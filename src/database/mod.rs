//! Postgres connection handling and schema migrations

pub mod migrations;
pub mod pool;

pub use pool::Database;
