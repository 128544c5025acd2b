//! Collection manager core: user-defined albums with typed fields, schema
//! evolution and searches over a single SQLite store.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod logging;
pub mod tasks;

pub use db::Database;
pub use error::StoreError;
