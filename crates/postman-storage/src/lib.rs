//! Postman Storage - PostgreSQL access layer
//!
//! This crate holds the models, repositories, and migrations for the
//! campaign send core. All queue atomicity (job claims, outcome writes,
//! the log close-out sweep) is expressed as explicit SQL with row-level
//! locking rather than database-resident procedures.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
