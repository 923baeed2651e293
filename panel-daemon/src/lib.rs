//! Control-plane daemon: SQLite persistence and wiring for the
//! orchestration core.

pub mod db;
pub mod models;
pub mod services;
pub mod store;
