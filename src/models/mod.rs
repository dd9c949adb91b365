//! Core data models for the app publishing service.
//!
//! Row types map to SQLite tables via `sqlx::FromRow`; request and event
//! types serialize as JSON via `serde`.

pub mod catalog;
pub mod claims;
pub mod descriptor;
pub mod event;
pub mod metadata;
pub mod object;
pub mod queue;
pub mod subscription;
