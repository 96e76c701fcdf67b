//! Tutorly Database: SurrealDB connection management and repository
//! implementations.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Repository implementations for every `tutorly-core` trait, bundled
//!   as a [`SurrealStore`]
//! - A notification sink that persists requests for the delivery
//!   service ([`SurrealNotificationSink`])

mod codec;
mod connection;
mod error;
mod notification;
pub mod repository;
mod schema;
mod store;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use notification::SurrealNotificationSink;
pub use schema::{run_migrations, schema_v1};
pub use store::SurrealStore;
