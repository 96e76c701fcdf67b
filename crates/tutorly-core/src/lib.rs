//! Tutorly Core: domain models, repository traits and shared error
//! types for the session scheduling engine.

pub mod clock;
pub mod error;
pub mod models;
pub mod notify;
pub mod repository;
