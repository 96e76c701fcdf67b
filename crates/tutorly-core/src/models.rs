//! Domain models for Tutorly.
//!
//! These are the core types shared across all crates.

pub mod alert;
pub mod attendee;
pub mod audit;
pub mod change_request;
pub mod invoice;
pub mod notification;
pub mod occurrence;
pub mod student;
pub mod template;
pub mod timesheet;
