//! Tutorly Scheduling: recurring session expansion, occurrence
//! lifecycle, change requests, compliance alerting and automatic
//! invoicing.
//!
//! [`SchedulingEngine`] is the entry point. It is generic over a
//! [`tutorly_core::repository::Store`] and a
//! [`tutorly_core::notify::NotificationSink`] and reads time only from
//! an injected [`tutorly_core::clock::Clock`].

pub mod alerting;
pub mod config;
mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod generator;
pub mod invoicing;
pub mod lifecycle;
pub mod workflow;

pub use config::SchedulingConfig;
pub use engine::{ScanReport, SchedulingEngine};
pub use error::SchedulingError;
pub use events::DomainEvent;
pub use invoicing::BalanceUpdate;
pub use lifecycle::ManualOccurrence;
