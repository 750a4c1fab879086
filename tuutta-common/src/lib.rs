//! # Tuutta Common Library
//!
//! Shared code for the Tuutta compliance engine including:
//! - Domain models (enrollments, assessment results, certificates, notifications, webhooks)
//! - The tenant-keyed document store over SQLite
//! - Domain events, the outbox record and the in-process EventBus
//! - Configuration loading
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use db::{Datastore, Document, Query};
pub use error::{Error, Result};
pub use events::{DomainEvent, EventBus};
