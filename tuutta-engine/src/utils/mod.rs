//! Utility modules for tuutta-engine

pub mod db_retry;

pub use db_retry::retry_on_lock;
