//! Document storage over SQLite

pub mod init;
pub mod store;

pub use init::*;
pub use store::{Datastore, Document, Query, SqlValue, Versioned};
