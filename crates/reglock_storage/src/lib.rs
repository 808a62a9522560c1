#![forbid(unsafe_code)]

pub mod config_store;
pub mod error;
pub mod lock_options;
pub mod repo;
pub mod snapshot_store;

pub use error::StorageError;
