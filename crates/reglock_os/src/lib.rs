#![forbid(unsafe_code)]

pub mod config;
pub mod drift_audit;
pub mod guard_wiring;
pub mod host;
pub mod in_memory_host;
pub mod interceptors;
pub mod lifecycle;

pub use config::RegLockConfig;
pub use host::HostError;
pub use lifecycle::{LifecycleError, LifecycleRuntime};
