#![forbid(unsafe_code)]

pub mod drift;
pub mod lock_enforcer;
pub mod mutation_guard;
