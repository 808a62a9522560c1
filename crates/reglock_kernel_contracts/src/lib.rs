#![forbid(unsafe_code)]

pub mod common;
pub mod guard;
pub mod lockcfg;
pub mod notice;
pub mod settings;
pub mod snapshot;
pub mod version;

pub use common::{ContractViolation, ReasonCodeId, UnixTimeSecs, Validate};
