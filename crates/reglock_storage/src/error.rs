#![forbid(unsafe_code)]

use reglock_kernel_contracts::ContractViolation;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("table {table} does not exist")]
    TableMissing { table: &'static str },
    #[error("column {column} could not be encoded or decoded")]
    Codec { column: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("contract violation: {0:?}")]
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}
