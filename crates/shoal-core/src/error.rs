use std::fmt;

use thiserror::Error;

/// Which kind of producer broke its contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerKind {
    Effect,
    PreloadEffect,
}

impl fmt::Display for ProducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerKind::Effect => f.write_str("effect"),
            ProducerKind::PreloadEffect => f.write_str("preload effect"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A declaration was made outside the initializer, or the initializer
    /// produced nothing usable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A producer returned something other than nothing or a stream.
    #[error("{kind} producer #{id} must return nothing or a stream, instead it returned: {reason}")]
    ContractViolation {
        kind: ProducerKind,
        id: usize,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn outside_initializer(capability: &str) -> Self {
        StoreError::Configuration(format!(
            "`{capability}` can only run inside the initializer passed to create_store(initializer, options)"
        ))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
