//! Error types for the parts of the strategy that can fail without being fatal.
//!
//! Config and log-sink setup are fatal failures and flow through `anyhow` at
//! the binary edge (see `rntp-node`); decode failures inside the name codec
//! are the one place a caller benefits from matching on a specific variant,
//! so they get their own enum here.

use thiserror::Error;

/// Failure to decode a wire name/payload into one of the five message kinds.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("name has too few components: {0:?}")]
    TooFewComponents(String),
    #[error("unrecognised operation segment: {0}")]
    UnknownMessageKind(String),
    #[error("non-numeric field {field} in component {component:?}")]
    BadNumericField { field: &'static str, component: String },
    #[error("payload too short: need at least {need} bytes, have {have}")]
    PayloadTooShort { need: usize, have: usize },
}
