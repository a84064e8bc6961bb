//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Attack module for managing vegeta load tests.
pub mod attack;
/// Labels module for managing resource labels.
#[cfg(feature = "controller")]
pub(crate) mod labels;
/// Utils module for shared utility functions.
#[cfg(feature = "controller")]
pub mod utils;

/// Name used as field manager, event reporter and managed-by label value.
#[cfg(feature = "controller")]
pub(crate) const CONTROLLER_NAME: &str = "vegeta-operator";
