//! Attack is a k8s custom resource that describes a vegeta load test.

// Export all spec types
mod spec;
pub use spec::*;

// All other mods are behind the controller flag to keep the deps to a minimum
#[cfg(feature = "controller")]
pub(crate) mod controller;
#[cfg(feature = "controller")]
pub(crate) mod gc;
#[cfg(feature = "controller")]
pub(crate) mod index;
#[cfg(feature = "controller")]
pub mod job;
#[cfg(feature = "controller")]
pub mod store;

#[cfg(test)]
#[cfg(feature = "controller")]
pub mod stub;

#[cfg(feature = "controller")]
pub use controller::{run, ControllerOpts};
#[cfg(feature = "controller")]
pub use job::AttackDefaults;
