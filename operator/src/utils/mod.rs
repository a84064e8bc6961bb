//! Utils is shared functions and constants for the controller

use crate::attack::{job::AttackDefaults, store::AttackStore};

/// Operator Context
pub struct Context<S> {
    /// Storage client used to read and write cluster objects
    pub store: S,
    /// Values applied to attacks that leave fields unset
    pub defaults: AttackDefaults,
}

impl<S> Context<S>
where
    S: AttackStore,
{
    /// Create new context
    pub fn new(store: S, defaults: AttackDefaults) -> Self {
        Context { store, defaults }
    }
}

/// Reports whether the API server answered that the object does not exist.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "NotFound" || resp.code == 404)
}

/// Reports whether a create failed because an object with the same name exists.
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.reason == "AlreadyExists")
}

/// Reports whether a write lost an optimistic concurrency race.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp)
        if resp.reason == "Conflict" || (resp.code == 409 && resp.reason != "AlreadyExists"))
}
