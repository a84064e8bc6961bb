//! Helper methods only available for tests
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use kube::{error::ErrorResponse, Resource, ResourceExt};

use crate::{
    attack::{
        index::attack_owner,
        job::{AttackDefaults, Child, ChildKind},
        spec::{Attack, AttackSpec},
        store::{AttackStore, ChildEvent},
    },
    utils::Context,
};

// Add tests specific implementation to the Attack
impl Attack {
    /// A normal test attack
    pub fn test() -> Self {
        Self::test_named("test")
    }
    /// A test attack with the given name in the test namespace
    pub fn test_named(name: &str) -> Self {
        let mut attack = Attack::new(name, AttackSpec::default());
        let meta = attack.meta_mut();
        meta.namespace = Some("test".to_owned());
        meta.uid = Some(format!("{name}-uid"));
        attack
    }
    /// Modify an attack to have an expected spec
    pub fn with_spec(self, spec: AttackSpec) -> Self {
        Self { spec, ..self }
    }
}

// Add test specific implementation to the Context
impl<S: AttackStore> Context<S> {
    /// Create a test context around a store
    pub fn test(store: S) -> Arc<Self> {
        Arc::new(Context::new(store, AttackDefaults::default()))
    }
}

#[derive(Default)]
struct State {
    attacks: BTreeMap<String, Attack>,
    // child identity -> controlling attack
    children: BTreeMap<(ChildKind, String), Option<String>>,
    created: Vec<(ChildKind, String)>,
    deleted: Vec<(ChildKind, String)>,
    events: Vec<ChildEvent>,
}

/// In memory API server for a single namespace.
///
/// Behaves like the API server for the calls a reconcile pass makes and
/// records every write so tests can assert on convergence.
#[derive(Default)]
pub struct StubStore {
    state: Mutex<State>,
}

impl StubStore {
    pub fn with_attack(self, attack: Attack) -> Self {
        self.lock().attacks.insert(attack.name_any(), attack);
        self
    }

    /// Add a child controlled by `owner` as if it was created by an earlier pass.
    pub fn with_child(self, owner: &Attack, kind: ChildKind, name: &str) -> Self {
        self.lock()
            .children
            .insert((kind, name.to_owned()), Some(owner.name_any()));
        self
    }

    /// Remove an attack without cascading to its children.
    pub fn remove_attack(&self, name: &str) {
        self.lock().attacks.remove(name);
    }

    /// Delete a child behind the reconciler's back.
    pub fn remove_child(&self, kind: ChildKind, name: &str) {
        self.lock().children.remove(&(kind, name.to_owned()));
    }

    pub fn names(&self, kind: ChildKind) -> Vec<String> {
        self.lock()
            .children
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn created(&self) -> Vec<(ChildKind, String)> {
        self.lock().created.clone()
    }

    pub fn deleted(&self) -> Vec<(ChildKind, String)> {
        self.lock().deleted.clone()
    }

    pub fn events(&self) -> Vec<ChildEvent> {
        self.lock().events.clone()
    }

    /// Forget recorded writes, keeping the stored objects.
    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.created.clear();
        state.deleted.clear();
        state.events.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("stub state lock")
    }
}

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_owned(),
        message: "stub message".to_owned(),
        reason: reason.to_owned(),
        code,
    })
}

#[async_trait]
impl AttackStore for StubStore {
    fn synced(&self) -> bool {
        true
    }

    async fn get_attack(&self, _ns: &str, name: &str) -> Result<Option<Attack>, kube::Error> {
        Ok(self.lock().attacks.get(name).cloned())
    }

    async fn list_owned(
        &self,
        kind: ChildKind,
        _ns: &str,
        owner: &str,
    ) -> Result<Vec<String>, kube::Error> {
        Ok(self
            .lock()
            .children
            .iter()
            .filter(|((k, _), o)| *k == kind && o.as_deref() == Some(owner))
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    async fn exists(&self, kind: ChildKind, _ns: &str, name: &str) -> Result<bool, kube::Error> {
        Ok(self.lock().children.contains_key(&(kind, name.to_owned())))
    }

    async fn create(&self, _ns: &str, child: &Child) -> Result<(), kube::Error> {
        let mut state = self.lock();
        let key = (child.kind(), child.name());
        if state.children.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.children.insert(key.clone(), attack_owner(child.meta()));
        state.created.push(key);
        Ok(())
    }

    async fn delete(&self, kind: ChildKind, _ns: &str, name: &str) -> Result<(), kube::Error> {
        let mut state = self.lock();
        let key = (kind, name.to_owned());
        if state.children.remove(&key).is_none() {
            return Err(api_error(404, "NotFound"));
        }
        state.deleted.push(key);
        Ok(())
    }

    async fn publish(&self, _attack: &Attack, event: &ChildEvent) -> Result<(), kube::Error> {
        self.lock().events.push(event.clone());
        Ok(())
    }
}
