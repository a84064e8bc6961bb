//! Index of child objects by the attack that controls them.
use std::{
    collections::{BTreeSet, HashMap},
    fmt::Debug,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use futures::{Stream, TryStreamExt};
use kube::{
    api::ObjectMeta,
    runtime::{watcher, WatchStreamExt},
    Api, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::attack::spec::Attack;

/// Report the name of the attack controlling an object, if any.
pub fn attack_owner(meta: &ObjectMeta) -> Option<String> {
    let kind = Attack::kind(&());
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|oref| oref.controller == Some(true))
        .filter(|oref| oref.kind == kind)
        .map(|oref| oref.name.clone())
}

// (namespace, owner name)
type OwnerKey = (String, String);

#[derive(Debug, Default)]
struct Entries {
    by_owner: HashMap<OwnerKey, BTreeSet<String>>,
    // Reverse lookup so an object that loses or changes its owner is removed from the old entry.
    owner_of: HashMap<(String, String), OwnerKey>,
}

impl Entries {
    fn remove(&mut self, ns: &str, name: &str) {
        let child = (ns.to_owned(), name.to_owned());
        if let Some(owner) = self.owner_of.remove(&child) {
            if let Some(children) = self.by_owner.get_mut(&owner) {
                children.remove(name);
                if children.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
    }

    fn insert(&mut self, ns: String, name: String, owner: String) {
        let key = (ns.clone(), owner);
        self.owner_of.insert((ns, name.clone()), key.clone());
        self.by_owner.entry(key).or_default().insert(name);
    }
}

/// Names of the children of kind `K` grouped by their controlling attack.
///
/// The index is a cache derived from the owner references stored on each object.
/// It is not ready until the first full listing of `K` has been applied.
#[derive(Debug)]
pub struct OwnerIndex<K> {
    entries: RwLock<Entries>,
    ready: AtomicBool,
    kind: PhantomData<fn(K)>,
}

impl<K> Default for OwnerIndex<K> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            ready: AtomicBool::new(false),
            kind: PhantomData,
        }
    }
}

impl<K> OwnerIndex<K>
where
    K: Resource<DynamicType = ()>,
{
    /// Record the current version of an object.
    pub fn apply(&self, obj: &K) {
        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&ns, &name);
        if let Some(owner) = attack_owner(obj.meta()) {
            entries.insert(ns, name, owner);
        }
    }

    /// Forget a deleted object.
    pub fn delete(&self, obj: &K) {
        let ns = obj.namespace().unwrap_or_default();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&ns, &obj.name_any());
    }

    /// Replace the index contents with a full listing and mark the index ready.
    pub fn replace(&self, objs: &[K]) {
        let mut fresh = Entries::default();
        for obj in objs {
            if let Some(owner) = attack_owner(obj.meta()) {
                fresh.insert(obj.namespace().unwrap_or_default(), obj.name_any(), owner);
            }
        }
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.ready.store(true, Ordering::Release);
    }

    /// Whether a full listing has been applied.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Names of the objects in `ns` controlled by the attack named `owner`, sorted.
    pub fn get(&self, ns: &str, owner: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .by_owner
            .get(&(ns.to_owned(), owner.to_owned()))
            .map(|children| children.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a single watch event to the index.
    pub fn handle(&self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Applied(obj) => self.apply(obj),
            watcher::Event::Deleted(obj) => self.delete(obj),
            watcher::Event::Restarted(objs) => self.replace(objs),
        }
    }
}

impl<K> OwnerIndex<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Watch the objects visible through `api`, keeping the index up to date.
    ///
    /// The returned stream yields every touched object so it can also trigger reconciles
    /// of the owning attack.
    pub fn watch(
        self: Arc<Self>,
        api: Api<K>,
    ) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static {
        let kind = K::kind(&()).to_string();
        watcher(api, watcher::Config::default())
            .default_backoff()
            .inspect_ok(move |event| {
                self.handle(event);
                if let watcher::Event::Restarted(objs) = event {
                    debug!(kind = %K::kind(&()), count = objs.len(), "owner index synced");
                }
            })
            .inspect_err(move |err| warn!(%err, kind = %kind, "owner index watch error"))
            .touched_objects()
    }
}
