//! Access to the cluster objects a reconcile pass reads and writes.
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::{batch::v1::Job, core::v1::ConfigMap};
use kube::{
    api::{DeleteParams, PostParams, PropagationPolicy},
    client::Client,
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Resource, ResourceExt,
};
use tracing::warn;

use crate::{
    attack::{
        index::OwnerIndex,
        job::{Child, ChildKind},
        spec::Attack,
    },
    CONTROLLER_NAME,
};

/// Change to a child object, reported on its owning attack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildEvent {
    /// The pass created a child.
    Created {
        /// Kind of the child.
        kind: ChildKind,
        /// Name of the child.
        name: String,
    },
    /// The pass deleted an orphaned child.
    Deleted {
        /// Kind of the child.
        kind: ChildKind,
        /// Name of the child.
        name: String,
    },
}

impl ChildEvent {
    /// Machine readable reason of the event.
    pub fn reason(&self) -> &'static str {
        match self {
            ChildEvent::Created { .. } => "SuccessfulCreated",
            ChildEvent::Deleted { .. } => "SuccessfulDeleted",
        }
    }

    /// Action taken on the child.
    pub fn action(&self) -> &'static str {
        match self {
            ChildEvent::Created { .. } => "Create",
            ChildEvent::Deleted { .. } => "Delete",
        }
    }

    /// Human readable description of the change.
    pub fn note(&self) -> String {
        match self {
            ChildEvent::Created { kind, name } => format!("Created {kind}: {name:?}"),
            ChildEvent::Deleted { kind, name } => format!("Deleted {kind}: {name:?}"),
        }
    }
}

/// Define the behavior we consume from the Kubernetes API.
///
/// Errors are returned as reported by the API server, callers decide which ones are expected.
#[async_trait]
pub trait AttackStore: Send + Sync {
    /// Whether `list_owned` reflects a full listing of the cluster.
    fn synced(&self) -> bool;
    /// Fetch an attack, `None` when it does not exist.
    async fn get_attack(&self, ns: &str, name: &str) -> Result<Option<Attack>, kube::Error>;
    /// Names of the objects of `kind` controlled by the attack `owner`.
    async fn list_owned(
        &self,
        kind: ChildKind,
        ns: &str,
        owner: &str,
    ) -> Result<Vec<String>, kube::Error>;
    /// Whether the named child exists.
    async fn exists(&self, kind: ChildKind, ns: &str, name: &str) -> Result<bool, kube::Error>;
    /// Create a child, failing with AlreadyExists when its name is taken.
    async fn create(&self, ns: &str, child: &Child) -> Result<(), kube::Error>;
    /// Delete a child, failing with NotFound when it is already gone.
    async fn delete(&self, kind: ChildKind, ns: &str, name: &str) -> Result<(), kube::Error>;
    /// Attach an event to the attack.
    async fn publish(&self, attack: &Attack, event: &ChildEvent) -> Result<(), kube::Error>;
}

/// Publish an event, logging instead of failing the pass when the API rejects it.
pub async fn record(store: &impl AttackStore, attack: &Attack, event: ChildEvent) {
    if let Err(err) = store.publish(attack, &event).await {
        warn!(%err, attack = %attack.name_any(), note = %event.note(), "failed to publish event");
    }
}

/// Store backed by the API server, listing children through owner indexes.
pub struct KubeStore {
    k_client: Client,
    jobs: Arc<OwnerIndex<Job>>,
    config_maps: Arc<OwnerIndex<ConfigMap>>,
    reporter: Reporter,
}

impl KubeStore {
    /// Create a store reading owned children from the given indexes.
    pub fn new(
        k_client: Client,
        jobs: Arc<OwnerIndex<Job>>,
        config_maps: Arc<OwnerIndex<ConfigMap>>,
    ) -> Self {
        Self {
            k_client,
            jobs,
            config_maps,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_owned(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl AttackStore for KubeStore {
    fn synced(&self) -> bool {
        self.jobs.is_ready() && self.config_maps.is_ready()
    }

    async fn get_attack(&self, ns: &str, name: &str) -> Result<Option<Attack>, kube::Error> {
        let attacks: Api<Attack> = Api::namespaced(self.k_client.clone(), ns);
        attacks.get_opt(name).await
    }

    async fn list_owned(
        &self,
        kind: ChildKind,
        ns: &str,
        owner: &str,
    ) -> Result<Vec<String>, kube::Error> {
        let names = match kind {
            ChildKind::Job => self.jobs.get(ns, owner),
            ChildKind::ConfigMap => self.config_maps.get(ns, owner),
        };
        Ok(names)
    }

    async fn exists(&self, kind: ChildKind, ns: &str, name: &str) -> Result<bool, kube::Error> {
        let existing = match kind {
            ChildKind::Job => Api::<Job>::namespaced(self.k_client.clone(), ns)
                .get_opt(name)
                .await?
                .is_some(),
            ChildKind::ConfigMap => Api::<ConfigMap>::namespaced(self.k_client.clone(), ns)
                .get_opt(name)
                .await?
                .is_some(),
        };
        Ok(existing)
    }

    async fn create(&self, ns: &str, child: &Child) -> Result<(), kube::Error> {
        let pp = PostParams::default();
        match child {
            Child::Job(job) => {
                Api::<Job>::namespaced(self.k_client.clone(), ns)
                    .create(&pp, job)
                    .await?;
            }
            Child::ConfigMap(config_map) => {
                Api::<ConfigMap>::namespaced(self.k_client.clone(), ns)
                    .create(&pp, config_map)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, kind: ChildKind, ns: &str, name: &str) -> Result<(), kube::Error> {
        let dp = DeleteParams {
            // Jobs otherwise leave their pods behind.
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match kind {
            ChildKind::Job => {
                Api::<Job>::namespaced(self.k_client.clone(), ns)
                    .delete(name, &dp)
                    .await?;
            }
            ChildKind::ConfigMap => {
                Api::<ConfigMap>::namespaced(self.k_client.clone(), ns)
                    .delete(name, &dp)
                    .await?;
            }
        }
        Ok(())
    }

    async fn publish(&self, attack: &Attack, event: &ChildEvent) -> Result<(), kube::Error> {
        let recorder = Recorder::new(
            self.k_client.clone(),
            self.reporter.clone(),
            attack.object_ref(&()),
        );
        recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: event.reason().to_owned(),
                note: Some(event.note()),
                action: event.action().to_owned(),
                secondary: None,
            })
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use kube::{api::ObjectMeta, runtime::watcher};
    use mockall::mock;

    use crate::{
        attack::job::{AttackDefaults, DesiredState},
        utils::{
            is_already_exists, is_not_found,
            test::{mock_client, timeout_after_1s},
        },
    };

    mock! {
        pub AttackStoreTest {}
        #[async_trait]
        impl AttackStore for AttackStoreTest {
            fn synced(&self) -> bool;
            async fn get_attack(&self, ns: &str, name: &str) -> Result<Option<Attack>, kube::Error>;
            async fn list_owned(&self, kind: ChildKind, ns: &str, owner: &str) -> Result<Vec<String>, kube::Error>;
            async fn exists(&self, kind: ChildKind, ns: &str, name: &str) -> Result<bool, kube::Error>;
            async fn create(&self, ns: &str, child: &Child) -> Result<(), kube::Error>;
            async fn delete(&self, kind: ChildKind, ns: &str, name: &str) -> Result<(), kube::Error>;
            async fn publish(&self, attack: &Attack, event: &ChildEvent) -> Result<(), kube::Error>;
        }
    }

    fn kube_store(k_client: Client) -> KubeStore {
        KubeStore::new(
            k_client,
            Arc::new(OwnerIndex::default()),
            Arc::new(OwnerIndex::default()),
        )
    }

    #[test]
    fn event_notes() {
        let created = ChildEvent::Created {
            kind: ChildKind::Job,
            name: "a-job".to_owned(),
        };
        assert_eq!(created.reason(), "SuccessfulCreated");
        assert_eq!(created.note(), r#"Created job: "a-job""#);
        let deleted = ChildEvent::Deleted {
            kind: ChildKind::ConfigMap,
            name: "a-old".to_owned(),
        };
        assert_eq!(deleted.reason(), "SuccessfulDeleted");
        assert_eq!(deleted.note(), r#"Deleted config map: "a-old""#);
    }

    #[tokio::test]
    async fn list_owned_reads_indexes() {
        let (k_client, _fakeserver) = mock_client();
        let owned = |name: &str, owner: &Attack| ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some("test".to_owned()),
            owner_references: owner.controller_owner_ref(&()).map(|oref| vec![oref]),
            ..Default::default()
        };
        let attack = Attack::test();
        let other = Attack::test_named("other");
        let jobs = Arc::new(OwnerIndex::<Job>::default());
        let config_maps = Arc::new(OwnerIndex::<ConfigMap>::default());
        let store = KubeStore::new(k_client, jobs.clone(), config_maps.clone());
        assert!(!store.synced());

        jobs.handle(&watcher::Event::Restarted(vec![
            Job {
                metadata: owned("test-job", &attack),
                ..Default::default()
            },
            Job {
                metadata: owned("test-attack", &attack),
                ..Default::default()
            },
            Job {
                metadata: owned("other-job", &other),
                ..Default::default()
            },
        ]));
        assert!(!store.synced());
        config_maps.handle(&watcher::Event::Restarted(vec![ConfigMap {
            metadata: owned("test-scenario", &attack),
            ..Default::default()
        }]));
        assert!(store.synced());

        assert_eq!(
            store
                .list_owned(ChildKind::Job, "test", "test")
                .await
                .expect("list jobs"),
            vec!["test-attack", "test-job"]
        );
        assert_eq!(
            store
                .list_owned(ChildKind::ConfigMap, "test", "test")
                .await
                .expect("list config maps"),
            vec!["test-scenario"]
        );
        assert!(store
            .list_owned(ChildKind::ConfigMap, "test", "other")
            .await
            .expect("list config maps")
            .is_empty());
    }

    #[tokio::test]
    async fn missing_attack_is_none() {
        let (k_client, mut fakeserver) = mock_client();
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.respond_error(404, "NotFound").await;
            assert_eq!(request.method, "GET");
            assert_eq!(request.path(), "/apis/vegeta.io/v1/namespaces/test/attacks/gone");
        });
        let attack = kube_store(k_client)
            .get_attack("test", "gone")
            .await
            .expect("not found is not an error");
        assert!(attack.is_none());
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn exists_reads_child() {
        let (k_client, mut fakeserver) = mock_client();
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.respond(200, &Job::default()).await;
            assert_eq!(request.path(), "/apis/batch/v1/namespaces/test/jobs/test-job");
            let request = fakeserver.respond_error(404, "NotFound").await;
            assert_eq!(request.path(), "/api/v1/namespaces/test/configmaps/test-scenario");
        });
        let store = kube_store(k_client);
        assert!(store
            .exists(ChildKind::Job, "test", "test-job")
            .await
            .expect("exists"));
        assert!(!store
            .exists(ChildKind::ConfigMap, "test", "test-scenario")
            .await
            .expect("exists"));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn create_posts_manifest() {
        let (k_client, mut fakeserver) = mock_client();
        let desired = DesiredState::build(&Attack::test(), &AttackDefaults::default());
        let job = desired.job.clone();
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.respond(201, &job).await;
            assert_eq!(request.method, "POST");
            assert_eq!(request.path(), "/apis/batch/v1/namespaces/test/jobs");
            let body = request.body.expect("job body");
            assert_eq!(body["metadata"]["name"], "test-job");
            assert_eq!(body["metadata"]["ownerReferences"][0]["kind"], "Attack");
            fakeserver.respond_error(409, "AlreadyExists").await;
        });
        let store = kube_store(k_client);
        let child = Child::Job(desired.job);
        store.create("test", &child).await.expect("create");
        let err = store
            .create("test", &child)
            .await
            .expect_err("second create collides");
        assert!(is_already_exists(&err));
        timeout_after_1s(mocksrv).await;
    }

    #[tokio::test]
    async fn delete_reports_not_found() {
        let (k_client, mut fakeserver) = mock_client();
        let mocksrv = tokio::spawn(async move {
            let request = fakeserver.respond_error(404, "NotFound").await;
            assert_eq!(request.method, "DELETE");
            assert_eq!(request.path(), "/api/v1/namespaces/test/configmaps/test-old");
            let body = request.body.expect("delete options");
            assert_eq!(body["propagationPolicy"], "Background");
        });
        let err = kube_store(k_client)
            .delete(ChildKind::ConfigMap, "test", "test-old")
            .await
            .expect_err("delete of a missing object");
        assert!(is_not_found(&err));
        timeout_after_1s(mocksrv).await;
    }
}
