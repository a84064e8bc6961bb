use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use futures::stream::StreamExt;
use k8s_openapi::api::{batch::v1::Job, core::v1::ConfigMap};
use kube::{
    client::Client,
    runtime::{
        controller::{self, Action},
        watcher, Controller,
    },
    Api, ResourceExt,
};
use opentelemetry::{global, KeyValue};
use tracing::{debug, error, info};

use crate::{
    attack::{
        gc,
        index::OwnerIndex,
        job::{AttackDefaults, Child, DesiredState},
        spec::Attack,
        store::{record, AttackStore, ChildEvent, KubeStore},
    },
    utils::{is_already_exists, is_conflict, Context},
};

/// Handle errors during reconciliation.
fn on_error(
    _attack: Arc<Attack>,
    error: &Error,
    _context: Arc<Context<impl AttackStore>>,
) -> Action {
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(1))
    } else {
        Action::requeue(Duration::from_secs(5))
    }
}

/// Errors produced by the reconcile function.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("App error: {source}")]
    App {
        #[from]
        source: anyhow::Error,
    },
    #[error("Kube error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("Conflict writing {name}: {source}")]
    Conflict { name: String, source: kube::Error },
}

impl Error {
    /// Conflicts resolve themselves once the pass runs against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Classify a failed write of the object `name`.
    pub(crate) fn from_write(name: &str, source: kube::Error) -> Self {
        if is_conflict(&source) {
            Error::Conflict {
                name: name.to_owned(),
                source,
            }
        } else {
            Error::Kube { source }
        }
    }
}

/// Options for running the Attack controller.
#[derive(Clone, Debug)]
pub struct ControllerOpts {
    /// Values used for fields an attack leaves unset.
    pub defaults: AttackDefaults,
    /// Maximum number of attacks reconciled at the same time, 0 is unbounded.
    pub concurrency: u16,
    /// Only watch this namespace when set.
    pub namespace: Option<String>,
}

fn api<K>(k_client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(k_client, ns),
        None => Api::all(k_client),
    }
}

/// Start a controller for the Attack CRD.
pub async fn run(opts: ControllerOpts) -> anyhow::Result<()> {
    let k_client = Client::try_default().await?;
    let ns = opts.namespace.as_deref();

    let attacks: Api<Attack> = api(k_client.clone(), ns);
    let jobs: Api<Job> = api(k_client.clone(), ns);
    let config_maps: Api<ConfigMap> = api(k_client.clone(), ns);

    let job_index = Arc::new(OwnerIndex::<Job>::default());
    let config_map_index = Arc::new(OwnerIndex::<ConfigMap>::default());
    let store = KubeStore::new(k_client, job_index.clone(), config_map_index.clone());
    let context = Arc::new(Context::new(store, opts.defaults));

    info!(namespace = ?opts.namespace, concurrency = opts.concurrency, "starting attack controller");

    // A single watch per child kind feeds both the owner index and the reconcile triggers.
    // Children left by older versions may lack our labels, watch them all.
    Controller::new(attacks, watcher::Config::default())
        .owns_stream(job_index.watch(jobs))
        .owns_stream(config_map_index.watch(config_maps))
        .with_config(controller::Config::default().concurrency(opts.concurrency))
        .shutdown_on_signal()
        .run(reconcile, on_error, context)
        .for_each(|rec_res| async move {
            match rec_res {
                Ok((attack, _)) => {
                    debug!(attack.name, "reconcile success");
                }
                Err(err) => {
                    error!(?err, "reconcile error")
                }
            }
        })
        .await;
    info!("attack controller stopped");
    Ok(())
}

/// Perform a reconcile pass for the Attack CRD
pub async fn reconcile(
    attack: Arc<Attack>,
    cx: Arc<Context<impl AttackStore>>,
) -> Result<Action, Error> {
    let meter = global::meter("vegeta-operator");
    let runs = meter
        .u64_counter("attack_reconcile_count")
        .with_description("Number of attack reconciles")
        .init();

    let result = reconcile_(attack, cx).await;
    let outcome = if result.is_ok() { "ok" } else { "err" };
    runs.add(1, &[KeyValue::new("result", outcome)]);
    result
}

async fn reconcile_(
    attack: Arc<Attack>,
    cx: Arc<Context<impl AttackStore>>,
) -> Result<Action, Error> {
    let name = attack.name_any();
    let ns = attack
        .namespace()
        .ok_or_else(|| anyhow!("attack {name} has no namespace"))?;

    // Collecting against a partial index would miss orphans.
    if !cx.store.synced() {
        debug!(attack = %name, namespace = %ns, "owner indexes not synced");
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // The watch cache may be stale, always work from the stored attack.
    let Some(attack) = cx.store.get_attack(&ns, &name).await? else {
        debug!(attack = %name, namespace = %ns, "attack no longer exists");
        return Ok(Action::await_change());
    };
    debug!(spec = ?attack.spec, "reconcile");

    let desired = DesiredState::build(&attack, &cx.defaults);

    let deleted = gc::collect(&cx.store, &attack, &desired).await?;

    let mut created = 0;
    for child in desired.children() {
        if ensure_created(&cx.store, &attack, &ns, &child).await? {
            created += 1;
        }
    }

    info!(
        attack = %name,
        namespace = %ns,
        created,
        deleted = deleted.len(),
        "reconciled attack"
    );
    Ok(Action::await_change())
}

// Creates the child unless it exists, never updating an existing child.
// Reports whether this pass created it.
async fn ensure_created(
    store: &impl AttackStore,
    attack: &Attack,
    ns: &str,
    child: &Child,
) -> Result<bool, Error> {
    let (kind, name) = (child.kind(), child.name());
    if store.exists(kind, ns, &name).await? {
        debug!(%kind, %name, "child exists");
        return Ok(false);
    }
    match store.create(ns, child).await {
        Ok(()) => {
            info!(attack = %attack.name_any(), %kind, %name, "created child");
            record(store, attack, ChildEvent::Created { kind, name }).await;
            Ok(true)
        }
        Err(err) if is_already_exists(&err) => {
            debug!(%kind, %name, "child created concurrently");
            Ok(false)
        }
        Err(err) => Err(Error::from_write(&name, err)),
    }
}
