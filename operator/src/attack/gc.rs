//! Removes children that an attack no longer wants.
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{
    attack::{
        controller::Error,
        job::{ChildKind, DesiredState},
        spec::Attack,
        store::{record, AttackStore, ChildEvent},
    },
    utils::is_not_found,
};

/// Delete every child controlled by `attack` whose name is not part of `desired`.
///
/// Children that are already gone count as collected. Returns the children this pass deleted.
pub async fn collect(
    store: &impl AttackStore,
    attack: &Attack,
    desired: &DesiredState,
) -> Result<Vec<(ChildKind, String)>, Error> {
    let ns = attack.namespace().unwrap_or_default();
    let owner = attack.name_any();
    let mut deleted = Vec::new();

    for kind in ChildKind::ALL {
        let keep = desired.names(kind);
        let owned = store.list_owned(kind, &ns, &owner).await?;
        for name in owned.into_iter().filter(|name| !keep.contains(name)) {
            match store.delete(kind, &ns, &name).await {
                Ok(()) => {
                    info!(attack = %owner, %kind, %name, "deleted orphaned child");
                    record(
                        store,
                        attack,
                        ChildEvent::Deleted {
                            kind,
                            name: name.clone(),
                        },
                    )
                    .await;
                    deleted.push((kind, name));
                }
                Err(err) if is_not_found(&err) => {
                    debug!(attack = %owner, %kind, %name, "orphaned child already gone");
                }
                Err(err) => return Err(Error::from_write(&name, err)),
            }
        }
    }
    Ok(deleted)
}
