use std::collections::BTreeMap;

use crate::CONTROLLER_NAME;

/// Create labels that can be used as a unique selector for a given app name.
pub fn selector_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter(vec![("app".to_owned(), app.to_owned())])
}

/// Labels that indicate the resource is managed by the vegeta operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "managed-by".to_owned(),
        CONTROLLER_NAME.to_owned(),
    )]))
}

/// Merge extra labels under the selector labels for `app`.
///
/// The selector label always wins so the job's anti-affinity keeps matching its own pods.
pub fn pod_labels(app: &str, extra: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut labels = extra.cloned().unwrap_or_default();
    labels.extend(selector_labels(app));
    labels
}
