//! Well-known labels and the ownership guard
use std::collections::BTreeMap;

/// Label stamped onto every store this operator creates
pub const MANAGED_BY_LABEL: &str = "k8s.framjet.dev/managed-by";
/// Expected value of [`MANAGED_BY_LABEL`] on stores this operator owns
pub const MANAGED_BY_VALUE: &str = "eso-cluster-secret-store-per-ns";

/// Namespace label copied onto the store when present
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Default opt-in label key on namespaces
pub const DEFAULT_TARGET_LABEL_KEY: &str = "k8s.framjet.dev/eso-cluster-secret-store-per-ns";
/// Default opt-in label value on namespaces
pub const DEFAULT_TARGET_LABEL_VALUE: &str = "true";

/// Whether a store carrying `labels` was created by this operator
///
/// Only stores that pass this check are ever deleted.
pub fn is_owned(labels: &BTreeMap<String, String>) -> bool {
    labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some(MANAGED_BY_VALUE)
}

/// The identity labels every owned store carries
pub fn identity() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

/// Label selector matching stores this operator owns
pub fn identity_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")
}
