//! Turning the template into a concrete store for one namespace
use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::OwnerReference, Resource};
use kube::core::DynamicObject;
use thiserror::Error;
use tracing::warn;

use crate::{
    api::{NamespaceInfo, STORE_GROUP, STORE_KIND, STORE_VERSION},
    labels::{self, INSTANCE_LABEL},
};

/// The only placeholder a template may reference
pub const PLACEHOLDER: &str = "NAMESPACE";

/// Errors from [`render`]
#[derive(Error, Debug)]
pub enum RenderError {
    /// The template references a placeholder other than `NAMESPACE`
    #[error("template references unknown placeholder ${name}")]
    MissingPlaceholder {
        /// The unresolved placeholder
        name: String,
    },

    /// A `$` that does not start a valid placeholder
    #[error("invalid placeholder at line {line}, column {column}")]
    InvalidPlaceholder {
        /// 1-based line of the offending `$`
        line: usize,
        /// 1-based column of the offending `$`
        column: usize,
    },

    /// The substituted text is not a YAML mapping describing an object
    #[error("rendered template is not a valid document: {reason}")]
    InvalidDocument {
        /// Parser diagnostics
        reason: String,
    },

    /// The namespace has no uid to reference from the owner reference
    #[error("namespace has no uid")]
    MissingOwnerUid,
}

/// Replace `$NAMESPACE` / `${NAMESPACE}` with `namespace`
///
/// `$$` is an escaped `$`. Identifiers follow shell rules (`[_A-Za-z][_A-Za-z0-9]*`),
/// so `$NAMESPACE_suffix` names a different placeholder; write `${NAMESPACE}_suffix` instead.
pub fn substitute(template: &str, namespace: &str) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len() + namespace.len());
    let mut last = 0;
    while let Some(offset) = template[last..].find('$') {
        let start = last + offset;
        out.push_str(&template[last..start]);
        let after = &template[start + 1..];

        let (consumed, name) = if after.starts_with('$') {
            out.push('$');
            (1, None)
        } else if let Some(len) = identifier_len(after) {
            (len, Some(&after[..len]))
        } else if let Some(braced) = after.strip_prefix('{') {
            match identifier_len(braced) {
                Some(len) if braced[len..].starts_with('}') => (len + 2, Some(&braced[..len])),
                _ => return Err(invalid_at(template, start)),
            }
        } else {
            return Err(invalid_at(template, start));
        };

        match name {
            Some(PLACEHOLDER) => out.push_str(namespace),
            Some(other) => {
                return Err(RenderError::MissingPlaceholder {
                    name: other.to_string(),
                })
            }
            None => {}
        }
        last = start + 1 + consumed;
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn identifier_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return None,
    }
    Some(
        bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count(),
    )
}

fn invalid_at(template: &str, pos: usize) -> RenderError {
    let before = &template[..pos];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    RenderError::InvalidPlaceholder {
        line,
        column: before[line_start..].chars().count() + 1,
    }
}

/// Owner reference tying a store's lifecycle to its namespace
///
/// The garbage collector removes the store when the namespace goes away,
/// even if the operator never sees the deletion.
pub fn owner_reference(namespace: &NamespaceInfo) -> Result<OwnerReference, RenderError> {
    Ok(OwnerReference {
        api_version: Namespace::API_VERSION.to_string(),
        kind: Namespace::KIND.to_string(),
        name: namespace.name.clone(),
        uid: namespace.uid.clone().ok_or(RenderError::MissingOwnerUid)?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Render the store named `store_name` for `namespace` from `template`
///
/// The result always carries the identity label, a single owner reference to the
/// namespace and `store_name` as its name, whatever the template says.
pub fn render(
    template: &str,
    namespace: &NamespaceInfo,
    store_name: &str,
) -> Result<DynamicObject, RenderError> {
    let owner = owner_reference(namespace)?;
    let text = substitute(template, &namespace.name)?;

    let mut doc: serde_json::Value = serde_yaml::from_str(&text).map_err(|e| RenderError::InvalidDocument {
        reason: e.to_string(),
    })?;
    let fields = doc.as_object_mut().ok_or_else(|| RenderError::InvalidDocument {
        reason: "top level is not a mapping".into(),
    })?;
    // apiVersion and kind default independently
    fields
        .entry("apiVersion")
        .or_insert_with(|| format!("{STORE_GROUP}/{STORE_VERSION}").into());
    fields.entry("kind").or_insert_with(|| STORE_KIND.into());
    let mut store: DynamicObject =
        serde_json::from_value(doc).map_err(|e| RenderError::InvalidDocument { reason: e.to_string() })?;

    match store.metadata.name.as_deref() {
        Some(name) if name != store_name => {
            warn!(
                template_name = %name,
                name = %store_name,
                "template names the store differently, overriding"
            );
        }
        _ => {}
    }
    store.metadata.name = Some(store_name.to_string());

    let store_labels = store.metadata.labels.get_or_insert_with(Default::default);
    store_labels.extend(labels::identity());
    if let Some(instance) = namespace.labels.get(INSTANCE_LABEL) {
        store_labels.insert(INSTANCE_LABEL.to_string(), instance.clone());
    }

    store.metadata.owner_references = Some(vec![owner]);
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};
    use assert_json_diff::assert_json_eq;
    use kube::ResourceExt;
    use serde_json::json;

    const TEMPLATE: &str = "metadata:\n  name: k8s-$NAMESPACE\nspec: {}\n";

    fn acme() -> NamespaceInfo {
        NamespaceInfo::new("acme", "uid-acme").label(crate::labels::DEFAULT_TARGET_LABEL_KEY, "true")
    }

    #[test]
    fn substitutes_both_placeholder_forms() {
        assert_eq!(substitute("a-$NAMESPACE", "foo").unwrap(), "a-foo");
        assert_eq!(substitute("${NAMESPACE}_x", "foo").unwrap(), "foo_x");
        assert_eq!(substitute("cost: $$5 in $NAMESPACE", "foo").unwrap(), "cost: $5 in foo");
        assert_eq!(substitute("no placeholders", "foo").unwrap(), "no placeholders");
    }

    #[test]
    fn unknown_placeholders_are_rejected() {
        let err = substitute("$NAMESPACE and $OTHER", "foo").unwrap_err();
        assert!(matches!(err, RenderError::MissingPlaceholder { ref name } if name == "OTHER"));
        let err = substitute("$NAMESPACE_suffix", "foo").unwrap_err();
        assert!(matches!(err, RenderError::MissingPlaceholder { ref name } if name == "NAMESPACE_suffix"));
        let err = substitute("$namespace", "foo").unwrap_err();
        assert!(matches!(err, RenderError::MissingPlaceholder { .. }));
    }

    #[test]
    fn dangling_dollar_is_invalid() {
        let err = substitute("spec:\n  price: 5$\n", "foo").unwrap_err();
        assert!(matches!(err, RenderError::InvalidPlaceholder { line: 2, column: 11 }));
        let err = substitute("${NAMESPACE", "foo").unwrap_err();
        assert!(matches!(err, RenderError::InvalidPlaceholder { line: 1, column: 1 }));
    }

    #[test]
    fn renders_scenario_template() {
        let store = render(TEMPLATE, &acme(), "k8s-acme").unwrap();
        assert_eq!(store.name_any(), "k8s-acme");
        assert_eq!(
            store.labels().get(MANAGED_BY_LABEL).map(String::as_str),
            Some(MANAGED_BY_VALUE)
        );
        assert_eq!(store.owner_references()[0].name, "acme");
        assert_json_eq!(
            serde_json::to_value(&store).unwrap(),
            json!({
                "apiVersion": "external-secrets.io/v1",
                "kind": "ClusterSecretStore",
                "metadata": {
                    "name": "k8s-acme",
                    "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
                    "ownerReferences": [{
                        "apiVersion": "v1",
                        "kind": "Namespace",
                        "name": "acme",
                        "uid": "uid-acme",
                        "controller": true,
                        "blockOwnerDeletion": true,
                    }],
                },
                "spec": {},
            })
        );
    }

    #[test]
    fn owner_reference_matches_namespace() {
        let ns = NamespaceInfo::new("payments", "0b1c-42");
        let owner = owner_reference(&ns).unwrap();
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
        assert_eq!(owner.name, "payments");
        assert_eq!(owner.uid, "0b1c-42");
        assert_eq!(owner.kind, "Namespace");
    }

    #[test]
    fn owner_reference_replaces_template_references() {
        let template = concat!(
            "metadata:\n  ownerReferences:\n",
            "  - apiVersion: apps/v1\n    kind: Deployment\n    name: x\n    uid: y\n",
            "spec: {}\n",
        );
        let store = render(template, &acme(), "k8s-acme").unwrap();
        assert_eq!(store.owner_references().len(), 1);
        assert_eq!(store.owner_references()[0].uid, "uid-acme");
    }

    #[test]
    fn namespace_without_uid_cannot_own() {
        let ns = NamespaceInfo {
            name: "acme".into(),
            ..Default::default()
        };
        assert!(matches!(
            render(TEMPLATE, &ns, "k8s-acme").unwrap_err(),
            RenderError::MissingOwnerUid
        ));
    }

    #[test]
    fn identity_label_overrides_template_value() {
        let template = concat!(
            "metadata:\n  labels:\n",
            "    k8s.framjet.dev/managed-by: someone-else\n    team: platform\n",
            "spec: {}\n",
        );
        let store = render(template, &acme(), "k8s-acme").unwrap();
        assert!(labels::is_owned(store.labels()));
        assert_eq!(store.labels().get("team").map(String::as_str), Some("platform"));
    }

    #[test]
    fn instance_label_is_propagated_when_present() {
        let ns = acme().label(INSTANCE_LABEL, "team-a");
        let store = render(TEMPLATE, &ns, "k8s-acme").unwrap();
        assert_eq!(store.labels().get(INSTANCE_LABEL).map(String::as_str), Some("team-a"));

        let store = render(TEMPLATE, &acme(), "k8s-acme").unwrap();
        assert!(!store.labels().contains_key(INSTANCE_LABEL));
    }

    #[test]
    fn derived_name_wins_over_template_name() {
        let store = render("metadata:\n  name: custom\nspec: {}\n", &acme(), "k8s-acme").unwrap();
        assert_eq!(store.name_any(), "k8s-acme");
        let store = render("spec: {}\n", &acme(), "k8s-acme").unwrap();
        assert_eq!(store.name_any(), "k8s-acme");
    }

    #[test]
    fn explicit_type_meta_is_kept() {
        let template = "apiVersion: external-secrets.io/v1beta1\nkind: ClusterSecretStore\nspec: {}\n";
        let store = render(template, &acme(), "k8s-acme").unwrap();
        let types = store.types.unwrap();
        assert_eq!(types.api_version, "external-secrets.io/v1beta1");
    }

    #[test]
    fn partial_type_meta_keeps_what_the_template_says() {
        let template = "apiVersion: external-secrets.io/v1beta1\nspec: {}\n";
        let types = render(template, &acme(), "k8s-acme").unwrap().types.unwrap();
        assert_eq!(types.api_version, "external-secrets.io/v1beta1");
        assert_eq!(types.kind, "ClusterSecretStore");

        let template = "kind: SecretStoreLike\nspec: {}\n";
        let types = render(template, &acme(), "k8s-acme").unwrap().types.unwrap();
        assert_eq!(types.api_version, "external-secrets.io/v1");
        assert_eq!(types.kind, "SecretStoreLike");
    }

    #[test]
    fn malformed_documents_are_rejected() {
        for template in ["spec: [unclosed\n", "- just\n- a list\n", "plain scalar", ""] {
            assert!(
                matches!(
                    render(template, &acme(), "k8s-acme").unwrap_err(),
                    RenderError::InvalidDocument { .. }
                ),
                "template {template:?} should be rejected"
            );
        }
    }

    #[test]
    fn namespace_is_substituted_into_spec() {
        let template = "spec:\n  provider:\n    kubernetes:\n      remoteNamespace: $NAMESPACE\n";
        let store = render(template, &acme(), "k8s-acme").unwrap();
        assert_eq!(
            store.data["spec"]["provider"]["kubernetes"]["remoteNamespace"],
            json!("acme")
        );
    }
}
