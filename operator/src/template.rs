//! Fetching the store template
//!
//! The template lives in a `ConfigMap` so operators can edit it without a restart.
//! It is read fresh on every render and never cached.
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::debug;

use crate::{
    api::{bounded, ConfigSource},
    error::ApiError,
};

/// Default name of the template `ConfigMap`
pub const DEFAULT_TEMPLATE_NAME: &str = "namespace-operator-template";
/// Default namespace of the template `ConfigMap`
pub const DEFAULT_TEMPLATE_NAMESPACE: &str = "default";
/// Default key holding the template inside the `ConfigMap`
pub const DEFAULT_TEMPLATE_KEY: &str = "template.yaml";

/// Errors from [`TemplateStore::fetch_template`]
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The object or the key inside it does not exist
    #[error("template {namespace}/{name} has no key {key}")]
    NotFound {
        /// Object name
        name: String,
        /// Object namespace
        namespace: String,
        /// Key inside the object
        key: String,
    },

    /// The read failed for any other reason
    #[error("failed to read template: {0}")]
    Transient(#[source] ApiError),
}

/// Where the template is stored; fixed for the lifetime of the process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateLocation {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Key inside the object
    pub key: String,
}

impl Default for TemplateLocation {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEMPLATE_NAME.into(),
            namespace: DEFAULT_TEMPLATE_NAMESPACE.into(),
            key: DEFAULT_TEMPLATE_KEY.into(),
        }
    }
}

/// Reads the raw template text
#[derive(Clone)]
pub struct TemplateStore {
    source: Arc<dyn ConfigSource>,
    location: TemplateLocation,
    timeout: Duration,
}

impl TemplateStore {
    /// Read the template at `location` through `source`, bounding each read by `timeout`
    pub fn new(source: Arc<dyn ConfigSource>, location: TemplateLocation, timeout: Duration) -> Self {
        Self {
            source,
            location,
            timeout,
        }
    }

    /// Fetch the current template text
    ///
    /// No retries happen here; a failed read fails the reconciliation that asked for it.
    pub async fn fetch_template(&self) -> Result<String, TemplateError> {
        let TemplateLocation { name, namespace, key } = &self.location;
        debug!(%name, %namespace, %key, "fetching template");
        bounded("read template", self.timeout, self.source.read(name, namespace, key))
            .await
            .map_err(|err| match err {
                ApiError::NotFound => TemplateError::NotFound {
                    name: name.clone(),
                    namespace: namespace.clone(),
                    key: key.clone(),
                },
                err => TemplateError::Transient(err),
            })
    }
}
