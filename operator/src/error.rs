//! Error handling in the operator
//!
//! Calls against the cluster are classified into [`ApiError`] at the collaborator seam,
//! and every failed reconciliation attempt surfaces as a [`ReconcileError`] carrying
//! the namespace or store it was working on.
use std::time::Duration;

use kube::error::ErrorResponse;
use thiserror::Error;

use crate::{render::RenderError, template::TemplateError};

/// Failure of a single call against the cluster API
#[derive(Error, Debug)]
pub enum ApiError {
    /// The object (or a key inside it) does not exist
    #[error("object not found")]
    NotFound,

    /// A create call collided with an existing object of the same name
    #[error("object already exists")]
    AlreadyExists,

    /// The call did not complete within its bound
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that was cut short
        operation: &'static str,
        /// The bound that was exceeded
        after: Duration,
    },

    /// Any other failure reported by the client
    #[error("kube error: {0}")]
    Kube(#[source] kube::Error),
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ErrorResponse { code: 404, .. }) => ApiError::NotFound,
            kube::Error::Api(ErrorResponse { code: 409, ref reason, .. }) if reason == "AlreadyExists" => {
                ApiError::AlreadyExists
            }
            err => ApiError::Kube(err),
        }
    }
}

impl ApiError {
    /// Whether this is the benign "already absent" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound)
    }
}

/// A failed reconciliation attempt
///
/// These never escape a single attempt; the event driver yields them so the caller can log them.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The template could not be read
    #[error("failed to fetch template for namespace {namespace}: {source}")]
    Template {
        /// Namespace being reconciled
        namespace: String,
        /// Underlying cause
        #[source]
        source: TemplateError,
    },

    /// The template could not be turned into a store
    #[error("failed to render store {name}: {source}")]
    Render {
        /// Derived store name
        name: String,
        /// Underlying cause
        #[source]
        source: RenderError,
    },

    /// The store could not be created
    #[error("failed to create store {name}: {source}")]
    Create {
        /// Derived store name
        name: String,
        /// Underlying cause
        #[source]
        source: ApiError,
    },

    /// The store could not be read
    #[error("failed to get store {name}: {source}")]
    Get {
        /// Derived store name
        name: String,
        /// Underlying cause
        #[source]
        source: ApiError,
    },

    /// The store could not be deleted
    #[error("failed to delete store {name}: {source}")]
    Delete {
        /// Derived store name
        name: String,
        /// Underlying cause
        #[source]
        source: ApiError,
    },

    /// A cluster-wide listing failed
    #[error("failed to list {what}: {source}")]
    List {
        /// What was being listed
        what: &'static str,
        /// Underlying cause
        #[source]
        source: ApiError,
    },
}

impl ReconcileError {
    /// Whether the shared template itself is broken
    ///
    /// A broken template fails every namespace until someone fixes it.
    pub fn is_template_fault(&self) -> bool {
        match self {
            ReconcileError::Render { source, .. } => !matches!(source, RenderError::MissingOwnerUid),
            ReconcileError::Template { source, .. } => matches!(source, TemplateError::NotFound { .. }),
            _ => false,
        }
    }
}
