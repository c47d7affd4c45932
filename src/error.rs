use std::time::Duration;

use crate::store::StoreError;

/// The error type returned by [`Reconciler::reconcile`](crate::Reconciler::reconcile).
///
/// Every variant is retryable; the caller re-enqueues the key with backoff.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{op} failed: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("channel {name} did not become ready within {timeout:?}")]
    ChannelTimeout { name: String, timeout: Duration },
    #[error("binding {name} was deleted to repair drift but could not be recreated: {source}")]
    DriftRepair {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("reconcile cancelled")]
    Cancelled,
    #[error("reconcile did not finish within {timeout:?}")]
    Deadline { timeout: Duration },
}

impl Error {
    pub(crate) fn store(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Store { op, source }
    }

    /// Short machine-readable reason, used in status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Store { .. } => "StoreRequestFailed",
            Self::ChannelTimeout { .. } => "ChannelNotReady",
            Self::DriftRepair { .. } => "BindingRecreateFailed",
            Self::Cancelled => "Cancelled",
            Self::Deadline { .. } => "DeadlineExceeded",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
