//! Outcome signals emitted while reconciling.
//!
//! These are informational only; correctness never depends on them.

use std::fmt;

use crate::types::SubscriptionKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    FinalizerAdded,
    FinalizerRemoved,
    EventsActivated,
    EventsDeactivated,
    ChannelCreated { name: String },
    ChannelDeleted { name: String },
    BindingCreated { name: String },
    /// The binding was deleted and recreated because it had drifted.
    BindingRecreated { name: String },
    BindingDeleted { name: String },
    Reconciled,
    ReconcileFailed { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FinalizerAdded => write!(f, "finalizer added"),
            Self::FinalizerRemoved => write!(f, "finalizer removed"),
            Self::EventsActivated => write!(f, "events activated"),
            Self::EventsDeactivated => write!(f, "events deactivated"),
            Self::ChannelCreated { name } => write!(f, "channel {name} created"),
            Self::ChannelDeleted { name } => write!(f, "channel {name} deleted"),
            Self::BindingCreated { name } => write!(f, "binding {name} created"),
            Self::BindingRecreated { name } => {
                write!(f, "binding {name} recreated due to drift")
            }
            Self::BindingDeleted { name } => write!(f, "binding {name} deleted"),
            Self::Reconciled => write!(f, "reconciled"),
            Self::ReconcileFailed { reason } => write!(f, "reconcile failed: {reason}"),
        }
    }
}

pub trait Recorder: Send + Sync {
    fn record(&self, key: &SubscriptionKey, outcome: Outcome);
}

/// Writes every outcome to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl Recorder for LogRecorder {
    fn record(&self, key: &SubscriptionKey, outcome: Outcome) {
        match outcome {
            Outcome::ReconcileFailed { .. } => log::warn!("{key}: {outcome}"),
            Outcome::Reconciled => log::debug!("{key}: {outcome}"),
            _ => log::info!("{key}: {outcome}"),
        }
    }
}
