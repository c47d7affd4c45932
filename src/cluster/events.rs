//! Kubernetes Events for reconcile outcomes.
//!
//! Events are fire-and-forget: a failed publish is logged and never reaches
//! the reconciler.

use k8s_openapi::api::core::v1::ObjectReference;
use kube_client::Client;
use kube_core::ApiResource;
use kube_runtime::events::{self, Event, EventType, Reporter};

use crate::recorder::{LogRecorder, Outcome, Recorder};
use crate::types::SubscriptionKey;

pub const REASON_RECONCILE_FAILED: &str = "SubscriptionReconcileFailed";

/// Publishes outcomes as Events on the subscription, and logs every outcome.
pub struct KubeRecorder {
    client: Client,
    reporter: Reporter,
    subscription: ApiResource,
}

impl KubeRecorder {
    /// `controller` shows up as the reporting component of each Event.
    pub fn new(client: Client, subscription: ApiResource, controller: impl Into<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.into(),
                instance: None,
            },
            subscription,
        }
    }

    fn reference(&self, key: &SubscriptionKey) -> ObjectReference {
        ObjectReference {
            api_version: Some(self.subscription.api_version.clone()),
            kind: Some(self.subscription.kind.clone()),
            namespace: Some(key.namespace.clone()),
            name: Some(key.name.clone()),
            ..ObjectReference::default()
        }
    }
}

impl Recorder for KubeRecorder {
    fn record(&self, key: &SubscriptionKey, outcome: Outcome) {
        let event = event_for(&outcome);
        LogRecorder.record(key, outcome);
        let Some(event) = event else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("{key}: no runtime to publish event {}", event.reason);
            return;
        };

        let recorder = events::Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            self.reference(key),
        );
        let key = key.clone();
        runtime.spawn(async move {
            if let Err(err) = recorder.publish(event).await {
                log::warn!("{key}: publishing event: {err}");
            }
        });
    }
}

/// The Event published for `outcome`, if any.
///
/// `Reconciled` is reported on every pass, including those that change
/// nothing, so it is left to the log.
pub fn event_for(outcome: &Outcome) -> Option<Event> {
    let (type_, reason, action) = match outcome {
        Outcome::Reconciled => return None,
        Outcome::ReconcileFailed { .. } => (EventType::Warning, REASON_RECONCILE_FAILED, "Reconcile"),
        Outcome::FinalizerAdded => (EventType::Normal, "FinalizerAdded", "Track"),
        Outcome::FinalizerRemoved => (EventType::Normal, "FinalizerRemoved", "Release"),
        Outcome::EventsActivated => (EventType::Normal, "EventsActivated", "Activate"),
        Outcome::EventsDeactivated => (EventType::Normal, "EventsDeactivated", "Deactivate"),
        Outcome::ChannelCreated { .. } => (EventType::Normal, "ChannelCreated", "Provision"),
        Outcome::ChannelDeleted { .. } => (EventType::Normal, "ChannelDeleted", "Teardown"),
        Outcome::BindingCreated { .. } => (EventType::Normal, "BindingCreated", "Provision"),
        Outcome::BindingRecreated { .. } => (EventType::Normal, "BindingRecreated", "Provision"),
        Outcome::BindingDeleted { .. } => (EventType::Normal, "BindingDeleted", "Teardown"),
    };
    Some(Event {
        type_,
        reason: reason.to_owned(),
        note: Some(outcome.to_string()),
        action: action.to_owned(),
        secondary: None,
    })
}
