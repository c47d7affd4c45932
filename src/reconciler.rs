//! Converges one subscription at a time onto its channel and binding.
//!
//! Every pass starts from a fresh read of the subscription and of the
//! provisioned objects, so duplicate or out-of-order triggers are harmless.
//! Passes for the same key must not overlap; the runner's queue ensures that.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::condition::{self, is_true, merge_condition, status_of};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::finalizer;
use crate::naming;
use crate::provisioner::{BindingChange, BindingProvisioner, ChannelProvisioner};
use crate::recorder::{LogRecorder, Outcome, Recorder};
use crate::store::{ActivationLookup, BindingApi, ChannelApi, SubscriptionStore};
use crate::types::{
    Condition, ConditionStatus, ConditionType, Subscription, SubscriptionKey, SubscriptionStatus,
};

/// Lifecycle phase of a subscription, derived from its finalizers, deletion
/// timestamp and conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not yet tracked by this controller.
    Initializing,
    /// Tracked, but no events are activated for its source.
    Tracked,
    /// Activated, but the channel and binding are not both in place.
    Provisioning,
    /// Activated, with the channel and binding in place.
    Ready,
    /// Deletion requested and cleanup still pending.
    Terminating,
    /// Deletion requested and nothing left for this controller to do.
    Removed,
}

impl Phase {
    /// The phase `subscription` is in, as seen by the controller that owns
    /// `finalizer_name`.
    pub fn of(subscription: &Subscription, finalizer_name: &str) -> Self {
        let tracked = finalizer::contains(&subscription.finalizers, finalizer_name);
        match (subscription.is_terminating(), tracked) {
            (true, true) => Self::Terminating,
            (true, false) => Self::Removed,
            (false, false) => Self::Initializing,
            (false, true) if !is_true(subscription, ConditionType::EventsActivated) => {
                Self::Tracked
            }
            (false, true) if is_true(subscription, ConditionType::BindingReady) => Self::Ready,
            (false, true) => Self::Provisioning,
        }
    }
}

pub struct Reconciler<S, C, B> {
    store: S,
    channels: ChannelProvisioner<C>,
    bindings: BindingProvisioner<B>,
    clock: Arc<dyn Clock>,
    recorder: Arc<dyn Recorder>,
    config: Config,
}

impl<S, C, B> Reconciler<S, C, B>
where
    S: SubscriptionStore + ActivationLookup,
    C: ChannelApi,
    B: BindingApi,
{
    pub fn new(
        store: S,
        channels: ChannelProvisioner<C>,
        bindings: BindingProvisioner<B>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            store,
            channels,
            bindings,
            clock,
            recorder: Arc::new(LogRecorder),
            config,
        }
    }

    /// Replaces the default log-backed recorder.
    pub fn with_recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one reconcile pass for `key`.
    ///
    /// `Ok` means the key can be dropped from the queue. A subscription that no
    /// longer exists is `Ok`. Every error is worth retrying.
    pub async fn reconcile(&self, key: &SubscriptionKey, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(mut subscription) = self
            .store
            .get_subscription(key)
            .await
            .map_err(Error::store("get subscription"))?
        else {
            log::debug!("{key}: subscription is gone, nothing to do");
            return Ok(());
        };

        let phase = Phase::of(&subscription, &self.config.finalizer);
        log::debug!("{key}: reconciling in phase {phase:?}");

        let result = match phase {
            Phase::Removed => Ok(()),
            Phase::Terminating => self.finalize(&mut subscription).await,
            Phase::Initializing => self.track(&mut subscription).await,
            Phase::Tracked | Phase::Provisioning | Phase::Ready => {
                self.reconcile_tracked(&mut subscription, cancel).await
            }
        };

        match &result {
            Ok(()) => self.recorder.record(key, Outcome::Reconciled),
            Err(err) => self.recorder.record(
                key,
                Outcome::ReconcileFailed {
                    reason: err.to_string(),
                },
            ),
        }
        result
    }

    /// Cleans up after a subscription whose deletion was requested, then
    /// releases it by removing the finalizer.
    ///
    /// A failed cleanup is written to the status while the finalizer holds the
    /// object. A successful one writes nothing, since the object may be gone.
    async fn finalize(&self, subscription: &mut Subscription) -> Result<()> {
        let before = subscription.status.clone();
        match self.release(subscription).await {
            Ok(()) => {
                self.recorder
                    .record(&subscription.key, Outcome::FinalizerRemoved);
                Ok(())
            }
            Err(err) => {
                self.merge(
                    subscription,
                    Condition::new(ConditionType::BindingReady, false)
                        .with_reason(err.reason(), err.to_string()),
                );
                self.finish(subscription, &before, Err(err)).await
            }
        }
    }

    async fn release(&self, subscription: &Subscription) -> Result<()> {
        self.teardown(subscription).await?;

        let finalizers = finalizer::remove(&subscription.finalizers, &self.config.finalizer);
        self.store
            .update_subscription_finalizers(&subscription.key, &finalizers)
            .await
            .map_err(Error::store("remove finalizer"))
    }

    /// Takes ownership of the subscription's cleanup and records its initial
    /// status.
    async fn track(&self, subscription: &mut Subscription) -> Result<()> {
        let finalizers = finalizer::add(&subscription.finalizers, &self.config.finalizer);
        self.store
            .update_subscription_finalizers(&subscription.key, &finalizers)
            .await
            .map_err(Error::store("add finalizer"))?;
        subscription.finalizers = finalizers;
        self.recorder
            .record(&subscription.key, Outcome::FinalizerAdded);

        let before = subscription.status.clone();
        if status_of(subscription, ConditionType::EventsActivated).is_none() {
            self.merge(
                subscription,
                Condition::new(ConditionType::EventsActivated, false),
            );
        }
        self.finish(subscription, &before, Ok(())).await
    }

    async fn reconcile_tracked(
        &self,
        subscription: &mut Subscription,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let before = subscription.status.clone();
        let was_activated = is_true(subscription, ConditionType::EventsActivated);

        let activated = match self.is_activated(subscription).await {
            Ok(activated) => activated,
            Err(err) => return self.finish(subscription, &before, Err(err)).await,
        };

        match (was_activated, activated) {
            (false, true) => {
                // Persist the activation alone; the status write triggers the
                // pass that provisions.
                self.merge(
                    subscription,
                    Condition::new(ConditionType::EventsActivated, true),
                );
                self.recorder
                    .record(&subscription.key, Outcome::EventsActivated);
                self.finish(subscription, &before, Ok(())).await
            }
            (_, false) => {
                let result = self.teardown(subscription).await;
                self.merge(
                    subscription,
                    Condition::new(ConditionType::EventsActivated, false),
                );
                self.downgrade(subscription, ConditionType::ChannelReady);
                self.downgrade(subscription, ConditionType::BindingReady);
                if was_activated {
                    self.recorder
                        .record(&subscription.key, Outcome::EventsDeactivated);
                }
                self.finish(subscription, &before, result).await
            }
            (true, true) => {
                let result = self.provision(subscription, cancel).await;
                if let Err(err) = &result {
                    self.merge(
                        subscription,
                        Condition::new(ConditionType::BindingReady, false)
                            .with_reason(err.reason(), err.to_string()),
                    );
                }
                self.finish(subscription, &before, result).await
            }
        }
    }

    async fn is_activated(&self, subscription: &Subscription) -> Result<bool> {
        let source_id = &subscription.spec.source_id;
        let activations = self
            .store
            .list_event_activations(&subscription.key.namespace, source_id)
            .await
            .map_err(Error::store("list event activations"))?;
        Ok(activations
            .iter()
            .any(|activation| &activation.source_id == source_id && !activation.deleting))
    }

    /// Ensures the channel and the binding, merging their conditions.
    async fn provision(
        &self,
        subscription: &mut Subscription,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = subscription.key.clone();
        let namespace = self.config.provisioning_namespace_for(&key.namespace);
        let coordinate = subscription.spec.coordinate();

        let ensured = match self
            .channels
            .ensure_channel(
                namespace,
                &coordinate,
                naming::channel_labels(&coordinate),
                self.config.channel_ready_timeout,
                cancel,
            )
            .await
        {
            Ok(ensured) => ensured,
            Err(err) => {
                self.merge(
                    subscription,
                    Condition::new(ConditionType::ChannelReady, false)
                        .with_reason(err.reason(), err.to_string()),
                );
                return Err(err);
            }
        };
        if ensured.created {
            self.recorder.record(
                &key,
                Outcome::ChannelCreated {
                    name: ensured.channel.name.clone(),
                },
            );
        }
        self.merge(
            subscription,
            Condition::new(ConditionType::ChannelReady, true),
        );

        let binding_name = naming::binding_name(&key);
        // Release the channel the binding still points at before moving it, so
        // a failed release is found again on the next pass.
        if let Some(current) = self.bindings.get_binding(namespace, &binding_name).await? {
            if current.channel_name != ensured.channel.name {
                self.release_channel(&key, namespace, &current.channel_name, &binding_name)
                    .await?;
            }
        }
        let change = self
            .bindings
            .ensure_binding(
                namespace,
                &binding_name,
                &ensured.channel.name,
                &subscription.spec.endpoint,
                naming::binding_labels(&key, &coordinate),
            )
            .await?;
        match change {
            BindingChange::Unchanged => {}
            BindingChange::Created => self.recorder.record(
                &key,
                Outcome::BindingCreated {
                    name: binding_name.clone(),
                },
            ),
            BindingChange::Recreated { .. } => self.recorder.record(
                &key,
                Outcome::BindingRecreated {
                    name: binding_name.clone(),
                },
            ),
        }

        self.merge(
            subscription,
            Condition::new(ConditionType::BindingReady, true),
        );
        Ok(())
    }

    /// Deletes the subscription's binding and every channel it leaves unused.
    ///
    /// Only issues mutations for objects that exist.
    async fn teardown(&self, subscription: &Subscription) -> Result<()> {
        let key = &subscription.key;
        let namespace = self.config.provisioning_namespace_for(&key.namespace);
        let binding_name = naming::binding_name(key);

        let mut channels = vec![naming::channel_name(&subscription.spec.coordinate())];
        if let Some(binding) = self.bindings.get_binding(namespace, &binding_name).await? {
            if !channels.contains(&binding.channel_name) {
                channels.push(binding.channel_name);
            }
            if self.bindings.delete_binding(namespace, &binding_name).await? {
                self.recorder.record(
                    key,
                    Outcome::BindingDeleted {
                        name: binding_name.clone(),
                    },
                );
            }
        }

        for channel in &channels {
            self.release_channel(key, namespace, channel, &binding_name)
                .await?;
        }
        Ok(())
    }

    /// Deletes `channel` unless a binding other than `own_binding` targets it.
    async fn release_channel(
        &self,
        key: &SubscriptionKey,
        namespace: &str,
        channel: &str,
        own_binding: &str,
    ) -> Result<()> {
        if self.channels.get_channel(namespace, channel).await?.is_none() {
            return Ok(());
        }
        if self
            .bindings
            .channel_has_other_bindings(namespace, channel, own_binding)
            .await?
        {
            log::debug!("{key}: channel {namespace}/{channel} is still in use");
            return Ok(());
        }
        if self.channels.delete_channel(namespace, channel).await? {
            self.recorder.record(
                key,
                Outcome::ChannelDeleted {
                    name: channel.to_owned(),
                },
            );
        }
        Ok(())
    }

    fn merge(&self, subscription: &mut Subscription, condition: Condition) -> bool {
        merge_condition(subscription, condition, self.clock.as_ref())
    }

    /// Flips a `True` condition to `False`; absent conditions stay absent.
    fn downgrade(&self, subscription: &mut Subscription, type_: ConditionType) {
        if status_of(subscription, type_) == Some(ConditionStatus::True) {
            self.merge(subscription, Condition::new(type_, false));
        }
    }

    /// Derives `Ready`, then persists the status if anything changed since
    /// `before`.
    ///
    /// The write happens even when `result` is an error so the failure shows
    /// up on the subscription. A failed write never hides `result`'s error.
    async fn finish(
        &self,
        subscription: &mut Subscription,
        before: &SubscriptionStatus,
        result: Result<()>,
    ) -> Result<()> {
        match &result {
            Ok(()) => {
                condition::sync_ready(subscription, self.clock.as_ref());
            }
            Err(err) => {
                let ready = is_true(subscription, ConditionType::EventsActivated)
                    && is_true(subscription, ConditionType::BindingReady);
                let mut candidate = Condition::new(ConditionType::Ready, ready);
                if !ready {
                    candidate = candidate.with_reason(err.reason(), err.to_string());
                }
                self.merge(subscription, candidate);
            }
        }

        if subscription.status == *before {
            return result;
        }

        if let Err(write_err) = self
            .store
            .update_subscription_status(&subscription.key, &subscription.status)
            .await
        {
            log::error!("{}: writing status: {write_err}", subscription.key);
            return result.and(Err(Error::store("update subscription status")(write_err)));
        }
        result
    }
}
