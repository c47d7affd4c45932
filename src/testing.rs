//! In-memory store counting every call, for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use parking_lot::Mutex;

use crate::store::{ActivationLookup, BindingApi, ChannelApi, StoreError, SubscriptionStore};
use crate::types::{
    Binding, Channel, EventActivation, Subscription, SubscriptionKey, SubscriptionStatus,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub subscription_gets: usize,
    pub status_updates: usize,
    pub finalizer_updates: usize,
    pub activation_lists: usize,
    pub channel_gets: usize,
    pub channel_creates: usize,
    pub channel_deletes: usize,
    pub binding_gets: usize,
    pub binding_lists: usize,
    pub binding_creates: usize,
    pub binding_deletes: usize,
}

impl Calls {
    pub fn channel_mutations(&self) -> usize {
        self.channel_creates + self.channel_deletes
    }

    pub fn binding_mutations(&self) -> usize {
        self.binding_creates + self.binding_deletes
    }
}

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Immediate,
    AfterGets(usize),
    Never,
}

#[derive(Default)]
struct Failures {
    status_update: Option<StoreError>,
    finalizer_update: Option<StoreError>,
    channel_create: Option<StoreError>,
    channel_delete: Option<StoreError>,
    binding_create: Option<StoreError>,
    binding_delete: Option<StoreError>,
    hide_channel_get: bool,
}

struct State {
    subscriptions: BTreeMap<SubscriptionKey, Subscription>,
    activations: Vec<EventActivation>,
    channels: BTreeMap<(String, String), Channel>,
    bindings: BTreeMap<(String, String), Binding>,
    readiness: Readiness,
    gets_until_ready: HashMap<(String, String), usize>,
    failures: Failures,
    calls: Calls,
}

#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                subscriptions: BTreeMap::new(),
                activations: Vec::new(),
                channels: BTreeMap::new(),
                bindings: BTreeMap::new(),
                readiness: Readiness::Immediate,
                gets_until_ready: HashMap::new(),
                failures: Failures::default(),
                calls: Calls::default(),
            })),
        }
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls = Calls::default();
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .subscriptions
            .insert(subscription.key.clone(), subscription);
    }

    pub fn subscription(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.state.lock().subscriptions.get(key).cloned()
    }

    /// Applies an external edit to a stored subscription.
    pub fn edit_subscription(&self, key: &SubscriptionKey, edit: impl FnOnce(&mut Subscription)) {
        if let Some(subscription) = self.state.lock().subscriptions.get_mut(key) {
            edit(subscription);
        }
    }

    pub fn request_deletion(&self, key: &SubscriptionKey) {
        self.edit_subscription(key, |subscription| {
            subscription.deletion_timestamp = Some(Time(Utc::now()));
        });
    }

    pub fn insert_activation(&self, namespace: &str, source_id: &str) {
        self.state.lock().activations.push(EventActivation {
            namespace: namespace.to_owned(),
            name: format!("{source_id}-activation"),
            source_id: source_id.to_owned(),
            deleting: false,
        });
    }

    pub fn mark_activations_deleting(&self, source_id: &str) {
        for activation in self.state.lock().activations.iter_mut() {
            if activation.source_id == source_id {
                activation.deleting = true;
            }
        }
    }

    pub fn remove_activations(&self, source_id: &str) {
        self.state
            .lock()
            .activations
            .retain(|activation| activation.source_id != source_id);
    }

    pub fn insert_channel(&self, namespace: &str, name: &str, ready: bool) {
        self.state.lock().channels.insert(
            (namespace.to_owned(), name.to_owned()),
            Channel {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                labels: BTreeMap::new(),
                ready,
                address: None,
            },
        );
    }

    pub fn channel(&self, namespace: &str, name: &str) -> Option<Channel> {
        self.state
            .lock()
            .channels
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn insert_binding(&self, namespace: &str, name: &str, channel_name: &str, uri: &str) {
        self.state.lock().bindings.insert(
            (namespace.to_owned(), name.to_owned()),
            Binding {
                namespace: namespace.to_owned(),
                name: name.to_owned(),
                channel_name: channel_name.to_owned(),
                subscriber_uri: uri.to_owned(),
                labels: BTreeMap::new(),
            },
        );
    }

    pub fn binding(&self, namespace: &str, name: &str) -> Option<Binding> {
        self.state
            .lock()
            .bindings
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    pub fn binding_count(&self) -> usize {
        self.state.lock().bindings.len()
    }

    /// Created channels report ready on the `gets`-th read.
    pub fn set_channel_ready_after(&self, gets: usize) {
        self.state.lock().readiness = Readiness::AfterGets(gets);
    }

    pub fn set_channel_never_ready(&self) {
        self.state.lock().readiness = Readiness::Never;
    }

    pub fn set_channel_ready(&self, namespace: &str, name: &str) {
        let mut state = self.state.lock();
        let key = (namespace.to_owned(), name.to_owned());
        state.gets_until_ready.remove(&key);
        if let Some(channel) = state.channels.get_mut(&key) {
            channel.ready = true;
        }
    }

    pub fn fail_next_status_update(&self, err: StoreError) {
        self.state.lock().failures.status_update = Some(err);
    }

    pub fn fail_next_finalizer_update(&self, err: StoreError) {
        self.state.lock().failures.finalizer_update = Some(err);
    }

    pub fn fail_next_channel_create(&self, err: StoreError) {
        self.state.lock().failures.channel_create = Some(err);
    }

    pub fn fail_next_channel_delete(&self, err: StoreError) {
        self.state.lock().failures.channel_delete = Some(err);
    }

    pub fn fail_next_binding_create(&self, err: StoreError) {
        self.state.lock().failures.binding_create = Some(err);
    }

    pub fn fail_next_binding_delete(&self, err: StoreError) {
        self.state.lock().failures.binding_delete = Some(err);
    }

    /// The next channel read reports the channel as absent.
    pub fn hide_next_channel_get(&self) {
        self.state.lock().failures.hide_channel_get = true;
    }
}

impl SubscriptionStore for FakeCluster {
    async fn get_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut state = self.state.lock();
        state.calls.subscription_gets += 1;
        Ok(state.subscriptions.get(key).cloned())
    }

    async fn update_subscription_status(
        &self,
        key: &SubscriptionKey,
        status: &SubscriptionStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.calls.status_updates += 1;
        if let Some(err) = state.failures.status_update.take() {
            return Err(err);
        }
        let subscription = state
            .subscriptions
            .get_mut(key)
            .ok_or(StoreError::NotFound)?;
        subscription.status = status.clone();
        Ok(())
    }

    async fn update_subscription_finalizers(
        &self,
        key: &SubscriptionKey,
        finalizers: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.calls.finalizer_updates += 1;
        if let Some(err) = state.failures.finalizer_update.take() {
            return Err(err);
        }
        let subscription = state
            .subscriptions
            .get_mut(key)
            .ok_or(StoreError::NotFound)?;
        subscription.finalizers = finalizers.to_vec();
        // Like the API server, drop a deleted object once its last finalizer is gone.
        if subscription.is_terminating() && subscription.finalizers.is_empty() {
            state.subscriptions.remove(key);
        }
        Ok(())
    }
}

impl ActivationLookup for FakeCluster {
    async fn list_event_activations(
        &self,
        namespace: &str,
        source_id: &str,
    ) -> Result<Vec<EventActivation>, StoreError> {
        let mut state = self.state.lock();
        state.calls.activation_lists += 1;
        Ok(state
            .activations
            .iter()
            .filter(|activation| {
                activation.namespace == namespace && activation.source_id == source_id
            })
            .cloned()
            .collect())
    }
}

impl ChannelApi for FakeCluster {
    async fn get_channel(&self, namespace: &str, name: &str) -> Result<Option<Channel>, StoreError> {
        let mut state = self.state.lock();
        state.calls.channel_gets += 1;
        if std::mem::take(&mut state.failures.hide_channel_get) {
            return Ok(None);
        }

        let key = (namespace.to_owned(), name.to_owned());
        if let Some(remaining) = state.gets_until_ready.get_mut(&key) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.gets_until_ready.remove(&key);
                if let Some(channel) = state.channels.get_mut(&key) {
                    channel.ready = true;
                }
            }
        }
        Ok(state.channels.get(&key).cloned())
    }

    async fn create_channel(&self, channel: &Channel) -> Result<Channel, StoreError> {
        let mut state = self.state.lock();
        state.calls.channel_creates += 1;
        if let Some(err) = state.failures.channel_create.take() {
            return Err(err);
        }

        let key = (channel.namespace.clone(), channel.name.clone());
        if state.channels.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        let mut created = channel.clone();
        match state.readiness {
            Readiness::Immediate => created.ready = true,
            Readiness::AfterGets(gets) => {
                created.ready = false;
                state.gets_until_ready.insert(key.clone(), gets);
            }
            Readiness::Never => created.ready = false,
        }
        state.channels.insert(key, created.clone());
        Ok(created)
    }

    async fn delete_channel(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.calls.channel_deletes += 1;
        if let Some(err) = state.failures.channel_delete.take() {
            return Err(err);
        }
        state
            .channels
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

impl BindingApi for FakeCluster {
    async fn get_binding(&self, namespace: &str, name: &str) -> Result<Option<Binding>, StoreError> {
        let mut state = self.state.lock();
        state.calls.binding_gets += 1;
        Ok(state
            .bindings
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn list_bindings(&self, namespace: &str) -> Result<Vec<Binding>, StoreError> {
        let mut state = self.state.lock();
        state.calls.binding_lists += 1;
        Ok(state
            .bindings
            .values()
            .filter(|binding| binding.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.calls.binding_creates += 1;
        if let Some(err) = state.failures.binding_create.take() {
            return Err(err);
        }
        let key = (binding.namespace.clone(), binding.name.clone());
        if state.bindings.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        state.bindings.insert(key, binding.clone());
        Ok(())
    }

    async fn delete_binding(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.calls.binding_deletes += 1;
        if let Some(err) = state.failures.binding_delete.take() {
            return Err(err);
        }
        state
            .bindings
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}
