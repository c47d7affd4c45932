//! Store implementation backed by a Kubernetes cluster.
//!
//! All four object kinds are handled as [`DynamicObject`]s, so no generated
//! CRD types are needed. Reads go straight to the API server.

use std::sync::Arc;

use kube_client::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube_client::{Api, Client};
use kube_core::{ApiResource, DynamicObject, GroupVersionKind};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::provisioner::{BindingProvisioner, ChannelProvisioner};
use crate::reconciler::Reconciler;
use crate::store::{ActivationLookup, BindingApi, ChannelApi, StoreError, SubscriptionStore};
use crate::types::{
    Binding, Channel, EventActivation, Subscription, SubscriptionKey, SubscriptionStatus,
};

pub mod convert;
use convert::store_error;
mod events;
pub use events::{event_for, KubeRecorder};

/// The API types of the objects the controller reads and writes.
#[derive(Debug, Clone)]
pub struct Resources {
    pub subscription: ApiResource,
    pub activation: ApiResource,
    pub channel: ApiResource,
    pub binding: ApiResource,
}

impl Default for Resources {
    fn default() -> Self {
        let resource = |group, version, kind| {
            ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
        };
        Self {
            subscription: resource("eventing.kyma-project.io", "v1alpha1", "Subscription"),
            activation: resource("eventing.kyma-project.io", "v1alpha1", "EventActivation"),
            channel: resource("messaging.knative.dev", "v1alpha1", "Channel"),
            binding: resource("messaging.knative.dev", "v1alpha1", "Subscription"),
        }
    }
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    resources: Arc<Resources>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self::with_resources(client, Resources::default())
    }

    pub fn with_resources(client: Client, resources: Resources) -> Self {
        Self {
            client,
            resources: Arc::new(resources),
        }
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

/// Builds a reconciler that works against the cluster behind `client` and
/// publishes its outcomes as Events on the subscriptions.
pub fn reconciler(
    client: Client,
    resources: Resources,
    config: Config,
) -> Reconciler<KubeStore, KubeStore, KubeStore> {
    let recorder = KubeRecorder::new(
        client.clone(),
        resources.subscription.clone(),
        config.finalizer.clone(),
    );
    let store = KubeStore::with_resources(client, resources);
    Reconciler::new(
        store.clone(),
        ChannelProvisioner::new(store.clone(), config.channel_poll_interval),
        BindingProvisioner::new(store),
        Arc::new(SystemClock),
        config,
    )
    .with_recorder(Arc::new(recorder))
}

impl SubscriptionStore for KubeStore {
    async fn get_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<Subscription>, StoreError> {
        self.api(&self.resources.subscription, &key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(store_error)?
            .as_ref()
            .map(convert::subscription_from_object)
            .transpose()
    }

    async fn update_subscription_status(
        &self,
        key: &SubscriptionKey,
        status: &SubscriptionStatus,
    ) -> Result<(), StoreError> {
        let patch = convert::status_patch(status)?;
        self.api(&self.resources.subscription, &key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn update_subscription_finalizers(
        &self,
        key: &SubscriptionKey,
        finalizers: &[String],
    ) -> Result<(), StoreError> {
        let patch = convert::finalizers_patch(finalizers);
        self.api(&self.resources.subscription, &key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

impl ActivationLookup for KubeStore {
    async fn list_event_activations(
        &self,
        namespace: &str,
        source_id: &str,
    ) -> Result<Vec<EventActivation>, StoreError> {
        let list = self
            .api(&self.resources.activation, namespace)
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;

        let mut activations = Vec::new();
        for object in &list.items {
            match convert::activation_from_object(object) {
                Ok(activation) if activation.source_id == source_id => activations.push(activation),
                Ok(_) => {}
                Err(err) => log::warn!("skipping event activation in {namespace}: {err}"),
            }
        }
        Ok(activations)
    }
}

impl ChannelApi for KubeStore {
    async fn get_channel(&self, namespace: &str, name: &str) -> Result<Option<Channel>, StoreError> {
        let object = self
            .api(&self.resources.channel, namespace)
            .get_opt(name)
            .await
            .map_err(store_error)?;
        Ok(object.as_ref().map(convert::channel_from_object))
    }

    async fn create_channel(&self, channel: &Channel) -> Result<Channel, StoreError> {
        let object = convert::channel_to_object(channel, &self.resources.channel);
        let created = self
            .api(&self.resources.channel, &channel.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(store_error)?;
        log::info!("created channel {}/{}", channel.namespace, channel.name);
        Ok(convert::channel_from_object(&created))
    }

    async fn delete_channel(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(&self.resources.channel, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(store_error)?;
        log::info!("deleted channel {namespace}/{name}");
        Ok(())
    }
}

impl BindingApi for KubeStore {
    async fn get_binding(&self, namespace: &str, name: &str) -> Result<Option<Binding>, StoreError> {
        self.api(&self.resources.binding, namespace)
            .get_opt(name)
            .await
            .map_err(store_error)?
            .as_ref()
            .map(convert::binding_from_object)
            .transpose()
    }

    async fn list_bindings(&self, namespace: &str) -> Result<Vec<Binding>, StoreError> {
        let list = self
            .api(&self.resources.binding, namespace)
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;

        let mut bindings = Vec::new();
        for object in &list.items {
            // Bindings created by others may lack fields this controller sets.
            match convert::binding_from_object(object) {
                Ok(binding) => bindings.push(binding),
                Err(err) => log::debug!("skipping binding in {namespace}: {err}"),
            }
        }
        Ok(bindings)
    }

    async fn create_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        let object = convert::binding_to_object(
            binding,
            &self.resources.binding,
            &self.resources.channel,
        );
        self.api(&self.resources.binding, &binding.namespace)
            .create(&PostParams::default(), &object)
            .await
            .map_err(store_error)?;
        log::info!(
            "created binding {}/{} from channel {} to {}",
            binding.namespace,
            binding.name,
            binding.channel_name,
            binding.subscriber_uri
        );
        Ok(())
    }

    async fn delete_binding(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(&self.resources.binding, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(store_error)?;
        log::info!("deleted binding {namespace}/{name}");
        Ok(())
    }
}
