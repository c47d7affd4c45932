//! Interfaces to the external store.
//!
//! [`crate::cluster`] implements these against a Kubernetes cluster.

use std::future::Future;

use crate::types::{Binding, Channel, EventActivation, Subscription, SubscriptionKey, SubscriptionStatus};

/// Errors returned by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("conflicting update: {0}")]
    Conflict(String),
    #[error("API request failed: {0}")]
    Api(#[source] kube_client::Error),
    #[error("{0}")]
    Other(String),
}

pub trait SubscriptionStore: Send + Sync {
    /// Returns `None` if the subscription does not exist.
    fn get_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> impl Future<Output = Result<Option<Subscription>, StoreError>> + Send;

    fn update_subscription_status(
        &self,
        key: &SubscriptionKey,
        status: &SubscriptionStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn update_subscription_finalizers(
        &self,
        key: &SubscriptionKey,
        finalizers: &[String],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub trait ActivationLookup: Send + Sync {
    /// Lists the activations in `namespace` asserting events for `source_id`.
    fn list_event_activations(
        &self,
        namespace: &str,
        source_id: &str,
    ) -> impl Future<Output = Result<Vec<EventActivation>, StoreError>> + Send;
}

pub trait ChannelApi: Send + Sync {
    fn get_channel(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Channel>, StoreError>> + Send;

    /// Fails with [`StoreError::AlreadyExists`] if the name is taken.
    fn create_channel(
        &self,
        channel: &Channel,
    ) -> impl Future<Output = Result<Channel, StoreError>> + Send;

    /// Fails with [`StoreError::NotFound`] if there is nothing to delete.
    fn delete_channel(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Bindings are never updated in place, so there is no update operation.
pub trait BindingApi: Send + Sync {
    fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<Binding>, StoreError>> + Send;

    fn list_bindings(
        &self,
        namespace: &str,
    ) -> impl Future<Output = Result<Vec<Binding>, StoreError>> + Send;

    /// Fails with [`StoreError::AlreadyExists`] if the name is taken.
    fn create_binding(
        &self,
        binding: &Binding,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fails with [`StoreError::NotFound`] if there is nothing to delete.
    fn delete_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
