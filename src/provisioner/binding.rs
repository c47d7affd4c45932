use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::store::{BindingApi, StoreError};
use crate::types::Binding;

pub struct BindingProvisioner<B> {
    api: B,
}

/// What [`BindingProvisioner::ensure_binding`] had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingChange {
    Unchanged,
    Created,
    /// The binding had drifted and was deleted and created again.
    Recreated { previous_channel: String },
}

impl<B: BindingApi> BindingProvisioner<B> {
    pub fn new(api: B) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &B {
        &self.api
    }

    /// Makes sure binding `name` links `channel_name` to `subscriber_uri`.
    ///
    /// A drifted binding is deleted and created again; it is never updated.
    pub async fn ensure_binding(
        &self,
        namespace: &str,
        name: &str,
        channel_name: &str,
        subscriber_uri: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<BindingChange> {
        let desired = Binding {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            channel_name: channel_name.to_owned(),
            subscriber_uri: subscriber_uri.to_owned(),
            labels,
        };

        let existing = self.get_binding(namespace, name).await?;
        match existing {
            None => {
                self.api
                    .create_binding(&desired)
                    .await
                    .map_err(Error::store("create binding"))?;
                Ok(BindingChange::Created)
            }
            Some(current) if !current.is_drifted(channel_name, subscriber_uri) => {
                Ok(BindingChange::Unchanged)
            }
            Some(current) => {
                log::info!(
                    "binding {namespace}/{name} drifted (channel {} -> {channel_name}, subscriber {} -> {subscriber_uri})",
                    current.channel_name,
                    current.subscriber_uri,
                );
                self.delete_binding(namespace, name).await?;
                self.api
                    .create_binding(&desired)
                    .await
                    .map_err(|source| Error::DriftRepair {
                        name: name.to_owned(),
                        source,
                    })?;
                Ok(BindingChange::Recreated {
                    previous_channel: current.channel_name,
                })
            }
        }
    }

    pub async fn get_binding(&self, namespace: &str, name: &str) -> Result<Option<Binding>> {
        self.api
            .get_binding(namespace, name)
            .await
            .map_err(Error::store("get binding"))
    }

    /// Deletes the binding. Returns false if it was already gone.
    pub async fn delete_binding(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.api.delete_binding(namespace, name).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(Error::store("delete binding")(err)),
        }
    }

    /// Whether any binding other than `except` targets `channel_name`.
    ///
    /// Always lists the store; cached counts could let one subscription
    /// delete a channel another has just bound to.
    pub async fn channel_has_other_bindings(
        &self,
        namespace: &str,
        channel_name: &str,
        except: &str,
    ) -> Result<bool> {
        let bindings = self
            .api
            .list_bindings(namespace)
            .await
            .map_err(Error::store("list bindings"))?;
        Ok(bindings
            .iter()
            .any(|binding| binding.channel_name == channel_name && binding.name != except))
    }
}
