use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::naming;
use crate::store::{ChannelApi, StoreError};
use crate::types::{Channel, EventCoordinate};

pub struct ChannelProvisioner<C> {
    api: C,
    poll_interval: Duration,
}

/// A ready channel, and whether this call created it.
#[derive(Debug, Clone)]
pub struct EnsuredChannel {
    pub channel: Channel,
    pub created: bool,
}

impl<C: ChannelApi> ChannelProvisioner<C> {
    pub fn new(api: C, poll_interval: Duration) -> Self {
        Self { api, poll_interval }
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// Returns the ready channel for `coordinate`, creating it if needed.
    ///
    /// A channel that is not ready yet is polled until it is, `timeout`
    /// elapses or `cancel` fires.
    pub async fn ensure_channel(
        &self,
        namespace: &str,
        coordinate: &EventCoordinate,
        labels: BTreeMap<String, String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<EnsuredChannel> {
        let name = naming::channel_name(coordinate);

        let existing = self
            .api
            .get_channel(namespace, &name)
            .await
            .map_err(Error::store("get channel"))?;

        let created = match existing {
            Some(channel) if channel.ready => {
                return Ok(EnsuredChannel {
                    channel,
                    created: false,
                })
            }
            Some(_) => false,
            None => {
                let desired = Channel {
                    namespace: namespace.to_owned(),
                    name: name.clone(),
                    labels,
                    ready: false,
                    address: None,
                };
                match self.api.create_channel(&desired).await {
                    Ok(_) => true,
                    Err(StoreError::AlreadyExists) => {
                        log::debug!("channel {namespace}/{name} was created concurrently");
                        false
                    }
                    Err(err) => return Err(Error::store("create channel")(err)),
                }
            }
        };

        let channel = self
            .wait_until_ready(namespace, &name, timeout, cancel)
            .await?;
        Ok(EnsuredChannel { channel, created })
    }

    async fn wait_until_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Channel> {
        let poll = async {
            let mut tick = tokio::time::interval(self.poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match self.api.get_channel(namespace, name).await {
                    Ok(Some(channel)) if channel.ready => return channel,
                    Ok(Some(_)) => {}
                    Ok(None) => log::debug!("channel {namespace}/{name} not visible yet"),
                    Err(err) => log::warn!("polling channel {namespace}/{name}: {err}"),
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            polled = tokio::time::timeout(timeout, poll) => polled.map_err(|_| Error::ChannelTimeout {
                name: name.to_owned(),
                timeout,
            }),
        }
    }

    pub async fn get_channel(&self, namespace: &str, name: &str) -> Result<Option<Channel>> {
        self.api
            .get_channel(namespace, name)
            .await
            .map_err(Error::store("get channel"))
    }

    /// Deletes the channel. Returns false if it was already gone.
    pub async fn delete_channel(&self, namespace: &str, name: &str) -> Result<bool> {
        match self.api.delete_channel(namespace, name).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(Error::store("delete channel")(err)),
        }
    }
}
