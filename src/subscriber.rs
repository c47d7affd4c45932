//! Trigger streams that turn cluster changes into reconcile keys.

use futures::{stream, Stream, TryStreamExt};
use kube_client::{Api, Client};
use kube_core::{DynamicObject, ResourceExt};
use kube_runtime::{reflector, watcher, WatchStreamExt};

use crate::cluster::{convert, Resources};
use crate::naming;
use crate::types::{EventActivation, SubscriptionKey};

/// Yields the key of every touched subscription, plus the keys of all
/// subscriptions sharing the namespace and source of every touched event
/// activation, plus the owner of every touched binding.
///
/// Binding changes made by others, including deletion, bring the owning
/// subscription back to repair them. Status writes by the reconciler touch the subscription too, which is what
/// drives a subscription through its phases one pass at a time.
pub fn triggers(
    client: Client,
    resources: &Resources,
    watcher_config: watcher::Config,
) -> impl Stream<Item = Result<SubscriptionKey, watcher::Error>> + Send {
    let writer = reflector::store::Writer::new(resources.subscription.clone());
    let subscriptions = writer.as_reader();

    let subscription_keys = reflector(
        writer,
        watcher(
            Api::<DynamicObject>::all_with(client.clone(), &resources.subscription),
            watcher_config.clone(),
        ),
    )
    .touched_objects()
    .map_ok(|object| convert::key_of(&object));

    let binding_keys = watcher(
        Api::<DynamicObject>::all_with(client.clone(), &resources.binding),
        watcher_config.clone(),
    )
    .touched_objects()
    .map_ok(|object| stream::iter(key_for_binding(&object).map(Ok::<_, watcher::Error>)))
    .try_flatten();

    let activation_keys = watcher(
        Api::<DynamicObject>::all_with(client, &resources.activation),
        watcher_config,
    )
    .touched_objects()
    .map_ok(move |object| {
        let keys = match convert::activation_from_object(&object) {
            Ok(activation) => {
                let state = subscriptions.state();
                keys_for_activation(state.iter().map(|object| &**object), &activation)
            }
            Err(err) => {
                log::warn!("ignoring event activation: {err}");
                Vec::new()
            }
        };
        stream::iter(keys.into_iter().map(Ok::<_, watcher::Error>))
    })
    .try_flatten();

    stream::select(subscription_keys, stream::select(activation_keys, binding_keys))
}

/// Key of the subscription that owns `binding`, read from its labels.
///
/// Label values may be shortened, so the key is only trusted if it names the
/// binding it was read from.
fn key_for_binding(binding: &DynamicObject) -> Option<SubscriptionKey> {
    let labels = binding.labels();
    let key = SubscriptionKey::new(
        labels.get(naming::LABEL_SUBSCRIPTION_NAMESPACE)?,
        labels.get(naming::LABEL_SUBSCRIPTION_NAME)?,
    );
    (naming::binding_name(&key) == binding.name_any()).then_some(key)
}

/// Keys of the subscriptions that consume events announced by `activation`.
fn keys_for_activation<'a>(
    subscriptions: impl IntoIterator<Item = &'a DynamicObject>,
    activation: &EventActivation,
) -> Vec<SubscriptionKey> {
    subscriptions
        .into_iter()
        .filter(|object| {
            object.metadata.namespace.as_deref() == Some(activation.namespace.as_str())
                && convert::subscription_source_id(object).as_deref()
                    == Some(activation.source_id.as_str())
        })
        .map(convert::key_of)
        .collect()
}
