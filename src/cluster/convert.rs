//! Conversion between untyped API objects and the typed structs.

use kube_core::{ApiResource, DynamicObject, ResourceExt};
use serde_json::{json, Value};

use crate::store::StoreError;
use crate::types::{
    Binding, Channel, Condition, ConditionType, EventActivation, Subscription, SubscriptionKey,
    SubscriptionSpec, SubscriptionStatus,
};

/// Maps API failures onto the store's error kinds.
pub fn store_error(err: kube_client::Error) -> StoreError {
    if let kube_client::Error::Api(response) = &err {
        match response.code {
            404 => return StoreError::NotFound,
            409 if response.reason == "AlreadyExists" => return StoreError::AlreadyExists,
            409 => return StoreError::Conflict(response.message.clone()),
            _ => {}
        }
    }
    StoreError::Api(err)
}

pub fn key_of(object: &DynamicObject) -> SubscriptionKey {
    SubscriptionKey::new(object.namespace().unwrap_or_default(), object.name_any())
}

fn field<'a>(object: &'a DynamicObject, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(&object.data, |value, segment| value.get(segment))
}

fn str_field(object: &DynamicObject, path: &[&str]) -> Option<String> {
    field(object, path)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

pub fn subscription_from_object(object: &DynamicObject) -> Result<Subscription, StoreError> {
    let key = key_of(object);
    let spec: SubscriptionSpec = serde_json::from_value(
        object.data.get("spec").cloned().unwrap_or(Value::Null),
    )
    .map_err(|err| StoreError::Other(format!("subscription {key} has an invalid spec: {err}")))?;
    let status = status_from_value(&key, object.data.get("status"));

    Ok(Subscription {
        key,
        spec,
        status,
        finalizers: object.finalizers().to_vec(),
        deletion_timestamp: object.metadata.deletion_timestamp.clone(),
    })
}

/// Decodes the status leniently so that other writers cannot wedge the
/// subscription.
///
/// Conditions of foreign types are kept as they are. Malformed conditions of
/// the types this controller owns are dropped and rewritten by the next pass.
fn status_from_value(key: &SubscriptionKey, status: Option<&Value>) -> SubscriptionStatus {
    let mut decoded = SubscriptionStatus::default();
    let Some(conditions) = status
        .and_then(|status| status.get("conditions"))
        .and_then(Value::as_array)
    else {
        return decoded;
    };

    for raw in conditions {
        match serde_json::from_value::<Condition>(raw.clone()) {
            Ok(condition) => decoded.conditions.push(condition),
            Err(err) => {
                let owned = raw
                    .get("type")
                    .and_then(|type_| serde_json::from_value::<ConditionType>(type_.clone()).ok())
                    .is_some();
                if owned {
                    log::warn!("{key}: dropping malformed condition {raw}: {err}");
                } else {
                    decoded.foreign_conditions.push(raw.clone());
                }
            }
        }
    }
    decoded
}

/// Source ID of an untyped subscription, without decoding the whole spec.
pub fn subscription_source_id(object: &DynamicObject) -> Option<String> {
    str_field(object, &["spec", "source_id"])
}

pub fn activation_from_object(object: &DynamicObject) -> Result<EventActivation, StoreError> {
    let source_id = str_field(object, &["spec", "sourceId"]).ok_or_else(|| {
        StoreError::Other(format!(
            "event activation {} has no spec.sourceId",
            object.name_any()
        ))
    })?;
    Ok(EventActivation {
        namespace: object.namespace().unwrap_or_default(),
        name: object.name_any(),
        source_id,
        deleting: object.metadata.deletion_timestamp.is_some(),
    })
}

pub fn channel_from_object(object: &DynamicObject) -> Channel {
    let ready = field(object, &["status", "conditions"])
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|condition| {
                condition.get("type").and_then(Value::as_str) == Some("Ready")
                    && condition.get("status").and_then(Value::as_str) == Some("True")
            })
        });
    let address = str_field(object, &["status", "address", "url"])
        .or_else(|| str_field(object, &["status", "address", "hostname"]));

    Channel {
        namespace: object.namespace().unwrap_or_default(),
        name: object.name_any(),
        labels: object.labels().clone(),
        ready,
        address,
    }
}

pub fn channel_to_object(channel: &Channel, resource: &ApiResource) -> DynamicObject {
    let mut object = DynamicObject::new(&channel.name, resource)
        .within(&channel.namespace)
        .data(json!({ "spec": {} }));
    object.metadata.labels = Some(channel.labels.clone());
    object
}

pub fn binding_from_object(object: &DynamicObject) -> Result<Binding, StoreError> {
    let missing = |path: &str| {
        StoreError::Other(format!("binding {} has no {path}", object.name_any()))
    };
    Ok(Binding {
        namespace: object.namespace().unwrap_or_default(),
        name: object.name_any(),
        channel_name: str_field(object, &["spec", "channel", "name"])
            .ok_or_else(|| missing("spec.channel.name"))?,
        subscriber_uri: str_field(object, &["spec", "subscriber", "uri"])
            .ok_or_else(|| missing("spec.subscriber.uri"))?,
        labels: object.labels().clone(),
    })
}

/// Builds a binding object whose channel reference points at `channel_resource`.
pub fn binding_to_object(
    binding: &Binding,
    resource: &ApiResource,
    channel_resource: &ApiResource,
) -> DynamicObject {
    let mut object = DynamicObject::new(&binding.name, resource)
        .within(&binding.namespace)
        .data(json!({
            "spec": {
                "channel": {
                    "apiVersion": channel_resource.api_version,
                    "kind": channel_resource.kind,
                    "name": binding.channel_name,
                },
                "subscriber": {
                    "uri": binding.subscriber_uri,
                },
            },
        }));
    object.metadata.labels = Some(binding.labels.clone());
    object
}

pub fn status_patch(status: &SubscriptionStatus) -> Result<Value, StoreError> {
    let mut conditions = Vec::with_capacity(status.conditions.len() + status.foreign_conditions.len());
    for condition in &status.conditions {
        conditions.push(
            serde_json::to_value(condition)
                .map_err(|err| StoreError::Other(format!("serializing status: {err}")))?,
        );
    }
    conditions.extend(status.foreign_conditions.iter().cloned());
    Ok(json!({ "status": { "conditions": conditions } }))
}

pub fn finalizers_patch(finalizers: &[String]) -> Value {
    json!({ "metadata": { "finalizers": finalizers } })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube_core::{ErrorResponse, GroupVersionKind};

    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::condition::merge_condition;
    use crate::types::ConditionStatus;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn api_error(code: u16, reason: &str) -> kube_client::Error {
        kube_client::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} happened"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn api_errors_map_to_store_errors() {
        assert!(matches!(store_error(api_error(404, "NotFound")), StoreError::NotFound));
        assert!(matches!(
            store_error(api_error(409, "AlreadyExists")),
            StoreError::AlreadyExists
        ));
        assert!(matches!(
            store_error(api_error(409, "Conflict")),
            StoreError::Conflict(message) if message == "Conflict happened"
        ));
        assert!(matches!(
            store_error(api_error(500, "InternalError")),
            StoreError::Api(_)
        ));
    }

    #[test]
    fn subscription_is_decoded_with_status_and_markers() {
        let sub = subscription_from_object(&object(json!({
            "apiVersion": "eventing.kyma-project.io/v1alpha1",
            "kind": "Subscription",
            "metadata": {
                "name": "order-sub",
                "namespace": "shop",
                "finalizers": ["subscription-controller"],
                "deletionTimestamp": "2024-01-01T00:00:00Z",
            },
            "spec": {
                "endpoint": "https://sub/v1",
                "source_id": "app1",
                "event_type": "order.created",
                "event_type_version": "v1",
                "max_inflight": 400,
                "include_subscription_name_header": true,
            },
            "status": {
                "conditions": [
                    { "type": "EventsActivated", "status": "True", "lastTransitionTime": "2024-01-01T00:00:00Z" },
                ],
            },
        })))
        .unwrap();

        assert_eq!(sub.key, SubscriptionKey::new("shop", "order-sub"));
        assert_eq!(sub.spec.endpoint, "https://sub/v1");
        assert_eq!(sub.spec.max_inflight, Some(400));
        assert!(sub.spec.include_subscription_name_header);
        assert_eq!(sub.finalizers, vec!["subscription-controller".to_owned()]);
        assert!(sub.is_terminating());
        assert_eq!(sub.status.conditions.len(), 1);
        assert_eq!(sub.status.conditions[0].type_, ConditionType::EventsActivated);
        assert_eq!(sub.status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn conditions_written_by_others_do_not_break_decoding() {
        let sub = subscription_from_object(&object(json!({
            "metadata": {
                "name": "order-sub",
                "namespace": "shop",
                "finalizers": ["subscription-controller"],
                "deletionTimestamp": "2024-01-01T00:00:00Z",
            },
            "spec": {
                "endpoint": "https://sub/v1",
                "source_id": "app1",
                "event_type": "order.created",
                "event_type_version": "v1",
            },
            "status": {
                "conditions": [
                    { "type": "Ready", "status": "Unknown" },
                    { "type": "SubscriptionReady", "status": "True", "reason": "Legacy" },
                    { "type": "BindingReady", "status": "Maybe" },
                ],
            },
        })))
        .unwrap();

        assert!(sub.is_terminating());
        assert_eq!(sub.status.conditions.len(), 1);
        assert_eq!(sub.status.conditions[0].type_, ConditionType::Ready);
        assert_eq!(sub.status.conditions[0].status, ConditionStatus::Unknown);
        assert_eq!(
            sub.status.foreign_conditions,
            vec![json!({ "type": "SubscriptionReady", "status": "True", "reason": "Legacy" })]
        );

        let mut sub = sub;
        let clock = FixedClock::at_unix(0);
        merge_condition(&mut sub, Condition::new(ConditionType::Ready, false), &clock);
        let patch = status_patch(&sub.status).unwrap();
        let conditions = patch["status"]["conditions"].as_array().unwrap();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0]["type"], "Ready");
        assert_eq!(conditions[0]["status"], "False");
        assert_eq!(conditions[1]["type"], "SubscriptionReady");
    }

    #[test]
    fn subscription_without_spec_is_rejected() {
        let err = subscription_from_object(&object(json!({
            "metadata": { "name": "broken", "namespace": "shop" },
        })))
        .unwrap_err();
        assert!(matches!(err, StoreError::Other(message) if message.contains("shop/broken")));
    }

    #[test]
    fn status_patch_uses_api_field_names() {
        let clock = FixedClock::at_unix(0);
        let mut sub = Subscription::new(SubscriptionKey::new("shop", "a"), SubscriptionSpec::default());
        merge_condition(
            &mut sub,
            Condition::new(ConditionType::Ready, false).with_reason("ChannelNotReady", "waiting"),
            &clock,
        );

        let patch = status_patch(&sub.status).unwrap();

        let condition = &patch["status"]["conditions"][0];
        assert_eq!(condition["type"], "Ready");
        assert_eq!(condition["status"], "False");
        assert_eq!(condition["reason"], "ChannelNotReady");
        assert_eq!(condition["message"], "waiting");
        assert_eq!(
            serde_json::from_value::<Time>(condition["lastTransitionTime"].clone()).unwrap(),
            clock.now()
        );
    }

    #[test]
    fn activation_reports_deletion() {
        let activation = activation_from_object(&object(json!({
            "metadata": {
                "name": "app1",
                "namespace": "shop",
                "deletionTimestamp": "2024-01-01T00:00:00Z",
            },
            "spec": { "displayName": "App 1", "sourceId": "app1" },
        })))
        .unwrap();

        assert_eq!(activation.source_id, "app1");
        assert!(activation.deleting);
    }

    #[test]
    fn channel_readiness_comes_from_ready_condition() {
        let channel = channel_from_object(&object(json!({
            "metadata": { "name": "ch-1", "namespace": "shop", "labels": { "a": "b" } },
            "status": {
                "address": { "hostname": "ch-1.shop.svc" },
                "conditions": [
                    { "type": "Addressable", "status": "True" },
                    { "type": "Ready", "status": "True" },
                ],
            },
        })));
        assert!(channel.ready);
        assert_eq!(channel.address.as_deref(), Some("ch-1.shop.svc"));
        assert_eq!(channel.labels["a"], "b");

        let pending = channel_from_object(&object(json!({
            "metadata": { "name": "ch-2", "namespace": "shop" },
            "status": { "conditions": [{ "type": "Ready", "status": "Unknown" }] },
        })));
        assert!(!pending.ready);
    }

    #[test]
    fn binding_object_references_channel_kind() {
        let binding_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "messaging.knative.dev",
            "v1alpha1",
            "Subscription",
        ));
        let channel_resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            "messaging.knative.dev",
            "v1alpha1",
            "Channel",
        ));
        let binding = Binding {
            namespace: "shop".into(),
            name: "sub-1".into(),
            channel_name: "ch-1".into(),
            subscriber_uri: "https://sub/v1".into(),
            labels: [("k".to_owned(), "v".to_owned())].into(),
        };

        let object = binding_to_object(&binding, &binding_resource, &channel_resource);

        assert_eq!(object.data["spec"]["channel"]["kind"], "Channel");
        assert_eq!(
            object.data["spec"]["channel"]["apiVersion"],
            "messaging.knative.dev/v1alpha1"
        );
        assert_eq!(binding_from_object(&object).unwrap(), binding);
    }

    #[test]
    fn finalizer_patch_replaces_the_list() {
        let patch = finalizers_patch(&["a".to_owned()]);
        assert_eq!(patch, json!({ "metadata": { "finalizers": ["a"] } }));
    }
}
