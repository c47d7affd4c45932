//! Strongly-typed views of the objects the reconciler works with.
//!
//! The cluster adapter converts the untyped API objects into these structs,
//! so nothing below the adapter deals with raw JSON.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

/// Uniquely identifies a subscription by namespace and name.
///
/// This is the unit of de-duplication and serialization in the work queue.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    /// The subscription namespace
    pub namespace: String,
    /// The subscription name
    pub name: String,
}

impl SubscriptionKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The (source, type, version) coordinate that events are published under.
///
/// One channel exists per distinct coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventCoordinate {
    pub source_id: String,
    pub event_type: String,
    pub event_type_version: String,
}

/// Desired state of a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SubscriptionSpec {
    /// Subscriber URI events are delivered to.
    pub endpoint: String,
    pub source_id: String,
    pub event_type: String,
    pub event_type_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inflight: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_request_timeout_ms: Option<i64>,
    #[serde(default)]
    pub include_subscription_name_header: bool,
}

impl SubscriptionSpec {
    pub fn coordinate(&self) -> EventCoordinate {
        EventCoordinate {
            source_id: self.source_id.clone(),
            event_type: self.event_type.clone(),
            event_type_version: self.event_type_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    EventsActivated,
    ChannelReady,
    /// The binding between channel and subscriber is in place.
    BindingReady,
    Ready,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EventsActivated => "EventsActivated",
            Self::ChannelReady => "ChannelReady",
            Self::BindingReady => "BindingReady",
            Self::Ready => "Ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    /// Written by other tooling; never set by this controller.
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Condition {
    pub fn new(type_: ConditionType, status: impl Into<ConditionStatus>) -> Self {
        Self {
            type_,
            status: status.into(),
            last_transition_time: None,
            reason: String::new(),
            message: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>, message: impl Into<String>) -> Self {
        self.reason = reason.into();
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Conditions of types this controller does not own, kept verbatim so
    /// status writes do not drop them.
    #[serde(skip)]
    pub foreign_conditions: Vec<serde_json::Value>,
}

/// A subscription as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub key: SubscriptionKey,
    pub spec: SubscriptionSpec,
    pub status: SubscriptionStatus,
    pub finalizers: Vec<String>,
    /// Set once deletion of the subscription has been requested.
    pub deletion_timestamp: Option<Time>,
}

impl Subscription {
    pub fn new(key: SubscriptionKey, spec: SubscriptionSpec) -> Self {
        Self {
            key,
            spec,
            status: SubscriptionStatus::default(),
            finalizers: Vec::new(),
            deletion_timestamp: None,
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// An externally owned assertion that events of a source are flowing.
#[derive(Debug, Clone, PartialEq)]
pub struct EventActivation {
    pub namespace: String,
    pub name: String,
    pub source_id: String,
    pub deleting: bool,
}

/// A shared delivery primitive for one [`EventCoordinate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ready: bool,
    /// Ingress address, once the channel has one.
    pub address: Option<String>,
}

/// Links one channel to one subscriber URI on behalf of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
    pub channel_name: String,
    pub subscriber_uri: String,
    pub labels: BTreeMap<String, String>,
}

impl Binding {
    /// Whether this binding deviates from the desired channel or subscriber.
    ///
    /// Labels are not compared.
    pub fn is_drifted(&self, channel_name: &str, subscriber_uri: &str) -> bool {
        self.channel_name != channel_name || self.subscriber_uri != subscriber_uri
    }
}
