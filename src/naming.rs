//! Deterministic names and labels for provisioned objects.
//!
//! Names are hex digests, so they are valid object names regardless of what
//! characters the subscription fields contain. Each field is escaped before
//! joining so that distinct inputs never produce the same pre-image.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::types::{EventCoordinate, SubscriptionKey};

/// Object names may not start with a digit, which a hex digest might.
const CHANNEL_PREFIX: &str = "ch-";
const BINDING_PREFIX: &str = "sub-";

/// Hex characters kept from the digest (160 bits).
const DIGEST_LEN: usize = 40;

pub const LABEL_SOURCE_ID: &str = "eventing.subscription/source-id";
pub const LABEL_EVENT_TYPE: &str = "eventing.subscription/event-type";
pub const LABEL_EVENT_TYPE_VERSION: &str = "eventing.subscription/event-type-version";
pub const LABEL_SUBSCRIPTION_NAMESPACE: &str = "eventing.subscription/subscription-namespace";
pub const LABEL_SUBSCRIPTION_NAME: &str = "eventing.subscription/subscription-name";

/// Name of the channel shared by all subscriptions of `coordinate`.
pub fn channel_name(coordinate: &EventCoordinate) -> String {
    hashed_name(
        CHANNEL_PREFIX,
        &[
            &coordinate.source_id,
            &coordinate.event_type,
            &coordinate.event_type_version,
        ],
    )
}

/// Name of the binding owned by the subscription `key`.
pub fn binding_name(key: &SubscriptionKey) -> String {
    hashed_name(BINDING_PREFIX, &[&key.namespace, &key.name])
}

pub fn channel_labels(coordinate: &EventCoordinate) -> BTreeMap<String, String> {
    [
        (LABEL_SOURCE_ID, &coordinate.source_id),
        (LABEL_EVENT_TYPE, &coordinate.event_type),
        (LABEL_EVENT_TYPE_VERSION, &coordinate.event_type_version),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), label_value(value)))
    .collect()
}

pub fn binding_labels(key: &SubscriptionKey, coordinate: &EventCoordinate) -> BTreeMap<String, String> {
    let mut labels = channel_labels(coordinate);
    labels.insert(
        LABEL_SUBSCRIPTION_NAMESPACE.to_owned(),
        label_value(&key.namespace),
    );
    labels.insert(LABEL_SUBSCRIPTION_NAME.to_owned(), label_value(&key.name));
    labels
}

fn hashed_name(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"-s");
        }
        hasher.update(escape(part).as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("{prefix}{}", &digest[..DIGEST_LEN])
}

/// Escapes `-` and `.` so the `-s` separator cannot occur inside a field.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '-' => escaped.push_str("--"),
            '.' => escaped.push_str("-d"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Label values are limited to 63 alphanumerics, `-`, `_` or `.`, and must
/// start and end alphanumeric.
fn label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_owned()
}
