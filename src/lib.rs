//! event-subscription-controller keeps event subscriptions consistent with
//! the pub/sub objects that deliver their events.
//!
//! Every distinct (source, event type, version) coordinate gets one shared
//! channel, and every subscription gets one binding from that channel to its
//! endpoint. Provisioning starts once an event activation exists for the
//! subscription's source, and everything is torn down again when the
//! activation disappears or the subscription is deleted.
//!
//! The [`Reconciler`] converges one subscription per call and is safe to call
//! any number of times. [`run`] drives it from a stream of keys, such as
//! [`subscriber::triggers`], with a pool of workers.

pub mod clock;
pub mod cluster;
pub mod condition;
pub mod config;
pub use config::Config;
mod error;
pub use error::{Error, Result};
pub mod finalizer;
pub mod naming;
pub mod provisioner;
pub use provisioner::{BindingProvisioner, ChannelProvisioner};
mod reconciler;
pub use reconciler::{Phase, Reconciler};
pub mod recorder;
mod runner;
pub use runner::{run, RunError, WorkQueue};
pub mod store;
pub mod subscriber;
pub mod types;

#[cfg(test)]
mod testing;
