//! Get-or-create and delete for the objects a subscription is realised with.
//!
//! Provisioners never cache; every decision starts from a fresh read.

mod binding;
pub use binding::{BindingChange, BindingProvisioner};

mod channel;
pub use channel::{ChannelProvisioner, EnsuredChannel};
