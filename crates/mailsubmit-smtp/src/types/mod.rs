//! Core SMTP types.

mod address;
mod envelope;
mod extension;
mod reply;

pub use address::Address;
pub use envelope::{Envelope, Payload};
pub use extension::{AuthMechanism, AuthMechanisms, Extension, Extensions};
pub use reply::{EnhancedStatus, Reply, ReplyCode};
