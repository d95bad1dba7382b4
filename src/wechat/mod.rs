//! Official-account webhook protocol: callback signatures and XML messages.

pub mod message;
pub mod signature;

pub use message::{InboundMessage, MSG_TYPE_TEXT, OutboundMessage};
pub use signature::{compute_signature, verify_signature};
