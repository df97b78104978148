//! Domain layer types for the tmpmail client.
//!
//! This module contains the core types shared across adapters, monitoring,
//! and storage: accounts with service-tagged credentials, and the normalized
//! message representation.

mod account;
mod message;

pub use account::{Account, Credentials};
pub use message::{Attachment, Message};
