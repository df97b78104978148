//! Provider adapters for the supported disposable-mail services.
//!
//! Each backend gets one adapter implementing [`MailProvider`]; the
//! [`ProviderRegistry`] is the only way the rest of the crate instantiates
//! them.

mod guerrillamail;
mod mailtm;
mod registry;
mod session;
mod tempmail_plus;
mod traits;

pub use guerrillamail::GuerrillaMailProvider;
pub use mailtm::MailTmProvider;
pub use registry::{ProviderFactory, ProviderRegistry};
pub use session::{poll_loop, MonitorSignal};
pub use tempmail_plus::{TempMailPlusProvider, DOMAINS};
pub use traits::{CreateOptions, MailProvider, ProviderError, Result};

use rand::distr::Alphanumeric;
use rand::Rng;

/// Random alphanumeric token for generated local parts and passwords.
pub(crate) fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_token_has_requested_length() {
        let token = random_token(12);
        assert_eq!(token.len(), 12);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_tokens_differ() {
        assert_ne!(random_token(16), random_token(16));
    }
}
