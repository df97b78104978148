//! Local persistence for provisioned accounts.

mod accounts;

pub use accounts::{AccountStore, StorageError, StoredAccount, MAX_HISTORY};
