mod health;
mod pool;
mod store;

pub use health::CredentialHealth;
pub use pool::{AcquireError, CredentialPool, CredentialRef};
pub use store::{CredentialStore, CredentialStoreError, FileCredentialStore, MemoryCredentialStore};
