use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("invalid provider name: {0}")]
    InvalidProvider(String),
    #[error("credential store io: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable backing for credential lists.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Secrets for `provider`, minus anything recorded as invalid.
    async fn load(&self, provider: &str) -> Result<Vec<String>, CredentialStoreError>;

    /// Drops `secret` from the provider's list.
    async fn remove(&self, provider: &str, secret: &str) -> Result<(), CredentialStoreError>;

    /// Appends `secret` to the provider's invalid log.
    async fn append_invalid(&self, provider: &str, secret: &str)
    -> Result<(), CredentialStoreError>;
}

/// One secret per line in `{dir}/{provider}.txt`, invalidated ones in
/// `{dir}/{provider}.invalid.txt`.
pub struct FileCredentialStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, provider: &str, suffix: &str) -> Result<PathBuf, CredentialStoreError> {
        let valid = !provider.is_empty()
            && provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CredentialStoreError::InvalidProvider(provider.to_string()));
        }
        Ok(self.dir.join(format!("{provider}{suffix}")))
    }

    async fn read_lines(path: &Path) -> Result<Vec<String>, CredentialStoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, provider: &str) -> Result<Vec<String>, CredentialStoreError> {
        let keys = Self::read_lines(&self.path_for(provider, ".txt")?).await?;
        let invalid: HashSet<String> =
            Self::read_lines(&self.path_for(provider, ".invalid.txt")?)
                .await?
                .into_iter()
                .collect();
        Ok(keys.into_iter().filter(|k| !invalid.contains(k)).collect())
    }

    async fn remove(&self, provider: &str, secret: &str) -> Result<(), CredentialStoreError> {
        let path = self.path_for(provider, ".txt")?;
        let _guard = self.write_lock.lock().await;
        let keys = Self::read_lines(&path).await?;
        let kept: Vec<String> = keys.into_iter().filter(|k| k != secret).collect();
        let mut body = kept.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn append_invalid(
        &self,
        provider: &str,
        secret: &str,
    ) -> Result<(), CredentialStoreError> {
        let path = self.path_for(provider, ".invalid.txt")?;
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(format!("{secret}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    keys: HashMap<String, Vec<String>>,
    invalid: HashMap<String, Vec<String>>,
}

/// In-process store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<MemoryState>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, provider: &str, secrets: Vec<String>) {
        self.state
            .lock()
            .await
            .keys
            .insert(provider.to_string(), secrets);
    }

    pub async fn invalid(&self, provider: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .invalid
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, provider: &str) -> Result<Vec<String>, CredentialStoreError> {
        let state = self.state.lock().await;
        let invalid = state.invalid.get(provider);
        Ok(state
            .keys
            .get(provider)
            .map(|keys| {
                keys.iter()
                    .filter(|k| invalid.is_none_or(|inv| !inv.contains(k)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, provider: &str, secret: &str) -> Result<(), CredentialStoreError> {
        if let Some(keys) = self.state.lock().await.keys.get_mut(provider) {
            keys.retain(|k| k != secret);
        }
        Ok(())
    }

    async fn append_invalid(
        &self,
        provider: &str,
        secret: &str,
    ) -> Result<(), CredentialStoreError> {
        self.state
            .lock()
            .await
            .invalid
            .entry(provider.to_string())
            .or_default()
            .push(secret.to_string());
        Ok(())
    }
}
