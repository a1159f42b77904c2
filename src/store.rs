//! Flat-file credential store
//!
//! One token per line, order preserved. Every mutation re-reads the file,
//! applies the change and writes it back, so the on-disk list is the source of
//! truth between steps of a pass. Single writer only: there is no locking.

use crate::error::StorageError;
use crate::types::Credential;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted list, dropping blank lines. A missing file is an
    /// empty store.
    pub async fn load(&self) -> Result<Vec<Credential>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(parse_lines(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Credential store {} not found, starting empty", self.path.display());
                Ok(Vec::new())
            }
            Err(source) => Err(StorageError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Overwrite the store with `credentials`
    pub async fn persist(&self, credentials: &[Credential]) -> Result<(), StorageError> {
        let mut contents = String::new();
        for credential in credentials {
            contents.push_str(credential.as_str());
            contents.push('\n');
        }

        let write_err = |source| StorageError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    /// Add a credential at the end unless it is already stored
    pub async fn append(&self, credential: Credential) -> Result<bool, StorageError> {
        let mut current = self.load().await?;
        if current.contains(&credential) {
            info!("Credential {} already stored, skipping", credential);
            return Ok(false);
        }
        current.push(credential);
        self.persist(&current).await?;
        Ok(true)
    }

    /// Overwrite the credential at `index`. No-op if the new credential is
    /// already stored anywhere else.
    pub async fn replace_at(&self, index: usize, credential: Credential) -> Result<bool, StorageError> {
        let mut current = self.load().await?;
        if current
            .iter()
            .enumerate()
            .any(|(i, c)| i != index && *c == credential)
        {
            warn!("Replacement {} already stored, skipping slot {}", credential, index);
            return Ok(false);
        }
        match current.get_mut(index) {
            Some(slot) => *slot = credential,
            None => current.push(credential),
        }
        self.persist(&current).await?;
        Ok(true)
    }

    /// Insert a credential at `index` (clamped to the end). No-op if it is
    /// already stored.
    pub async fn insert_at(&self, index: usize, credential: Credential) -> Result<bool, StorageError> {
        let mut current = self.load().await?;
        if current.contains(&credential) {
            warn!("Replacement {} already stored, skipping slot {}", credential, index);
            return Ok(false);
        }
        let index = index.min(current.len());
        current.insert(index, credential);
        self.persist(&current).await?;
        Ok(true)
    }

    /// Drop the credential at `index` and persist
    pub async fn remove_at(&self, index: usize) -> Result<Option<Credential>, StorageError> {
        let mut current = self.load().await?;
        if index >= current.len() {
            return Ok(None);
        }
        let removed = current.remove(index);
        self.persist(&current).await?;
        Ok(Some(removed))
    }

    /// Drop a credential wherever it currently sits. Returns the index it was
    /// removed from.
    pub async fn remove(&self, credential: &Credential) -> Result<Option<usize>, StorageError> {
        let current = self.load().await?;
        match current.iter().position(|c| c == credential) {
            Some(index) => {
                self.remove_at(index).await?;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }
}

fn parse_lines(contents: &str) -> Vec<Credential> {
    contents
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .map(Credential::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn creds(tokens: &[&str]) -> Vec<Credential> {
        tokens.iter().map(|t| Credential::new(*t)).collect()
    }

    fn store_in(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("data.txt"))
    }

    #[tokio::test]
    async fn test_load_strips_blank_lines_and_keeps_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "A\r\n\n  \nB\nC").await.unwrap();

        assert_eq!(store.load().await.unwrap(), creds(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be read as a file
        let store = CredentialStore::new(dir.path());
        assert!(matches!(store.load().await, Err(StorageError::Read { .. })));
    }

    #[tokio::test]
    async fn test_persist_writes_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.persist(&creds(&["A", "B"])).await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(raw, "A\nB\n");
    }

    #[tokio::test]
    async fn test_append_skips_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.append(Credential::new("A")).await.unwrap());
        assert!(!store.append(Credential::new("A")).await.unwrap());
        assert_eq!(store.load().await.unwrap(), creds(&["A"]));
    }

    #[tokio::test]
    async fn test_replace_at_skips_duplicate_elsewhere() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.persist(&creds(&["A", "B", "C"])).await.unwrap();

        assert!(!store.replace_at(1, Credential::new("C")).await.unwrap());
        assert_eq!(store.load().await.unwrap(), creds(&["A", "B", "C"]));

        assert!(store.replace_at(1, Credential::new("D")).await.unwrap());
        assert_eq!(store.load().await.unwrap(), creds(&["A", "D", "C"]));
    }

    #[tokio::test]
    async fn test_remove_then_insert_preserves_neighbours() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.persist(&creds(&["A", "B", "C"])).await.unwrap();

        assert_eq!(store.remove(&Credential::new("B")).await.unwrap(), Some(1));
        assert_eq!(store.load().await.unwrap(), creds(&["A", "C"]));

        assert!(store.insert_at(1, Credential::new("D")).await.unwrap());
        assert_eq!(store.load().await.unwrap(), creds(&["A", "D", "C"]));

        assert!(!store.insert_at(0, Credential::new("C")).await.unwrap());
        assert!(store.insert_at(99, Credential::new("E")).await.unwrap());
        assert_eq!(store.load().await.unwrap(), creds(&["A", "D", "C", "E"]));
    }

    #[tokio::test]
    async fn test_remove_at_out_of_range() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.persist(&creds(&["A"])).await.unwrap();
        assert_eq!(store.remove_at(3).await.unwrap(), None);
        assert_eq!(store.remove_at(0).await.unwrap(), Some(Credential::new("A")));
        assert!(store.load().await.unwrap().is_empty());
    }
}
