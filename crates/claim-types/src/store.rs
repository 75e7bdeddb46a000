//! # Claim Store
//!
//! Persistence capability for raw claim payloads, keyed by claim identifier
//! (account public key or activation hash).

use crate::errors::StoreError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// File extension used by [`DirClaimStore`].
pub const CLAIM_FILE_EXTENSION: &str = "jwt";

/// Abstract interface for claim persistence.
///
/// Writes are upserts: saving the same identifier twice keeps the latest
/// payload.
pub trait ClaimStore: Send + Sync {
    /// Save a raw claim payload under `id`.
    fn save(&self, id: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Load the raw claim payload stored under `id`.
    fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory claim store.
#[derive(Default)]
pub struct MemoryClaimStore {
    claims: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.read().is_empty()
    }
}

impl ClaimStore for MemoryClaimStore {
    fn save(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        validate_key(id)?;
        self.claims.write().insert(id.to_string(), payload.to_vec());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.claims.read().get(id).cloned())
    }
}

/// Directory-backed claim store: one `<id>.jwt` file per claim.
///
/// Writes go through a temporary file followed by a rename so readers never
/// see a partially written claim.
pub struct DirClaimStore {
    root: PathBuf,
    read_only: bool,
}

impl DirClaimStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Opened directory claim store");
        Ok(Self {
            root,
            read_only: false,
        })
    }

    /// Open an existing directory without allowing writes.
    pub fn open_read_only<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(StoreError::Io(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            read_only: true,
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{CLAIM_FILE_EXTENSION}"))
    }
}

impl ClaimStore for DirClaimStore {
    fn save(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        validate_key(id)?;

        // Unique temp file per write; dropped (and removed) on any failure.
        let mut file = NamedTempFile::new_in(&self.root)?;
        file.write_all(payload)?;
        file.as_file().sync_all()?;
        file.persist(self.path_for(id)).map_err(|e| e.error)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(id)?;
        match std::fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject identifiers that cannot be used as a flat storage key.
fn validate_key(id: &str) -> Result<(), StoreError> {
    let invalid = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.contains("..");
    if invalid {
        return Err(StoreError::InvalidKey(id.to_string()));
    }
    Ok(())
}
