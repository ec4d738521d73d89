//! Stable storage for the registry document.
//!
//! Host builds keep the document in a file under `~/.claymore-clacker/`.
//! ESP32 builds use the NVS-backed implementation in `platform::esp`.

use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Byte-level persistence for one document.
pub trait Storage {
    /// Read the stored document, `None` if nothing was ever written.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replace the stored document.
    fn store(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Delete the stored document. Deleting a missing document succeeds.
    fn remove(&mut self) -> io::Result<()>;
}

/// Get the default data directory.
///
/// Returns `~/.claymore-clacker`
pub fn default_data_dir() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".claymore-clacker"))
}

/// Registry file name for a device hostname.
pub fn registry_file_name(hostname: &str) -> String {
    format!("db_{}.json", hostname)
}

/// Document stored in a single file, rewritten in full on every store.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl Storage for FileStorage {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No registry file at {:?}", self.path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn store(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Truncate and rewrite.
        fs::write(&self.path, bytes)?;

        // Verify write by reading back
        let read_back = fs::read(&self.path)?;
        if read_back != bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "registry verification failed: wrote {} bytes, read {} bytes",
                    bytes.len(),
                    read_back.len()
                ),
            ));
        }
        Ok(())
    }

    fn remove(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Deleted registry file {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::unique_path;
    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let storage = FileStorage::new(unique_path("missing"));
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_store_load_remove() {
        let path = unique_path("roundtrip");
        let mut storage = FileStorage::new(&path);

        storage.store(b"{\"a\":1}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));

        // Shorter rewrite must not leave a tail behind.
        storage.store(b"{}").unwrap();
        assert_eq!(storage.load().unwrap().as_deref(), Some(&b"{}"[..]));

        storage.remove().unwrap();
        assert!(!storage.exists());
        storage.remove().unwrap();
    }

    #[test]
    fn test_store_into_unwritable_parent_fails() {
        let blocker = unique_path("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let mut storage = FileStorage::new(blocker.join("db.json"));
        assert!(storage.store(b"{}").is_err());
        let _ = fs::remove_file(&blocker);
    }

    #[test]
    fn test_registry_file_name() {
        assert_eq!(registry_file_name("clacker_EF"), "db_clacker_EF.json");
    }
}
