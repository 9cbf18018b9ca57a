//! Persistent TV pairing storage.
//!
//! The TV address and SSAP client key live in `~/.cal_agent/tv_link.json`
//! so a paired TV reconnects without prompting again.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What survives restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredLink {
    /// Last TV address we connected to.
    pub tv_ip: Option<String>,
    /// SSAP client key handed out by the TV after the user accepts pairing.
    pub client_key: Option<String>,
}

/// Storage manager for the TV link file.
#[derive(Debug, Clone)]
pub struct TvLinkStore {
    root_path: PathBuf,
}

impl TvLinkStore {
    /// Storage rooted at the default location (~/.cal_agent).
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".cal_agent"),
        })
    }

    /// Storage rooted at a custom directory.
    pub fn with_root(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn file_path(&self) -> PathBuf {
        self.root_path.join("tv_link.json")
    }

    /// Load the stored link; a missing file is an empty link.
    pub fn load(&self) -> std::io::Result<StoredLink> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(StoredLink::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn save(&self, link: &StoredLink) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root_path)?;
        let data = serde_json::to_string_pretty(link)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.file_path(), data)
    }

    pub fn tv_ip(&self) -> Option<String> {
        self.load().ok().and_then(|link| link.tv_ip)
    }

    pub fn save_tv_ip(&self, ip: &str) -> std::io::Result<()> {
        let mut link = self.load().unwrap_or_default();
        link.tv_ip = Some(ip.to_string());
        self.save(&link)
    }

    pub fn client_key(&self) -> Option<String> {
        self.load().ok().and_then(|link| link.client_key)
    }

    pub fn save_client_key(&self, key: &str) -> std::io::Result<()> {
        let mut link = self.load().unwrap_or_default();
        link.client_key = Some(key.to_string());
        self.save(&link)
    }

    /// Forget the pairing so the next connection prompts on the TV.
    pub fn clear_client_key(&self) -> std::io::Result<()> {
        let mut link = self.load().unwrap_or_default();
        link.client_key = None;
        self.save(&link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (TvLinkStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (TvLinkStore::with_root(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let (store, _dir) = store();
        let link = store.load().unwrap();
        assert!(link.tv_ip.is_none());
        assert!(link.client_key.is_none());
    }

    #[test]
    fn test_save_and_reload_client_key() {
        let (store, _dir) = store();
        store.save_client_key("abc123").unwrap();
        assert_eq!(store.client_key().as_deref(), Some("abc123"));

        // IP save keeps the key.
        store.save_tv_ip("192.168.1.50").unwrap();
        assert_eq!(store.client_key().as_deref(), Some("abc123"));
        assert_eq!(store.tv_ip().as_deref(), Some("192.168.1.50"));
    }

    #[test]
    fn test_clear_client_key() {
        let (store, _dir) = store();
        store.save_client_key("abc123").unwrap();
        store.clear_client_key().unwrap();
        assert!(store.client_key().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (store, _dir) = store();
        std::fs::create_dir_all(store.root_path()).unwrap();
        std::fs::write(store.root_path().join("tv_link.json"), "not json").unwrap();
        assert!(store.load().is_err());
    }
}
