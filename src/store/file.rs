//! File-backed durable store
//!
//! Each key is one file under a two-level fan-out directory derived from the
//! xxh3 hash of the key:
//!
//! ```text
//! <base>/<hh>/<hh>/<xxh3-hex>.entry
//! ```
//!
//! File layout (little endian):
//!
//! ```text
//! [key_len: u32][key bytes][crc32(value): u32][value bytes]
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a reader
//! never observes a half-written entry. Entries whose checksum does not match
//! read as absent.

use super::DurableStore;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error, info, warn};

const ENTRY_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";
const MAX_KEY_LEN: usize = 64 * 1024;

/// Durable store keeping one checksummed file per key
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `base_path`
    pub async fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ProxyError::storage(format!(
                "Failed to create store directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        info!("Opened file store at {}", base_path.display());
        Ok(FileStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
        let dir1 = format!("{:02x}", (hash >> 56) & 0xFF);
        let dir2 = format!("{:02x}", (hash >> 48) & 0xFF);
        self.base_path
            .join(dir1)
            .join(dir2)
            .join(format!("{:016x}.{}", hash, ENTRY_EXTENSION))
    }

    fn encode(key: &str, value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + key.len() + value.len());
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&crc32fast::hash(value).to_le_bytes());
        buf.extend_from_slice(value);
        buf
    }

    /// Split a file into its key and value, verifying the checksum
    fn decode(data: &[u8]) -> Result<(String, Bytes)> {
        let key_len = read_u32(data, 0)? as usize;
        let key_end = 4 + key_len;
        let key = data
            .get(4..key_end)
            .ok_or_else(|| ProxyError::storage("entry truncated in key"))?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| ProxyError::storage("entry key is not UTF-8"))?;

        let expected = read_u32(data, key_end)?;
        let value = &data[key_end + 4..];
        let actual = crc32fast::hash(value);
        if actual != expected {
            return Err(ProxyError::storage(format!(
                "checksum mismatch for {}: expected {:08x}, got {:08x}",
                key, expected, actual
            )));
        }

        Ok((key, Bytes::copy_from_slice(value)))
    }

    /// Read only the key from an entry header
    async fn read_key(path: &Path) -> Result<String> {
        let mut file = fs::File::open(path).await?;
        let key_len = file.read_u32_le().await? as usize;
        if key_len > MAX_KEY_LEN {
            return Err(ProxyError::storage(format!(
                "entry {} has implausible key length {}",
                path.display(),
                key_len
            )));
        }
        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key).await?;
        String::from_utf8(key).map_err(|_| ProxyError::storage("entry key is not UTF-8"))
    }

    async fn list_dir(path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = data
        .get(offset..offset + 4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| ProxyError::storage("entry truncated in header"))?;
    Ok(u32::from_le_bytes(bytes))
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.entry_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match Self::decode(&data) {
            Ok((stored_key, value)) if stored_key == key => Ok(Some(value)),
            Ok((stored_key, _)) => {
                warn!("Hash collision in file store: {} shadows {}", stored_key, key);
                Ok(None)
            }
            Err(e) => {
                error!("Corrupt entry {} for key {}: {}", path.display(), key, e);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ProxyError::storage(format!("Failed to create store directory: {}", e))
            })?;
        }

        let temp_path = path.with_extension(TEMP_EXTENSION);
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            ProxyError::storage(format!("Failed to create entry file: {}", e))
        })?;
        file.write_all(&Self::encode(key, &value))
            .await
            .map_err(|e| ProxyError::storage(format!("Failed to write entry: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| ProxyError::storage(format!("Failed to sync entry: {}", e)))?;
        drop(file);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| ProxyError::storage(format!("Failed to commit entry: {}", e)))?;

        debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProxyError::storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for level1 in Self::list_dir(&self.base_path).await? {
            for level2 in Self::list_dir(&level1).await? {
                for path in Self::list_dir(&level2).await? {
                    if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                        continue;
                    }
                    match Self::read_key(&path).await {
                        Ok(key) => keys.push(key),
                        Err(e) => warn!("Skipping unreadable entry {}: {}", path.display(), e),
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
