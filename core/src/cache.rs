//! Content-addressed WAV cache on disk.
//!
//! Each entry lives at `<dir>/<fingerprint>.wav`. Writes go to a hidden temp
//! file in the same directory and are renamed into place, so a reader sees
//! either nothing or the complete file. Temp files left behind by a crash are
//! removed by [`AudioCache::open`] and are never returned by [`AudioCache::get`].
//!
//! There is no expiry and no size bound.

use crate::config::VoiceConfig;
use crate::utils::gen_id;
use crate::{Result, WavenetError};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const AUDIO_FILE_EXTENSION: &str = "wav";
const TEMP_FILE_EXTENSION: &str = "tmp";

/// Fingerprint of everything that determines the synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `text` spoken with `voice`.
    ///
    /// Fields are length-prefixed so that shifting characters between fields
    /// can't produce the same digest. The endpoint URL is not part of the key.
    pub fn new(text: &str, voice: &VoiceConfig) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            text,
            voice.voice.as_str(),
            voice.gender.as_str(),
            voice.language_code.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(voice.sample_rate.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory-backed audio cache
#[derive(Debug, Clone)]
pub struct AudioCache {
    dir: PathBuf,
}

impl AudioCache {
    /// Open (and create if needed) the cache directory, reaping stale temp files.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            WavenetError::Config(format!(
                "cannot create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let cache = Self { dir };
        let reaped = cache.reap_temp_files().await?;
        info!(target: "cache", dir = %cache.dir.display(), reaped, "Audio cache ready");
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final location of the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.as_str(), AUDIO_FILE_EXTENSION))
    }

    /// Read cached audio. `Ok(None)` when the entry is absent or empty.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => {
                warn!(target: "cache", key = %key, "Ignoring empty cache entry");
                Ok(None)
            }
            Ok(bytes) => {
                debug!(target: "cache", key = %key, bytes = bytes.len(), "Cache hit");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WavenetError::Cache(format!(
                "read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Atomically store `bytes` under `key` (temp file + rename).
    pub async fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let final_path = self.path_for(key);
        let temp_path = self.dir.join(format!(
            ".{}.{}.{}",
            key.as_str(),
            gen_id(),
            TEMP_FILE_EXTENSION
        ));

        if let Err(e) = write_synced(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(WavenetError::Cache(format!(
                "write {}: {}",
                temp_path.display(),
                e
            )));
        }

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(WavenetError::Cache(format!(
                "rename into {}: {}",
                final_path.display(),
                e
            )));
        }

        debug!(target: "cache", key = %key, bytes = bytes.len(), "Cached audio");
        Ok(())
    }

    /// Remove temp files left by interrupted writes. Returns how many were removed.
    async fn reap_temp_files(&self) -> Result<usize> {
        let mut reaped = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_temp = path
                .extension()
                .map(|ext| ext == TEMP_FILE_EXTENSION)
                .unwrap_or(false);
            if !is_temp {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => reaped += 1,
                Err(e) => {
                    warn!(target: "cache", path = %path.display(), error = %e, "Failed to remove stale temp file")
                }
            }
        }
        Ok(reaped)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}
