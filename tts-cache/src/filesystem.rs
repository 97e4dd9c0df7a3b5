use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{AudioCache, CacheConfig, CacheError, CacheRef, CacheResult, CachedAudio, VacuumReport};

/// Content-addressed on-disk cache. Each fingerprint maps to a file under
/// `root`, sharded two levels deep by the fingerprint's leading hex bytes
/// to keep any one directory from growing unbounded.
///
/// Writes land in a `.tmp` sibling first and are renamed into place, so a
/// crash mid-write never leaves a fetchable-but-truncated entry.
pub struct FilesystemCache {
    root: PathBuf,
    config: CacheConfig,
}

impl FilesystemCache {
    pub async fn new(root: impl AsRef<Path>, config: CacheConfig) -> CacheResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, config })
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        let (a, b) = shard(fingerprint);
        self.root.join(a).join(b).join(fingerprint)
    }

    fn meta_path_for(&self, fingerprint: &str) -> PathBuf {
        let mut path = self.path_for(fingerprint);
        path.set_extension("meta.json");
        path
    }
}

fn shard(fingerprint: &str) -> (&str, &str) {
    let bytes = fingerprint.as_bytes();
    if bytes.len() >= 4 {
        (&fingerprint[0..2], &fingerprint[2..4])
    } else {
        ("xx", "xx")
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Meta {
    codec: String,
    stored_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
impl AudioCache for FilesystemCache {
    async fn store(&self, fingerprint: &str, bytes: Vec<u8>, codec: &str) -> CacheResult<CacheRef> {
        if bytes.len() as u64 > self.config.max_audio_bytes {
            return Err(CacheError::store_failed(
                fingerprint.to_string(),
                format!("audio exceeds max_audio_bytes ({} bytes)", self.config.max_audio_bytes),
            ));
        }

        let path = self.path_for(fingerprint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let stored_at = Utc::now();
        let tmp_path = path.with_extension("tmp");
        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(&bytes).await?;
        tmp.flush().await?;
        drop(tmp);
        fs::rename(&tmp_path, &path).await?;

        let meta = Meta {
            codec: codec.to_string(),
            stored_at,
        };
        fs::write(self.meta_path_for(fingerprint), serde_json::to_vec(&meta)?).await?;

        Ok(CacheRef {
            fingerprint: fingerprint.to_string(),
            codec: codec.to_string(),
            size_bytes: bytes.len() as u64,
            stored_at,
        })
    }

    async fn fetch(&self, fingerprint: &str) -> CacheResult<CachedAudio> {
        let path = self.path_for(fingerprint);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| CacheError::not_found(fingerprint))?;
        let meta_bytes = fs::read(self.meta_path_for(fingerprint)).await?;
        let meta: Meta = serde_json::from_slice(&meta_bytes)?;

        Ok(CachedAudio {
            fingerprint: fingerprint.to_string(),
            codec: meta.codec,
            bytes,
            stored_at: meta.stored_at,
        })
    }

    async fn contains(&self, fingerprint: &str) -> CacheResult<bool> {
        Ok(fs::metadata(self.path_for(fingerprint)).await.is_ok())
    }

    async fn remove(&self, fingerprint: &str) -> CacheResult<()> {
        let _ = fs::remove_file(self.path_for(fingerprint)).await;
        let _ = fs::remove_file(self.meta_path_for(fingerprint)).await;
        Ok(())
    }

    async fn vacuum_if_needed(&self) -> CacheResult<VacuumReport> {
        // Reclamation policy (LRU by stored_at against vacuum_bloat_threshold)
        // lives with the deployment that owns disk pressure monitoring; this
        // backend exposes the hook but performs no sweep on its own.
        Ok(VacuumReport::default())
    }
}
