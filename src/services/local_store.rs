//! src/services/local_store.rs
//!
//! Filesystem-backed `ObjectStore`. Payloads are sharded beneath
//! `base_path/{shard}/{shard}/{key}` with a JSON sidecar next to each blob
//! holding its content type, ETag and metadata tags. Presigned links are
//! HMAC-SHA256 signed and served back through `/blobs/{*key}`.

use crate::{
    models::object::{ObjectInfo, PutOptions},
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use futures::StreamExt;
use hmac::{Hmac, Mac};
use md5::Context;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const SIDECAR_SUFFIX: &str = ".meta.json";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes escaped when a key is placed in a URL path; `/` keeps its meaning.
const KEY_PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Root directory for payloads and sidecars.
    base_path: PathBuf,

    /// Externally reachable base URL used when building presigned links.
    public_url: String,

    /// HMAC key for presigned links.
    secret: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    size: i64,
    etag: String,
    content_type: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Files written by an in-flight `put`. Removed on drop unless the upload
/// committed, so an abandoned or failed upload leaves neither a temp payload
/// nor a stray sidecar behind.
#[derive(Default)]
struct PendingFiles {
    paths: Vec<PathBuf>,
}

impl PendingFiles {
    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn commit(&mut self) {
        self.paths.clear();
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Create `path` inside `parent`, recreating `parent` once if a concurrent
/// `delete` pruned it in the meantime.
async fn create_file_in(parent: &Path, path: &Path) -> std::io::Result<File> {
    match File::create(path).await {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(parent).await?;
            File::create(path).await
        }
        other => other,
    }
}

impl LocalObjectStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into(),
            secret: secret.into(),
        }
    }

    /// Rejects keys that could escape `base_path` or confuse the shard layout.
    fn ensure_key_safe(key: &str) -> StoreResult<()> {
        let bad = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if bad {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// First two bytes of MD5(key) as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn sidecar_path(object_path: &Path) -> PathBuf {
        let mut raw = object_path.as_os_str().to_owned();
        raw.push(SIDECAR_SUFFIX);
        PathBuf::from(raw)
    }

    fn sign(&self, key: &str, expires: i64) -> StoreResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|_| StoreError::InvalidSignature)?;
        mac.update(format!("GET\n{}\n{}", key, expires).as_bytes());
        Ok(mac)
    }

    /// Check a presigned link produced by [`ObjectStore::presign`].
    pub fn verify_presigned(&self, key: &str, expires: i64, signature: &str) -> StoreResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StoreError::InvalidSignature)?;
        self.sign(key, expires)?
            .verify_slice(&provided)
            .map_err(|_| StoreError::InvalidSignature)?;
        if Utc::now().timestamp() > expires {
            return Err(StoreError::Expired);
        }
        Ok(())
    }

    async fn read_sidecar(&self, key: &str, object_path: &Path) -> StoreResult<Sidecar> {
        match fs::read(Self::sidecar_path(object_path)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Walk up from `start` removing empty directories, stopping at `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Stream the body into a temp file while hashing it, fsync, then rename
    /// into place. The sidecar is written before the rename so a visible blob
    /// always has its metadata.
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream<'_>,
        opts: PutOptions,
    ) -> StoreResult<ObjectInfo> {
        Self::ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut pending = PendingFiles::default();
        let mut file = create_file_in(&parent, &tmp_path).await?;
        pending.track(tmp_path.clone());

        let mut received: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len() as u64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(expected) = opts.size {
            if expected != received {
                return Err(StoreError::SizeMismatch {
                    expected,
                    actual: received,
                });
            }
        }

        let content_type = if opts.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            opts.content_type
        };
        let sidecar = Sidecar {
            size: received as i64,
            etag: format!("{:x}", digest.compute()),
            content_type,
            metadata: opts.metadata,
        };
        let sidecar_path = Self::sidecar_path(&file_path);
        pending.track(sidecar_path.clone());
        fs::write(&sidecar_path, serde_json::to_vec(&sidecar)?).await?;

        fs::rename(&tmp_path, &file_path).await?;
        pending.commit();
        debug!(key, size = sidecar.size, "stored object {}", file_path.display());

        Ok(ObjectInfo {
            key: key.to_string(),
            size: sidecar.size,
            etag: sidecar.etag,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        })
    }

    async fn get(&self, key: &str) -> StoreResult<(ByteStream<'static>, ObjectInfo)> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let sidecar = self.read_sidecar(key, &file_path).await?;

        let info = ObjectInfo {
            key: key.to_string(),
            size: sidecar.size,
            etag: sidecar.etag,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        };
        Ok((ReaderStream::new(file).boxed(), info))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        remove_if_exists(&file_path).await?;
        remove_if_exists(&Self::sidecar_path(&file_path)).await?;

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        Self::ensure_key_safe(key)?;

        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = URL_SAFE_NO_PAD.encode(self.sign(key, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}/blobs/{}?expires={}&signature={}",
            self.public_url.trim_end_matches('/'),
            utf8_percent_encode(key, KEY_PATH),
            expires,
            signature
        ))
    }

    async fn health_check(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(std::io::Error::other(
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}
