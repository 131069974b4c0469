//! On-disk cache store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<base64url(name)>/generation.json    name and creation time
//! <root>/<base64url(name)>/<sha256(url)>.json entries stored for one URL
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so a
//! reader never observes a half-written entry. Batches are built in a
//! `.staging-*` directory and swapped in whole; the replaced directory is
//! parked as `.retired-*` until the swap is done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{CacheStorage, StoredEntry, check_name, insert_entry};
use crate::error::Result;
use crate::http::{Request, Response};

const GENERATION_FILE: &str = "generation.json";
const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

#[derive(Debug, Serialize, Deserialize)]
struct GenerationMeta {
    name: String,
    created: DateTime<Utc>,
}

/// Directory name for a generation. Injective and filesystem-safe.
fn encode_name(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name.as_bytes())
}

/// File name for the entries stored under `url`.
fn entry_file(url: &str) -> String {
    format!("{:x}.json", Sha256::digest(url.as_bytes()))
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}

async fn read_entries(path: &Path) -> Result<Vec<StoredEntry>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn write_generation_meta(dir: &Path, name: &str) -> Result<()> {
    let meta = GenerationMeta {
        name: name.to_string(),
        created: Utc::now(),
    };
    write_atomic(&dir.join(GENERATION_FILE), &serde_json::to_vec(&meta)?).await?;
    Ok(())
}

/// Copies every regular file of `from` into `to`.
async fn copy_files(from: &Path, to: &Path) -> Result<()> {
    let mut read_dir = tokio::fs::read_dir(from).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), to.join(entry.file_name())).await?;
        }
    }
    Ok(())
}

fn group_by_url(entries: Vec<StoredEntry>) -> HashMap<String, Vec<StoredEntry>> {
    let mut grouped: HashMap<String, Vec<StoredEntry>> = HashMap::new();
    for entry in entries {
        insert_entry(grouped.entry(entry.url.clone()).or_default(), entry);
    }
    grouped
}

/// [`CacheStorage`] persisted under a root directory.
#[derive(Debug)]
pub struct DiskCacheStorage {
    root: PathBuf,
    /// Serialises writers within this process.
    write_lock: Mutex<()>,
}

impl DiskCacheStorage {
    /// Creates a store rooted at `root`. The directory is created on first
    /// write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(encode_name(name))
    }

    async fn exists(&self, name: &str) -> bool {
        tokio::fs::metadata(self.generation_dir(name).join(GENERATION_FILE))
            .await
            .is_ok()
    }

    /// Creates the generation directory. Caller holds the write lock.
    async fn open_locked(&self, name: &str) -> Result<PathBuf> {
        let dir = self.generation_dir(name);
        if !self.exists(name).await {
            tokio::fs::create_dir_all(&dir).await?;
            write_generation_meta(&dir, name).await?;
        }
        Ok(dir)
    }

    /// Merges `entries` into the files in `dir`. Caller holds the write lock.
    async fn merge_into(dir: &Path, grouped: HashMap<String, Vec<StoredEntry>>) -> Result<()> {
        for (url, fresh) in grouped {
            let path = dir.join(entry_file(&url));
            let mut entries = read_entries(&path).await?;
            for entry in fresh {
                insert_entry(&mut entries, entry);
            }
            write_atomic(&path, &serde_json::to_vec(&entries)?).await?;
        }
        Ok(())
    }

    /// Builds the generation in a staging directory, starting from a copy of
    /// the existing one if any, then swaps it into place. Caller holds the
    /// write lock.
    async fn stage_generation(
        &self,
        name: &str,
        grouped: HashMap<String, Vec<StoredEntry>>,
    ) -> Result<()> {
        let target = self.generation_dir(name);
        let existing = self.exists(name).await;
        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));
        let result: Result<()> = async {
            tokio::fs::create_dir_all(&staging).await?;
            if existing {
                copy_files(&target, &staging).await?;
            }
            Self::merge_into(&staging, grouped).await?;
            if !existing {
                write_generation_meta(&staging, name).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if !existing {
            if let Err(e) = tokio::fs::rename(&staging, &target).await {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e.into());
            }
            return Ok(());
        }

        let retired = self
            .root
            .join(format!("{RETIRED_PREFIX}{}", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::rename(&target, &retired).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::rename(&retired, &target).await;
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
            log::warn!("Failed to remove {}: {e}", retired.display());
        }
        Ok(())
    }

    async fn read_metas(&self) -> Result<Vec<GenerationMeta>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut metas = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            // Generation directories never start with a dot; staging and
            // retired ones always do.
            if !entry.file_type().await?.is_dir()
                || entry.file_name().to_string_lossy().starts_with('.')
            {
                continue;
            }
            let meta_path = entry.path().join(GENERATION_FILE);
            match tokio::fs::read(&meta_path).await {
                Ok(bytes) => match serde_json::from_slice::<GenerationMeta>(&bytes) {
                    Ok(meta) => metas.push(meta),
                    Err(e) => log::warn!("Ignoring corrupt {}: {e}", meta_path.display()),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        metas.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(metas)
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        check_name(name)?;
        let _guard = self.write_lock.lock().await;
        self.open_locked(name).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.exists(name).await)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read_metas().await?.into_iter().map(|m| m.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        // An empty name would resolve to the root itself.
        if name.is_empty() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock().await;
        let dir = self.generation_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_in(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() || !self.exists(name).await {
            return Ok(None);
        }
        let path = self
            .generation_dir(name)
            .join(entry_file(&request.cache_url()));
        Ok(read_entries(&path)
            .await?
            .iter()
            .find(|e| e.matches_request(request))
            .map(StoredEntry::to_response))
    }

    async fn put(&self, name: &str, request: &Request, response: Response) -> Result<()> {
        check_name(name)?;
        let entry = StoredEntry::new(request, response)?;
        let _guard = self.write_lock.lock().await;
        let dir = self.open_locked(name).await?;
        Self::merge_into(&dir, group_by_url(vec![entry])).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        check_name(name)?;
        let entries = entries
            .into_iter()
            .map(|(request, response)| StoredEntry::new(&request, response))
            .collect::<Result<Vec<_>>>()?;
        let grouped = group_by_url(entries);

        let _guard = self.write_lock.lock().await;
        self.stage_generation(name, grouped).await
    }

    async fn requests(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.generation_dir(name);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut urls = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let is_entry_file = path.extension().is_some_and(|ext| ext == "json")
                && entry.file_name().to_string_lossy() != GENERATION_FILE;
            if is_entry_file {
                if let Some(first) = read_entries(&path).await?.into_iter().next() {
                    urls.push(first.url);
                }
            }
        }
        urls.sort();
        Ok(urls)
    }
}
