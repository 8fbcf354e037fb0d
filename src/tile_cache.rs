//! Filesystem cache of rendered output.
//!
//! Entries are plain files under `<cache root>/<subdirectory>/`, named from a digest of the
//! request signature. Each render also stores a JSON sidecar next to it. Entries are written
//! under a temporary name and renamed into place, so readers never see a partial file. A background loop per
//! subdirectory keeps the directory under a byte budget by deleting the oldest entry that
//! carries the service's naming markers.

use crate::models::FileMetaData;

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use strum_macros::Display;
use tracing::{event, Level};

/// Subdirectory holding rendered tiles, regions and cuts.
pub const OUTPUT_FILES: &str = "outputFiles";

/// Subdirectory holding objects fetched from remote locations.
pub const REMOTE_CACHE: &str = "remoteCache";

/// Suffix of the metadata sidecar of an entry.
const META_SUFFIX: &str = "meta";

/// Kind of cached entry, which determines its name prefix.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum EntryKind {
    /// Raster output and fetched remote objects.
    #[strum(serialize = "sdsrds_")]
    Raster,
    /// Cut and line plot output.
    #[strum(serialize = "sdslds_")]
    Line,
}

/// Digest a request signature into a file name.
///
/// The parts are joined with NUL, which cannot occur in a request path or query, and hashed
/// with MD5 into 32 lowercase hex digits.
pub fn cache_key(location: &str, filename: &str, query: &str) -> String {
    let signature = format!("{}\0{}\0{}", location, filename, query);
    format!("{:?}", md5::compute(signature))
}

/// Counter distinguishing temporary files of concurrent writers.
static WRITE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Temporary name for a write of `name`. It keeps the entry's naming markers so that files
/// left behind by an interrupted write are still evicted.
fn temporary_name(name: &str) -> String {
    format!(
        ".{}.{}-{}.part",
        name,
        std::process::id(),
        WRITE_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// File name of an entry of `kind` for `key`.
pub fn entry_name(kind: EntryKind, key: &str) -> String {
    format!("{}{}", kind, key)
}

/// Whether `name` follows the service's naming convention and may be evicted.
pub fn is_service_entry(name: &str) -> bool {
    name.contains("sds") && (name.contains("rds") || name.contains("lds"))
}

/// A cache rooted at one directory.
#[derive(Clone, Debug)]
pub struct TileCache {
    root: PathBuf,
}

impl TileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TileCache { root: root.into() }
    }

    /// Path of a cache subdirectory.
    pub fn directory(&self, subdirectory: &str) -> PathBuf {
        self.root.join(subdirectory)
    }

    /// Path of entry `name` in `subdirectory`.
    pub fn path(&self, subdirectory: &str, name: &str) -> PathBuf {
        self.directory(subdirectory).join(name)
    }

    /// Read an entry. Failures other than a missing file are logged and reported as a miss.
    pub async fn get(&self, subdirectory: &str, name: &str) -> Option<Bytes> {
        let path = self.path(subdirectory, name);
        match tokio::fs::read(&path).await {
            Ok(data) => Some(data.into()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                event!(Level::WARN, "Failed to read cache entry {:?}: {}", path, err);
                None
            }
        }
    }

    /// Write an entry, creating the subdirectory if needed. The data is written to a
    /// temporary file and renamed over `name`. Failures are logged.
    pub async fn put(&self, subdirectory: &str, name: &str, data: &[u8]) {
        let path = self.path(subdirectory, name);
        let temporary = self.path(subdirectory, &temporary_name(name));
        let result = async {
            tokio::fs::create_dir_all(self.directory(subdirectory)).await?;
            tokio::fs::write(&temporary, data).await?;
            tokio::fs::rename(&temporary, &path).await
        }
        .await;
        if let Err(err) = result {
            event!(Level::WARN, "Failed to write cache entry {:?}: {}", path, err);
            let _ = tokio::fs::remove_file(&temporary).await;
        }
    }

    /// Read a rendered entry and its metadata sidecar. A missing or unreadable sidecar is a
    /// miss.
    pub async fn get_output(&self, name: &str) -> Option<(Bytes, FileMetaData)> {
        let data = self.get(OUTPUT_FILES, name).await?;
        let meta = self
            .get(OUTPUT_FILES, &format!("{}{}", name, META_SUFFIX))
            .await?;
        match serde_json::from_slice(&meta) {
            Ok(meta) => Some((data, meta)),
            Err(err) => {
                event!(Level::WARN, "Invalid cache metadata for {}: {}", name, err);
                None
            }
        }
    }

    /// Store a rendered entry and then its metadata sidecar.
    pub async fn put_output(&self, name: &str, data: &[u8], meta: &FileMetaData) {
        match serde_json::to_vec(meta) {
            Ok(json) => {
                self.put(OUTPUT_FILES, name, data).await;
                self.put(OUTPUT_FILES, &format!("{}{}", name, META_SUFFIX), &json)
                    .await;
            }
            Err(err) => event!(Level::WARN, "Failed to serialise cache metadata: {}", err),
        }
    }

    /// Start one eviction loop per cache subdirectory.
    pub fn spawn_eviction(&self, max_bytes: u64, interval: Duration) {
        for subdirectory in [OUTPUT_FILES, REMOTE_CACHE] {
            let directory = self.directory(subdirectory);
            tokio::spawn(eviction_loop(directory, max_bytes, interval));
        }
    }
}

/// Result of one eviction sweep.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SweepOutcome {
    /// The directory fits the budget.
    UnderBudget { total_bytes: u64 },
    /// The oldest entry was deleted.
    Evicted { name: String, total_bytes: u64 },
    /// The oldest entry is not a service entry and was left alone.
    Skipped { name: String, total_bytes: u64 },
}

/// Delete the oldest entry of `directory` if its files exceed `max_bytes`.
///
/// Only names accepted by [is_service_entry] are ever deleted.
#[tracing::instrument(level = "DEBUG")]
pub fn eviction_sweep(directory: &Path, max_bytes: u64) -> io::Result<SweepOutcome> {
    let mut total_bytes = 0;
    let mut oldest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            continue;
        }
        total_bytes += metadata.len();
        let modified = metadata.modified()?;
        if oldest.as_ref().map_or(true, |(time, _)| modified < *time) {
            oldest = Some((modified, entry.path()));
        }
    }

    let Some((_, path)) = oldest.filter(|_| total_bytes > max_bytes) else {
        return Ok(SweepOutcome::UnderBudget { total_bytes });
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if is_service_entry(&name) {
        std::fs::remove_file(&path)?;
        event!(Level::INFO, "Evicted cache entry {:?}", path);
        Ok(SweepOutcome::Evicted { name, total_bytes })
    } else {
        event!(
            Level::WARN,
            "Cache directory {:?} over budget but oldest file {} is not a cache entry",
            directory,
            name
        );
        Ok(SweepOutcome::Skipped { name, total_bytes })
    }
}

/// Sweep `directory` forever. After an eviction the next sweep runs immediately; otherwise it
/// waits for `interval`.
async fn eviction_loop(directory: PathBuf, max_bytes: u64, interval: Duration) {
    event!(Level::INFO, "Starting cache eviction for {:?}", directory);
    loop {
        let sweep_directory = directory.clone();
        let outcome =
            tokio::task::spawn_blocking(move || eviction_sweep(&sweep_directory, max_bytes)).await;
        match outcome {
            Ok(Ok(SweepOutcome::Evicted { .. })) => continue,
            Ok(Ok(_)) => (),
            Ok(Err(err)) if err.kind() == io::ErrorKind::NotFound => (),
            Ok(Err(err)) => event!(Level::WARN, "Cache sweep of {:?} failed: {}", directory, err),
            Err(err) => event!(Level::WARN, "Cache sweep of {:?} failed: {}", directory, err),
        }
        tokio::time::sleep(interval).await;
    }
}
