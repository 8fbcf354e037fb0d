//! Opening files of configured locations.
//!
//! Local locations open the file directly. S3 locations download the whole object once into
//! the `remoteCache` subdirectory of the disk cache and serve it from there; without a disk
//! cache the object is served from memory.

use crate::app_state::AppState;
use crate::error::SdsError;
use crate::locations::{Location, LocationKind};
use crate::s3_client::S3Credentials;
use crate::source::{ByteRangeSource, BytesSource, LocalFileSource};
use crate::tile_cache::{cache_key, entry_name, EntryKind, REMOTE_CACHE};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{event, Level};

/// Reject file names that do not carry a BLUEFILE extension.
pub fn check_file_type(file_path: &str) -> Result<(), SdsError> {
    if file_path.contains(".tmp") || file_path.contains(".prm") {
        Ok(())
    } else {
        Err(SdsError::UnsupportedFileType {
            filename: file_path.to_string(),
        })
    }
}

/// Path of `relative` under the root of a local location.
///
/// Parent directory components are rejected so that requests cannot escape the location.
pub fn resolve_local(location: &Location, relative: &str) -> Result<PathBuf, SdsError> {
    let relative = relative.trim_start_matches('/');
    if Path::new(relative)
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(SdsError::invalid_request(format!(
            "path {} must not contain '..'",
            relative
        )));
    }
    match location.local_root() {
        Some(root) => Ok(root.join(relative)),
        None => Err(SdsError::invalid_request(format!(
            "location {} is not a local directory",
            location.name
        ))),
    }
}

/// Object key of `file_path` under an optional key prefix.
fn object_key(prefix: &str, file_path: &str) -> String {
    let file_path = file_path.trim_start_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_path.to_string()
    } else {
        format!("{}/{}", prefix, file_path)
    }
}

/// Name of the remote cache entry holding `key` of `bucket`.
pub fn remote_entry_name(bucket: &str, key: &str) -> String {
    entry_name(EntryKind::Raster, &cache_key(bucket, key, ""))
}

async fn open_local(path: &Path) -> Result<LocalFileSource, SdsError> {
    let file = tokio::fs::File::open(path).await?.into_std().await;
    Ok(LocalFileSource::new(file, path))
}

/// Open `file_path` of the named location as a byte-range source.
#[tracing::instrument(level = "DEBUG", skip(state))]
pub async fn open_data_source(
    state: &AppState,
    location: &str,
    file_path: &str,
) -> Result<Arc<dyn ByteRangeSource>, SdsError> {
    let location = state.locations.find(location)?;
    match &location.kind {
        LocationKind::Local { .. } => {
            let path = resolve_local(location, file_path)?;
            Ok(Arc::new(open_local(&path).await?))
        }
        LocationKind::S3 {
            url,
            bucket,
            path,
            access_key,
            secret_key,
        } => {
            let key = object_key(path, file_path);
            let cached = state
                .tile_cache
                .as_ref()
                .map(|cache| cache.path(REMOTE_CACHE, &remote_entry_name(bucket, &key)));
            if let Some(cached) = &cached {
                if let Ok(source) = open_local(cached).await {
                    event!(Level::DEBUG, "Serving {} from remote cache", key);
                    return Ok(Arc::new(source));
                }
            }

            let credentials =
                S3Credentials::from_keys(access_key.as_deref(), secret_key.as_deref());
            let client = state.s3_client_map.get(url, credentials).await;
            let data = {
                let _conn_permits = state.resource_manager.remote_connection().await?;
                client
                    .download_object(bucket, &key, &state.resource_manager)
                    .await?
            };

            if let (Some(cache), Some(cached)) = (&state.tile_cache, &cached) {
                let name = remote_entry_name(bucket, &key);
                cache.put(REMOTE_CACHE, &name, &data).await;
                if let Ok(source) = open_local(cached).await {
                    return Ok(Arc::new(source));
                }
            }
            Ok(Arc::new(BytesSource::new(
                data,
                format!("s3://{}/{}", bucket, key),
            )))
        }
    }
}
