//! Utility functions
//!
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use reqwest::Client;

/// Hash a string to a stable id.
pub fn hashed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Whether a model location refers to a remote file.
pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Local file a remote model is cached in.
///
/// The file name keeps the last path segment of the URL for readability and is
/// prefixed with a hash of the whole URL so equally named files don't clash.
pub fn cache_path_for(url: &str) -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    let segment = url
        .split(['?', '#'].as_slice())
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("model.onnx");
    base.join("plantcam")
        .join(format!("{:016x}-{}", hashed(url), segment))
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let filepath = filepath.as_ref();
    let resp = client.get(url).send().await?.error_for_status()?;

    if let Some(parent) = filepath.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // Write next to the target first so an interrupted download is never picked up
    let partial = filepath.with_extension("part");
    let mut file = std::fs::File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;
    std::fs::rename(&partial, filepath)?;

    Ok(())
}

/// Return a local path for the model, downloading and caching remote models.
pub async fn fetch_cached(location: &str) -> Result<PathBuf> {
    if !is_url(location) {
        return Ok(PathBuf::from(location));
    }

    let path = cache_path_for(location);
    if path.exists() {
        log::info!("Using cached model {}", path.display());
        return Ok(path);
    }

    log::info!("Downloading model from {}", location);
    download_file(&Client::new(), location, &path)
        .await
        .with_context(|| format!("failed to download {location}"))?;
    Ok(path)
}
