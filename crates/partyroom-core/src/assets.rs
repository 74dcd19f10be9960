//! Static assets served for paths that address no room.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use partyroom_common::PartyError;

use crate::response::RoomResponse;

/// Source of static assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Response for `path`, or `None` if there is no such asset.
    async fn fetch(&self, path: &str) -> Result<Option<RoomResponse>, PartyError>;
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    /// Serve files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request path to a file below the root.
    ///
    /// Returns `None` for paths that would leave the root. Directory paths
    /// map to their `index.html`.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        let mut resolved = self.root.clone();

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if relative.is_empty() || relative.ends_with('/') {
            resolved.push("index.html");
        }
        Some(resolved)
    }
}

#[async_trait]
impl AssetStore for DirectoryAssets {
    async fn fetch(&self, path: &str) -> Result<Option<RoomResponse>, PartyError> {
        let Some(file) = self.resolve(path) else {
            debug!(path = %path, "Rejected asset path");
            return Ok(None);
        };

        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(Some(
                RoomResponse::empty(200)
                    .with_header("content-type", content_type(&file))
                    .with_body(bytes),
            )),
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
