//! Wallpaper persistence
//!
//! Agents attach their home-screen wallpaper to the identification event as
//! base64, optionally wrapped in a data URI. The hub decodes it off the
//! actor task and writes it under the media directory as
//! `{device}_{millis}.png`, creating the directory on first use.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid base64 image payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("failed to write media file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Filesystem store for agent-reported images.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode and persist one wallpaper, returning the stored file name.
    pub async fn store_wallpaper(
        &self,
        device_label: &str,
        encoded: &str,
    ) -> Result<String, MediaError> {
        let bytes = BASE64.decode(strip_data_uri(encoded))?;
        let format = detect_format(encoded, &bytes);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| MediaError::Write { path: self.dir.clone(), source })?;

        let file_name = format!(
            "{}_{}.png",
            sanitize_label(device_label),
            Utc::now().timestamp_millis()
        );
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| MediaError::Write { path: path.clone(), source })?;

        tracing::info!(
            file = %path.display(),
            size_kb = format_args!("{:.2}", bytes.len() as f64 / 1024.0),
            format,
            "wallpaper stored"
        );
        Ok(file_name)
    }
}

/// Drop a `data:image/...;base64,` prefix when present.
fn strip_data_uri(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((_, body)) => body,
        None => encoded,
    }
}

/// Image format, from the data URI when declared, otherwise from the magic
/// bytes. Unrecognized payloads read as png, which is also the extension
/// everything is stored under.
fn detect_format(encoded: &str, bytes: &[u8]) -> &'static str {
    if let Some(rest) = encoded.strip_prefix("data:image/") {
        if let Some(declared) = rest.split(';').next() {
            match declared {
                "png" => return "png",
                "jpeg" | "jpg" => return "jpeg",
                "gif" => return "gif",
                "webp" => return "webp",
                _ => {}
            }
        }
    }

    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpeg"
    } else if bytes.starts_with(&[0x47, 0x49, 0x46, 0x38]) {
        "gif"
    } else if bytes.starts_with(&[0x52, 0x49, 0x46, 0x46]) {
        "webp"
    } else {
        "png"
    }
}

/// Keep device labels filesystem-safe.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "agent".to_owned()
    } else {
        cleaned
    }
}
