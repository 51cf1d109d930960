//! Shared key generation and artifact selection for storage backends.

use crate::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/x-mpegURL";
pub const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// Raw object key: `<folder><id>` plus an optional extension such as `.mp4`.
///
/// `folder` is expected to be empty or end in `/`.
pub fn raw_object_key(folder: &str, id: Uuid, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}{}{}", folder, id, ext),
        None => format!("{}{}", folder, id),
    }
}

/// Key of one processed artifact under a media's output prefix.
pub fn artifact_key(prefix: &str, file_name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), file_name)
}

/// Reject keys that could escape a bucket when mapped onto a filesystem.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|s| s == "..") {
        return Err(StorageError::InvalidKey(format!(
            "Storage key contains invalid segments: {}",
            key
        )));
    }
    Ok(())
}

/// Content type of an HLS output file, or `None` when the file is not an artifact.
pub fn artifact_content_type(path: &Path) -> Option<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("m3u8") => Some(PLAYLIST_CONTENT_TYPE),
        Some(ext) if ext.eq_ignore_ascii_case("ts") => Some(SEGMENT_CONTENT_TYPE),
        _ => None,
    }
}

/// Best-effort content type for a raw upload served back from local storage.
pub fn guess_content_type(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "m3u8" => PLAYLIST_CONTENT_TYPE,
        "ts" => SEGMENT_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

/// A file picked for upload from a transcode output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
}

/// List HLS artifacts directly inside `folder`, sorted by file name.
///
/// Subdirectories and names in `exclude` are skipped.
pub async fn collect_artifacts(folder: &Path, exclude: &[String]) -> StorageResult<Vec<Artifact>> {
    let mut entries = tokio::fs::read_dir(folder).await?;
    let mut artifacts = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if exclude.iter().any(|e| e == &file_name) {
            continue;
        }
        let path = entry.path();
        if let Some(content_type) = artifact_content_type(&path) {
            artifacts.push(Artifact {
                path,
                file_name,
                content_type,
            });
        }
    }

    artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_object_key_uses_folder_prefix() {
        let id = Uuid::new_v4();
        assert_eq!(raw_object_key("media/", id, None), format!("media/{}", id));
        assert_eq!(
            raw_object_key("", id, Some(".mov")),
            format!("{}.mov", id)
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("media/abc.mp4").is_ok());
        assert!(validate_key("media/..foo").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("media/../../x").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_artifact_content_type() {
        assert_eq!(
            artifact_content_type(Path::new("index.m3u8")),
            Some(PLAYLIST_CONTENT_TYPE)
        );
        assert_eq!(
            artifact_content_type(Path::new("abc_000.TS")),
            Some(SEGMENT_CONTENT_TYPE)
        );
        assert_eq!(artifact_content_type(Path::new("abc_raw.mp4")), None);
        assert_eq!(artifact_content_type(Path::new("notes")), None);
    }

    #[tokio::test]
    async fn test_collect_artifacts_skips_raw_input_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["index.m3u8", "id_000.ts", "id_001.ts", "id_raw.ts", "ffmpeg.log"] {
            tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested.ts")).await.unwrap();

        let found = collect_artifacts(dir.path(), &["id_raw.ts".to_string()])
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["id_000.ts", "id_001.ts", "index.m3u8"]);
    }
}
