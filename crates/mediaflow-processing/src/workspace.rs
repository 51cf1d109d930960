use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

const WORKSPACE_SUBDIR: &str = "transcode";

/// Private scratch directory for one pipeline run.
///
/// Lives under `<root>/transcode/` and is named after the media id. The
/// directory and everything in it are removed when the workspace is dropped,
/// including on early returns and panics.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    media_id: Uuid,
}

impl Workspace {
    pub async fn create(root: &Path, media_id: Uuid) -> io::Result<Self> {
        let parent = root.join(WORKSPACE_SUBDIR);
        tokio::fs::create_dir_all(&parent).await?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", media_id))
            .tempdir_in(&parent)?;

        tracing::debug!(media_id = %media_id, path = %dir.path().display(), "Workspace created");
        Ok(Self { dir, media_id })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory now and report a failure instead of ignoring it.
    pub fn close(self) -> io::Result<()> {
        let media_id = self.media_id;
        self.dir.close()?;
        tracing::debug!(media_id = %media_id, "Workspace removed");
        Ok(())
    }
}
