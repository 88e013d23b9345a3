use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Job-scoped scratch directory.
///
/// The directory is removed when [`Workspace::close`] is called or, if the
/// pipeline future is dropped early, when the handle itself is dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh directory under `root` (or the system temp dir) named after the job.
    pub fn acquire(job_id: &str, root: Option<&Path>) -> std::io::Result<Self> {
        let prefix = format!("model3d-{}-", sanitize(job_id));
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Remove the directory, logging rather than returning a failure.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "Workspace removed"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace")
            }
        }
    }
}

fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}
