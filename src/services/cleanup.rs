use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Recursively deletes a file or directory tree. A missing path counts as
/// removed.
#[async_trait]
pub trait TreeRemover: Send + Sync {
    async fn remove_tree(&self, path: &Path) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsTreeRemover;

#[async_trait]
impl TreeRemover for FsTreeRemover {
    async fn remove_tree(&self, path: &Path) -> std::io::Result<()> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Removes every path, logging failures instead of returning them.
pub async fn remove_best_effort(remover: &dyn TreeRemover, paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remover.remove_tree(path).await {
            tracing::warn!("Cleanup of {} failed: {}", path.display(), e);
        }
    }
}
