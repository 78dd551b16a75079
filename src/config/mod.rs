use std::env;
use std::path::PathBuf;

/// Where uploads are staged and where they are stored for good.
///
/// Both directories must be writable, and they should live on the same
/// filesystem so finalizing an upload is a plain rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Staging directory for partially written uploads (default: ./data/tmp)
    pub tmp_dir: PathBuf,

    /// Root of the content-addressed store (default: ./data/uploads)
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("./data/tmp"),
            upload_dir: PathBuf::from("./data/uploads"),
        }
    }
}

impl StorageConfig {
    pub fn new(tmp_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            upload_dir: upload_dir.into(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            tmp_dir: env::var("TMP_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.tmp_dir),

            upload_dir: env::var("UPLOAD_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),
        }
    }

    /// Create config for development (everything under the system temp dir)
    pub fn development() -> Self {
        let root = env::temp_dir().join("rust-share-backend");
        Self {
            tmp_dir: root.join("tmp"),
            upload_dir: root.join("uploads"),
        }
    }

    /// Creates both directories if they are missing.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }
}
