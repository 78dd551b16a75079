use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to make random temp name after {attempts} attempts")]
    AllocationExhausted { attempts: u32 },

    #[error("Stream failure: {0}")]
    StreamFailure(#[source] io::Error),

    #[error("Filesystem error during {op} on {}: {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Upload aborted because another upload in the batch failed")]
    AbortedBySibling,

    #[error("Upload already started")]
    AlreadyStarted,

    #[error("Malformed request body: {0}")]
    PartSource(String),

    #[error("Upload batch already settled")]
    BatchSettled,
}

impl UploadError {
    pub(crate) fn filesystem(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        UploadError::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }
}
