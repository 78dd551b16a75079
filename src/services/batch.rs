use crate::error::UploadError;
use crate::models::IncomingPart;
use crate::services::upload::{Upload, UploadContext};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::sync::Arc;

/// All files of one request, stored all-or-nothing.
///
/// Every part is started as soon as it arrives and all uploads make progress
/// together. The first failure aborts every upload of the batch and becomes
/// the batch's only result; uploads that already finished keep their files.
pub struct UploadBatch {
    context: Arc<UploadContext>,
    /// In arrival order.
    uploads: Vec<Upload>,
    settled: bool,
}

impl UploadBatch {
    pub fn new(context: Arc<UploadContext>) -> Self {
        Self {
            context,
            uploads: Vec::new(),
            settled: false,
        }
    }

    pub fn uploads(&self) -> &[Upload] {
        &self.uploads
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Consumes the part source and returns one URL per file, in arrival
    /// order.
    pub async fn run<S>(&mut self, parts: S) -> Result<Vec<String>, UploadError>
    where
        S: Stream<Item = Result<IncomingPart, UploadError>> + Unpin,
    {
        if self.settled {
            return Err(UploadError::BatchSettled);
        }

        let mut parts = parts.fuse();
        let mut parts_done = false;
        let mut tasks = FuturesUnordered::new();
        let mut urls: Vec<Option<String>> = Vec::new();

        loop {
            tokio::select! {
                part = parts.next(), if !parts_done => match part {
                    Some(Ok(part)) => {
                        let upload = Upload::new(&part.file_name, part.reader, self.context.clone());
                        tracing::debug!(
                            "Starting upload {} from field {}",
                            upload.original_name(),
                            part.field_name
                        );

                        let index = self.uploads.len();
                        self.uploads.push(upload.clone());
                        urls.push(None);
                        tasks.push(async move { (index, upload.start().await) });
                    }
                    Some(Err(e)) => return Err(self.fail(e, tasks)),
                    None => parts_done = true,
                },
                Some((index, result)) = tasks.next() => match result {
                    Ok(url) => urls[index] = Some(url),
                    Err(e) => return Err(self.fail(e, tasks)),
                },
                else => break,
            }
        }

        self.settled = true;
        tracing::info!("Upload batch of {} file(s) completed", self.uploads.len());
        Ok(urls.into_iter().flatten().collect())
    }

    fn fail<F>(&mut self, error: UploadError, tasks: FuturesUnordered<F>) -> UploadError
    where
        F: Future<Output = (usize, Result<String, UploadError>)> + Send + 'static,
    {
        tracing::error!("Upload batch failed: {}", error);
        self.abort_all();
        self.settled = true;

        // aborted uploads wind down on their own
        if !tasks.is_empty() {
            tokio::spawn(async move {
                tasks.for_each(|_| async {}).await;
            });
        }

        error
    }

    fn abort_all(&self) {
        for upload in &self.uploads {
            upload.abort();
        }
    }
}

impl Drop for UploadBatch {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(
                "Upload batch dropped before settling, aborting {} upload(s)",
                self.uploads.len()
            );
            self.abort_all();
        }
    }
}

impl std::fmt::Debug for UploadBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBatch")
            .field("uploads", &self.uploads)
            .field("settled", &self.settled)
            .finish()
    }
}
