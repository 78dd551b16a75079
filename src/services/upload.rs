use crate::config::StorageConfig;
use crate::error::UploadError;
use crate::models::PartReader;
use crate::services::cleanup::{FsTreeRemover, TreeRemover, remove_best_effort};
use crate::services::temp_name::TempNameAllocator;
use crate::utils::hash::calculate_hash_from_reader;
use crate::utils::url::content_url;
use crate::utils::validation::sanitize_filename;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything an upload needs besides its own bytes. Shared by every upload
/// of every batch served by one process.
pub struct UploadContext {
    pub config: StorageConfig,
    pub allocator: TempNameAllocator,
    pub remover: Arc<dyn TreeRemover>,
}

impl UploadContext {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            allocator: TempNameAllocator::from_entropy(),
            remover: Arc::new(FsTreeRemover),
        }
    }

    pub fn with_allocator(mut self, allocator: TempNameAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_remover(mut self, remover: Arc<dyn TreeRemover>) -> Self {
        self.remover = remover;
        self
    }
}

impl std::fmt::Debug for UploadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    Allocating,
    Writing,
    Hashing,
    Finalizing,
    Done,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent {
    Start,
    Allocated,
    Written,
    Hashed,
    Finalized,
    Abort,
    Fail,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Done | UploadState::Aborted | UploadState::Failed
        )
    }

    /// Next state after `event`, or `None` if the event is not accepted here.
    pub fn on(self, event: UploadEvent) -> Option<UploadState> {
        use UploadEvent as E;
        use UploadState as S;

        match (self, event) {
            (state, _) if state.is_terminal() => None,
            (_, E::Abort) => Some(S::Aborted),
            (_, E::Fail) => Some(S::Failed),
            (S::Created, E::Start) => Some(S::Allocating),
            (S::Allocating, E::Allocated) => Some(S::Writing),
            (S::Writing, E::Written) => Some(S::Hashing),
            (S::Hashing, E::Hashed) => Some(S::Finalizing),
            (S::Finalizing, E::Finalized) => Some(S::Done),
            _ => None,
        }
    }
}

/// How the content landed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// This upload created the digest directory.
    Stored,
    /// The digest directory already existed.
    Deduplicated,
}

/// Commits a fully written and hashed temp file into
/// `{upload_dir}/{digest}/{name}`.
///
/// Creating the digest directory is the only synchronization between
/// concurrent writers of the same content, so "already exists" is a success
/// branch rather than an error. On a dedup hit the temp file is only moved
/// when the digest directory does not hold this name yet; otherwise it is
/// left where it is.
pub async fn finalize(
    upload_dir: &Path,
    temp_path: &Path,
    digest: &str,
    name: &str,
) -> Result<FinalizeOutcome, UploadError> {
    let digest_dir = upload_dir.join(digest);
    let target = digest_dir.join(name);

    let outcome = match tokio::fs::create_dir(&digest_dir).await {
        Ok(()) => FinalizeOutcome::Stored,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => FinalizeOutcome::Deduplicated,
        Err(e) => return Err(UploadError::filesystem("mkdir", &digest_dir, e)),
    };

    if outcome == FinalizeOutcome::Deduplicated {
        let present = tokio::fs::try_exists(&target)
            .await
            .map_err(|e| UploadError::filesystem("exists", &target, e))?;
        if present {
            tracing::info!(
                "Dedup hit: {} already stored as {}, leaving {}",
                digest,
                name,
                temp_path.display()
            );
            return Ok(outcome);
        }
        tracing::info!("Dedup hit: adding name {} under {}", name, digest);
    }

    tokio::fs::rename(temp_path, &target)
        .await
        .map_err(|e| UploadError::filesystem("rename", &target, e))?;

    Ok(outcome)
}

struct Shared {
    original_name: String,
    context: Arc<UploadContext>,
    source: Mutex<Option<PartReader>>,
    temp_name: OnceLock<String>,
    digest: OnceLock<String>,
    state: watch::Sender<UploadState>,
    // true while `start` is driving the upload
    active: watch::Sender<bool>,
    aborted: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn transition(&self, event: UploadEvent) -> bool {
        let aborted = self.aborted.load(Ordering::SeqCst);
        self.state.send_if_modified(|state| {
            if aborted && event != UploadEvent::Abort {
                return false;
            }
            match state.on(event) {
                Some(next) => {
                    tracing::debug!("Upload {}: {:?} -> {:?}", self.original_name, state, next);
                    *state = next;
                    true
                }
                None => false,
            }
        })
    }

    fn take_source(&self) -> Option<PartReader> {
        self.source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn abort(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return None;
        }

        tracing::debug!("Aborting upload {}", self.original_name);
        self.cancel.cancel();
        drop(self.take_source());
        self.transition(UploadEvent::Abort);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                "No runtime available, skipping cleanup for upload {}",
                self.original_name
            );
            return None;
        };

        let shared = Arc::clone(self);
        Some(runtime.spawn(async move {
            // The writer must be gone before its files are removed.
            let mut active = shared.active.subscribe();
            let _ = active.wait_for(|running| !*running).await;

            let Some(temp_name) = shared.temp_name.get() else {
                return;
            };
            let config = &shared.context.config;
            let paths = [
                config.tmp_dir.join(temp_name),
                config.upload_dir.join(temp_name),
            ];
            remove_best_effort(shared.context.remover.as_ref(), &paths).await;
        }))
    }
}

/// Marks the upload idle when `start` finishes or its future is dropped.
struct ActiveGuard(Arc<Shared>);

impl ActiveGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.active.send_replace(true);
        Self(Arc::clone(shared))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let terminal = self.0.state.borrow().is_terminal();
        if !terminal {
            self.0.abort();
        }
        self.0.active.send_replace(false);
    }
}

/// A single file moving from its source stream into the content-addressed
/// store.
///
/// Cloning is cheap and every clone refers to the same upload, so a batch
/// can keep a handle for `abort` while the upload drives itself.
#[derive(Clone)]
pub struct Upload {
    inner: Arc<Shared>,
}

impl Upload {
    pub fn new(
        file_name: &str,
        source: PartReader,
        context: Arc<UploadContext>,
    ) -> Self {
        let (state, _) = watch::channel(UploadState::Created);
        let (active, _) = watch::channel(false);

        Self {
            inner: Arc::new(Shared {
                original_name: sanitize_filename(file_name),
                context,
                source: Mutex::new(Some(source)),
                temp_name: OnceLock::new(),
                digest: OnceLock::new(),
                state,
                active,
                aborted: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn original_name(&self) -> &str {
        &self.inner.original_name
    }

    pub fn temp_name(&self) -> Option<&str> {
        self.inner.temp_name.get().map(String::as_str)
    }

    pub fn digest(&self) -> Option<&str> {
        self.inner.digest.get().map(String::as_str)
    }

    pub fn state(&self) -> UploadState {
        *self.inner.state.borrow()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Reference URL, available once the upload is done.
    pub fn url(&self) -> Option<String> {
        if self.state() != UploadState::Done {
            return None;
        }
        self.digest()
            .map(|digest| content_url(digest, &self.inner.original_name))
    }

    /// Waits until the upload reached a terminal state and nothing drives it
    /// anymore.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| state.is_terminal()).await;
        let mut active = self.inner.active.subscribe();
        let _ = active.wait_for(|running| !*running).await;
    }

    /// Stops the upload and removes its temp file in the background.
    ///
    /// Only the first call has an effect; it returns the cleanup task. Done
    /// and failed uploads keep their state.
    pub fn abort(&self) -> Option<JoinHandle<()>> {
        self.inner.abort()
    }

    /// Drives the upload to completion and returns its URL.
    pub async fn start(&self) -> Result<String, UploadError> {
        if !self.inner.transition(UploadEvent::Start) {
            return Err(if self.is_aborted() {
                UploadError::AbortedBySibling
            } else {
                UploadError::AlreadyStarted
            });
        }

        let _guard = ActiveGuard::new(&self.inner);
        let source = self
            .inner
            .take_source()
            .ok_or(UploadError::AbortedBySibling)?;

        let result = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(UploadError::AbortedBySibling),
            result = self.run(source) => result,
        };

        match result {
            Ok(url) if self.inner.transition(UploadEvent::Finalized) => {
                tracing::info!("Upload {} stored at {}", self.inner.original_name, url);
                Ok(url)
            }
            // finished after an abort; the result is discarded
            Ok(_) => Err(UploadError::AbortedBySibling),
            Err(_) if self.is_aborted() => Err(UploadError::AbortedBySibling),
            Err(e) => {
                tracing::warn!("Upload {} failed: {}", self.inner.original_name, e);
                self.inner.transition(UploadEvent::Fail);
                Err(e)
            }
        }
    }

    fn advance(&self, event: UploadEvent) -> Result<(), UploadError> {
        if self.inner.transition(event) {
            Ok(())
        } else {
            Err(UploadError::AbortedBySibling)
        }
    }

    async fn run(&self, mut source: PartReader) -> Result<String, UploadError> {
        let config = &self.inner.context.config;

        let temp_name = self
            .inner
            .context
            .allocator
            .allocate(&config.tmp_dir)
            .await?;
        let temp_name = self.inner.temp_name.get_or_init(|| temp_name);
        self.advance(UploadEvent::Allocated)?;

        let temp_path = config.tmp_dir.join(temp_name);
        self.write_temp(&mut source, &temp_path).await?;
        drop(source);
        self.advance(UploadEvent::Written)?;

        let file = File::open(&temp_path)
            .await
            .map_err(|e| UploadError::filesystem("open", &temp_path, e))?;
        let digest = calculate_hash_from_reader(BufReader::new(file))
            .await
            .map_err(|e| UploadError::filesystem("read", &temp_path, e))?;
        let digest = self.inner.digest.get_or_init(|| digest);
        self.advance(UploadEvent::Hashed)?;

        let outcome = finalize(
            &config.upload_dir,
            &temp_path,
            digest,
            &self.inner.original_name,
        )
        .await?;
        tracing::debug!(
            "Upload {} finalized as {:?}",
            self.inner.original_name,
            outcome
        );

        Ok(content_url(digest, &self.inner.original_name))
    }

    async fn write_temp(
        &self,
        source: &mut PartReader,
        temp_path: &Path,
    ) -> Result<(), UploadError> {
        let mut file = File::create(temp_path)
            .await
            .map_err(|e| UploadError::filesystem("create", temp_path, e))?;

        // copy only pulls more from the source once the file accepted the
        // previous buffer
        let written = tokio::io::copy(source, &mut file)
            .await
            .map_err(UploadError::StreamFailure)?;
        file.flush().await.map_err(UploadError::StreamFailure)?;

        tracing::debug!("Wrote {} bytes to {}", written, temp_path.display());
        Ok(())
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("original_name", &self.inner.original_name)
            .field("temp_name", &self.temp_name())
            .field("digest", &self.digest())
            .field("state", &self.state())
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
