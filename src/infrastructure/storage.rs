use crate::config::StorageConfig;
use crate::services::upload::UploadContext;
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: StorageConfig) -> anyhow::Result<Arc<UploadContext>> {
    config.ensure_dirs().await.with_context(|| {
        format!(
            "failed to create storage directories {} and {}",
            config.tmp_dir.display(),
            config.upload_dir.display()
        )
    })?;

    info!(
        "📁 Storage: staging={} uploads={}",
        config.tmp_dir.display(),
        config.upload_dir.display()
    );

    Ok(Arc::new(UploadContext::new(config)))
}
