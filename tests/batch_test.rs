use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, stream};
use rand::rngs::mock::StepRng;
use rust_share_backend::config::StorageConfig;
use rust_share_backend::error::UploadError;
use rust_share_backend::models::IncomingPart;
use rust_share_backend::services::batch::UploadBatch;
use rust_share_backend::services::temp_name::TempNameAllocator;
use rust_share_backend::services::upload::{UploadContext, UploadState};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::io::StreamReader;

const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

fn setup() -> (TempDir, StorageConfig) {
    let root = TempDir::new().unwrap();
    let config = StorageConfig::new(root.path().join("tmp"), root.path().join("uploads"));
    std::fs::create_dir_all(&config.tmp_dir).unwrap();
    std::fs::create_dir_all(&config.upload_dir).unwrap();
    (root, config)
}

fn part(name: &str, data: &'static [u8]) -> Result<IncomingPart, UploadError> {
    Ok(IncomingPart::new("file", name, data))
}

/// A part whose bytes arrive whenever the test sends them.
fn slow_part(name: &str) -> (mpsc::Sender<io::Result<Bytes>>, Result<IncomingPart, UploadError>) {
    let (sender, body) = mpsc::channel(4);
    (sender, Ok(IncomingPart::new("file", name, StreamReader::new(body))))
}

fn failing_part(name: &str) -> Result<IncomingPart, UploadError> {
    let body = StreamReader::new(stream::iter(vec![
        Ok(Bytes::from_static(b"par")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ]));
    Ok(IncomingPart::new("file", name, body))
}

async fn wait_until_empty(dir: &Path) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while std::fs::read_dir(dir).unwrap().next().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("directory was not cleaned up");
}

#[tokio::test]
async fn test_single_file_end_to_end() {
    let (_root, config) = setup();
    let context = Arc::new(UploadContext::new(config.clone()));
    let mut batch = UploadBatch::new(context);

    let urls = batch
        .run(stream::iter(vec![part("photo.png", b"hello")]))
        .await
        .unwrap();

    assert_eq!(urls, vec![format!("{HELLO_SHA1}/photo.png")]);
    let stored = config.upload_dir.join(HELLO_SHA1).join("photo.png");
    assert_eq!(std::fs::read(stored).unwrap(), b"hello");

    let temp_name = batch.uploads()[0].temp_name().unwrap().to_string();
    assert!(!config.tmp_dir.join(temp_name).exists());
    assert!(batch.is_settled());
}

#[tokio::test]
async fn test_urls_keep_arrival_order() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config)));

    let (mut slow_sender, slow) = slow_part("first.txt");
    let parts = stream::iter(vec![slow, part("second.txt", b"two"), part("third.txt", b"three")]);

    let (urls, _) = tokio::join!(batch.run(parts), async move {
        // let the later files finish first
        tokio::time::sleep(Duration::from_millis(50)).await;
        slow_sender.send(Ok(Bytes::from_static(b"one"))).await.unwrap();
    });

    let urls = urls.unwrap();
    assert_eq!(urls.len(), 3);
    assert!(urls[0].ends_with("/first.txt"));
    assert!(urls[1].ends_with("/second.txt"));
    assert!(urls[2].ends_with("/third.txt"));
}

#[tokio::test]
async fn test_identical_content_shares_digest_directory() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config.clone())));

    let urls = batch
        .run(stream::iter(vec![
            part("a.txt", b"hello"),
            part("b.txt", b"hello"),
        ]))
        .await
        .unwrap();

    assert_eq!(
        urls,
        vec![format!("{HELLO_SHA1}/a.txt"), format!("{HELLO_SHA1}/b.txt")]
    );
    let digest_dir = config.upload_dir.join(HELLO_SHA1);
    assert_eq!(std::fs::read(digest_dir.join("a.txt")).unwrap(), b"hello");
    assert_eq!(std::fs::read(digest_dir.join("b.txt")).unwrap(), b"hello");
    assert_eq!(std::fs::read_dir(&config.upload_dir).unwrap().count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_with_same_content() {
    let (_root, config) = setup();
    let context = Arc::new(UploadContext::new(config.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let context = context.clone();
        handles.push(tokio::spawn(async move {
            let mut batch = UploadBatch::new(context);
            batch
                .run(stream::iter(vec![part("same.txt", b"hello")]))
                .await
        }));
    }

    for handle in handles {
        let urls = handle.await.unwrap().unwrap();
        assert_eq!(urls, vec![format!("{HELLO_SHA1}/same.txt")]);
    }

    let stored = config.upload_dir.join(HELLO_SHA1).join("same.txt");
    assert_eq!(std::fs::read(stored).unwrap(), b"hello");
}

#[tokio::test]
async fn test_one_failure_aborts_the_whole_batch() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config.clone())));

    let (_slow_sender, slow) = slow_part("stuck.bin");
    let parts = stream::iter(vec![part("done.txt", b"hello"), slow, failing_part("broken.bin")]);

    let err = batch.run(parts).await.unwrap_err();
    assert!(matches!(err, UploadError::StreamFailure(_)), "{err:?}");
    assert!(batch.is_settled());

    let uploads = batch.uploads().to_vec();
    assert_eq!(uploads.len(), 3);
    for upload in &uploads {
        tokio::time::timeout(Duration::from_secs(5), upload.closed())
            .await
            .unwrap();
        assert!(upload.is_aborted());
        assert!(upload.state().is_terminal());
    }
    assert_eq!(uploads[1].state(), UploadState::Aborted);
    assert_eq!(uploads[2].state(), UploadState::Failed);

    // temp files of the unfinished uploads are removed in the background
    wait_until_empty(&config.tmp_dir).await;

    // a sibling that finished first stays in the store
    if uploads[0].state() == UploadState::Done {
        assert!(config.upload_dir.join(HELLO_SHA1).join("done.txt").exists());
    }
}

#[tokio::test]
async fn test_part_source_error_fails_batch() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config)));

    let parts = stream::iter(vec![
        part("a.txt", b"hello"),
        Err(UploadError::PartSource("unexpected end of body".to_string())),
    ]);

    let err = batch.run(parts).await.unwrap_err();
    assert!(matches!(err, UploadError::PartSource(_)));
    assert!(batch.uploads().iter().all(|upload| upload.is_aborted()));
}

#[tokio::test]
async fn test_allocation_exhaustion_fails_batch() {
    let (_root, config) = setup();
    std::fs::write(config.tmp_dir.join("AAAAA"), b"someone else").unwrap();
    let context = UploadContext::new(config).with_allocator(TempNameAllocator::new(StepRng::new(0, 0)));
    let mut batch = UploadBatch::new(Arc::new(context));

    let err = batch
        .run(stream::iter(vec![part("a.txt", b"hello")]))
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::AllocationExhausted { attempts: 3 }));
    assert_eq!(batch.uploads()[0].state(), UploadState::Failed);
}

#[tokio::test]
async fn test_empty_batch_settles_with_no_urls() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config)));

    let urls = batch.run(stream::iter(Vec::new())).await.unwrap();
    assert!(urls.is_empty());
}

#[tokio::test]
async fn test_batch_settles_only_once() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config)));

    batch
        .run(stream::iter(vec![part("a.txt", b"hello")]))
        .await
        .unwrap();
    let err = batch
        .run(stream::iter(vec![part("b.txt", b"hello")]))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::BatchSettled));
    assert_eq!(batch.uploads().len(), 1);
}

#[tokio::test]
async fn test_dropped_batch_aborts_uploads() {
    let (_root, config) = setup();
    let mut batch = UploadBatch::new(Arc::new(UploadContext::new(config.clone())));

    let (mut slow_sender, slow) = slow_part("stuck.bin");
    slow_sender.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(100),
        batch.run(stream::iter(vec![slow])),
    )
    .await;
    assert!(timed_out.is_err());

    let uploads = batch.uploads().to_vec();
    drop(batch);

    for upload in &uploads {
        upload.closed().await;
        assert!(upload.is_aborted());
        assert_eq!(upload.state(), UploadState::Aborted);
    }
    wait_until_empty(&config.tmp_dir).await;
}
