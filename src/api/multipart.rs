//! Part source over a `multipart/form-data` request body.
//!
//! Multipart fields can only be read one after another, while a batch wants
//! to own every file stream independently. A pump task reads the body and
//! forwards each file field's chunks into a small bounded channel, so a slow
//! upload slows down reading of the request body instead of buffering it.

use crate::error::UploadError;
use crate::models::IncomingPart;
use axum::extract::Multipart;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;

/// Chunks buffered per file before the pump waits for the upload.
const CHUNK_BUFFER: usize = 4;

type PartResult = Result<IncomingPart, UploadError>;

/// Stream of file parts of one request. Dropping it stops reading the body.
pub struct MultipartParts {
    parts: mpsc::Receiver<PartResult>,
    pump: JoinHandle<()>,
}

impl MultipartParts {
    pub fn new(multipart: Multipart) -> Self {
        let (sender, parts) = mpsc::channel(0);
        let pump = tokio::spawn(pump_fields(multipart, sender));
        Self { parts, pump }
    }
}

impl Stream for MultipartParts {
    type Item = PartResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.parts.poll_next_unpin(cx)
    }
}

impl Drop for MultipartParts {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_fields(mut multipart: Multipart, mut parts: mpsc::Sender<PartResult>) {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let _ = parts.send(Err(UploadError::PartSource(e.body_text()))).await;
                break;
            }
        };

        // Plain form values are not files
        let Some(file_name) = field.file_name().map(str::to_owned) else {
            tracing::debug!("Skipping non-file field {:?}", field.name());
            continue;
        };
        let field_name = field.name().unwrap_or_default().to_owned();

        let (mut chunks, body) = mpsc::channel::<io::Result<Bytes>>(CHUNK_BUFFER);
        let part = IncomingPart::new(field_name, file_name, StreamReader::new(body));
        if parts.send(Ok(part)).await.is_err() {
            // the batch is gone
            return;
        }

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if chunks.send(Ok(chunk)).await.is_err() {
                        // upload stopped reading; skip the rest of this field
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = chunks.send(Err(io::Error::other(e))).await;
                    return;
                }
            }
        }
    }
}
