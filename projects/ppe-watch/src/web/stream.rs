// Bridges the blocking, pull-based chunk iterators onto an async response body.

use crate::error::PipelineError;
use crate::video::encoder::MULTIPART_CONTENT_TYPE;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;

/// Drives `chunks` on a blocking thread and streams them into a response body.
///
/// The channel holds a single chunk, so the next frame is only produced once the
/// client has taken the previous one. When the client goes away the loop stops,
/// and `finish` receives the iterator for cleanup on the same thread.
pub fn pump<I, F>(chunks: I, finish: F) -> Body
where
    I: Iterator<Item = Result<Vec<u8>, PipelineError>> + Send + 'static,
    F: FnOnce(I) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);

    tokio::task::spawn_blocking(move || {
        let mut chunks = chunks;
        let mut sent = 0usize;
        for chunk in chunks.by_ref() {
            match chunk {
                Ok(bytes) => {
                    if tx.blocking_send(bytes).is_err() {
                        tracing::info!("Stream consumer disconnected after {} chunks", sent);
                        break;
                    }
                    sent += 1;
                }
                Err(e) => {
                    tracing::error!("Stream truncated after {} chunks: {}", sent, e);
                    break;
                }
            }
        }
        drop(tx);
        finish(chunks);
    });

    let stream = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, std::io::Error>(Bytes::from(chunk));
        }
    };
    Body::from_stream(stream)
}

/// Wraps a pumped body with the `multipart/x-mixed-replace` headers.
pub fn multipart_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pump_forwards_chunks_in_order() {
        let chunks = (0u8..5).map(|i| Ok::<_, PipelineError>(vec![i]));
        let body = pump(chunks, |_| {});
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), &[0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_pump_stops_at_first_error() {
        let chunks = vec![
            Ok(vec![1u8]),
            Err(PipelineError::sink_write("disk full")),
            Ok(vec![2u8]),
        ]
        .into_iter();
        let body = pump(chunks, |_| {});
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), &[1]);
    }

    #[tokio::test]
    async fn test_dropped_body_runs_finish() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let endless = std::iter::repeat_with(|| Ok::<_, PipelineError>(vec![0u8; 16]));

        let body = pump(endless, move |_| flag.store(true, Ordering::SeqCst));
        drop(body);

        for _ in 0..100 {
            if finished.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_multipart_headers() {
        let response = multipart_response(Body::empty());
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
    }
}
