//! Batch submission of results
//!
//! The manual result form rejects request bodies above a couple of
//! megabytes, so a large results backlog goes out in several chunks. Chunks
//! always end on a line boundary and are sent strictly in order; the first
//! rejected chunk stops the run so nothing after it is ever reported as sent.

use crate::error::{Error, Result};
use crate::remote::ResultSink;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Largest chunk the manual result form accepts, in bytes
pub const SEND_LIMIT: usize = 2 * 1024 * 1024 - 1024;

/// Split `blob` into line-aligned chunks of at most `limit` bytes
///
/// Each chunk is a run of whole lines without the newline that separated it
/// from the next chunk. Concatenating the chunks with `"\n"` gives back
/// `blob`. A single line longer than `limit` cannot be split and is reported
/// as [`Error::RecordTooLarge`].
pub fn split_batches(blob: &str, limit: usize) -> Result<Vec<&str>> {
    let mut chunks = Vec::new();
    let mut rest = blob;
    let mut offset = 0;

    while !rest.is_empty() {
        if rest.len() <= limit {
            chunks.push(rest);
            break;
        }

        let window = &rest.as_bytes()[..=limit];
        match window.iter().rposition(|&b| b == b'\n') {
            Some(cut) if cut > 0 => {
                chunks.push(&rest[..cut]);
                rest = &rest[cut + 1..];
                offset += cut + 1;
            }
            _ => {
                return Err(Error::RecordTooLarge {
                    offset,
                    remaining: rest.len(),
                    limit,
                });
            }
        }
    }

    Ok(chunks)
}

/// Sends a results blob to a [`ResultSink`] in acknowledged chunks
pub struct BatchSubmitter {
    sink: Arc<dyn ResultSink>,
    limit: usize,
}

impl BatchSubmitter {
    /// Submitter using [`SEND_LIMIT`]
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self::with_limit(sink, SEND_LIMIT)
    }

    /// Submitter with a custom chunk limit
    pub fn with_limit(sink: Arc<dyn ResultSink>, limit: usize) -> Self {
        Self {
            sink,
            limit: limit.max(1),
        }
    }

    /// Submit `blob`, calling `on_accepted` with each chunk right after the
    /// service acknowledged it
    ///
    /// Returns the number of chunks sent. Chunks after a rejected one are not
    /// attempted, and an error from `on_accepted` also stops the run. The next
    /// chunk is only sent once the future returned by `on_accepted` resolves.
    pub async fn submit<F, Fut>(&self, blob: &str, mut on_accepted: F) -> Result<usize>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let chunks = split_batches(blob, self.limit)?;
        let total = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            debug!(chunk = index + 1, total, bytes = chunk.len(), "submitting results");
            if let Err(e) = self.sink.submit(chunk).await {
                warn!(chunk = index + 1, total, error = %e, "result submission rejected");
                return Err(e);
            }
            on_accepted(chunk.to_string()).await?;
        }

        if total > 0 {
            info!(chunks = total, bytes = blob.len(), "results submitted");
        }
        Ok(total)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_small_blob_is_one_chunk() {
        assert_eq!(split_batches("a\nb\nc", 100).unwrap(), vec!["a\nb\nc"]);
        assert!(split_batches("", 100).unwrap().is_empty());
    }

    #[test]
    fn test_chunks_are_line_aligned_and_bounded() {
        let lines: Vec<String> = (0..200)
            .map(|i| format!("no factor for M{} from 2^72 to 2^73", 70_000_000 + i))
            .collect();
        let blob = lines.join("\n");

        let chunks = split_batches(&blob, 300).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 300);
            assert!(!chunk.starts_with('\n') && !chunk.ends_with('\n'));
        }
        assert_eq!(chunks.join("\n"), blob);
    }

    #[test]
    fn test_line_exactly_at_limit() {
        // "aaaa\nbbbb": the newline sits at index == limit, so the first chunk is "aaaa"
        assert_eq!(split_batches("aaaa\nbbbb", 4).unwrap(), vec!["aaaa", "bbbb"]);
    }

    #[test]
    fn test_oversized_line_is_rejected() {
        let err = split_batches("ok\nthis line is far too long\nok", 10).unwrap_err();
        assert!(matches!(
            err,
            Error::RecordTooLarge {
                offset: 3,
                limit: 10,
                ..
            }
        ));
    }

    #[test]
    fn test_leading_newline_over_limit_is_rejected() {
        let err = split_batches("\nabcdefghijk", 5).unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { offset: 0, .. }));
    }

    /// Accepts the first `accept` batches, then rejects everything
    struct CountingSink {
        accept: usize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultSink for CountingSink {
        async fn submit(&self, batch: &str) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(batch.to_string());
            if seen.len() <= self.accept {
                Ok(())
            } else {
                Err(Error::protocol("manual_result", "no acknowledgement"))
            }
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_rejected_chunk() {
        let sink = Arc::new(CountingSink {
            accept: 1,
            seen: Mutex::new(Vec::new()),
        });
        let submitter = BatchSubmitter::with_limit(sink.clone(), 4);

        let mut accepted = Vec::new();
        let err = submitter
            .submit("aaaa\nbbbb\ncccc", |chunk| {
                accepted.push(chunk);
                async { Ok::<_, Error>(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol { .. }));
        assert_eq!(accepted, vec!["aaaa"]);
        assert_eq!(*sink.seen.lock().unwrap(), vec!["aaaa", "bbbb"]);
    }

    #[tokio::test]
    async fn test_callback_error_stops_submission() {
        let sink = Arc::new(CountingSink {
            accept: usize::MAX,
            seen: Mutex::new(Vec::new()),
        });
        let submitter = BatchSubmitter::with_limit(sink.clone(), 4);

        let err = submitter
            .submit("aaaa\nbbbb", |_| async {
                Err::<(), _>(Error::ShortWrite {
                    path: "results_sent.txt".into(),
                    written: 0,
                    expected: 5,
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ShortWrite { .. }));
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_next_chunk_waits_for_callback() {
        let sink = Arc::new(CountingSink {
            accept: usize::MAX,
            seen: Mutex::new(Vec::new()),
        });
        let submitter = BatchSubmitter::with_limit(sink.clone(), 4);
        let sink_view = sink.clone();

        // the sink must have seen exactly the chunks acknowledged so far
        let mut acknowledged = 0;
        submitter
            .submit("aaaa\nbbbb\ncccc", |_| {
                acknowledged += 1;
                let expected = acknowledged;
                let sink_view = sink_view.clone();
                async move {
                    tokio::task::yield_now().await;
                    assert_eq!(sink_view.seen.lock().unwrap().len(), expected);
                    Ok::<_, Error>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(acknowledged, 3);
    }

    #[tokio::test]
    async fn test_oversized_blob_sends_nothing() {
        let sink = Arc::new(CountingSink {
            accept: usize::MAX,
            seen: Mutex::new(Vec::new()),
        });
        let submitter = BatchSubmitter::with_limit(sink.clone(), 4);

        let err = submitter
            .submit("toolong", |_| async { Ok::<_, Error>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecordTooLarge { .. }));
        assert!(sink.seen.lock().unwrap().is_empty());
    }
}
