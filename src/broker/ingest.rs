//! Producer ingestion
//!
//! Handles a connection after its `w` opcode: read the payload, stage it in
//! the pending store, queue its id for merge, reply `ack`.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::config::{AckMode, BrokerConfig, ProducerFraming};
use super::errors::{BrokerError, BrokerResult};
use super::merger::MergeQueue;
use crate::observability::BrokerMetrics;
use crate::pending::PendingStore;

/// Reply sent to a producer once its blob is accepted
pub const ACK: &[u8] = b"ack";

/// Reads one producer payload using `framing`, bounded by `max` bytes.
pub async fn read_payload<R>(reader: &mut R, framing: ProducerFraming, max: usize) -> BrokerResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match framing {
        ProducerFraming::LengthPrefixed => {
            let len = reader.read_u32().await.map_err(|e| eof_as_closed(e, "payload length"))?;
            if len as usize > max {
                return Err(BrokerError::PayloadTooLarge {
                    size: len as u64,
                    max,
                });
            }
            let mut payload = vec![0u8; len as usize];
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| eof_as_closed(e, "payload"))?;
            Ok(payload)
        }
        ProducerFraming::UntilEof => {
            let mut payload = Vec::new();
            (&mut *reader)
                .take(max as u64 + 1)
                .read_to_end(&mut payload)
                .await?;
            if payload.len() > max {
                return Err(BrokerError::PayloadTooLarge {
                    size: payload.len() as u64,
                    max,
                });
            }
            Ok(payload)
        }
        ProducerFraming::SingleRead => {
            let mut payload = vec![0u8; max];
            let read = reader.read(&mut payload).await?;
            // EOF before any payload byte is a hang-up, not an empty blob
            if read == 0 {
                return Err(BrokerError::ConnectionClosed("payload"));
            }
            payload.truncate(read);
            Ok(payload)
        }
    }
}

fn eof_as_closed(e: std::io::Error, what: &'static str) -> BrokerError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BrokerError::ConnectionClosed(what)
    } else {
        BrokerError::Io(e)
    }
}

/// Everything a producer connection needs
#[derive(Debug, Clone)]
pub struct Ingestor {
    store: PendingStore,
    queue: MergeQueue,
    metrics: Arc<BrokerMetrics>,
    framing: ProducerFraming,
    max_payload_bytes: usize,
    read_timeout: Duration,
    ack_mode: AckMode,
}

impl Ingestor {
    pub fn new(
        config: &BrokerConfig,
        store: PendingStore,
        queue: MergeQueue,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Self {
            store,
            queue,
            metrics,
            framing: config.producer_framing,
            max_payload_bytes: config.max_payload_bytes,
            read_timeout: config.read_timeout(),
            ack_mode: config.ack_mode,
        }
    }

    /// Serve one producer. Returns the pending id of the accepted blob.
    ///
    /// On error nothing has been acknowledged and the caller drops the
    /// connection. A blob that was staged but not queued stays on disk and
    /// is picked up by the next startup recovery.
    pub async fn handle<S>(&self, stream: &mut S) -> BrokerResult<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = tokio::time::timeout(
            self.read_timeout,
            read_payload(stream, self.framing, self.max_payload_bytes),
        )
        .await
        .map_err(|_| BrokerError::Timeout("payload"))??;

        let store = self.store.clone();
        let id = tokio::task::spawn_blocking(move || store.stage(&payload))
            .await
            .map_err(|e| BrokerError::Internal(format!("staging task failed: {}", e)))??;

        match self.ack_mode {
            AckMode::Staged => self.queue.enqueue(id.clone()).await?,
            AckMode::Merged => {
                self.queue.enqueue_and_wait(id.clone()).await?;
            }
        }

        stream.write_all(ACK).await?;
        let _ = stream.shutdown().await;

        self.metrics.increment_producers_accepted();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::merger::merge_queue;
    use crate::pending::PENDING_ID_LENGTH;
    use tempfile::TempDir;
    use tokio::io::duplex;

    fn length_prefixed(payload: &[u8]) -> Vec<u8> {
        let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(payload);
        framed
    }

    #[tokio::test]
    async fn test_read_length_prefixed() {
        let framed = length_prefixed(b"hello|world");
        let payload = read_payload(&mut framed.as_slice(), ProducerFraming::LengthPrefixed, 64)
            .await
            .unwrap();
        assert_eq!(payload, b"hello|world");
    }

    #[tokio::test]
    async fn test_length_prefix_over_limit_rejected() {
        let framed = length_prefixed(&[7u8; 65]);
        let err = read_payload(&mut framed.as_slice(), ProducerFraming::LengthPrefixed, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PayloadTooLarge { size: 65, max: 64 }));
    }

    #[tokio::test]
    async fn test_short_length_prefixed_payload_is_closed_connection() {
        let mut framed = length_prefixed(b"abcdef");
        framed.truncate(7);
        let err = read_payload(&mut framed.as_slice(), ProducerFraming::LengthPrefixed, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ConnectionClosed("payload")));
    }

    #[tokio::test]
    async fn test_read_until_eof() {
        let payload = read_payload(&mut &b"abc|def"[..], ProducerFraming::UntilEof, 7)
            .await
            .unwrap();
        assert_eq!(payload, b"abc|def");

        let err = read_payload(&mut &b"abc|defg"[..], ProducerFraming::UntilEof, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_single_read_truncates_to_buffer() {
        let payload = read_payload(&mut &b"0123456789"[..], ProducerFraming::SingleRead, 4)
            .await
            .unwrap();
        assert_eq!(payload, b"0123");
    }

    #[tokio::test]
    async fn test_single_read_eof_is_closed_connection() {
        let result = read_payload(&mut &b""[..], ProducerFraming::SingleRead, 16).await;
        assert!(matches!(result, Err(BrokerError::ConnectionClosed("payload"))));
    }

    #[tokio::test]
    async fn test_handle_stages_queues_and_acks() {
        let temp_dir = TempDir::new().unwrap();
        let store = PendingStore::open(temp_dir.path(), PENDING_ID_LENGTH).unwrap();
        let (queue, mut rx) = merge_queue(4);
        let ingestor = Ingestor::new(
            &BrokerConfig::new(temp_dir.path().to_string_lossy()),
            store.clone(),
            queue,
            Arc::new(BrokerMetrics::new()),
        );

        let (mut server, mut client) = duplex(1024);
        client.write_all(&length_prefixed(b"payload")).await.unwrap();

        let id = ingestor.handle(&mut server).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, ACK);
        assert_eq!(store.read(&id).unwrap(), b"payload");
        assert_eq!(rx.recv().await.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_handle_without_merger_does_not_ack() {
        let temp_dir = TempDir::new().unwrap();
        let store = PendingStore::open(temp_dir.path(), PENDING_ID_LENGTH).unwrap();
        let (queue, rx) = merge_queue(4);
        drop(rx);
        let ingestor = Ingestor::new(
            &BrokerConfig::new(temp_dir.path().to_string_lossy()),
            store.clone(),
            queue,
            Arc::new(BrokerMetrics::new()),
        );

        let (mut server, mut client) = duplex(1024);
        client.write_all(&length_prefixed(b"kept")).await.unwrap();

        let err = ingestor.handle(&mut server).await.unwrap_err();
        assert!(matches!(err, BrokerError::MergeQueueClosed));

        // Staged file survives for recovery
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }
}
