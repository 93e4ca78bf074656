//! # Subscriber Registry & Broadcaster
//!
//! Tracks live subscriber connections and fans merged payloads out to them.
//!
//! Every subscriber owns a bounded outbound queue drained by its own task,
//! so `broadcast` only enqueues under the lock and never waits on a socket.
//! A subscriber is removed when its queue overflows, a write fails or times
//! out, or the peer resets the connection. Removal happens under the lock
//! and at most once per subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::config::BrokerConfig;
use super::errors::{BrokerError, BrokerResult};
use crate::observability::{BrokerMetrics, Event, Logger};
use crate::pending::random_id;

/// Payload shared by every outbound queue of one broadcast
pub type Payload = Arc<[u8]>;

const ID_ALPHABET_SIZE: u128 = 62;

#[derive(Debug)]
struct SubscriberHandle {
    outbound: mpsc::Sender<Payload>,
}

#[derive(Debug, Default)]
struct RegistryState {
    subscribers: HashMap<String, SubscriberHandle>,
    closed: bool,
}

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers the payload was queued for
    pub delivered: usize,
    /// Subscribers removed during this broadcast
    pub evicted: usize,
}

/// Why a subscriber task ended
enum SubscriberExit {
    /// Removed from the registry by someone else
    Removed,
    WriteFailed(String),
    WriteTimedOut,
    /// Reading from the peer failed
    Reset,
}

/// Registry of live subscribers
#[derive(Debug)]
pub struct SubscriberRegistry {
    state: Mutex<RegistryState>,
    id_length: usize,
    queue_depth: usize,
    write_timeout: Duration,
    metrics: Arc<BrokerMetrics>,
}

impl SubscriberRegistry {
    /// Create an empty registry
    pub fn new(
        id_length: usize,
        queue_depth: usize,
        write_timeout: Duration,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            id_length,
            queue_depth,
            write_timeout,
            metrics,
        }
    }

    /// Create a registry from broker configuration
    pub fn from_config(config: &BrokerConfig, metrics: Arc<BrokerMetrics>) -> Self {
        Self::new(
            config.subscriber_id_length,
            config.subscriber_queue_depth,
            config.write_timeout(),
            metrics,
        )
    }

    // Every critical section leaves the map consistent, so a panic elsewhere
    // does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber connection and return its id.
    ///
    /// Nothing is written to the connection. Must be called inside a tokio
    /// runtime: the connection is driven by a task spawned here.
    pub fn register<S>(self: &Arc<Self>, stream: S) -> BrokerResult<String>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, rx) = mpsc::channel(self.queue_depth);

        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::RegistryClosed);
            }

            let capacity = ID_ALPHABET_SIZE
                .checked_pow(self.id_length as u32)
                .unwrap_or(u128::MAX);
            if state.subscribers.len() as u128 >= capacity {
                return Err(BrokerError::RegistryFull(state.subscribers.len()));
            }

            let id = loop {
                let candidate = random_id(self.id_length);
                if !state.subscribers.contains_key(&candidate) {
                    break candidate;
                }
            };
            state
                .subscribers
                .insert(id.clone(), SubscriberHandle { outbound });
            id
        };

        self.metrics.increment_subscribers_registered();
        Logger::event(Event::SubscriberAdded, &[("subscriber", id.as_str())]);

        tokio::spawn(run_subscriber(Arc::clone(self), id.clone(), stream, rx));
        Ok(id)
    }

    /// Remove a subscriber. Returns true if it was registered.
    ///
    /// Its connection is closed once its task sees the queue close.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().subscribers.remove(id).is_some()
    }

    fn evict(&self, id: &str, reason: &str) -> bool {
        let removed = self.remove(id);
        if removed {
            self.note_evicted(id, reason);
        }
        removed
    }

    fn note_evicted(&self, id: &str, reason: &str) {
        self.metrics.increment_subscribers_evicted();
        Logger::event(
            Event::SubscriberEvicted,
            &[("subscriber", id), ("reason", reason)],
        );
    }

    /// Queue `payload` for every registered subscriber.
    ///
    /// Subscribers whose queue is full or closed are removed; the rest still
    /// receive the payload.
    pub fn broadcast(&self, payload: &[u8]) -> BroadcastOutcome {
        let payload: Payload = Arc::from(payload);
        let mut outcome = BroadcastOutcome::default();
        let mut dropped: Vec<(String, &'static str)> = Vec::new();

        {
            let mut state = self.lock();
            for (id, handle) in state.subscribers.iter() {
                match handle.outbound.try_send(Arc::clone(&payload)) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => dropped.push((id.clone(), "outbound queue full")),
                    Err(TrySendError::Closed(_)) => dropped.push((id.clone(), "connection closed")),
                }
            }
            for (id, _) in &dropped {
                state.subscribers.remove(id);
            }
        }

        for (id, reason) in &dropped {
            self.note_evicted(id, reason);
        }
        outcome.evicted = dropped.len();
        outcome
    }

    /// Close every subscriber connection and refuse new registrations.
    ///
    /// Returns the number of subscribers that were registered.
    pub fn shutdown(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let count = state.subscribers.len();
        state.subscribers.clear();
        count
    }

    /// Returns true if `id` is currently registered
    pub fn contains(&self, id: &str) -> bool {
        self.lock().subscribers.contains_key(id)
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Drives one subscriber connection: writes queued payloads in order.
///
/// Bytes sent by the subscriber are ignored. A subscriber that half-closes
/// its side stays registered until a write to it fails; only a read error
/// (a reset) removes it early.
async fn run_subscriber<S>(
    registry: Arc<SubscriberRegistry>,
    id: String,
    stream: S,
    mut outbound: mpsc::Receiver<Payload>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut scratch = [0u8; 512];
    let mut read_open = true;

    let exit = loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(payload) = next else {
                    break SubscriberExit::Removed;
                };
                match tokio::time::timeout(registry.write_timeout, writer.write_all(&payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break SubscriberExit::WriteFailed(e.to_string()),
                    Err(_) => break SubscriberExit::WriteTimedOut,
                }
            }
            read = reader.read(&mut scratch), if read_open => {
                match read {
                    Ok(0) => read_open = false,
                    Ok(_) => {}
                    Err(_) => break SubscriberExit::Reset,
                }
            }
        }
    };

    // Stop taking payloads before closing so broadcast sees the queue closed
    outbound.close();
    let _ = writer.shutdown().await;

    match exit {
        SubscriberExit::Removed => {}
        SubscriberExit::WriteFailed(reason) => {
            registry.evict(&id, &reason);
        }
        SubscriberExit::WriteTimedOut => {
            registry.evict(&id, "write timed out");
        }
        SubscriberExit::Reset => {
            if registry.remove(&id) {
                registry.metrics.increment_subscribers_closed();
                Logger::event(Event::SubscriberClosed, &[("subscriber", id.as_str())]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::io::{duplex, DuplexStream};

    fn registry(queue_depth: usize) -> Arc<SubscriberRegistry> {
        Arc::new(SubscriberRegistry::new(
            3,
            queue_depth,
            Duration::from_secs(1),
            Arc::new(BrokerMetrics::new()),
        ))
    }

    fn connect(registry: &Arc<SubscriberRegistry>) -> (String, DuplexStream) {
        let (server, client) = duplex(4096);
        let id = registry.register(server).unwrap();
        (id, client)
    }

    async fn read_exactly(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("timed out reading broadcast")
            .unwrap();
        buf
    }

    async fn wait_until_removed(registry: &SubscriberRegistry, id: &str) {
        for _ in 0..500 {
            if !registry.contains(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("subscriber {} was never removed", id);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber_verbatim() {
        let registry = registry(16);
        let (_, mut a) = connect(&registry);
        let (_, mut b) = connect(&registry);

        let outcome = registry.broadcast(b"hello|world");

        assert_eq!(outcome, BroadcastOutcome { delivered: 2, evicted: 0 });
        assert_eq!(read_exactly(&mut a, 11).await, b"hello|world");
        assert_eq!(read_exactly(&mut b, 11).await, b"hello|world");
    }

    #[tokio::test]
    async fn test_per_subscriber_order_preserved() {
        let registry = registry(16);
        let (_, mut a) = connect(&registry);

        registry.broadcast(b"A");
        registry.broadcast(b"B");
        registry.broadcast(b"C");

        assert_eq!(read_exactly(&mut a, 3).await, b"ABC");
    }

    #[tokio::test]
    async fn test_broken_subscriber_isolated_and_removed_once() {
        let metrics = Arc::new(BrokerMetrics::new());
        let registry = Arc::new(SubscriberRegistry::new(
            3,
            16,
            Duration::from_secs(1),
            Arc::clone(&metrics),
        ));
        let (a_id, a) = connect(&registry);
        let (_, mut b) = connect(&registry);
        let (_, mut c) = connect(&registry);

        drop(a);
        registry.broadcast(b"first");
        registry.broadcast(b"second");

        assert_eq!(read_exactly(&mut b, 11).await, b"firstsecond");
        assert_eq!(read_exactly(&mut c, 11).await, b"firstsecond");

        wait_until_removed(&registry, &a_id).await;
        registry.broadcast(b"third");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.subscribers_evicted + snapshot.subscribers_closed, 1);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_is_evicted_by_broadcast() {
        let registry = registry(16);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        registry
            .lock()
            .subscribers
            .insert("dead".to_string(), SubscriberHandle { outbound: tx });

        let outcome = registry.broadcast(b"x");

        assert_eq!(outcome, BroadcastOutcome { delivered: 0, evicted: 1 });
        assert!(!registry.contains("dead"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted_when_queue_full() {
        let registry = registry(1);
        // Tiny pipe and nobody reading: the writer task blocks on the socket
        let (server, _client) = duplex(1);
        let id = registry.register(server).unwrap();

        let mut evicted = 0;
        for _ in 0..8 {
            evicted += registry.broadcast(b"payload").evicted;
            tokio::task::yield_now().await;
        }

        assert_eq!(evicted, 1);
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn test_concurrent_registration_yields_unique_ids() {
        let registry = Arc::new(SubscriberRegistry::new(
            1,
            4,
            Duration::from_secs(1),
            Arc::new(BrokerMetrics::new()),
        ));

        let mut tasks = Vec::new();
        let mut clients = Vec::new();
        for _ in 0..40 {
            let (server, client) = duplex(64);
            clients.push(client);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.register(server).unwrap() }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(ids.len(), 40);
        assert_eq!(registry.len(), 40);
    }

    #[tokio::test]
    async fn test_registry_full_when_id_space_exhausted() {
        let registry = Arc::new(SubscriberRegistry::new(
            1,
            4,
            Duration::from_secs(1),
            Arc::new(BrokerMetrics::new()),
        ));
        let mut clients = Vec::new();
        for _ in 0..62 {
            let (server, client) = duplex(64);
            clients.push(client);
            registry.register(server).unwrap();
        }

        let (server, _client) = duplex(64);
        assert!(matches!(registry.register(server), Err(BrokerError::RegistryFull(62))));
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_refuses_new() {
        let registry = registry(16);
        let (_, mut a) = connect(&registry);

        assert_eq!(registry.shutdown(), 1);

        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), a.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);

        let (server, _client) = duplex(64);
        assert!(matches!(registry.register(server), Err(BrokerError::RegistryClosed)));
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let registry = registry(16);
        registry.broadcast(b"early");
        let (_, mut late) = connect(&registry);
        registry.broadcast(b"late");

        assert_eq!(read_exactly(&mut late, 4).await, b"late");
    }

    #[tokio::test]
    async fn test_half_closed_subscriber_keeps_receiving() {
        let metrics = Arc::new(BrokerMetrics::new());
        let registry = Arc::new(SubscriberRegistry::new(
            3,
            16,
            Duration::from_secs(1),
            Arc::clone(&metrics),
        ));
        let (id, mut client) = connect(&registry);

        client.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.contains(&id));

        registry.broadcast(b"hello");

        assert_eq!(read_exactly(&mut client, 5).await, b"hello");
        assert!(registry.contains(&id));
        assert_eq!(metrics.snapshot().subscribers_closed, 0);
    }
}
