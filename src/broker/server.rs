//! # Broker Server
//!
//! Owns the listening socket. Every accepted connection gets its own task,
//! which reads a single opcode byte and hands the connection to ingestion
//! (`w`) or to the subscriber registry (`r`). Anything else is answered
//! with `bad request`.
//!
//! # Startup sequence
//!
//! 1. Validate configuration
//! 2. Recover the data directory (temp sweep, log tail repair)
//! 3. Open the log writer and start the merger thread
//! 4. Bind the listener
//!
//! `run` and `run_until` queue the recovered pending records first, then
//! start accepting connections.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::config::BrokerConfig;
use super::errors::{BrokerError, BrokerResult};
use super::ingest::Ingestor;
use super::merger::{merge_queue, MergeQueue, Merger, MergerExit, MergerHandle};
use super::recovery::{self, RecoveryReport};
use super::registry::SubscriberRegistry;
use crate::log::LogWriter;
use crate::observability::{BrokerMetrics, Event, Logger, Severity};
use crate::pending::PendingStore;

/// Producer opcode
pub const OP_WRITE: u8 = b'w';

/// Subscriber opcode
pub const OP_READ: u8 = b'r';

/// Reply to an unknown or unreadable opcode
pub const BAD_REQUEST: &[u8] = b"bad request";

/// Connection role selected by the first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Write,
    Read,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            OP_WRITE => Some(Opcode::Write),
            OP_READ => Some(Opcode::Read),
            _ => None,
        }
    }
}

/// State every connection task needs
#[derive(Clone)]
struct ConnectionContext {
    ingestor: Ingestor,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<BrokerMetrics>,
    read_timeout: Duration,
    write_timeout: Duration,
}

/// A started broker, recovered and bound but not yet accepting.
pub struct Broker {
    config: BrokerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    context: ConnectionContext,
    queue: MergeQueue,
    merger: MergerHandle,
    recovery: RecoveryReport,
}

impl Broker {
    /// Recover the data directory, start the merger and bind the listener.
    pub async fn start(config: BrokerConfig) -> BrokerResult<Self> {
        config.validate()?;
        Logger::event(
            Event::BootStart,
            &[
                ("data_dir", config.data_dir.as_str()),
                ("listen_addr", config.listen_addr.as_str()),
            ],
        );

        let data_dir = config.data_path().to_path_buf();
        let store = PendingStore::open(&data_dir, config.pending_id_length)?;
        let report = recovery::recover(&data_dir, &store)?;
        let writer = LogWriter::open(&data_dir, config.sync_mode)?;

        let metrics = Arc::new(BrokerMetrics::new());
        let registry = Arc::new(SubscriberRegistry::from_config(&config, Arc::clone(&metrics)));

        let (queue, queue_rx) = merge_queue(config.merge_queue_capacity);
        let merger = Merger::new(
            store.clone(),
            writer,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            config.merge_failure_policy,
        )
        .spawn(queue_rx)?;

        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: config.listen_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let context = ConnectionContext {
            ingestor: Ingestor::new(&config, store, queue.clone(), Arc::clone(&metrics)),
            registry,
            metrics,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        };

        Ok(Self {
            config,
            listener,
            local_addr,
            context,
            queue,
            merger,
            recovery: report,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        Arc::clone(&self.context.metrics)
    }

    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.context.registry)
    }

    /// What startup recovery found
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Serve until Ctrl-C or until the merger halts.
    pub async fn run(self) -> BrokerResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                let error = e.to_string();
                Logger::warn("SIGNAL_HANDLER_UNAVAILABLE", &[("error", error.as_str())]);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Queue recovered records, then serve until `shutdown` completes or the
    /// merger halts.
    ///
    /// Returns `Err(MergerHalted)` if the merger stopped on a failure.
    pub async fn run_until<F>(self, shutdown: F) -> BrokerResult<()>
    where
        F: Future<Output = ()>,
    {
        let Broker {
            config,
            listener,
            local_addr,
            context,
            queue,
            mut merger,
            recovery,
        } = self;

        // Leftovers go ahead of any new traffic
        let mut requeued = 0;
        for id in recovery.pending {
            // A closed queue means the merger halted; the loop below sees it
            if queue.enqueue(id).await.is_err() {
                break;
            }
            requeued += 1;
        }
        context.metrics.add_recovery_restaged(requeued);
        drop(queue);

        let addr = local_addr.to_string();
        Logger::event(Event::Serving, &[("addr", addr.as_str())]);

        tokio::pin!(shutdown);

        let mut halted = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let context = context.clone();
                            tokio::spawn(async move {
                                handle_connection(context, stream, peer).await;
                            });
                        }
                        Err(e) => {
                            let error = e.to_string();
                            Logger::event(Event::AcceptFailed, &[("error", error.as_str())]);
                        }
                    }
                }

                _ = &mut shutdown => break false,

                // The broker holds a queue sender, so any exit here is a halt
                _ = merger.exited() => break true,
            }
        };

        let reason = if halted { "merger_halted" } else { "requested" };
        Logger::event(Event::ShutdownStart, &[("reason", reason)]);

        drop(listener);
        let closed = context.registry.shutdown();

        // Dropping the last queue sender lets the merger drain and exit.
        // In-flight producers hold clones for at most one read timeout.
        drop(context);
        if !halted {
            let grace = config.read_timeout() + config.write_timeout();
            match tokio::time::timeout(grace, merger.exited()).await {
                Ok(MergerExit::Drained) => {}
                Ok(MergerExit::Halted) => halted = true,
                Err(_) => Logger::warn("MERGER_DRAIN_TIMEOUT", &[]),
            }
        }

        let closed = closed.to_string();
        Logger::event(
            Event::ShutdownComplete,
            &[("subscribers_closed", closed.as_str())],
        );

        if halted {
            Err(BrokerError::MergerHalted)
        } else {
            Ok(())
        }
    }
}

async fn read_opcode(stream: &mut TcpStream, read_timeout: Duration) -> BrokerResult<Opcode> {
    let byte = tokio::time::timeout(read_timeout, stream.read_u8())
        .await
        .map_err(|_| BrokerError::Timeout("opcode"))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                BrokerError::ConnectionClosed("opcode")
            } else {
                BrokerError::Io(e)
            }
        })?;

    Opcode::from_byte(byte).ok_or(BrokerError::UnknownOpcode(byte))
}

async fn handle_connection(context: ConnectionContext, mut stream: TcpStream, peer: SocketAddr) {
    let peer = peer.to_string();

    match read_opcode(&mut stream, context.read_timeout).await {
        Ok(Opcode::Write) => match context.ingestor.handle(&mut stream).await {
            Ok(id) => {
                Logger::event(
                    Event::IngestAccepted,
                    &[("id", id.as_str()), ("peer", peer.as_str())],
                );
            }
            Err(e) => {
                context.metrics.increment_ingest_failures();
                let error = e.to_string();
                // A misbehaving producer is not a broker fault
                let severity = if e.is_client_error() {
                    Severity::Warn
                } else {
                    Event::IngestFailed.severity()
                };
                Logger::log(
                    severity,
                    Event::IngestFailed.as_str(),
                    &[("peer", peer.as_str()), ("error", error.as_str())],
                );
            }
        },
        Ok(Opcode::Read) => {
            if let Err(e) = context.registry.register(stream) {
                let error = e.to_string();
                Logger::event(
                    Event::SubscriberRejected,
                    &[("peer", peer.as_str()), ("error", error.as_str())],
                );
            }
        }
        Err(e) => {
            context.metrics.increment_bad_requests();
            let error = e.to_string();
            Logger::event(
                Event::BadRequest,
                &[("peer", peer.as_str()), ("error", error.as_str())],
            );
            let _ = tokio::time::timeout(context.write_timeout, async {
                stream.write_all(BAD_REQUEST).await?;
                stream.shutdown().await
            })
            .await;
        }
    }
}
