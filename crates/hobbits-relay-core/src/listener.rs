use crate::error::{Error, Result};
use crate::events::{EventSink, RelayEvent};
use crate::relay::{ConnectionPair, PairId, PairSettings, RelayStats};
use crate::transport::{self, Endpoint};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle notifications a pair sends to whoever owns the registry.
#[derive(Debug)]
pub enum PairEvent {
    Opened {
        id: PairId,
        peer: SocketAddr,
        cancel: CancellationToken,
    },
    Closed {
        id: PairId,
        stats: RelayStats,
    },
}

/// Everything needed to turn an accepted socket into a running pair.
#[derive(Clone)]
pub struct Pairing {
    target: Endpoint,
    connect_timeout: Duration,
    settings: PairSettings,
    sink: Arc<dyn EventSink>,
    events: mpsc::UnboundedSender<PairEvent>,
    shutdown: CancellationToken,
    next_id: Arc<AtomicU64>,
}

impl Pairing {
    pub fn new(
        target: Endpoint,
        connect_timeout: Duration,
        settings: PairSettings,
        sink: Arc<dyn EventSink>,
        events: mpsc::UnboundedSender<PairEvent>,
        shutdown: CancellationToken,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        Pairing {
            target,
            connect_timeout,
            settings,
            sink,
            events,
            shutdown,
            next_id,
        }
    }

    /// Dials the target for `inbound` and relays until the pair ends.
    ///
    /// A failed dial drops `inbound` and is only reported to the sink.
    pub async fn pair(self, inbound: TcpStream, peer: SocketAddr) {
        let cancel = self.shutdown.child_token();
        let dialed = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%peer, "dial abandoned on shutdown");
                return;
            }
            res = transport::connect(&self.target, self.connect_timeout) => res,
        };
        let outbound = match dialed {
            Ok(sock) => sock,
            Err(err) => {
                drop(inbound);
                self.sink.record(&RelayEvent::DialFailed {
                    peer,
                    error: err.to_string(),
                });
                return;
            }
        };
        let _ = inbound.set_nodelay(true);

        let id = PairId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pair = ConnectionPair::new(id, inbound, outbound, self.settings);
        let opened = PairEvent::Opened {
            id,
            peer,
            cancel: cancel.clone(),
        };
        if self.events.send(opened).is_err() {
            return;
        }

        let stats = pair.relay(self.sink.as_ref(), cancel).await;
        let _ = self.events.send(PairEvent::Closed { id, stats });
    }
}

/// Stops a running [`Listener`] from another task.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    stop: CancellationToken,
}

impl ListenerHandle {
    pub fn stop_listening(&self) {
        self.stop.cancel();
    }
}

pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    stop: CancellationToken,
}

impl Listener {
    pub async fn listen(bind: &Endpoint, stop: CancellationToken) -> Result<Self> {
        let inner = transport::bind(bind).await?;
        let local_addr = inner.local_addr().map_err(|source| Error::Bind {
            addr: bind.to_string(),
            source,
        })?;
        Ok(Listener {
            inner,
            local_addr,
            stop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            stop: self.stop.clone(),
        }
    }

    /// Accepts until stopped, spawning one pairing task per connection.
    pub async fn run(self, pairing: Pairing) {
        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => break,

                res = self.inner.accept() => match res {
                    Ok((socket, peer)) => {
                        debug!(%peer, "accepted");
                        tokio::spawn(pairing.clone().pair(socket, peer));
                    }
                    Err(err) => {
                        pairing.sink.record(&RelayEvent::AcceptFailed {
                            error: err.to_string(),
                        });
                        tokio::select! {
                            _ = self.stop.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }
        }
        debug!(addr = %self.local_addr, "accept loop stopped");
    }
}
