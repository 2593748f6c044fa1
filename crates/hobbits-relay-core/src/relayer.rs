//! Relayer lifecycle and the active-pairs registry.
//!
//! `start` binds the listener and spawns two tasks: the accept loop and a
//! supervisor that owns every registry mutation. Pairs report `Opened` and
//! `Closed` over a channel; the supervisor exits once every sender (the accept
//! loop and each pairing task) has been dropped, so joining it after
//! cancellation means all teardown has finished.

use crate::config::RelayerConfig;
use crate::error::Result;
use crate::events::{EventSink, RelayEvent};
use crate::framing::FrameCodec;
use crate::listener::{Listener, ListenerHandle, PairEvent, Pairing};
use crate::relay::{PairId, PairSettings};
use crate::transport::Endpoint;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
struct PairEntry {
    peer: SocketAddr,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Registry {
    pairs: Mutex<HashMap<PairId, PairEntry>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<PairId, PairEntry>> {
        self.pairs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn cancel_all(&self) {
        for entry in self.lock().values() {
            entry.cancel.cancel();
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    listener: ListenerHandle,
    accept_task: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

enum State {
    Stopped,
    Running(Running),
}

pub struct Relayer {
    config: RelayerConfig,
    bind: Endpoint,
    target: Endpoint,
    sink: Arc<dyn EventSink>,
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
    state: tokio::sync::Mutex<State>,
}

impl Relayer {
    pub fn new(config: RelayerConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let bind = config.bind_endpoint()?;
        let target = config.target_endpoint()?;
        Ok(Relayer {
            config,
            bind,
            target,
            sink,
            registry: Arc::new(Registry::default()),
            next_id: Arc::new(AtomicU64::new(1)),
            state: tokio::sync::Mutex::new(State::Stopped),
        })
    }

    /// Binds and starts accepting. Returns the bound address.
    ///
    /// Calling this while already running returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut state = self.state.lock().await;
        if let State::Running(running) = &*state {
            return Ok(running.local_addr);
        }

        let shutdown = CancellationToken::new();
        let listener = Listener::listen(&self.bind, shutdown.child_token()).await?;
        let local_addr = listener.local_addr();
        let handle = listener.handle();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pairing = Pairing::new(
            self.target.clone(),
            self.config.connect_timeout(),
            PairSettings {
                codec: FrameCodec::new(self.config.max_frame),
                read_buffer: self.config.read_buffer,
                drain_timeout: self.config.drain_timeout(),
            },
            self.sink.clone(),
            events_tx,
            shutdown.clone(),
            self.next_id.clone(),
        );
        let supervisor = tokio::spawn(supervise(
            events_rx,
            self.registry.clone(),
            self.sink.clone(),
            self.target.to_string(),
        ));
        let accept_task = tokio::spawn(listener.run(pairing));

        self.sink.record(&RelayEvent::Started {
            bind: local_addr,
            target: self.target.to_string(),
        });
        *state = State::Running(Running {
            local_addr,
            shutdown,
            listener: handle,
            accept_task,
            supervisor,
        });
        Ok(local_addr)
    }

    /// Stops accepting, terminates every pair and waits for teardown.
    ///
    /// Never fails and is a no-op when already stopped.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let running = match std::mem::replace(&mut *state, State::Stopped) {
            State::Running(running) => running,
            State::Stopped => return,
        };

        running.listener.stop_listening();
        self.registry.cancel_all();
        running.shutdown.cancel();

        let accept_abort = running.accept_task.abort_handle();
        let supervisor_abort = running.supervisor.abort_handle();
        let teardown = async move {
            let _ = running.accept_task.await;
            let _ = running.supervisor.await;
        };
        let drained = tokio::time::timeout(self.config.shutdown_timeout(), teardown)
            .await
            .is_ok();
        if !drained {
            warn!(
                pairs = self.registry.len(),
                "shutdown timeout elapsed, abandoning remaining pairs"
            );
            accept_abort.abort();
            supervisor_abort.abort();
        }
        self.registry.lock().clear();
        self.sink.record(&RelayEvent::Stopped { drained });
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, State::Running(_))
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            State::Running(running) => Some(running.local_addr),
            State::Stopped => None,
        }
    }

    pub fn active_pairs(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of the registered pairs and their inbound peers, ordered by id.
    pub fn active_peers(&self) -> Vec<(PairId, SocketAddr)> {
        let mut peers: Vec<_> = self
            .registry
            .lock()
            .iter()
            .map(|(id, entry)| (*id, entry.peer))
            .collect();
        peers.sort_by_key(|(id, _)| *id);
        peers
    }
}

impl Drop for Relayer {
    fn drop(&mut self) {
        if let State::Running(running) = self.state.get_mut() {
            running.shutdown.cancel();
        }
    }
}

async fn supervise(
    mut events: mpsc::UnboundedReceiver<PairEvent>,
    registry: Arc<Registry>,
    sink: Arc<dyn EventSink>,
    target: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            PairEvent::Opened { id, peer, cancel } => {
                registry.lock().insert(id, PairEntry { peer, cancel });
                sink.record(&RelayEvent::PairOpened {
                    id,
                    peer,
                    target: target.clone(),
                });
            }
            PairEvent::Closed { id, stats } => {
                registry.lock().remove(&id);
                sink.record(&RelayEvent::PairClosed { id, stats });
            }
        }
    }
}
