//! Relay events and the sink they are reported to.
//!
//! The relayer never writes to a global log directly. Every notable event is
//! handed to an [`EventSink`] supplied at construction; [`TracingSink`] is the
//! default and forwards to `tracing`.

use crate::protocol::Protocol;
use crate::relay::{Direction, PairId, RelayStats, Side};
use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum RelayEvent {
    Started {
        bind: SocketAddr,
        target: String,
    },
    Stopped {
        drained: bool,
    },
    PairOpened {
        id: PairId,
        peer: SocketAddr,
        target: String,
    },
    FrameRelayed {
        id: PairId,
        direction: Direction,
        protocol: Protocol,
        len: usize,
    },
    PairClosed {
        id: PairId,
        stats: RelayStats,
    },
    PairError {
        id: PairId,
        side: Side,
        error: String,
    },
    DialFailed {
        peer: SocketAddr,
        error: String,
    },
    AcceptFailed {
        error: String,
    },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::Started { bind, target } => {
                write!(f, "relayer started, bound to {bind} and targeting {target}")
            }
            RelayEvent::Stopped { drained: true } => f.write_str("relayer stopped"),
            RelayEvent::Stopped { drained: false } => {
                f.write_str("relayer stopped before all connections drained")
            }
            RelayEvent::PairOpened { id, peer, target } => {
                write!(f, "pair {id} opened: {peer} <-> {target}")
            }
            RelayEvent::FrameRelayed {
                id,
                direction,
                protocol,
                len,
            } => write!(f, "pair {id} relayed {protocol} frame of {len} bytes {direction}"),
            RelayEvent::PairClosed { id, stats } => write!(
                f,
                "pair {id} closed ({}): {} frames/{} bytes in, {} frames/{} bytes out",
                stats.close_reason, stats.frames_in, stats.bytes_in, stats.frames_out, stats.bytes_out
            ),
            RelayEvent::PairError { id, side, error } => {
                write!(f, "pair {id} error on {side}: {error}")
            }
            RelayEvent::DialFailed { peer, error } => {
                write!(f, "dropping connection from {peer}: {error}")
            }
            RelayEvent::AcceptFailed { error } => write!(f, "accept failed: {error}"),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &RelayEvent);
}

impl<F> EventSink for F
where
    F: Fn(&RelayEvent) + Send + Sync,
{
    fn record(&self, event: &RelayEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &RelayEvent) {
        match event {
            RelayEvent::PairClosed { stats, .. } if stats.close_reason.is_error() => {
                warn!("{event}")
            }
            RelayEvent::PairError { .. }
            | RelayEvent::DialFailed { .. }
            | RelayEvent::AcceptFailed { .. }
            | RelayEvent::Stopped { drained: false } => warn!("{event}"),
            _ => info!("{event}"),
        }
    }
}
