use crate::error::{Error, Result};
use crate::events::{EventSink, RelayEvent};
use crate::framing::{write_frame, FrameCodec};
use bytes::BytesMut;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairId(pub u64);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One of the two sockets of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Inbound,
    Outbound,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Inbound => f.write_str("inbound"),
            Side::Outbound => f.write_str("outbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    InboundToOutbound,
    OutboundToInbound,
}

impl Direction {
    /// The socket this direction reads from.
    pub fn source(self) -> Side {
        match self {
            Direction::InboundToOutbound => Side::Inbound,
            Direction::OutboundToInbound => Side::Outbound,
        }
    }

    /// The socket this direction writes to.
    pub fn sink(self) -> Side {
        match self {
            Direction::InboundToOutbound => Side::Outbound,
            Direction::OutboundToInbound => Side::Inbound,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::InboundToOutbound => f.write_str("inbound->outbound"),
            Direction::OutboundToInbound => f.write_str("outbound->inbound"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// This side reached a clean EOF.
    Closed(Side),
    Stopped,
    /// This side sent bytes that are not a hobbits frame.
    MalformedFrame(Side),
    /// Reading from or writing to this side failed.
    TransportError(Side),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::MalformedFrame(_) | CloseReason::TransportError(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Closed(side) => write!(f, "{side} closed"),
            CloseReason::Stopped => f.write_str("stopped"),
            CloseReason::MalformedFrame(side) => write!(f, "malformed frame from {side}"),
            CloseReason::TransportError(side) => write!(f, "transport error on {side}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_in: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
    pub close_reason: CloseReason,
}

#[derive(Debug, Default)]
struct Counters {
    frames: u64,
    bytes: u64,
}

/// Per-pair relay settings, shared by every pair of a relayer.
#[derive(Debug, Clone, Copy)]
pub struct PairSettings {
    pub codec: FrameCodec,
    pub read_buffer: usize,
    /// How long a frame already being written may take to finish once the
    /// pair is closing.
    pub drain_timeout: Duration,
}

/// How a pump stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpEnd {
    Eof,
    Halted,
}

/// An accepted inbound connection bound to its dialed outbound connection.
#[derive(Debug)]
pub struct ConnectionPair {
    id: PairId,
    inbound: TcpStream,
    outbound: TcpStream,
    settings: PairSettings,
}

impl ConnectionPair {
    pub fn new(id: PairId, inbound: TcpStream, outbound: TcpStream, settings: PairSettings) -> Self {
        ConnectionPair {
            id,
            inbound,
            outbound,
            settings,
        }
    }

    /// Relays frames both ways until either side closes, fails, or `cancel` fires.
    ///
    /// Once one direction ends the other stops at its next frame boundary. A
    /// frame still being written gets `drain_timeout` to finish; if it does not,
    /// the socket it was written to is reset instead of shut down, so the peer
    /// never sees a truncated frame followed by a clean EOF.
    pub async fn relay(self, sink: &dyn EventSink, cancel: CancellationToken) -> RelayStats {
        let ConnectionPair {
            id,
            inbound,
            outbound,
            settings,
        } = self;
        let (mut inbound_r, mut inbound_w) = inbound.into_split();
        let (mut outbound_r, mut outbound_w) = outbound.into_split();
        let mut up = Counters::default();
        let mut down = Counters::default();
        let halt = cancel.child_token();
        let mut reset_inbound = false;
        let mut reset_outbound = false;

        let close_reason = {
            let upstream = pump(
                id,
                Direction::InboundToOutbound,
                &mut inbound_r,
                &mut outbound_w,
                &settings,
                &halt,
                sink,
                &mut up,
            );
            let downstream = pump(
                id,
                Direction::OutboundToInbound,
                &mut outbound_r,
                &mut inbound_w,
                &settings,
                &halt,
                sink,
                &mut down,
            );
            tokio::pin!(upstream, downstream);

            let (first, res) = tokio::select! {
                res = &mut upstream => (Direction::InboundToOutbound, res),
                res = &mut downstream => (Direction::OutboundToInbound, res),
            };
            halt.cancel();

            let rest = match first {
                Direction::InboundToOutbound => {
                    tokio::time::timeout(settings.drain_timeout, &mut downstream).await
                }
                Direction::OutboundToInbound => {
                    tokio::time::timeout(settings.drain_timeout, &mut upstream).await
                }
            };
            let second = match first {
                Direction::InboundToOutbound => Direction::OutboundToInbound,
                Direction::OutboundToInbound => Direction::InboundToOutbound,
            };

            let mut to_reset = Vec::with_capacity(2);
            if wrote_partially(first, &res) {
                to_reset.push(first.sink());
            }
            let close_reason = finish(id, first, res, sink);
            match rest {
                Ok(res) => {
                    if wrote_partially(second, &res) {
                        to_reset.push(second.sink());
                    }
                    if let Err(err) = res {
                        report(id, second, &err, sink);
                    }
                }
                Err(_) => {
                    sink.record(&RelayEvent::PairError {
                        id,
                        side: second.sink(),
                        error: format!(
                            "frame write did not finish within {}ms, resetting",
                            settings.drain_timeout.as_millis()
                        ),
                    });
                    to_reset.push(second.sink());
                }
            }
            for side in to_reset {
                match side {
                    Side::Inbound => reset_inbound = true,
                    Side::Outbound => reset_outbound = true,
                }
            }
            close_reason
        };

        close(inbound_r, inbound_w, reset_inbound).await;
        close(outbound_r, outbound_w, reset_outbound).await;

        RelayStats {
            frames_in: up.frames,
            bytes_in: up.bytes,
            frames_out: down.frames,
            bytes_out: down.bytes,
            close_reason,
        }
    }
}

/// A failed write may have left part of a frame on the wire.
fn wrote_partially(direction: Direction, res: &Result<PumpEnd>) -> bool {
    matches!(res, Err(Error::Transport { side, .. }) if *side == direction.sink())
}

fn finish(
    id: PairId,
    direction: Direction,
    res: Result<PumpEnd>,
    sink: &dyn EventSink,
) -> CloseReason {
    match res {
        Ok(PumpEnd::Eof) => CloseReason::Closed(direction.source()),
        Ok(PumpEnd::Halted) => CloseReason::Stopped,
        Err(err) => {
            let side = report(id, direction, &err, sink);
            match err {
                Error::MalformedFrame(_) => CloseReason::MalformedFrame(side),
                _ => CloseReason::TransportError(side),
            }
        }
    }
}

/// Records a pump failure against the socket it came from.
fn report(id: PairId, direction: Direction, err: &Error, sink: &dyn EventSink) -> Side {
    let side = match err {
        Error::Transport { side, .. } => *side,
        _ => direction.source(),
    };
    sink.record(&RelayEvent::PairError {
        id,
        side,
        error: err.to_string(),
    });
    side
}

async fn close(
    read: tokio::net::tcp::OwnedReadHalf,
    write: tokio::net::tcp::OwnedWriteHalf,
    reset: bool,
) {
    let mut stream = match read.reunite(write) {
        Ok(stream) => stream,
        Err(_) => return,
    };
    if reset {
        // Linger 0 turns the close into an RST and discards unsent bytes.
        if let Err(e) = socket2::SockRef::from(&stream).set_linger(Some(Duration::ZERO)) {
            debug!("set_linger failed: {e}");
        }
        drop(stream);
    } else {
        let _ = stream.shutdown().await;
    }
}

/// Copies whole frames from `reader` to `writer`.
///
/// Reads stop as soon as `halt` fires; a frame that is already being written
/// is always written to the end first.
#[allow(clippy::too_many_arguments)]
async fn pump<R, W>(
    id: PairId,
    direction: Direction,
    reader: &mut R,
    writer: &mut W,
    settings: &PairSettings,
    halt: &CancellationToken,
    sink: &dyn EventSink,
    counters: &mut Counters,
) -> Result<PumpEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(settings.read_buffer);
    loop {
        buf.reserve(settings.read_buffer);
        let n = tokio::select! {
            biased;

            _ = halt.cancelled() => return Ok(PumpEnd::Halted),
            res = reader.read_buf(&mut buf) => res.map_err(|source| Error::Transport {
                side: direction.source(),
                source,
            })?,
        };
        if n == 0 {
            if !buf.is_empty() {
                debug!(pair = %id, %direction, discarded = buf.len(), "eof mid-frame");
            }
            return Ok(PumpEnd::Eof);
        }
        while let Some(frame) = settings.codec.decode_from(&mut buf)? {
            write_frame(writer, &frame)
                .await
                .map_err(|err| match err {
                    Error::Io(source) => Error::Transport {
                        side: direction.sink(),
                        source,
                    },
                    other => other,
                })?;
            counters.frames += 1;
            counters.bytes += frame.len() as u64;
            sink.record(&RelayEvent::FrameRelayed {
                id,
                direction,
                protocol: frame.protocol(),
                len: frame.len(),
            });
            if halt.is_cancelled() {
                return Ok(PumpEnd::Halted);
            }
        }
    }
}
