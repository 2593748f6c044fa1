//! Hobbits frame boundaries.
//!
//! A frame is an `EWP` request line followed by `header-len` header bytes and
//! `body-len` body bytes. The codec only locates boundaries; header and body
//! are carried as opaque bytes.

use crate::error::{Error, Result};
use crate::protocol::{Protocol, RequestLine, MAX_REQUEST_LINE};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// One complete hobbits message, held as the exact bytes seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
    line: RequestLine,
    header_start: usize,
}

impl Frame {
    pub fn new(version: &str, protocol: Protocol, header: &[u8], body: &[u8]) -> Result<Self> {
        let line = RequestLine {
            version: version.to_string(),
            protocol,
            header_len: header.len(),
            body_len: body.len(),
        };
        let encoded = line.encode()?;
        let header_start = encoded.len();
        let mut raw = BytesMut::with_capacity(header_start + header.len() + body.len());
        raw.extend_from_slice(&encoded);
        raw.extend_from_slice(header);
        raw.extend_from_slice(body);
        Ok(Frame {
            raw: raw.freeze(),
            line,
            header_start,
        })
    }

    pub fn version(&self) -> &str {
        &self.line.version
    }

    pub fn protocol(&self) -> Protocol {
        self.line.protocol
    }

    pub fn header(&self) -> &[u8] {
        &self.raw[self.header_start..self.header_start + self.line.header_len]
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[self.header_start + self.line.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Outcome of inspecting the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult {
    Complete(Frame, usize),
    Incomplete,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        FrameCodec { max_frame }
    }

    /// Locates the first frame in `buf` without consuming anything.
    ///
    /// Returns `Incomplete` until the whole frame has arrived; malformed input
    /// is an error and the buffer should be discarded.
    pub fn try_decode(&self, buf: &[u8]) -> Result<DecodeResult> {
        match self.layout(buf)? {
            Some((line, header_start, total)) => {
                let frame = Frame {
                    raw: Bytes::copy_from_slice(&buf[..total]),
                    line,
                    header_start,
                };
                Ok(DecodeResult::Complete(frame, total))
            }
            None => Ok(DecodeResult::Incomplete),
        }
    }

    /// Splits the first complete frame off `buf`, leaving trailing bytes in place.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.layout(buf)? {
            Some((line, header_start, total)) => Ok(Some(Frame {
                raw: buf.split_to(total).freeze(),
                line,
                header_start,
            })),
            None => Ok(None),
        }
    }

    pub fn encode(&self, frame: &Frame) -> Result<Bytes> {
        if frame.len() > self.max_frame {
            return Err(Error::MalformedFrame(format!(
                "frame length {} exceeds max {}",
                frame.len(),
                self.max_frame
            )));
        }
        Ok(frame.raw.clone())
    }

    fn layout(&self, buf: &[u8]) -> Result<Option<(RequestLine, usize, usize)>> {
        let scan = buf.len().min(MAX_REQUEST_LINE);
        let newline = match buf[..scan].iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None if buf.len() >= MAX_REQUEST_LINE => {
                return Err(Error::MalformedFrame(format!(
                    "no request line terminator within {MAX_REQUEST_LINE} bytes"
                )))
            }
            None => return Ok(None),
        };

        let line = RequestLine::decode(&buf[..newline])?;
        let header_start = newline + 1;
        let total = header_start
            .checked_add(line.header_len)
            .and_then(|n| n.checked_add(line.body_len))
            .filter(|&n| n <= self.max_frame)
            .ok_or_else(|| {
                Error::MalformedFrame(format!(
                    "frame length exceeds max {} (header {}, body {})",
                    self.max_frame, line.header_len, line.body_len
                ))
            })?;

        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((line, header_start, total)))
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(frame.as_bytes()).await.map_err(Error::Io)?;
    writer.flush().await.map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(body: &[u8]) -> Frame {
        Frame::new("0.2", Protocol::Ping, b"hdr", body).unwrap()
    }

    #[test]
    fn frame_accessors() {
        let frame = Frame::new("0.2", Protocol::Rpc, b"{\"m\":1}", b"payload").unwrap();
        assert_eq!(frame.version(), "0.2");
        assert_eq!(frame.protocol(), Protocol::Rpc);
        assert_eq!(frame.header(), b"{\"m\":1}");
        assert_eq!(frame.body(), b"payload");
        assert!(frame.as_bytes().starts_with(b"EWP 0.2 RPC 7 7\n"));
    }

    #[test]
    fn incomplete_consumes_nothing() {
        let codec = FrameCodec::default();
        let frame = ping(b"hello world");
        let bytes = frame.as_bytes();
        for cut in 0..bytes.len() {
            assert_eq!(codec.try_decode(&bytes[..cut]).unwrap(), DecodeResult::Incomplete);
        }
        assert_eq!(
            codec.try_decode(bytes).unwrap(),
            DecodeResult::Complete(frame.clone(), bytes.len())
        );
    }

    #[test]
    fn decode_from_preserves_trailing_bytes() {
        let codec = FrameCodec::default();
        let first = ping(b"one");
        let second = Frame::new("0.2", Protocol::Gossip, b"", b"two").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(first.as_bytes());
        buf.extend_from_slice(&second.as_bytes()[..5]);

        assert_eq!(codec.decode_from(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode_from(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(&second.as_bytes()[5..]);
        assert_eq!(codec.decode_from(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_header_and_body() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"EWP 0.2 PING 0 0\n"[..]);
        let frame = codec.decode_from(&mut buf).unwrap().unwrap();
        assert!(frame.header().is_empty());
        assert!(frame.body().is_empty());
        assert_eq!(frame.len(), 17);
    }

    #[test]
    fn malformed_is_distinct_from_incomplete() {
        let codec = FrameCodec::default();
        let err = codec.try_decode(b"GET / HTTP/1.1\r\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));

        let garbage = vec![b'x'; MAX_REQUEST_LINE];
        assert!(matches!(
            codec.try_decode(&garbage),
            Err(Error::MalformedFrame(_))
        ));
        assert_eq!(
            codec.try_decode(&garbage[..MAX_REQUEST_LINE - 1]).unwrap(),
            DecodeResult::Incomplete
        );
    }

    #[test]
    fn oversized_frame_rejected_before_body_arrives() {
        let codec = FrameCodec::new(64);
        let err = codec.try_decode(b"EWP 0.2 RPC 10 100\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
        assert!(codec.encode(&ping(&[0u8; 80])).is_err());
    }

    #[test]
    fn encode_is_byte_exact() {
        let codec = FrameCodec::default();
        let frame = ping(b"\x00\x01\n\xff");
        assert_eq!(&codec.encode(&frame).unwrap()[..], frame.as_bytes());
    }

    #[tokio::test]
    async fn write_frame_writes_raw_bytes() {
        use tokio::io::AsyncReadExt;

        let (mut a, mut b) = tokio::io::duplex(1024);
        let frame = ping(b"abc");
        write_frame(&mut a, &frame).await.unwrap();
        drop(a);
        let mut out = Vec::new();
        b.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, frame.as_bytes());
    }
}
