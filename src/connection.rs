// Provides TCP connection management for STOMP client sessions: frame-based
// I/O with buffering, on top of the incremental codec parser.

use crate::codec::{self, Parser, Transmission};
use crate::frame::{Frame, Version};
use std::io;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// A STOMP connection over TCP.
///
/// `Connection` owns the transport layer only: it turns the byte stream into
/// [`Transmission`]s and frames into bytes. Protocol state (negotiation,
/// subscriptions, receipts) lives in the session; higher-level code must
/// feed inbound transmissions through it.
#[derive(Debug)]
pub struct Connection {
    // The `TcpStream` decorated with a `BufWriter` for write-level
    // buffering, so multi-part frame writes do not each become a syscall.
    stream: BufWriter<TcpStream>,

    // Incremental parser holding not-yet-complete inbound bytes.
    parser: Parser,

    // Transmissions already parsed but not yet handed to the caller.
    queued: Vec<Transmission>,

    // When the last inbound byte arrived; heart-beat supervision polls this.
    last_inbound: Instant,
}

impl Connection {
    /// Create a new `Connection`, backed by `socket`. The parser starts at
    /// the newest supported version; [`Connection::set_version`] pins it
    /// once negotiation settles.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            parser: Parser::new(Version::V1_2),
            queued: Vec::new(),
            last_inbound: Instant::now(),
        }
    }

    /// Switch the parser's syntax rules after version negotiation.
    pub fn set_version(&mut self, version: Version) {
        self.parser.set_version(version);
    }

    /// When the last inbound byte was read off the socket.
    pub fn last_inbound_at(&self) -> Instant {
        self.last_inbound
    }

    /// Read a single [`Transmission`] from the underlying stream.
    ///
    /// Waits until the parser has enough data for a complete frame or
    /// heart-beat. Returns `None` on a clean end of stream; an EOF that
    /// splits a frame in half is an error, as is any framing violation.
    pub async fn read_transmission(&mut self) -> crate::Result<Option<Transmission>> {
        loop {
            if !self.queued.is_empty() {
                return Ok(Some(self.queued.remove(0)));
            }

            let mut chunk = [0u8; 4 * 1024];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                // The remote closed the connection. For this to be a clean
                // shutdown the parser must not be holding a partial frame.
                return if self.parser.buffered() == 0 {
                    Ok(None)
                } else {
                    Err("connection reset by peer".into())
                };
            }
            self.last_inbound = Instant::now();
            self.parser.feed(&chunk[..n]);
            self.queued = self.parser.drain()?;
        }
    }

    /// Write a single frame to the underlying stream and flush it.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let bytes = codec::encode(frame, self.parser.version());
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }

    /// Write an outgoing heart-beat: a bare end-of-line.
    pub async fn write_heart_beat(&mut self) -> io::Result<()> {
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await
    }
}
