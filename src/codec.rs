// STOMP wire codec - separates the byte-level framing rules from the domain
// model in `frame`.
//
// The serializer and the incremental parser both key the syntactic
// differences between protocol versions (escaping, line endings, carriage
// return handling) off a `Version` value rather than off polymorphism, so the
// hot paths stay straight-line and tests can sweep all versions.

use crate::frame::{Command, Frame, Headers, Version};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest command line the parser will buffer before giving up.
const MAX_COMMAND_LINE: usize = 1024;

/// Longest single header line the parser will buffer before giving up.
const MAX_HEADER_LINE: usize = 64 * 1024;

/// One unit of inbound traffic: a real frame, or the empty-line liveness
/// signal. Heart-beats are never conflated with frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transmission {
    Frame(Frame),
    HeartBeat,
}

/// Framing errors are fatal to the connection that produced them. Each
/// carries the byte offset (counted from parser creation) where the rule was
/// violated, as a debugging hint.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("malformed command line at byte {offset}")]
    MalformedCommand { offset: u64 },

    #[error("malformed header line at byte {offset}")]
    BadHeaderLine { offset: u64 },

    #[error("unrecognized escape sequence at byte {offset}")]
    BadEscape { offset: u64 },

    #[error("body present on body-less command at byte {offset}")]
    BodyOverrun { offset: u64 },

    #[error("expected NUL after {declared}-byte body at byte {offset}")]
    MissingNull { declared: usize, offset: u64 },
}

impl FramingError {
    /// Stable machine-readable tag; the `Display` text is advisory only.
    pub fn kind(&self) -> &'static str {
        match self {
            FramingError::MalformedCommand { .. } => "malformed-command",
            FramingError::BadHeaderLine { .. } => "bad-header-line",
            FramingError::BadEscape { .. } => "bad-escape",
            FramingError::BodyOverrun { .. } => "body-overrun",
            FramingError::MissingNull { .. } => "missing-null",
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            FramingError::MalformedCommand { offset }
            | FramingError::BadHeaderLine { offset }
            | FramingError::BadEscape { offset }
            | FramingError::BodyOverrun { offset }
            | FramingError::MissingNull { offset, .. } => *offset,
        }
    }
}

/// Serialize a frame for the given negotiated version.
///
/// Emits command, LF, header lines, blank line, body, NUL. Line feed is the
/// only terminator ever written. Headers are escaped per version except on
/// CONNECT/STOMP, which the protocol exempts in every version.
pub fn encode(frame: &Frame, version: Version) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_size_hint(frame));
    let escape = version.escapes_headers() && !frame.command.skips_escaping();

    buf.put_slice(frame.command.as_str().as_bytes());
    buf.put_u8(b'\n');
    for (name, value) in frame.headers.iter() {
        if escape {
            escape_into(&mut buf, name.as_bytes(), version);
            buf.put_u8(b':');
            escape_into(&mut buf, value.as_bytes(), version);
        } else {
            buf.put_slice(name.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(value.as_bytes());
        }
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
    buf.put_slice(&frame.body);
    buf.put_u8(0);
    buf.freeze()
}

fn encoded_size_hint(frame: &Frame) -> usize {
    frame.command.as_str().len()
        + frame
            .headers
            .iter()
            .fold(0, |acc, (n, v)| acc + n.len() + v.len() + 2)
        + frame.body.len()
        + 8
}

fn escape_into(buf: &mut BytesMut, raw: &[u8], version: Version) {
    for &b in raw {
        match b {
            b'\\' => buf.put_slice(b"\\\\"),
            b'\n' => buf.put_slice(b"\\n"),
            b':' => buf.put_slice(b"\\c"),
            b'\r' if version == Version::V1_2 => buf.put_slice(b"\\r"),
            _ => buf.put_u8(b),
        }
    }
}

/// Incremental, byte-fed frame parser.
///
/// Bytes go in through [`Parser::feed`]; complete transmissions come out of
/// [`Parser::drain`] in wire order. The parser never consumes a partial
/// frame, so feeding is associative with respect to chunk boundaries. A
/// framing error poisons the parser: the connection is unrecoverable and the
/// same error is reported on every subsequent drain.
#[derive(Debug)]
pub struct Parser {
    buf: BytesMut,
    version: Version,
    // Bytes consumed off the front of `buf` since creation; error offsets
    // are relative to this origin.
    consumed: u64,
    fed: u64,
    // Set after a frame's NUL so the grammar's single optional trailing EOL
    // is not mistaken for a heart-beat.
    swallow_trailing_eol: bool,
    failed: Option<FramingError>,
}

enum Step {
    Frame(Frame),
    HeartBeat,
    Incomplete,
}

impl Parser {
    pub fn new(version: Version) -> Parser {
        Parser {
            buf: BytesMut::with_capacity(4 * 1024),
            version,
            consumed: 0,
            fed: 0,
            swallow_trailing_eol: false,
            failed: None,
        }
    }

    /// Switch the syntax rules, normally right after version negotiation.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Total bytes ever fed. The transport polls this as the liveness signal
    /// behind incoming heart-beat supervision; timestamps are its concern.
    pub fn bytes_fed(&self) -> u64 {
        self.fed
    }

    /// Bytes buffered but not yet consumed as part of a complete
    /// transmission. Non-zero at end of stream means a truncated frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Buffer more wire bytes. No parsing happens here.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.fed += bytes.len() as u64;
        self.buf.extend_from_slice(bytes);
    }

    /// Produce every complete transmission buffered so far, in order.
    ///
    /// Runs of end-of-line bytes between frames are coalesced: at most one
    /// [`Transmission::HeartBeat`] is emitted per call, however long the idle
    /// period was.
    pub fn drain(&mut self) -> Result<Vec<Transmission>, FramingError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let mut out = Vec::new();
        let mut heartbeat_emitted = false;
        loop {
            match self.parse_one() {
                Ok(Step::Frame(frame)) => out.push(Transmission::Frame(frame)),
                Ok(Step::HeartBeat) => {
                    if !heartbeat_emitted {
                        heartbeat_emitted = true;
                        out.push(Transmission::HeartBeat);
                    }
                }
                Ok(Step::Incomplete) => break,
                Err(err) => {
                    self.failed = Some(err.clone());
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    /// True once a framing error has been observed.
    pub fn is_poisoned(&self) -> bool {
        self.failed.is_some()
    }

    fn parse_one(&mut self) -> Result<Step, FramingError> {
        if self.swallow_trailing_eol {
            match self.eol_len_at(0) {
                EolScan::Eol(n) => {
                    self.advance(n);
                    self.swallow_trailing_eol = false;
                }
                EolScan::NeedMore => return Ok(Step::Incomplete),
                EolScan::NotEol => self.swallow_trailing_eol = false,
            }
        }

        // Empty lines between frames are liveness traffic.
        let mut skipped = 0usize;
        loop {
            match self.eol_len_at(skipped) {
                EolScan::Eol(n) => skipped += n,
                EolScan::NeedMore | EolScan::NotEol => break,
            }
        }
        if skipped > 0 {
            self.advance(skipped);
            return Ok(Step::HeartBeat);
        }
        if self.buf.is_empty() {
            return Ok(Step::Incomplete);
        }

        // From here on nothing is consumed until the whole frame is present;
        // `pos` walks a borrowed view of the buffer.
        let buf = &self.buf[..];
        let mut pos = 0usize;

        let command_line = match find_lf(buf, pos) {
            Some(lf) => &buf[pos..lf],
            None if buf.len() > MAX_COMMAND_LINE => {
                return Err(FramingError::MalformedCommand {
                    offset: self.consumed,
                });
            }
            None => return Ok(Step::Incomplete),
        };
        let command_bytes = self.strip_cr(command_line);
        let command = match Command::parse(command_bytes) {
            Some(command) if !command_bytes.is_empty() => command,
            _ => {
                return Err(FramingError::MalformedCommand {
                    offset: self.consumed,
                });
            }
        };
        pos += command_line.len() + 1;

        let skip_unescape = command.skips_escaping();
        let mut headers = Headers::new();
        loop {
            let line_start = pos;
            let line = match find_lf(buf, pos) {
                Some(lf) => &buf[pos..lf],
                None if buf.len() - pos > MAX_HEADER_LINE => {
                    return Err(FramingError::BadHeaderLine {
                        offset: self.consumed + line_start as u64,
                    });
                }
                None => return Ok(Step::Incomplete),
            };
            pos += line.len() + 1;
            let line = self.strip_cr(line);
            if line.is_empty() {
                break;
            }

            let offset = self.consumed + line_start as u64;
            if self.version == Version::V1_2 && line.contains(&b'\r') {
                // 1.2 forbids a bare CR inside a header line; 1.0 and 1.1
                // keep it as a literal data byte.
                return Err(FramingError::BadHeaderLine { offset });
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(FramingError::BadHeaderLine { offset })?;
            if colon == 0 {
                return Err(FramingError::BadHeaderLine { offset });
            }
            let name = self.unescape(&line[..colon], skip_unescape, offset)?;
            let value = self.unescape(&line[colon + 1..], skip_unescape, offset)?;
            headers.push(&name, &value);
        }

        let body_start = pos;
        let body_offset = self.consumed + body_start as u64;
        let body: Vec<u8> = match content_length(&headers) {
            Some(Ok(declared)) => {
                let needed = body_start.saturating_add(declared).saturating_add(1);
                if buf.len() < needed {
                    return Ok(Step::Incomplete);
                }
                if buf[body_start + declared] != 0 {
                    return Err(FramingError::MissingNull {
                        declared,
                        offset: self.consumed + (body_start + declared) as u64,
                    });
                }
                pos += declared + 1;
                buf[body_start..body_start + declared].to_vec()
            }
            Some(Err(())) => {
                return Err(FramingError::BadHeaderLine { offset: body_offset });
            }
            None => match buf[body_start..].iter().position(|&b| b == 0) {
                Some(nul) => {
                    pos += nul + 1;
                    buf[body_start..body_start + nul].to_vec()
                }
                None => return Ok(Step::Incomplete),
            },
        };

        if !body.is_empty() && !command.allows_body() {
            return Err(FramingError::BodyOverrun {
                offset: body_offset,
            });
        }

        self.advance(pos);
        self.swallow_trailing_eol = true;
        Ok(Step::Frame(Frame::new(command, headers, body)))
    }

    fn advance(&mut self, n: usize) {
        self.buf.advance(n);
        self.consumed += n as u64;
    }

    /// How many bytes of EOL start at `at`, if any. In 1.1/1.2 a CR is only
    /// an EOL as part of CRLF; in 1.0 it is ordinary data.
    fn eol_len_at(&self, at: usize) -> EolScan {
        match self.buf.get(at) {
            Some(b'\n') => EolScan::Eol(1),
            Some(b'\r') if self.version != Version::V1_0 => match self.buf.get(at + 1) {
                Some(b'\n') => EolScan::Eol(2),
                Some(_) => EolScan::NotEol,
                None => EolScan::NeedMore,
            },
            Some(_) => EolScan::NotEol,
            None => EolScan::NeedMore,
        }
    }

    /// Drop the CR of a CRLF terminator. Never applied in 1.0, where CR is a
    /// literal byte and shows up in the line content.
    fn strip_cr<'a>(&self, line: &'a [u8]) -> &'a [u8] {
        if self.version != Version::V1_0 {
            if let Some((b'\r', rest)) = line.split_last() {
                return rest;
            }
        }
        line
    }

    fn unescape(
        &self,
        raw: &[u8],
        skip: bool,
        offset: u64,
    ) -> Result<String, FramingError> {
        let bytes = if skip || !self.version.escapes_headers() {
            raw.to_vec()
        } else {
            let mut out = Vec::with_capacity(raw.len());
            let mut iter = raw.iter();
            while let Some(&b) = iter.next() {
                if b != b'\\' {
                    out.push(b);
                    continue;
                }
                match iter.next() {
                    Some(b'\\') => out.push(b'\\'),
                    Some(b'n') => out.push(b'\n'),
                    Some(b'c') => out.push(b':'),
                    Some(b'r') if self.version == Version::V1_2 => out.push(b'\r'),
                    _ => return Err(FramingError::BadEscape { offset }),
                }
            }
            out
        };
        String::from_utf8(bytes).map_err(|_| FramingError::BadHeaderLine { offset })
    }
}

impl Default for Parser {
    fn default() -> Parser {
        Parser::new(Version::V1_2)
    }
}

enum EolScan {
    Eol(usize),
    NotEol,
    NeedMore,
}

fn find_lf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].iter().position(|&b| b == b'\n').map(|i| from + i)
}

/// First-occurrence `content-length`, if present. `Err` means unparseable.
fn content_length(headers: &Headers) -> Option<Result<usize, ()>> {
    headers
        .get("content-length")
        .map(|v| v.parse::<usize>().map_err(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AckMode;

    fn parse_all(version: Version, bytes: &[u8]) -> Vec<Transmission> {
        let mut parser = Parser::new(version);
        parser.feed(bytes);
        parser.drain().unwrap()
    }

    fn only_frame(version: Version, bytes: &[u8]) -> Frame {
        let mut out = parse_all(version, bytes);
        assert_eq!(out.len(), 1, "expected exactly one transmission");
        match out.pop().unwrap() {
            Transmission::Frame(frame) => frame,
            Transmission::HeartBeat => panic!("expected frame, got heart-beat"),
        }
    }

    fn send_frame(value: &str) -> Frame {
        let mut headers = Headers::new();
        headers.push("destination", "/queue/a");
        headers.push("x", value);
        Frame::new(Command::Send, headers, b"hello".to_vec())
    }

    #[test]
    fn encode_basic_send() {
        let frame = send_frame("plain");
        let bytes = encode(&frame, Version::V1_0);
        assert_eq!(
            bytes.as_ref(),
            b"SEND\ndestination:/queue/a\nx:plain\n\nhello\0"
        );
    }

    #[test]
    fn roundtrip_all_versions() {
        for version in Version::supported() {
            let frame = send_frame("plain");
            let parsed = only_frame(version, &encode(&frame, version));
            assert_eq!(parsed, frame);
        }
    }

    #[test]
    fn roundtrip_escapable_characters() {
        // CR is only escapable in 1.2; keep it out of the 1.1 sample since a
        // literal CR would be stripped ahead of the LF on re-parse.
        let frame_11 = send_frame("a:b\nc\\d");
        let parsed = only_frame(Version::V1_1, &encode(&frame_11, Version::V1_1));
        assert_eq!(parsed, frame_11);

        let frame_12 = send_frame("a:b\nc\\d\re");
        let parsed = only_frame(Version::V1_2, &encode(&frame_12, Version::V1_2));
        assert_eq!(parsed, frame_12);
    }

    #[test]
    fn escaped_wire_form() {
        let mut headers = Headers::new();
        headers.push("destination", "/q");
        headers.push("x", "a:b\nc\\");
        let frame = Frame::header_only(Command::Subscribe, headers);
        let bytes = encode(&frame, Version::V1_2);
        assert_eq!(
            bytes.as_ref(),
            b"SUBSCRIBE\ndestination:/q\nx:a\\cb\\nc\\\\\n\n\0"
        );
    }

    #[test]
    fn connect_headers_never_escaped() {
        let mut headers = Headers::new();
        headers.push("login", "user:with\\colon");
        for version in Version::supported() {
            let frame = Frame::header_only(Command::Connect, headers.clone());
            let bytes = encode(&frame, version);
            assert_eq!(bytes.as_ref(), b"CONNECT\nlogin:user:with\\colon\n\n\0");
        }
    }

    #[test]
    fn v1_0_emits_literals() {
        let frame = send_frame("a\\b");
        let bytes = encode(&frame, Version::V1_0);
        assert!(
            bytes.as_ref().windows(3).any(|w| w == b"a\\b"),
            "1.0 must not escape backslash"
        );
    }

    #[test]
    fn body_with_nulls_under_content_length() {
        let body = b"null \x00 bytes \x00 inside".to_vec();
        let mut headers = Headers::new();
        headers.push("destination", "/q");
        headers.push("content-length", &body.len().to_string());
        let frame = Frame::new(Command::Send, headers, body);

        let parsed = only_frame(Version::V1_2, &encode(&frame, Version::V1_2));
        assert_eq!(parsed, frame);
    }

    #[test]
    fn empty_body_with_and_without_content_length() {
        let with = only_frame(
            Version::V1_2,
            b"SEND\ndestination:/q\ncontent-length:0\n\n\0",
        );
        assert!(with.body.is_empty());
        assert_eq!(with.header("content-length"), Some("0"));

        let without = only_frame(Version::V1_2, b"SEND\ndestination:/q\n\n\0");
        assert!(without.body.is_empty());
    }

    #[test]
    fn duplicate_headers_preserved_in_order() {
        let frame = only_frame(
            Version::V1_2,
            b"ERROR\nmessage:first\nmessage:second\n\n\0",
        );
        assert_eq!(frame.header("message"), Some("first"));
        let entries: Vec<_> = frame.headers.iter().collect();
        assert_eq!(entries, vec![("message", "first"), ("message", "second")]);
    }

    #[test]
    fn heartbeat_only_input() {
        let out = parse_all(Version::V1_2, b"\n");
        assert_eq!(out, vec![Transmission::HeartBeat]);
    }

    #[test]
    fn heartbeat_run_coalesced() {
        let out = parse_all(Version::V1_2, b"\n\n\r\n\n\n");
        assert_eq!(out, vec![Transmission::HeartBeat]);
    }

    #[test]
    fn trailing_eol_after_frame_is_not_a_heartbeat() {
        let out = parse_all(Version::V1_2, b"RECEIPT\nreceipt-id:r-1\n\n\0\n");
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Transmission::Frame(_)));
    }

    #[test]
    fn eols_between_frames_coalesce_to_one_heartbeat() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RECEIPT\nreceipt-id:r-1\n\n\0");
        bytes.extend_from_slice(b"\n\n\n\n");
        bytes.extend_from_slice(b"RECEIPT\nreceipt-id:r-2\n\n\0");
        let out = parse_all(Version::V1_2, &bytes);
        assert_eq!(out.len(), 3);
        assert!(matches!(out[0], Transmission::Frame(_)));
        assert_eq!(out[1], Transmission::HeartBeat);
        assert!(matches!(out[2], Transmission::Frame(_)));
    }

    #[test]
    fn feed_is_chunk_boundary_agnostic() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode(&send_frame("a:b\nc"), Version::V1_2));
        stream.extend_from_slice(b"\n");
        let mut headers = Headers::new();
        headers.push("destination", "/p");
        headers.push("content-length", "3");
        stream.extend_from_slice(&encode(
            &Frame::new(Command::Send, headers, b"\x00\x01\x02".to_vec()),
            Version::V1_2,
        ));

        let whole = parse_all(Version::V1_2, &stream);
        let frames: Vec<_> = whole
            .iter()
            .filter(|t| matches!(t, Transmission::Frame(_)))
            .cloned()
            .collect();
        assert_eq!(frames.len(), 2);

        // Split at every byte boundary; the frame sequence must not change.
        for split in 0..stream.len() {
            let mut parser = Parser::new(Version::V1_2);
            parser.feed(&stream[..split]);
            let mut out = parser.drain().unwrap();
            parser.feed(&stream[split..]);
            out.extend(parser.drain().unwrap());
            let chunked: Vec<_> = out
                .into_iter()
                .filter(|t| matches!(t, Transmission::Frame(_)))
                .collect();
            assert_eq!(chunked, frames, "split at byte {split}");
        }
    }

    #[test]
    fn incomplete_frame_produces_nothing() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"MESSAGE\ndestination:/q\nmessage-id:1");
        assert!(parser.drain().unwrap().is_empty());
        parser.feed(b"\nsubscription:s-1\n\nbody\0");
        assert_eq!(parser.drain().unwrap().len(), 1);
    }

    #[test]
    fn malformed_command_is_fatal() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"NOTACOMMAND!\n\n\0");
        let err = parser.drain().unwrap_err();
        assert_eq!(err.kind(), "malformed-command");

        // Poisoned: the same error comes back on the next drain.
        parser.feed(b"RECEIPT\nreceipt-id:r\n\n\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "malformed-command");
        assert!(parser.is_poisoned());
    }

    #[test]
    fn lowercase_command_rejected() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"send\ndestination:/q\n\n\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "malformed-command");
    }

    #[test]
    fn header_line_without_colon() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"SEND\nno-colon-here\n\n\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "bad-header-line");
    }

    #[test]
    fn unknown_escape_rejected_in_1_1_and_1_2() {
        for version in [Version::V1_1, Version::V1_2] {
            let mut parser = Parser::new(version);
            parser.feed(b"SEND\ndestination:a\\tb\n\n\0");
            assert_eq!(parser.drain().unwrap_err().kind(), "bad-escape");
        }
    }

    #[test]
    fn cr_escape_only_valid_in_1_2() {
        let mut parser = Parser::new(Version::V1_1);
        parser.feed(b"SEND\ndestination:a\\rb\n\n\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "bad-escape");

        let frame = only_frame(Version::V1_2, b"SEND\ndestination:a\\rb\n\n\0");
        assert_eq!(frame.header("destination"), Some("a\rb"));
    }

    #[test]
    fn backslash_literal_in_1_0() {
        let frame = only_frame(Version::V1_0, b"SEND\ndestination:a\\nb\n\n\0");
        assert_eq!(frame.header("destination"), Some("a\\nb"));
    }

    #[test]
    fn bare_cr_literal_in_1_1_fatal_in_1_2() {
        let frame = only_frame(Version::V1_1, b"MESSAGE\ndestination:a\rb\nmessage-id:1\n\nx\0");
        assert_eq!(frame.header("destination"), Some("a\rb"));

        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"MESSAGE\ndestination:a\rb\nmessage-id:1\n\nx\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "bad-header-line");
    }

    #[test]
    fn cr_is_data_in_1_0_command_line() {
        // In 1.0 the CR is part of the command bytes, which makes the
        // command line unparseable.
        let mut parser = Parser::new(Version::V1_0);
        parser.feed(b"RECEIPT\r\nreceipt-id:r\r\n\r\n\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "malformed-command");
    }

    #[test]
    fn crlf_line_endings_accepted_in_1_1_and_1_2() {
        for version in [Version::V1_1, Version::V1_2] {
            let frame = only_frame(version, b"RECEIPT\r\nreceipt-id:r-9\r\n\r\n\0");
            assert_eq!(frame.command, Command::Receipt);
            assert_eq!(frame.header("receipt-id"), Some("r-9"));
        }
    }

    #[test]
    fn missing_null_after_declared_body() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"SEND\ndestination:/q\ncontent-length:3\n\nabcX\0");
        let err = parser.drain().unwrap_err();
        assert_eq!(err.kind(), "missing-null");
    }

    #[test]
    fn body_on_bodiless_command() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"SUBSCRIBE\ndestination:/q\nid:s-1\n\nbogus\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "body-overrun");
    }

    #[test]
    fn unparseable_content_length() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"SEND\ndestination:/q\ncontent-length:many\n\nx\0");
        assert_eq!(parser.drain().unwrap_err().kind(), "bad-header-line");
    }

    #[test]
    fn error_offsets_point_into_stream() {
        let mut parser = Parser::new(Version::V1_2);
        let preamble = b"RECEIPT\nreceipt-id:r-1\n\n\0";
        parser.feed(preamble);
        parser.drain().unwrap();
        parser.feed(b"bogus\n\n\0");
        let err = parser.drain().unwrap_err();
        assert_eq!(err.offset(), preamble.len() as u64);
    }

    #[test]
    fn bytes_fed_counts_everything() {
        let mut parser = Parser::new(Version::V1_2);
        parser.feed(b"\n");
        parser.feed(b"\n\n");
        parser.drain().unwrap();
        assert_eq!(parser.bytes_fed(), 3);
    }

    #[test]
    fn subscribe_frame_roundtrip_with_ack_header() {
        let mut headers = Headers::new();
        headers.push("destination", "/queue/work");
        headers.push("id", "s-7");
        headers.push("ack", AckMode::ClientIndividual.as_str());
        let frame = Frame::header_only(Command::Subscribe, headers);
        let parsed = only_frame(Version::V1_1, &encode(&frame, Version::V1_1));
        assert_eq!(parsed, frame);
    }
}
