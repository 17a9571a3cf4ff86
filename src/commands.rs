//! Stateless constructors for every client-originated frame.
//!
//! Each function validates the per-version header contract and returns a
//! well-formed [`Frame`]; nothing here touches a socket or session state, so
//! a [`BuildError`] always fires before any bytes could have been sent.

use crate::frame::{AckMode, Command, Frame, Headers, Version};
use thiserror::Error;

/// Construction-time argument errors. These are never wire errors.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{command} requires the '{header}' header in STOMP {version}")]
    MissingHeader {
        command: &'static str,
        header: &'static str,
        version: Version,
    },

    #[error("{command} is not available in STOMP {version}")]
    UnsupportedInVersion {
        command: &'static str,
        version: Version,
    },

    #[error("heart-beat values must be non-negative integers, got '{0}'")]
    BadHeartBeat(String),

    #[error("accept-version list must not be empty")]
    NoVersions,
}

impl BuildError {
    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        "invalid-command-arguments"
    }
}

fn missing(command: &'static str, header: &'static str, version: Version) -> BuildError {
    BuildError::MissingHeader {
        command,
        header,
        version,
    }
}

/// Optional credentials and heart-beat offer for CONNECT/STOMP.
#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Client-offered `(cx, cy)` intervals in milliseconds.
    pub heart_beat: Option<(u32, u32)>,
}

/// Build a CONNECT frame advertising `accept` (ascending order recommended).
///
/// `host` is mandatory from 1.1 on, which in practice means whenever the
/// advertised set contains anything newer than 1.0.
pub fn connect(
    accept: &[Version],
    host: Option<&str>,
    options: &ConnectOptions,
) -> Result<Frame, BuildError> {
    negotiation_frame(Command::Connect, accept, host, options)
}

/// Build a STOMP frame, the 1.1+ spelling of CONNECT.
pub fn stomp(
    accept: &[Version],
    host: Option<&str>,
    options: &ConnectOptions,
) -> Result<Frame, BuildError> {
    if accept.iter().all(|v| *v == Version::V1_0) {
        return Err(BuildError::UnsupportedInVersion {
            command: "STOMP",
            version: Version::V1_0,
        });
    }
    negotiation_frame(Command::Stomp, accept, host, options)
}

fn negotiation_frame(
    command: Command,
    accept: &[Version],
    host: Option<&str>,
    options: &ConnectOptions,
) -> Result<Frame, BuildError> {
    if accept.is_empty() {
        return Err(BuildError::NoVersions);
    }
    let wants_modern = accept.iter().any(|v| *v > Version::V1_0);

    let mut headers = Headers::new();
    let accept_value = accept
        .iter()
        .map(Version::as_str)
        .collect::<Vec<_>>()
        .join(",");
    headers.push("accept-version", &accept_value);
    match host {
        Some(host) => headers.push("host", host),
        None if wants_modern => {
            return Err(missing(command.as_str(), "host", *accept.iter().max().unwrap()));
        }
        None => {}
    }
    if let Some(login) = &options.login {
        headers.push("login", login);
    }
    if let Some(passcode) = &options.passcode {
        headers.push("passcode", passcode);
    }
    if let Some((cx, cy)) = options.heart_beat {
        headers.push("heart-beat", &format!("{cx},{cy}"));
    }
    Ok(Frame::header_only(command, headers))
}

/// Build a SEND frame. `extra` may carry `content-type`, `transaction`,
/// `receipt`, and arbitrary user headers; `content-length` is added for a
/// non-empty body in 1.1+ unless the caller supplied one.
pub fn send(
    version: Version,
    destination: &str,
    body: Vec<u8>,
    extra: Headers,
) -> Result<Frame, BuildError> {
    if destination.is_empty() {
        return Err(missing("SEND", "destination", version));
    }
    let mut headers = Headers::with("destination", destination);
    for (name, value) in extra.iter() {
        headers.push(name, value);
    }
    if !body.is_empty() && version >= Version::V1_1 && !headers.contains("content-length") {
        headers.push("content-length", &body.len().to_string());
    }
    Ok(Frame::new(Command::Send, headers, body))
}

/// Build a SUBSCRIBE frame. `id` is mandatory in 1.1+; `ack` defaults to
/// `auto` and is only written when it differs.
pub fn subscribe(
    version: Version,
    destination: &str,
    id: Option<&str>,
    ack: AckMode,
    extra: Headers,
) -> Result<Frame, BuildError> {
    if destination.is_empty() {
        return Err(missing("SUBSCRIBE", "destination", version));
    }
    let mut headers = Headers::with("destination", destination);
    match id {
        Some(id) => headers.push("id", id),
        None if version >= Version::V1_1 => {
            return Err(missing("SUBSCRIBE", "id", version));
        }
        None => {}
    }
    if ack != AckMode::Auto {
        headers.push("ack", ack.as_str());
    }
    for (name, value) in extra.iter() {
        headers.push(name, value);
    }
    Ok(Frame::header_only(Command::Subscribe, headers))
}

/// Build an UNSUBSCRIBE frame. 1.0 accepts either `destination` or `id`;
/// 1.1+ requires `id`.
pub fn unsubscribe(
    version: Version,
    id: Option<&str>,
    destination: Option<&str>,
) -> Result<Frame, BuildError> {
    let mut headers = Headers::new();
    match (id, destination) {
        (Some(id), _) => headers.push("id", id),
        (None, Some(dest)) if version == Version::V1_0 => headers.push("destination", dest),
        _ => return Err(missing("UNSUBSCRIBE", "id", version)),
    }
    Ok(Frame::header_only(Command::Unsubscribe, headers))
}

/// Build an ACK for a received MESSAGE, deriving the per-version
/// acknowledgment headers from the message's own headers.
pub fn ack(
    version: Version,
    message: &Headers,
    transaction: Option<&str>,
) -> Result<Frame, BuildError> {
    acknowledgment(Command::Ack, version, message, transaction)
}

/// Build a NACK. Not part of the 1.0 protocol.
pub fn nack(
    version: Version,
    message: &Headers,
    transaction: Option<&str>,
) -> Result<Frame, BuildError> {
    if version == Version::V1_0 {
        return Err(BuildError::UnsupportedInVersion {
            command: "NACK",
            version,
        });
    }
    acknowledgment(Command::Nack, version, message, transaction)
}

fn acknowledgment(
    command: Command,
    version: Version,
    message: &Headers,
    transaction: Option<&str>,
) -> Result<Frame, BuildError> {
    let name = command.as_str();
    let mut headers = Headers::new();
    match version {
        // 1.2 acknowledges by the server-minted `ack` token.
        Version::V1_2 => {
            let id = message
                .get("ack")
                .ok_or_else(|| missing(name, "id", version))?;
            headers.push("id", id);
        }
        Version::V1_1 => {
            let message_id = message
                .get("message-id")
                .ok_or_else(|| missing(name, "message-id", version))?;
            let subscription = message
                .get("subscription")
                .ok_or_else(|| missing(name, "subscription", version))?;
            headers.push("message-id", message_id);
            headers.push("subscription", subscription);
        }
        Version::V1_0 => {
            let message_id = message
                .get("message-id")
                .ok_or_else(|| missing(name, "message-id", version))?;
            headers.push("message-id", message_id);
            if let Some(subscription) = message.get("subscription") {
                headers.push("subscription", subscription);
            }
        }
    }
    if let Some(tx) = transaction {
        headers.push("transaction", tx);
    }
    Ok(Frame::header_only(command, headers))
}

/// Build a BEGIN frame for `transaction`.
pub fn begin(version: Version, transaction: &str) -> Result<Frame, BuildError> {
    transaction_frame(Command::Begin, version, transaction)
}

/// Build a COMMIT frame for `transaction`.
pub fn commit(version: Version, transaction: &str) -> Result<Frame, BuildError> {
    transaction_frame(Command::Commit, version, transaction)
}

/// Build an ABORT frame for `transaction`.
pub fn abort(version: Version, transaction: &str) -> Result<Frame, BuildError> {
    transaction_frame(Command::Abort, version, transaction)
}

fn transaction_frame(
    command: Command,
    version: Version,
    transaction: &str,
) -> Result<Frame, BuildError> {
    if transaction.is_empty() {
        return Err(missing(command.as_str(), "transaction", version));
    }
    Ok(Frame::header_only(
        command,
        Headers::with("transaction", transaction),
    ))
}

/// Build a DISCONNECT frame, optionally receipt-tagged for graceful
/// shutdown.
pub fn disconnect(receipt: Option<&str>) -> Frame {
    let mut headers = Headers::new();
    if let Some(receipt) = receipt {
        headers.push("receipt", receipt);
    }
    Frame::header_only(Command::Disconnect, headers)
}

/// Parse a `heart-beat` header value: two non-negative integers "cx,cy".
pub fn parse_heart_beat(value: &str) -> Result<(u32, u32), BuildError> {
    let bad = || BuildError::BadHeartBeat(value.to_string());
    let (cx, cy) = value.split_once(',').ok_or_else(bad)?;
    let cx = cx.trim().parse::<u32>().map_err(|_| bad())?;
    let cy = cy.trim().parse::<u32>().map_err(|_| bad())?;
    Ok((cx, cy))
}
