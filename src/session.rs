//! The client-side session state machine.
//!
//! A [`Session`] owns no I/O. Outbound operations validate the current state
//! and return the frame to put on the wire; inbound frames go through
//! [`Session::on_frame`] and come back out as [`SessionEvent`]s. The session
//! tracks everything needed to survive a broker failover: the subscription
//! set (with caller-supplied contexts), active transactions, and outstanding
//! receipts.
//!
//! State diagram:
//!
//! ```text
//! disconnected → connecting → connected → disconnecting → disconnected
//!       ↑______________________________________________________|
//!       (ERROR frame / framing error / transport loss: abrupt,
//!        subscriptions and transactions retained for replay)
//! ```

use crate::commands::{self, BuildError, ConnectOptions};
use crate::frame::{AckMode, Command, Frame, Headers, Version};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A standing registration to receive MESSAGE frames, retained across abrupt
/// disconnects so it can be replayed on the next connection.
#[derive(Clone, Debug)]
pub struct Subscription<C> {
    token: String,
    destination: String,
    ack: AckMode,
    // The SUBSCRIBE headers exactly as they went on the wire; replay
    // re-issues them verbatim.
    headers: Headers,
    context: C,
}

impl<C> Subscription<C> {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The opaque value supplied at subscribe time; callers use it to
    /// re-register handlers after a replay.
    pub fn context(&self) -> &C {
        &self.context
    }
}

/// An outbound frame tagged with a `receipt` header, awaiting the broker's
/// RECEIPT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReceipt {
    pub id: String,
    pub command: Command,
}

/// What an inbound frame meant, after validation against session state.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Negotiation finished; the session is now connected.
    Connected {
        version: Version,
        session_id: Option<String>,
        server: Option<String>,
        /// Negotiated `(outgoing_ms, incoming_ms)`; zero disables a side.
        heart_beat: (u32, u32),
    },
    /// A MESSAGE for `subscription` (resolved to the local token).
    Message {
        subscription: Option<String>,
        frame: Frame,
    },
    /// A pending receipt was answered.
    Receipt { id: String, command: Command },
    /// The broker reported an error. Delivered verbatim; the session is now
    /// abruptly disconnected and any outstanding receipts are lost.
    BrokerError {
        frame: Frame,
        lost_receipts: Vec<PendingReceipt>,
    },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{command} is illegal in the {state:?} state")]
    IllegalInState {
        command: Command,
        state: SessionState,
    },

    #[error("{command} frame arrived in the {state:?} state")]
    UnexpectedFrame {
        command: Command,
        state: SessionState,
    },

    #[error("unknown transaction '{0}'")]
    UnknownTransaction(String),

    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),

    #[error("RECEIPT '{0}' matches no outstanding receipt")]
    UnmatchedReceipt(String),

    #[error("inbound {command} frame is missing the '{header}' header")]
    MissingHeader {
        command: Command,
        header: &'static str,
    },

    #[error("server offered version '{offered}' outside the advertised set")]
    VersionMismatch { offered: String },

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl SessionError {
    /// Stable machine-readable tag; the `Display` text is advisory only.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::IllegalInState { .. } => "illegal-in-state",
            SessionError::UnexpectedFrame { .. } => "unexpected-frame",
            SessionError::UnknownTransaction(_) => "unknown-transaction",
            SessionError::UnknownSubscription(_) => "unknown-subscription",
            SessionError::UnmatchedReceipt(_) => "unmatched-receipt",
            SessionError::MissingHeader { .. } => "missing-header",
            SessionError::VersionMismatch { .. } => "version-mismatch",
            SessionError::Build(err) => err.kind(),
        }
    }
}

/// The session state machine, generic over the opaque per-subscription
/// context `C`.
#[derive(Debug)]
pub struct Session<C = ()> {
    state: SessionState,
    accept: Vec<Version>,
    negotiated: Option<Version>,
    session_id: Option<String>,
    server: Option<String>,
    client_heart_beat: (u32, u32),
    heart_beat: (u32, u32),
    subscriptions: Vec<Subscription<C>>,
    transactions: Vec<String>,
    pending_receipts: Vec<PendingReceipt>,
    next_subscription: u64,
    next_transaction: u64,
    next_receipt: u64,
    abrupt: bool,
    disconnect_receipt: Option<String>,
}

impl<C> Default for Session<C> {
    fn default() -> Session<C> {
        Session::new()
    }
}

impl<C> Session<C> {
    /// A session advertising every supported version.
    pub fn new() -> Session<C> {
        Session::with_versions(Version::supported().to_vec())
    }

    /// A session restricted to `accept` (ascending order recommended).
    pub fn with_versions(accept: Vec<Version>) -> Session<C> {
        Session {
            state: SessionState::Disconnected,
            accept,
            negotiated: None,
            session_id: None,
            server: None,
            client_heart_beat: (0, 0),
            heart_beat: (0, 0),
            subscriptions: Vec::new(),
            transactions: Vec::new(),
            pending_receipts: Vec::new(),
            next_subscription: 0,
            next_transaction: 0,
            next_receipt: 0,
            abrupt: false,
            disconnect_receipt: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The version settled by negotiation, absent until CONNECTED arrives.
    pub fn negotiated_version(&self) -> Option<Version> {
        self.negotiated
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Negotiated `(outgoing_ms, incoming_ms)` heart-beat intervals.
    pub fn heart_beat(&self) -> (u32, u32) {
        self.heart_beat
    }

    pub fn pending_receipts(&self) -> &[PendingReceipt] {
        &self.pending_receipts
    }

    pub fn has_pending_receipts(&self) -> bool {
        !self.pending_receipts.is_empty()
    }

    pub fn is_receipt_pending(&self, id: &str) -> bool {
        self.pending_receipts.iter().any(|r| r.id == id)
    }

    /// Current subscriptions in insertion order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription<C>> {
        self.subscriptions.iter()
    }

    /// Whether the last transition to `disconnected` was forced rather than
    /// the tail of a graceful shutdown.
    pub fn last_disconnect_abrupt(&self) -> bool {
        self.abrupt
    }

    /// Mint a receipt id unique within this session.
    pub fn mint_receipt_id(&mut self) -> String {
        self.next_receipt += 1;
        format!("rcpt-{}", self.next_receipt)
    }

    fn current_version(&self) -> Version {
        self.negotiated.unwrap_or(Version::V1_0)
    }

    fn require_connected(&self, command: Command) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::IllegalInState {
                command,
                state: self.state,
            });
        }
        Ok(())
    }

    fn require_transaction(&self, token: Option<&str>) -> Result<(), SessionError> {
        if let Some(token) = token {
            if !self.transactions.iter().any(|t| t == token) {
                return Err(SessionError::UnknownTransaction(token.to_string()));
            }
        }
        Ok(())
    }

    /// Register a `receipt`-tagged frame as pending before it is handed to
    /// the transport.
    fn register_outbound(&mut self, frame: Frame) -> Frame {
        if let Some(id) = frame.header("receipt") {
            self.pending_receipts.push(PendingReceipt {
                id: id.to_string(),
                command: frame.command,
            });
        }
        frame
    }

    // ---- outbound operations -------------------------------------------

    /// Build the CONNECT frame and enter `connecting`.
    pub fn connect(
        &mut self,
        host: &str,
        options: ConnectOptions,
    ) -> Result<Frame, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::IllegalInState {
                command: Command::Connect,
                state: self.state,
            });
        }
        let frame = commands::connect(&self.accept, Some(host), &options)?;
        self.client_heart_beat = options.heart_beat.unwrap_or((0, 0));
        self.negotiated = None;
        self.session_id = None;
        self.server = None;
        self.heart_beat = (0, 0);
        self.disconnect_receipt = None;
        self.state = SessionState::Connecting;
        debug!(host, "connecting");
        Ok(frame)
    }

    /// Build a SEND frame. A `transaction` header in `extra` must name an
    /// active transaction.
    pub fn send(
        &mut self,
        destination: &str,
        body: Vec<u8>,
        extra: Headers,
    ) -> Result<Frame, SessionError> {
        self.require_connected(Command::Send)?;
        self.require_transaction(extra.get("transaction"))?;
        let frame = commands::send(self.current_version(), destination, body, extra)?;
        Ok(self.register_outbound(frame))
    }

    /// Record a subscription and build its SUBSCRIBE frame. The local token
    /// is the `id` entry of `extra` when given, a minted `sub-N` otherwise.
    pub fn subscribe(
        &mut self,
        destination: &str,
        ack: AckMode,
        extra: Headers,
        context: C,
    ) -> Result<(String, Frame), SessionError> {
        self.require_connected(Command::Subscribe)?;
        let token = match extra.get("id") {
            Some(id) => id.to_string(),
            None => {
                self.next_subscription += 1;
                format!("sub-{}", self.next_subscription)
            }
        };
        // `id` and `ack` are carried explicitly; keep user headers free of
        // duplicates.
        let mut user = extra;
        user.remove("id");
        user.remove("ack");
        let frame =
            commands::subscribe(self.current_version(), destination, Some(&token), ack, user)?;
        self.subscriptions.push(Subscription {
            token: token.clone(),
            destination: destination.to_string(),
            ack,
            headers: frame.headers.clone(),
            context,
        });
        let frame = self.register_outbound(frame);
        Ok((token, frame))
    }

    /// Drop a subscription (optimistically, on issuance) and build the
    /// UNSUBSCRIBE frame.
    pub fn unsubscribe(&mut self, token: &str) -> Result<Frame, SessionError> {
        self.require_connected(Command::Unsubscribe)?;
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.token != token);
        if self.subscriptions.len() == before {
            return Err(SessionError::UnknownSubscription(token.to_string()));
        }
        let frame = commands::unsubscribe(self.current_version(), Some(token), None)?;
        Ok(self.register_outbound(frame))
    }

    /// Open a transaction and build its BEGIN frame. A token is minted when
    /// the caller does not supply one.
    pub fn begin(&mut self, token: Option<&str>) -> Result<(String, Frame), SessionError> {
        self.require_connected(Command::Begin)?;
        let token = match token {
            Some(token) => token.to_string(),
            None => {
                self.next_transaction += 1;
                format!("tx-{}", self.next_transaction)
            }
        };
        let frame = commands::begin(self.current_version(), &token)?;
        if !self.transactions.contains(&token) {
            self.transactions.push(token.clone());
        }
        Ok((token, self.register_outbound(frame)))
    }

    /// Close a transaction with COMMIT.
    pub fn commit(&mut self, token: &str) -> Result<Frame, SessionError> {
        self.finish_transaction(Command::Commit, token)
    }

    /// Close a transaction with ABORT.
    pub fn abort(&mut self, token: &str) -> Result<Frame, SessionError> {
        self.finish_transaction(Command::Abort, token)
    }

    fn finish_transaction(
        &mut self,
        command: Command,
        token: &str,
    ) -> Result<Frame, SessionError> {
        self.require_connected(command)?;
        let before = self.transactions.len();
        self.transactions.retain(|t| t != token);
        if self.transactions.len() == before {
            return Err(SessionError::UnknownTransaction(token.to_string()));
        }
        let frame = match command {
            Command::Commit => commands::commit(self.current_version(), token)?,
            _ => commands::abort(self.current_version(), token)?,
        };
        Ok(self.register_outbound(frame))
    }

    /// Acknowledge a received MESSAGE, given its headers.
    pub fn ack(
        &mut self,
        message: &Headers,
        transaction: Option<&str>,
    ) -> Result<Frame, SessionError> {
        self.require_connected(Command::Ack)?;
        self.require_transaction(transaction)?;
        let frame = commands::ack(self.current_version(), message, transaction)?;
        Ok(self.register_outbound(frame))
    }

    /// Negatively acknowledge a received MESSAGE, given its headers.
    pub fn nack(
        &mut self,
        message: &Headers,
        transaction: Option<&str>,
    ) -> Result<Frame, SessionError> {
        self.require_connected(Command::Nack)?;
        self.require_transaction(transaction)?;
        let frame = commands::nack(self.current_version(), message, transaction)?;
        Ok(self.register_outbound(frame))
    }

    /// Build the DISCONNECT frame and enter `disconnecting`. With a receipt
    /// id the matching RECEIPT completes the graceful shutdown; without one
    /// the caller finishes via [`Session::transport_closed`].
    pub fn disconnect(&mut self, receipt: Option<&str>) -> Result<Frame, SessionError> {
        self.require_connected(Command::Disconnect)?;
        let frame = commands::disconnect(receipt);
        self.disconnect_receipt = receipt.map(str::to_string);
        self.state = SessionState::Disconnecting;
        Ok(self.register_outbound(frame))
    }

    // ---- inbound frames ------------------------------------------------

    /// Validate an inbound frame against the current state and apply it.
    pub fn on_frame(&mut self, frame: Frame) -> Result<SessionEvent, SessionError> {
        match frame.command {
            Command::Connected => self.on_connected(frame),
            Command::Message => self.on_message(frame),
            Command::Receipt => self.on_receipt(frame),
            Command::Error => self.on_error(frame),
            command => Err(SessionError::UnexpectedFrame {
                command,
                state: self.state,
            }),
        }
    }

    fn on_connected(&mut self, frame: Frame) -> Result<SessionEvent, SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::UnexpectedFrame {
                command: Command::Connected,
                state: self.state,
            });
        }

        let version = match frame.header("version") {
            // A server that stays silent about its version is a 1.0 server.
            None => Version::V1_0,
            Some(offered) => self.negotiate(offered)?,
        };

        let (outgoing, incoming) = match frame.header("heart-beat") {
            None => (0, 0),
            Some(value) => {
                let (server_send, server_want) = commands::parse_heart_beat(value)
                    .map_err(SessionError::Build)?;
                let (client_send, client_want) = self.client_heart_beat;
                let outgoing = if client_send == 0 || server_want == 0 {
                    0
                } else {
                    client_send.max(server_want)
                };
                let incoming = if client_want == 0 || server_send == 0 {
                    0
                } else {
                    client_want.max(server_send)
                };
                (outgoing, incoming)
            }
        };

        self.negotiated = Some(version);
        self.session_id = frame.header("session").map(str::to_string);
        self.server = frame.header("server").map(str::to_string);
        self.heart_beat = (outgoing, incoming);
        self.state = SessionState::Connected;
        self.abrupt = false;
        debug!(%version, outgoing, incoming, "connected");

        Ok(SessionEvent::Connected {
            version,
            session_id: self.session_id.clone(),
            server: self.server.clone(),
            heart_beat: self.heart_beat,
        })
    }

    /// Intersect the server's offer with the advertised set; the highest
    /// common version wins. An empty intersection is fatal.
    fn negotiate(&mut self, offered: &str) -> Result<Version, SessionError> {
        let best = offered
            .split(',')
            .filter_map(|v| v.trim().parse::<Version>().ok())
            .filter(|v| self.accept.contains(v))
            .max();
        match best {
            Some(version) => Ok(version),
            None => {
                warn!(offered, "version negotiation failed");
                self.force_disconnect();
                Err(SessionError::VersionMismatch {
                    offered: offered.to_string(),
                })
            }
        }
    }

    fn on_message(&mut self, frame: Frame) -> Result<SessionEvent, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::UnexpectedFrame {
                command: Command::Message,
                state: self.state,
            });
        }
        let version = self.current_version();
        let missing = |header| SessionError::MissingHeader {
            command: Command::Message,
            header,
        };
        if !frame.headers.contains("destination") {
            return Err(missing("destination"));
        }
        if !frame.headers.contains("message-id") {
            return Err(missing("message-id"));
        }

        let token = match frame.header("subscription") {
            Some(id) => {
                let known = self.subscriptions.iter().find(|s| s.token == id);
                match known {
                    Some(sub) => {
                        if version == Version::V1_2
                            && sub.ack != AckMode::Auto
                            && !frame.headers.contains("ack")
                        {
                            return Err(missing("ack"));
                        }
                        Some(sub.token.clone())
                    }
                    None => {
                        return Err(SessionError::UnknownSubscription(id.to_string()));
                    }
                }
            }
            None if version >= Version::V1_1 => return Err(missing("subscription")),
            // 1.0 brokers need not echo the subscription; fall back to the
            // destination.
            None => frame
                .header("destination")
                .and_then(|dest| {
                    self.subscriptions
                        .iter()
                        .find(|s| s.destination == dest)
                        .map(|s| s.token.clone())
                }),
        };

        Ok(SessionEvent::Message {
            subscription: token,
            frame,
        })
    }

    fn on_receipt(&mut self, frame: Frame) -> Result<SessionEvent, SessionError> {
        if !matches!(
            self.state,
            SessionState::Connected | SessionState::Disconnecting
        ) {
            return Err(SessionError::UnexpectedFrame {
                command: Command::Receipt,
                state: self.state,
            });
        }
        let id = frame
            .header("receipt-id")
            .ok_or(SessionError::MissingHeader {
                command: Command::Receipt,
                header: "receipt-id",
            })?
            .to_string();

        let position = self
            .pending_receipts
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| SessionError::UnmatchedReceipt(id.clone()))?;
        let pending = self.pending_receipts.remove(position);

        if self.state == SessionState::Disconnecting
            && self.disconnect_receipt.as_deref() == Some(id.as_str())
        {
            // Graceful shutdown complete: the broker has processed
            // everything up to the DISCONNECT.
            self.state = SessionState::Disconnected;
            self.abrupt = false;
            self.disconnect_receipt = None;
            self.subscriptions.clear();
            self.transactions.clear();
            debug!("disconnected cleanly");
        }

        Ok(SessionEvent::Receipt {
            id,
            command: pending.command,
        })
    }

    fn on_error(&mut self, frame: Frame) -> Result<SessionEvent, SessionError> {
        if self.state == SessionState::Disconnected {
            return Err(SessionError::UnexpectedFrame {
                command: Command::Error,
                state: self.state,
            });
        }
        warn!(error = %frame, "broker error");
        let lost_receipts = self.force_disconnect();
        Ok(SessionEvent::BrokerError {
            frame,
            lost_receipts,
        })
    }

    // ---- disconnect bookkeeping ----------------------------------------

    /// Note that the transport is gone. From `disconnecting` this completes
    /// a clean shutdown; from anywhere else it is an abrupt loss that keeps
    /// subscriptions and transactions for replay. Returns the receipts that
    /// will never be answered.
    pub fn transport_closed(&mut self) -> Vec<PendingReceipt> {
        match self.state {
            SessionState::Disconnected => Vec::new(),
            SessionState::Disconnecting => {
                self.state = SessionState::Disconnected;
                self.abrupt = false;
                self.disconnect_receipt = None;
                self.subscriptions.clear();
                self.transactions.clear();
                std::mem::take(&mut self.pending_receipts)
            }
            _ => self.force_disconnect(),
        }
    }

    fn force_disconnect(&mut self) -> Vec<PendingReceipt> {
        self.state = SessionState::Disconnected;
        self.abrupt = true;
        self.disconnect_receipt = None;
        std::mem::take(&mut self.pending_receipts)
    }

    /// The SUBSCRIBE frames to re-issue on a fresh connection, in original
    /// insertion order with their original headers. Receipt-tagged
    /// subscriptions are re-registered as pending.
    pub fn replay(&mut self) -> Vec<Frame> {
        let frames: Vec<Frame> = self
            .subscriptions
            .iter()
            .map(|sub| Frame::header_only(Command::Subscribe, sub.headers.clone()))
            .collect();
        frames
            .into_iter()
            .map(|frame| self.register_outbound(frame))
            .collect()
    }
}
