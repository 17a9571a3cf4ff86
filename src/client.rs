//! A thin async STOMP client.
//!
//! Glues the three core pieces together: the [`Failover`] strategy picks
//! broker endpoints, the [`Connection`] moves frames over TCP, and the
//! [`Session`] state machine validates everything in both directions. The
//! client adds no policy of its own beyond sleeping out reconnect delays and
//! driving the graceful-shutdown receipt.

use crate::codec::{FramingError, Transmission};
use crate::commands::ConnectOptions;
use crate::connection::Connection;
use crate::failover::{Endpoint, Failover, FailoverError};
use crate::frame::{AckMode, Headers};
use crate::session::{Session, SessionError, SessionEvent, SessionState};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Errors for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error during network operations (connection, read, write).
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// The inbound byte stream violated the frame grammar.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// An operation was rejected by the session state machine.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The failover URI could not be parsed.
    #[error("failover error: {0}")]
    Failover(#[from] FailoverError),

    /// The broker sent an ERROR frame during the connect handshake.
    #[error("broker error: {message}")]
    Broker { message: String, body: Vec<u8> },

    /// Every broker's reconnect budget is spent.
    #[error("no more brokers to try")]
    NoMoreBrokers,

    /// The transport went away mid-operation.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// Transport-level failure that is none of the above.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<crate::Error> for ClientError {
    fn from(err: crate::Error) -> ClientError {
        match err.downcast::<io::Error>() {
            Ok(io) => ClientError::Io(*io),
            Err(err) => match err.downcast::<FramingError>() {
                Ok(framing) => ClientError::Framing(*framing),
                Err(err) => ClientError::Transport(err.to_string()),
            },
        }
    }
}

/// Connect-time options: credentials, virtual host, heart-beat offer.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// The `host` header for CONNECT; defaults to the broker's host name.
    pub virtual_host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Client-offered `(cx, cy)` heart-beat intervals in milliseconds.
    pub heart_beat: Option<(u32, u32)>,
}

impl ClientOptions {
    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            login: self.login.clone(),
            passcode: self.passcode.clone(),
            heart_beat: self.heart_beat,
        }
    }
}

/// An async STOMP client over a failover broker list.
#[derive(Debug)]
pub struct Client {
    failover: Failover,
    options: ClientOptions,
    session: Session<()>,
    connection: Connection,
}

impl Client {
    /// Connect to the first reachable broker of `uri` and complete the
    /// CONNECT/CONNECTED handshake.
    pub async fn connect(uri: &str, options: ClientOptions) -> Result<Client, ClientError> {
        let mut failover = Failover::from_uri(uri)?;
        let mut session = Session::new();
        let connection = establish(&mut failover, &mut session, &options).await?;
        Ok(Client {
            failover,
            options,
            session,
            connection,
        })
    }

    /// The session state machine, for querying negotiated version,
    /// heart-beat intervals, pending receipts, and subscriptions.
    pub fn session(&self) -> &Session<()> {
        &self.session
    }

    /// When the last inbound byte arrived, for heart-beat supervision.
    pub fn last_inbound_at(&self) -> std::time::Instant {
        self.connection.last_inbound_at()
    }

    /// Send a message to `destination`.
    pub async fn send(
        &mut self,
        destination: &str,
        body: Vec<u8>,
        headers: Headers,
    ) -> Result<(), ClientError> {
        let frame = self.session.send(destination, body, headers)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    /// Subscribe to `destination`; returns the local subscription token.
    pub async fn subscribe(
        &mut self,
        destination: &str,
        ack: AckMode,
        headers: Headers,
    ) -> Result<String, ClientError> {
        let (token, frame) = self.session.subscribe(destination, ack, headers, ())?;
        self.connection.write_frame(&frame).await?;
        Ok(token)
    }

    pub async fn unsubscribe(&mut self, token: &str) -> Result<(), ClientError> {
        let frame = self.session.unsubscribe(token)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    /// Open a transaction; returns its token.
    pub async fn begin(&mut self) -> Result<String, ClientError> {
        let (token, frame) = self.session.begin(None)?;
        self.connection.write_frame(&frame).await?;
        Ok(token)
    }

    pub async fn commit(&mut self, token: &str) -> Result<(), ClientError> {
        let frame = self.session.commit(token)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    pub async fn abort(&mut self, token: &str) -> Result<(), ClientError> {
        let frame = self.session.abort(token)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    /// Acknowledge a received MESSAGE, given its headers.
    pub async fn ack(
        &mut self,
        message: &Headers,
        transaction: Option<&str>,
    ) -> Result<(), ClientError> {
        let frame = self.session.ack(message, transaction)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    /// Negatively acknowledge a received MESSAGE, given its headers.
    pub async fn nack(
        &mut self,
        message: &Headers,
        transaction: Option<&str>,
    ) -> Result<(), ClientError> {
        let frame = self.session.nack(message, transaction)?;
        self.connection.write_frame(&frame).await?;
        Ok(())
    }

    /// Send an outgoing heart-beat; scheduling is the caller's concern.
    pub async fn send_heart_beat(&mut self) -> Result<(), ClientError> {
        self.connection.write_heart_beat().await?;
        Ok(())
    }

    /// The next session event from the broker. Heart-beats are consumed
    /// silently; `Ok(None)` means the stream ended after a clean disconnect.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>, ClientError> {
        loop {
            match self.connection.read_transmission().await? {
                None => {
                    self.session.transport_closed();
                    if self.session.last_disconnect_abrupt() {
                        return Err(ClientError::ConnectionClosed);
                    }
                    return Ok(None);
                }
                Some(Transmission::HeartBeat) => continue,
                Some(Transmission::Frame(frame)) => {
                    return Ok(Some(self.session.on_frame(frame)?));
                }
            }
        }
    }

    /// Graceful shutdown: issue a receipt-tagged DISCONNECT and wait for the
    /// broker's RECEIPT before returning.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let receipt = self.session.mint_receipt_id();
        let frame = self.session.disconnect(Some(&receipt))?;
        self.connection.write_frame(&frame).await?;

        while self.session.is_receipt_pending(&receipt) {
            match self.connection.read_transmission().await? {
                None => {
                    self.session.transport_closed();
                    return Err(ClientError::ConnectionClosed);
                }
                Some(Transmission::HeartBeat) => continue,
                Some(Transmission::Frame(frame)) => {
                    self.session.on_frame(frame)?;
                }
            }
        }
        debug!("disconnected cleanly");
        Ok(())
    }

    /// After a lost connection: walk the failover list again and replay the
    /// surviving subscriptions on the new broker.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        if self.session.state() != SessionState::Disconnected {
            self.session.transport_closed();
        }
        self.connection = establish(&mut self.failover, &mut self.session, &self.options).await?;
        for frame in self.session.replay() {
            self.connection.write_frame(&frame).await?;
        }
        Ok(())
    }
}

/// Walk the failover iterator until a broker accepts and negotiation
/// completes.
async fn establish(
    failover: &mut Failover,
    session: &mut Session<()>,
    options: &ClientOptions,
) -> Result<Connection, ClientError> {
    loop {
        let Some(endpoint) = failover.next() else {
            return Err(ClientError::NoMoreBrokers);
        };
        if endpoint.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(endpoint.delay_ms)).await;
        }
        match attempt(&endpoint, session, options).await {
            Ok(connection) => {
                failover.note_success();
                return Ok(connection);
            }
            Err(err) => {
                warn!(broker = %endpoint.host, port = endpoint.port, %err, "connect attempt failed");
                failover.note_failure();
                // Unwind a half-done handshake so the next attempt can
                // CONNECT again.
                session.transport_closed();
            }
        }
    }
}

async fn attempt(
    endpoint: &Endpoint,
    session: &mut Session<()>,
    options: &ClientOptions,
) -> Result<Connection, ClientError> {
    let socket = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    let mut connection = Connection::new(socket);

    let host = options
        .virtual_host
        .clone()
        .unwrap_or_else(|| endpoint.host.clone());
    let frame = session.connect(&host, options.connect_options())?;
    connection.write_frame(&frame).await?;

    loop {
        match connection.read_transmission().await? {
            None => return Err(ClientError::ConnectionClosed),
            Some(Transmission::HeartBeat) => continue,
            Some(Transmission::Frame(frame)) => match session.on_frame(frame)? {
                SessionEvent::Connected { version, .. } => {
                    connection.set_version(version);
                    return Ok(connection);
                }
                SessionEvent::BrokerError { frame, .. } => {
                    return Err(ClientError::Broker {
                        message: frame.header("message").unwrap_or_default().to_string(),
                        body: frame.body,
                    });
                }
                event => {
                    warn!(?event, "unexpected event during handshake");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Version;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Read one frame's raw bytes (through the trailing NUL) off a socket.
    async fn read_raw_frame(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            socket.read_exact(&mut byte).await.unwrap();
            if byte[0] == 0 {
                break;
            }
            raw.push(byte[0]);
        }
        String::from_utf8(raw).unwrap()
    }

    fn header_value(raw: &str, name: &str) -> Option<String> {
        raw.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.to_string())
    }

    #[tokio::test]
    async fn connect_subscribe_message_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let connect = read_raw_frame(&mut socket).await;
            assert!(connect.starts_with("CONNECT\n"));
            assert_eq!(
                header_value(&connect, "accept-version").as_deref(),
                Some("1.0,1.1,1.2")
            );
            socket
                .write_all(b"CONNECTED\nversion:1.2\nsession:s-99\n\n\0")
                .await
                .unwrap();

            let subscribe = read_raw_frame(&mut socket).await;
            assert!(subscribe.starts_with("SUBSCRIBE\n"));
            let id = header_value(&subscribe, "id").unwrap();
            socket
                .write_all(
                    format!(
                        "MESSAGE\ndestination:/queue/a\nmessage-id:m-1\nsubscription:{id}\n\nhello\0"
                    )
                    .as_bytes(),
                )
                .await
                .unwrap();

            let disconnect = read_raw_frame(&mut socket).await;
            assert!(disconnect.starts_with("DISCONNECT\n"));
            let receipt = header_value(&disconnect, "receipt").unwrap();
            socket
                .write_all(format!("RECEIPT\nreceipt-id:{receipt}\n\n\0").as_bytes())
                .await
                .unwrap();
        });

        let uri = format!("failover:tcp://127.0.0.1:{}?randomize=false", addr.port());
        let mut client = Client::connect(&uri, ClientOptions::default())
            .await
            .unwrap();
        assert_eq!(
            client.session().negotiated_version(),
            Some(Version::V1_2)
        );
        assert_eq!(client.session().session_id(), Some("s-99"));

        let token = client
            .subscribe("/queue/a", AckMode::Auto, Headers::new())
            .await
            .unwrap();

        let event = client.next_event().await.unwrap().unwrap();
        match event {
            SessionEvent::Message {
                subscription,
                frame,
            } => {
                assert_eq!(subscription.as_deref(), Some(token.as_str()));
                assert_eq!(frame.body, b"hello");
            }
            other => panic!("unexpected event {other:?}"),
        }

        client.disconnect().await.unwrap();
        assert!(!client.session().has_pending_receipts());
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn failover_skips_dead_broker() {
        // Reserve a port and close it again so the first endpoint refuses.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_addr = live.local_addr().unwrap();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = live.accept().await.unwrap();
            read_raw_frame(&mut socket).await;
            socket
                .write_all(b"CONNECTED\nversion:1.1\n\n\0")
                .await
                .unwrap();
        });

        let uri = format!(
            "failover:(tcp://127.0.0.1:{},tcp://127.0.0.1:{})?randomize=false&initialReconnectDelay=1",
            dead_addr.port(),
            live_addr.port()
        );
        let client = Client::connect(&uri, ClientOptions::default())
            .await
            .unwrap();
        assert_eq!(
            client.session().negotiated_version(),
            Some(Version::V1_1)
        );
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn broker_error_during_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_raw_frame(&mut socket).await;
            socket
                .write_all(b"ERROR\nmessage:bad credentials\n\n\0")
                .await
                .unwrap();
        });

        let uri = format!(
            "failover:tcp://127.0.0.1:{}?randomize=false&maxReconnectAttempts=0&startupMaxReconnectAttempts=0",
            addr.port()
        );
        let err = Client::connect(&uri, ClientOptions::default())
            .await
            .unwrap_err();
        // One broker, zero retries: the broker rejection surfaces as
        // running out of brokers after the failed attempt.
        assert!(matches!(err, ClientError::NoMoreBrokers));
    }
}
