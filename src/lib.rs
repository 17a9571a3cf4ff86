pub mod client;
pub mod codec;
pub mod commands;
pub mod connection;
pub mod failover;
pub mod frame;
pub mod session;


// Re-export the frame vocabulary used by every layer
pub use frame::{AckMode, Command, Frame, Headers, Version};

// Re-export codec types for direct access
pub use codec::{FramingError, Parser, Transmission, encode};

// Re-export the session state machine
pub use session::{PendingReceipt, Session, SessionError, SessionEvent, SessionState, Subscription};

// Re-export failover configuration
pub use failover::{BrokerAddr, Endpoint, Failover, FailoverConfig, FailoverError};

// Re-export the main client API for easy access
pub use client::{Client, ClientError, ClientOptions};

/// Error returned by the transport-level functions.
///
/// The core modules (`codec`, `commands`, `session`, `failover`) each define
/// a dedicated error `enum` with stable kind tags, because those errors are
/// hit and matched on during normal operation. At the transport seam the
/// possible failures (socket I/O, framing, peer resets) are only ever
/// reported upward, so a boxed `std::error::Error` is sufficient there; the
/// typed errors convert into it losslessly and can be downcast back out.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for transport operations.
///
/// This is defined as a convenience.
///
/// # Examples
///
/// ## Basic publish
///
/// This example shows the simplest way to send a message through a broker:
///
/// ```rust,no_run
/// use stomp::client::{Client, ClientOptions};
/// use stomp::frame::Headers;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Connect to the first reachable broker and negotiate a version
///     let mut client = Client::connect(
///         "failover:tcp://localhost:61613",
///         ClientOptions::default(),
///     )
///     .await?;
///
///     // Publish a message
///     client
///         .send("/queue/orders", b"order #42".to_vec(), Headers::new())
///         .await?;
///
///     // Receipt-confirmed shutdown
///     client.disconnect().await?;
///
///     Ok(())
/// }
/// ```
///
/// ## Subscribing with client acknowledgment
///
/// This example subscribes with `client-individual` ack mode and
/// acknowledges each message after processing it:
///
/// ```rust,no_run
/// use stomp::client::{Client, ClientOptions};
/// use stomp::frame::{AckMode, Headers};
/// use stomp::session::SessionEvent;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = Client::connect(
///         "failover:(tcp://primary:61613,tcp://backup:61613)?randomize=false",
///         ClientOptions {
///             login: Some("user".into()),
///             passcode: Some("secret".into()),
///             ..ClientOptions::default()
///         },
///     )
///     .await?;
///
///     client
///         .subscribe("/queue/work", AckMode::ClientIndividual, Headers::new())
///         .await?;
///
///     while let Some(event) = client.next_event().await? {
///         if let SessionEvent::Message { frame, .. } = event {
///             println!("got {} bytes", frame.body.len());
///             let headers = frame.headers.clone();
///             client.ack(&headers, None).await?;
///         }
///     }
///
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
