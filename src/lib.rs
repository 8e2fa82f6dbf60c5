//! meshbox - client for MESH-style store-and-forward mailbox messaging
//!
//! A session-oriented client for exchanging structured documents between
//! mailboxes over HTTPS: handshake, chunked send, inbox listing and
//! iteration, retrieval with reassembly, acknowledgement, and tracking,
//! with a configurable retry/backoff policy over the transport.
//!
//! # Architecture
//!
//! - **config**: named environments and session configuration
//! - **auth**: per-request authorization tokens
//! - **retry**: retry policy engine (classification + backoff)
//! - **transport**: HTTP adapter applying the retry policy
//! - **chunk**: split/reassemble codec with gzip support
//! - **message**: message model, strict status parsing, wire types
//! - **client**: the mailbox session operations
//! - **inbox**: lazy paginated inbox iteration
//!
//! # Example
//!
//! ```no_run
//! use meshbox::{Environment, ListOptions, MailboxConfig, MailboxSession, SendOptions};
//!
//! # async fn example() -> meshbox::Result<()> {
//! let config = MailboxConfig::new(
//!     Environment::LocalSandbox,
//!     "X26ABC1",
//!     "password",
//!     "shared-key",
//! );
//! let session = MailboxSession::connect(config)?;
//!
//! let message_id = session
//!     .send_message(
//!         "X26ABC2",
//!         b"payload",
//!         &SendOptions::default().with_workflow_id("WF001"),
//!     )
//!     .await?;
//! println!("sent {message_id}");
//!
//! let mut inbox = session.stream_inbox(ListOptions::default());
//! while let Some(message) = inbox.next_message().await? {
//!     println!("received {} ({} bytes)", message.id(), message.body().len());
//!     session.acknowledge_message(message.id()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod inbox;
pub mod message;
pub mod retry;
pub mod transport;

// Re-exports
pub use chunk::{Chunk, ReassemblyError, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use client::MailboxSession;
pub use config::{Environment, MailboxConfig};
pub use error::{MeshboxError, Result};
pub use inbox::MessageStream;
pub use message::{
    EndpointMatch, ListOptions, Message, MessagePage, SendOptions, Status, TrackingRecord,
};
pub use retry::RetryPolicy;
pub use transport::{Transport, TransportRequest, TransportResponse};
