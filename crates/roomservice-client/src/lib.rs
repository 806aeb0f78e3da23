//! # roomservice-client
//!
//! Client side of the order notification channel.
//!
//! - [`machine`]: sans-IO connection state machine (rate limit, backoff,
//!   flap cap, teardown by generation)
//! - [`policy`]: backoff, rate-limit and flap-window arithmetic
//! - [`lease`]: one physical connection per runtime
//! - [`channel`]: the lease, dispatcher, state and send path every mounted
//!   instance in a runtime shares
//! - [`dispatch`]: envelope callbacks, local bus and alert relevance
//! - [`transport`]: transport seam and the `tokio-tungstenite` implementation
//! - [`client`]: the actor that drives all of the above, and its handle

#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod dispatch;
pub mod errors;
pub mod lease;
pub mod machine;
pub mod policy;
pub mod transport;

pub use channel::NotificationChannel;
pub use client::{ClientConfig, NotificationClient};
pub use dispatch::{Alert, Audience, BusEvent, ConnectionNotice, Dispatcher, SubscriptionId};
pub use errors::{ClientError, TransportError};
pub use lease::{ConnectionLeases, Lease};
pub use machine::{ConnectionMachine, ConnectionState, ReadyState};
pub use transport::{Link, LinkEvent, LinkPeer, Transport, WsTransport};
