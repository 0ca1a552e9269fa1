//! Streaming Transport
//!
//! The single multiplexed connection to the broker's streaming API:
//!
//! - **codec**: text frame encoding and decoding
//! - **publisher**: subscription ID to mailbox routing
//! - **connection**: connection lifecycle, read loop, `subscribe`/`close`

pub mod codec;
pub mod connection;
pub mod publisher;

pub use codec::{ClientFrame, CodecError, ConnectOptions, Frame, FrameCodec, FrameState};
pub use connection::{
    ConnectionConfig, ConnectionState, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROTOCOL_VERSION,
    StreamConnection, StreamError,
};
pub use publisher::{Delivery, SubscriptionRegistry};
