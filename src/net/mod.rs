//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing (pool):  TcpStream::connect → connection.rs (pipeline + TLS handshake)
//! Incoming (serve): listener.rs (accept loop, connection limits) → connection.rs
//!
//! Connection states:
//!     Registered → Handshaking → Active → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Accepts are bounded by a semaphore of connection permits
//! - TLS lives in the pipeline; the driver only moves bytes and ticks

pub mod address;
pub mod connection;
pub mod listener;

pub use address::{RemoteAddress, SniTarget};
pub use connection::{ConnectError, ConnectOptions, Connection, ConnectionId};
pub use listener::{ConnectionPermit, Listener, ListenerError};
