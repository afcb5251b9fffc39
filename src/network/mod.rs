//! Network Module Implementation
//!
//! This module provides the event-driven TCP layer: connections, packet
//! framing, sessions and the two endpoints that produce sessions.
//!
//! # Architecture
//!
//! The network module is built on tokio's async I/O primitives and consists of:
//! - `Connection`: exclusive owner of one TCP stream and its resolved endpoints
//! - `Session`: read loop, framing and lifecycle of one connection
//! - `Acceptor`: listens and spawns a running session per inbound connection
//! - `Connector`: dials out and retains one session
//!
//! # Framing
//!
//! Sessions delegate framing to a `PacketCodec`. The default
//! `LengthPrefixCodec` writes `[u32 big-endian length][body]`. Whatever the
//! codec, a declared body larger than the session's receive limit is rejected
//! before anything is allocated for it.
//!
//! # Events
//!
//! Applications observe sessions through handler traits whose methods all
//! default to no-ops. Every failure is reported once through `on_error` and is
//! terminal for the session, acceptor or connector it occurred on.

pub use acceptor::{Acceptor, AcceptorHandler, AcceptorSettings, IdGenerator, SequentialIdGenerator};
pub use codec::{LengthPrefixCodec, PacketCodec, DEFAULT_MAX_PACKET_SIZE};
pub use connection::{
    compose_address, split_host_port, Connection, ConnectionReader, ConnectionWriter, Endpoints,
};
pub use connector::{Connector, ConnectorHandler, ConnectorSettings};
pub use session::{NoopHandler, Session, SessionHandler, SessionSettings};

mod acceptor;
mod codec;
mod connection;
mod connector;
mod session;
