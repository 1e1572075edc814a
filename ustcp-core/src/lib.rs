//! A user-space implementation of the TCP transport protocol running over a
//! raw IP packet transport.
//!
//! The crate provides connection-oriented, reliable, ordered byte streams
//! between two hosts identified by an IPv4 address and a port, following the
//! subset of RFC 793 without congestion control, options, urgent data, RST
//! handling or out-of-order reassembly.
//!
//! # Organization
//! - [`Transport`] is the raw packet pipe the protocol runs on.
//!   [`Loopback`](transport::Loopback) is an in-memory network of hosts and
//!   [`Faulty`](transport::Faulty) wraps any transport to drop, corrupt or
//!   delay packets.
//! - [`Tcp`] is the per-host protocol stack. It hands out [`Socket`]s.
//! - [`Socket`] offers the asynchronous connect/accept/read/write/close API.
//!
//! # Structure of a connection
//!
//! Every socket owns one session task holding its transmission control block
//! (TCB). Arriving segments, user calls and timer expirations are all messages
//! to that task, so the TCB is only ever touched from one place. A second task
//! per socket pulls packets from the transport, decodes them and forwards them
//! to the session.

pub mod protocols;
pub use protocols::{
    ipv4_address::Ipv4Address,
    tcp::{Socket, SocketError, State, Tcp, TcpConfig},
    utility::Endpoint,
};

pub mod transport;
pub use transport::Transport;
