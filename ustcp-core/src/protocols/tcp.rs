//! An implementation of the [Transmission Control
//! Protocol](https://www.rfc-editor.org/rfc/rfc793.html) over a raw IP
//! [`Transport`].
//!
//! Each [`Socket`] owns one connection. Its transmission control block lives
//! in a session task which alone mutates it; the socket, the segment receiver
//! and the timers all talk to that task through a channel.

use crate::{
    protocols::{ipv4_address::Ipv4Address, utility::Endpoint},
    transport::{Transport, MAX_IP_PAYLOAD},
};
use std::{sync::Arc, time::Duration};

pub mod segment;
mod segment_receiver;
mod socket;
mod tcb;
pub mod tcp_parsing;
mod tcp_session;

pub use socket::{Socket, SocketError};
pub use tcb::{CloseError, ConnectError, ReceiveError, SendError, State};
use tcb::Role;

/// The port every client socket is bound to
pub const CLIENT_PORT: u16 = 3110;

/// The largest segment, header included, that fits in one IP packet
pub const MAX_SEGMENT_SIZE: u16 = MAX_IP_PAYLOAD;

/// The smallest segment size that still carries one octet of text
pub const MIN_SEGMENT_SIZE: u16 = tcp_parsing::BASE_HEADER_OCTETS as u16 + 1;

/// Tunables shared by every connection a [`Tcp`] opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConfig {
    /// How long to wait for an acknowledgment before retransmitting
    pub retransmit_timeout: Duration,
    /// Retransmissions of one segment before giving up on the connection
    pub max_retransmits: u32,
    /// How long to linger in TIME-WAIT
    pub time_wait: Duration,
    /// How long the segment receiver waits on the transport per poll
    pub receive_timeout: Duration,
    /// The largest segment to send, header included. Also the receive
    /// window.
    pub max_segment_size: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            retransmit_timeout: Duration::from_secs(1),
            max_retransmits: 10,
            time_wait: Duration::from_secs(5),
            receive_timeout: Duration::from_millis(100),
            max_segment_size: MAX_SEGMENT_SIZE,
        }
    }
}

impl TcpConfig {
    pub fn with_retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.retransmit_timeout = timeout;
        self
    }

    pub fn with_max_retransmits(mut self, max_retransmits: u32) -> Self {
        self.max_retransmits = max_retransmits;
        self
    }

    pub fn with_time_wait(mut self, time_wait: Duration) -> Self {
        self.time_wait = time_wait;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the maximum segment size, kept between [`MIN_SEGMENT_SIZE`] and
    /// what one IP packet carries
    pub fn with_max_segment_size(mut self, size: u16) -> Self {
        self.max_segment_size = size.clamp(MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE);
        self
    }

    /// The most text one segment carries
    pub fn max_payload(&self) -> usize {
        (self.max_segment_size as usize).saturating_sub(tcp_parsing::BASE_HEADER_OCTETS)
    }
}

/// Creates sockets on one host. Every socket runs its own segment receiver
/// on the shared transport, so a transport carries one live socket at a time.
#[derive(Clone)]
pub struct Tcp {
    transport: Arc<dyn Transport>,
    config: TcpConfig,
}

impl Tcp {
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, TcpConfig::default())
    }

    pub fn with_config(transport: impl Transport, config: TcpConfig) -> Self {
        Self::from_shared(Arc::new(transport), config)
    }

    /// Shares a transport that other code keeps a handle to
    pub fn from_shared(transport: Arc<dyn Transport>, config: TcpConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> TcpConfig {
        self.config
    }

    pub fn local_address(&self) -> Ipv4Address {
        self.transport.local_address()
    }

    /// A socket for actively opening a connection, bound to
    /// [`CLIENT_PORT`].
    pub fn socket(&self) -> Socket {
        self.open(CLIENT_PORT, Role::Client)
    }

    /// A socket for accepting a connection on `port`.
    pub fn server_socket(&self, port: u16) -> Socket {
        self.open(port, Role::Server)
    }

    fn open(&self, port: u16, role: Role) -> Socket {
        let local = Endpoint::new(self.transport.local_address(), port);
        Socket::open(self.transport.clone(), local, role, self.config)
    }
}
