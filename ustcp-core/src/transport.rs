//! The raw IP packet service TCP runs on.
//!
//! A [`Transport`] moves whole packets between hosts with no guarantees: they
//! may be lost, damaged, delayed or reordered. [`Loopback`] connects hosts in
//! memory and [`Faulty`] adds the damage on purpose.

mod faulty;
mod loopback;

pub use faulty::{Direction, Fault, Faulty, SegmentKind, ALWAYS};
pub use loopback::{Loopback, LoopbackInterface};

use crate::protocols::ipv4_address::Ipv4Address;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error as ThisError;

/// The size of an IPv4 header without options, in bytes
pub const IP_HEADER_SIZE: u16 = 20;
/// The largest IP payload a transport carries, in bytes
pub const MAX_IP_PAYLOAD: u16 = 8 * 1024 - IP_HEADER_SIZE;

/// One IP packet carrying a TCP segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
    /// The serialized TCP segment
    pub data: Vec<u8>,
}

/// An unreliable packet service. Implementations must allow concurrent use,
/// several tasks may send while one receives.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The address packets sent from here carry as their source
    fn local_address(&self) -> Ipv4Address;

    /// Hands a packet to the network, returning the number of payload bytes
    /// accepted. Acceptance does not mean delivery.
    async fn send(&self, packet: Packet) -> Result<usize, TransportError>;

    /// Waits up to `timeout` for the next packet addressed to this host.
    async fn receive(&self, timeout: Duration) -> Result<Packet, TransportError>;
}

/// An error that occurred while sending or receiving a packet
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("No packet arrived in time")]
    TimedOut,
    #[error("No host has the address {0}")]
    Unreachable(Ipv4Address),
    #[error("The packet of {0} bytes exceeds the maximum IP payload")]
    TooLarge(usize),
    #[error("The interface is closed")]
    Closed,
}
