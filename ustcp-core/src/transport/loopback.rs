use super::{Packet, Transport, TransportError, MAX_IP_PAYLOAD};
use crate::protocols::ipv4_address::Ipv4Address;
use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex,
};

type Hosts = Arc<DashMap<Ipv4Address, UnboundedSender<Packet>>>;

/// An in-memory network. Every attached host gets an interface, and packets
/// are routed to the interface owning their destination address.
#[derive(Debug, Clone, Default)]
pub struct Loopback {
    hosts: Hosts,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a host with the given address. A host attached later under
    /// the same address takes over its traffic.
    pub fn attach(&self, address: Ipv4Address) -> LoopbackInterface {
        let (send, receive) = mpsc::unbounded_channel();
        self.hosts.insert(address, send);
        LoopbackInterface {
            address,
            hosts: self.hosts.clone(),
            receiver: Mutex::new(receive),
        }
    }

    /// The number of attached hosts
    pub fn hosts(&self) -> usize {
        self.hosts.len()
    }
}

/// One host's connection to a [`Loopback`] network. Dropping it detaches the
/// host.
#[derive(Debug)]
pub struct LoopbackInterface {
    address: Ipv4Address,
    hosts: Hosts,
    receiver: Mutex<UnboundedReceiver<Packet>>,
}

#[async_trait]
impl Transport for LoopbackInterface {
    fn local_address(&self) -> Ipv4Address {
        self.address
    }

    async fn send(&self, packet: Packet) -> Result<usize, TransportError> {
        let len = packet.data.len();
        if len > MAX_IP_PAYLOAD as usize {
            return Err(TransportError::TooLarge(len));
        }
        let destination = packet.destination;
        let host = self
            .hosts
            .get(&destination)
            .ok_or(TransportError::Unreachable(destination))?;
        host.send(packet)
            .map_err(|_| TransportError::Unreachable(destination))?;
        Ok(len)
    }

    async fn receive(&self, timeout: Duration) -> Result<Packet, TransportError> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::TimedOut),
        }
    }
}

impl Drop for LoopbackInterface {
    fn drop(&mut self) {
        self.receiver.get_mut().close();
        // A newer interface may have taken the address over
        self.hosts
            .remove_if(&self.address, |_, sender| sender.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
    const B: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);

    fn packet(source: Ipv4Address, destination: Ipv4Address, data: &[u8]) -> Packet {
        Packet {
            source,
            destination,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn routes_by_destination() {
        let network = Loopback::new();
        let a = network.attach(A);
        let b = network.attach(B);
        assert_eq!(network.hosts(), 2);

        assert_eq!(a.send(packet(A, B, b"to b")).await, Ok(4));
        let received = b.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(received, packet(A, B, b"to b"));
        assert_eq!(
            a.receive(Duration::from_millis(10)).await,
            Err(TransportError::TimedOut)
        );
    }

    #[tokio::test]
    async fn rejects_unknown_and_oversized() {
        let network = Loopback::new();
        let a = network.attach(A);
        assert_eq!(
            a.send(packet(A, B, b"nobody")).await,
            Err(TransportError::Unreachable(B))
        );

        let b = network.attach(B);
        let huge = vec![0; MAX_IP_PAYLOAD as usize + 1];
        assert_eq!(
            a.send(packet(A, B, &huge)).await,
            Err(TransportError::TooLarge(huge.len()))
        );
        drop(b);
        assert_eq!(network.hosts(), 1);
        assert_eq!(
            a.send(packet(A, B, b"gone")).await,
            Err(TransportError::Unreachable(B))
        );
    }

    #[tokio::test]
    async fn reattaching_takes_over() {
        let network = Loopback::new();
        let a = network.attach(A);
        let old = network.attach(B);
        let new = network.attach(B);
        drop(old);
        a.send(packet(A, B, b"hi")).await.unwrap();
        assert!(new.receive(Duration::from_millis(100)).await.is_ok());
    }
}
