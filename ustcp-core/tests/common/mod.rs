#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};
use ustcp_core::{
    transport::{Faulty, Loopback, LoopbackInterface},
    Ipv4Address, Socket, Tcp, TcpConfig, Transport,
};

pub const CLIENT: Ipv4Address = Ipv4Address::new([10, 0, 0, 1]);
pub const SERVER: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);
pub const SERVER_PORT: u16 = 2048;

pub fn config() -> TcpConfig {
    TcpConfig::default()
        .with_retransmit_timeout(Duration::from_millis(100))
        .with_max_retransmits(5)
        .with_time_wait(Duration::from_millis(300))
        .with_receive_timeout(Duration::from_millis(20))
}

/// Two hosts on one loopback network, each behind a fault injector
pub struct Hosts {
    pub client: Arc<Faulty<LoopbackInterface>>,
    pub server: Arc<Faulty<LoopbackInterface>>,
    client_tcp: Tcp,
    server_tcp: Tcp,
}

impl Hosts {
    pub fn new(config: TcpConfig) -> Self {
        let network = Loopback::new();
        let client = Arc::new(Faulty::new(network.attach(CLIENT)));
        let server = Arc::new(Faulty::new(network.attach(SERVER)));
        Self {
            client_tcp: Tcp::from_shared(client.clone() as Arc<dyn Transport>, config),
            server_tcp: Tcp::from_shared(server.clone() as Arc<dyn Transport>, config),
            client,
            server,
        }
    }

    pub fn client_socket(&self) -> Socket {
        self.client_tcp.socket()
    }

    pub fn server_socket(&self) -> Socket {
        self.server_tcp.server_socket(SERVER_PORT)
    }

    /// Opens a client and a server socket and connects them
    pub async fn connected(&self) -> (Socket, Socket) {
        let client = self.client_socket();
        let server = self.server_socket();
        let (accepted, connected) =
            tokio::join!(server.accept(), client.connect(SERVER, SERVER_PORT));
        assert_eq!(accepted.unwrap(), client.local());
        connected.unwrap();
        (client, server)
    }
}

/// Fails the test rather than hanging when `future` never finishes
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Test data that makes misplaced octets show up
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
