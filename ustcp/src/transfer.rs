//! A client sending a payload to a server across two hosts on one in-memory
//! network.

use rand::{rngs::SmallRng, RngCore, SeedableRng};
use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};
use thiserror::Error as ThisError;
use tracing::info;
use ustcp_core::{
    transport::{Faulty, Loopback},
    Ipv4Address, SocketError, State, Tcp, TcpConfig,
};

pub const CLIENT_ADDRESS: Ipv4Address = Ipv4Address::new([192, 168, 0, 2]);
pub const SERVER_ADDRESS: Ipv4Address = Ipv4Address::new([192, 168, 0, 1]);
pub const SERVER_PORT: u16 = 2048;

/// What to send and how badly the network treats it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferOptions {
    pub bytes: usize,
    /// Chance of losing each packet in either direction
    pub loss_rate: f64,
    /// One-way delay in either direction
    pub latency: Duration,
    pub seed: u64,
    pub config: TcpConfig,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            bytes: 100_000,
            loss_rate: 0.0,
            latency: Duration::ZERO,
            seed: 0xBAD5EED,
            config: TcpConfig::default(),
        }
    }
}

/// The outcome of a successful transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReport {
    pub bytes: usize,
    /// From the start of the handshake until the server has everything
    pub transfer_time: Duration,
    /// Until both sides reached CLOSED
    pub total_time: Duration,
}

impl Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.transfer_time.as_secs_f64();
        let rate = if seconds > 0.0 {
            self.bytes as f64 / seconds / 1024.0
        } else {
            f64::INFINITY
        };
        write!(
            f,
            "Transferred {} bytes in {:.3}s ({:.1} KiB/s), both sides closed after {:.3}s",
            self.bytes,
            seconds,
            rate,
            self.total_time.as_secs_f64()
        )
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum TransferError {
    #[error("{0}")]
    Socket(#[from] SocketError),
    #[error("The server received {received} of {expected} bytes")]
    Short { expected: usize, received: usize },
    #[error("The payload differs at byte {0}")]
    Corrupted(usize),
}

/// Runs the transfer: the server accepts and reads until the end of the
/// stream, the client connects, writes the payload and closes. Succeeds once
/// the payload arrived intact and both sides are CLOSED.
pub async fn run_transfer(options: TransferOptions) -> Result<TransferReport, TransferError> {
    let network = Loopback::new();
    let client_tcp = Tcp::with_config(
        Faulty::new(network.attach(CLIENT_ADDRESS))
            .with_seed(options.seed)
            .with_loss_rate(options.loss_rate)
            .with_latency(options.latency),
        options.config,
    );
    let server_tcp = Tcp::with_config(
        Faulty::new(network.attach(SERVER_ADDRESS))
            .with_seed(options.seed.wrapping_add(1))
            .with_loss_rate(options.loss_rate)
            .with_latency(options.latency),
        options.config,
    );
    let server = server_tcp.server_socket(SERVER_PORT);
    let client = client_tcp.socket();

    let mut payload = vec![0u8; options.bytes];
    SmallRng::seed_from_u64(options.seed).fill_bytes(&mut payload);

    let start = Instant::now();
    let receiving = async {
        let remote = server.accept().await?;
        info!(%remote, "Server accepted a connection");
        let mut received = vec![0u8; options.bytes];
        let len = server.read_full(&mut received).await?;
        received.truncate(len);
        let elapsed = start.elapsed();
        let mut rest = [0u8; 1024];
        loop {
            match server.read(&mut rest).await? {
                0 => break,
                n => received.extend_from_slice(&rest[..n]),
            }
        }
        server.close().await?;
        Ok::<_, TransferError>((received, elapsed))
    };
    let sending = async {
        client.connect(SERVER_ADDRESS, SERVER_PORT).await?;
        info!(bytes = payload.len(), "Client connected");
        client.write(&payload).await?;
        client.close().await?;
        Ok::<_, TransferError>(())
    };
    let (received, sent) = tokio::join!(receiving, sending);
    sent?;
    let (received, transfer_time) = received?;

    if let Some(offset) = received
        .iter()
        .zip(&payload)
        .position(|(received, sent)| received != sent)
    {
        return Err(TransferError::Corrupted(offset));
    }
    if received.len() != payload.len() {
        return Err(TransferError::Short {
            expected: payload.len(),
            received: received.len(),
        });
    }

    client.wait_for(&[State::Closed]).await?;
    server.wait_for(&[State::Closed]).await?;
    let report = TransferReport {
        bytes: payload.len(),
        transfer_time,
        total_time: start.elapsed(),
    };
    info!(%report, "Transfer complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn options(bytes: usize) -> TransferOptions {
        TransferOptions {
            bytes,
            config: TcpConfig::default()
                .with_retransmit_timeout(Duration::from_millis(50))
                .with_time_wait(Duration::from_millis(100))
                .with_receive_timeout(Duration::from_millis(10)),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    #[traced_test]
    async fn clean_transfer() {
        let report = run_transfer(options(50_000)).await.unwrap();
        assert_eq!(report.bytes, 50_000);
        assert!(report.total_time >= report.transfer_time);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_transfer() {
        let report = run_transfer(options(0)).await.unwrap();
        assert_eq!(report.bytes, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lossy_transfer() {
        let options = TransferOptions {
            loss_rate: 0.1,
            latency: Duration::from_millis(5),
            ..options(30_000)
        };
        let report = run_transfer(options).await.unwrap();
        assert_eq!(report.bytes, 30_000);
    }

    #[test]
    fn report_mentions_size() {
        let report = TransferReport {
            bytes: 2048,
            transfer_time: Duration::from_secs(2),
            total_time: Duration::from_secs(3),
        };
        assert_eq!(
            report.to_string(),
            "Transferred 2048 bytes in 2.000s (1.0 KiB/s), both sides closed after 3.000s"
        );
    }
}
