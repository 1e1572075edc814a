//! Tests on moving data across connections
mod common;

use common::*;
use std::time::Duration;
use tracing_test::traced_test;
use ustcp_core::{
    protocols::tcp::{CloseError, ReceiveError, SendError},
    transport::SegmentKind,
    SocketError, State,
};

#[tokio::test(flavor = "multi_thread")]
async fn exchanges_messages() -> anyhow::Result<()> {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;

    assert_eq!(within(client.write(b"ping")).await?, 4);
    let mut buf = [0u8; 16];
    let n = within(server.read(&mut buf)).await?;
    assert_eq!(&buf[..n], b"ping");

    assert_eq!(within(server.write(b"pong")).await?, 4);
    let n = within(client.read(&mut buf)).await?;
    assert_eq!(&buf[..n], b"pong");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn keeps_messages_in_order() {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;

    let messages: [&[u8]; 3] = [b"first ", b"second ", b"third"];
    for message in messages {
        within(client.write(message)).await.unwrap();
    }
    let mut buf = [0u8; 18];
    assert_eq!(within(server.read_full(&mut buf)).await, Ok(18));
    assert_eq!(&buf, b"first second third");
}

#[tokio::test(flavor = "multi_thread")]
async fn segmentizes_large_writes() {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;

    let data = pattern(3 * 8152 + 1000);
    let reader = async {
        let mut received = vec![0u8; data.len()];
        let n = server.read_full(&mut received).await.unwrap();
        received.truncate(n);
        received
    };
    let (written, received) = within(async { tokio::join!(client.write(&data), reader) }).await;
    assert_eq!(written, Ok(data.len()));
    assert_eq!(received, data);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn retransmits_corrupted_data() {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;
    hosts.client.corrupt_outgoing(SegmentKind::Data, 1);

    let data = pattern(500);
    assert_eq!(within(client.write(&data)).await, Ok(data.len()));
    let mut received = vec![0u8; data.len()];
    assert_eq!(within(server.read_full(&mut received)).await, Ok(data.len()));
    assert_eq!(received, data);
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_random_loss() {
    let config = config()
        .with_retransmit_timeout(Duration::from_millis(50))
        .with_max_retransmits(10);
    let hosts = Hosts::new(config);
    let (client, server) = within(hosts.connected()).await;
    hosts.client.set_loss_rate(0.2);
    hosts.server.set_loss_rate(0.2);

    let data = pattern(4 * 8152);
    let reader = async {
        let mut received = vec![0u8; data.len()];
        let n = server.read_full(&mut received).await.unwrap();
        received.truncate(n);
        received
    };
    let (written, received) = within(async { tokio::join!(client.write(&data), reader) }).await;
    assert_eq!(written, Ok(data.len()));
    assert_eq!(received, data);
}

#[tokio::test(flavor = "multi_thread")]
async fn half_closed_connection_still_carries_data() {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;

    within(server.close()).await.unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(within(client.read(&mut buf)).await, Ok(0));
    assert_eq!(client.state(), State::CloseWait);

    within(client.write(b"late")).await.unwrap();
    let n = within(server.read(&mut buf)).await.unwrap();
    assert_eq!(&buf[..n], b"late");
    within(client.close()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_calls_without_connection() {
    let hosts = Hosts::new(config());
    let client = hosts.client_socket();
    let mut buf = [0u8; 4];
    assert_eq!(
        client.write(b"data").await,
        Err(SocketError::Send(SendError::NotConnected))
    );
    assert_eq!(
        client.read(&mut buf).await,
        Err(SocketError::Receive(ReceiveError::NotConnected))
    );
    assert_eq!(
        client.close().await,
        Err(SocketError::Close(CloseError::NotConnected))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_writes_after_close() {
    let hosts = Hosts::new(config());
    let (client, _server) = within(hosts.connected()).await;
    within(client.close()).await.unwrap();
    assert_eq!(
        client.write(b"too late").await,
        Err(SocketError::Send(SendError::Closing))
    );
}
