//! Tests on opening connections
mod common;

use common::*;
use std::time::{Duration, Instant};
use tracing_test::traced_test;
use ustcp_core::{
    protocols::tcp::{ConnectError, CLIENT_PORT},
    transport::{SegmentKind, ALWAYS},
    Endpoint, Ipv4Address, SocketError, State,
};

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn three_way_handshake() {
    let hosts = Hosts::new(config());
    let (client, server) = within(hosts.connected()).await;
    assert_eq!(client.state(), State::Established);
    assert_eq!(server.state(), State::Established);
    assert_eq!(client.local(), Endpoint::new(CLIENT, CLIENT_PORT));
    assert_eq!(server.local(), Endpoint::new(SERVER, SERVER_PORT));
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_lost_syn() {
    let hosts = Hosts::new(config());
    hosts.client.drop_outgoing(SegmentKind::Syn, 1);
    let start = Instant::now();
    within(hosts.connected()).await;
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_lost_syn_ack() {
    let hosts = Hosts::new(config());
    hosts.server.drop_outgoing(SegmentKind::SynAck, 2);
    within(hosts.connected()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn survives_lost_handshake_ack() {
    let hosts = Hosts::new(config());
    hosts.client.drop_outgoing(SegmentKind::Ack, 1);
    let client = hosts.client_socket();
    let server = hosts.server_socket();
    let (accepted, connected) = within(async {
        tokio::join!(server.accept(), client.connect(SERVER, SERVER_PORT))
    })
    .await;
    connected.unwrap();
    assert_eq!(accepted.unwrap(), client.local());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn gives_up_when_every_syn_is_lost() {
    let hosts = Hosts::new(config());
    hosts.client.drop_outgoing(SegmentKind::Syn, ALWAYS);
    let client = hosts.client_socket();
    let server = hosts.server_socket();

    let result = within(async {
        tokio::select! {
            result = client.connect(SERVER, SERVER_PORT) => result,
            _ = server.accept() => panic!("server accepted a connection"),
        }
    })
    .await;
    assert_eq!(result, Err(SocketError::Refused));
    assert_eq!(client.state(), State::Closed);
    assert_eq!(server.state(), State::Listen);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_listens_again_after_failed_handshake() {
    let hosts = Hosts::new(config());
    hosts.server.drop_outgoing(SegmentKind::SynAck, ALWAYS);
    let server = hosts.server_socket();
    let client = hosts.client_socket();

    let result = within(async {
        tokio::select! {
            result = client.connect(SERVER, SERVER_PORT) => result,
            _ = server.accept() => panic!("server accepted a connection"),
        }
    })
    .await;
    assert_eq!(result, Err(SocketError::Refused));
    within(server.wait_for(&[State::Listen])).await.unwrap();

    drop(client);
    hosts.server.reset();
    let client = hosts.client_socket();
    within(client.connect(SERVER, SERVER_PORT)).await.unwrap();
    within(server.wait_for(&[State::Established]))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_second_connect() {
    let hosts = Hosts::new(config());
    let (client, _server) = within(hosts.connected()).await;
    assert_eq!(
        client.connect(SERVER, SERVER_PORT).await,
        Err(SocketError::Connect(ConnectError::InvalidState(
            State::Established
        )))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_unspecified_destination() {
    let hosts = Hosts::new(config());
    let client = hosts.client_socket();
    let result = client.connect(Ipv4Address::UNSPECIFIED, 80).await;
    assert!(matches!(result, Err(SocketError::Connect(_))));
    assert_eq!(client.state(), State::Closed);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn second_accept_waits_its_turn() {
    let hosts = Hosts::new(config());
    let client = hosts.client_socket();
    let server = hosts.server_socket();

    let first = server.accept();
    tokio::pin!(first);
    tokio::select! {
        _ = &mut first => panic!("accepted without a peer"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }
    assert_eq!(
        within(server.accept()).await,
        Err(SocketError::InProgress)
    );

    let (accepted, connected) = within(async {
        tokio::join!(first, client.connect(SERVER, SERVER_PORT))
    })
    .await;
    connected.unwrap();
    assert_eq!(accepted.unwrap(), client.local());
}
