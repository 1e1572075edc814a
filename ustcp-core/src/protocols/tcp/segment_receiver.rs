use super::{segment::Segment, tcp_session::Instruction};
use crate::transport::{Transport, TransportError};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

/// Pulls packets off the transport and hands them to the session as
/// segments. Runs until the session goes away or the transport closes.
pub(super) async fn run(
    transport: Arc<dyn Transport>,
    session: UnboundedSender<Instruction>,
    poll_timeout: Duration,
) {
    while !session.is_closed() {
        let packet = match transport.receive(poll_timeout).await {
            Ok(packet) => packet,
            Err(TransportError::TimedOut) => continue,
            Err(TransportError::Closed) => {
                debug!("Transport closed, segment receiver stopping");
                return;
            }
            Err(e) => {
                warn!("Receive failed: {}", e);
                continue;
            }
        };
        match Segment::decode(&packet.data, packet.source, packet.destination) {
            Ok(segment) => {
                if session.send(Instruction::Incoming(segment)).is_err() {
                    break;
                }
            }
            Err(e) => trace!("Discarding undecodable packet: {}", e),
        }
    }
    debug!("Segment receiver stopped");
}
