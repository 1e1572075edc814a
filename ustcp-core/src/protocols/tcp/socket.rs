use super::{
    segment_receiver,
    tcb::{CloseError, ConnectError, ReceiveError, Role, SendError, State, Tcb},
    tcp_session::{Instruction, Reply, TcpSession},
    TcpConfig,
};
use crate::{
    protocols::{ipv4_address::Ipv4Address, utility::Endpoint},
    transport::Transport,
};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::{
    sync::{
        mpsc::{self, UnboundedSender},
        oneshot, watch,
    },
    task::JoinHandle,
};
use tracing::{info_span, Instrument};

/// One end of a TCP connection.
///
/// Every call is answered by the socket's session task, so a socket may be
/// shared between tasks. Dropping it stops the session and its segment
/// receiver without closing the connection.
pub struct Socket {
    local: Endpoint,
    instructions: UnboundedSender<Instruction>,
    state: watch::Receiver<State>,
    receiver: JoinHandle<()>,
}

impl Socket {
    pub(super) fn open(
        transport: Arc<dyn Transport>,
        local: Endpoint,
        role: Role,
        config: TcpConfig,
    ) -> Self {
        let (instructions, instructions_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(State::Closed);
        let span = info_span!("session", %role, %local);

        let session = TcpSession::new(Tcb::new(local, role, config), transport.clone(), state_tx);
        tokio::spawn(session.run(instructions_rx).instrument(span.clone()));
        let receiver = tokio::spawn(
            segment_receiver::run(transport, instructions.clone(), config.receive_timeout)
                .instrument(span),
        );

        Self {
            local,
            instructions,
            state,
            receiver,
        }
    }

    /// Opens a connection to `address:port`, resolving once it is
    /// established. Fails with [`SocketError::Refused`] when the handshake
    /// runs out of retransmissions.
    pub async fn connect(&self, address: Ipv4Address, port: u16) -> Result<(), SocketError> {
        let remote = Endpoint::new(address, port);
        self.request(|reply| Instruction::Connect { remote, reply })
            .await
    }

    /// Listens for a connection and resolves with the remote endpoint once
    /// one is established. A handshake that fails goes back to listening.
    pub async fn accept(&self) -> Result<Endpoint, SocketError> {
        self.request(|reply| Instruction::Accept { reply }).await
    }

    /// Reads received octets into `buf`, waiting until at least one is
    /// available. Returns 0 at the end of the stream, after the remote TCP
    /// closed its side.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let max = buf.len();
        let data = self.request(|reply| Instruction::Read { max, reply }).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    /// Reads until `buf` is full or the stream ends, returning the number of
    /// octets read.
    pub async fn read_full(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]).await? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Sends `data`, resolving once the remote TCP acknowledged all of it.
    pub async fn write(&self, data: &[u8]) -> Result<usize, SocketError> {
        let data = data.to_vec();
        self.request(|reply| Instruction::Write { data, reply })
            .await
    }

    /// Closes our side of the connection, resolving once our FIN is
    /// acknowledged. Data still queued is sent first.
    pub async fn close(&self) -> Result<(), SocketError> {
        self.request(|reply| Instruction::Close { reply }).await
    }

    /// The connection state as of the last step of the session
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Waits until the connection is in one of `states` and returns it.
    pub async fn wait_for(&self, states: &[State]) -> Result<State, SocketError> {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if states.contains(&current) {
                return Ok(current);
            }
            state.changed().await.map_err(|_| SocketError::Stopped)?;
        }
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    async fn request<T>(
        &self,
        instruction: impl FnOnce(Reply<T>) -> Instruction,
    ) -> Result<T, SocketError> {
        let (reply, response) = oneshot::channel();
        self.instructions
            .send(instruction(reply))
            .map_err(|_| SocketError::Stopped)?;
        response.await.map_err(|_| SocketError::Stopped)?
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // The session may already be gone
        let _ = self.instructions.send(Instruction::Stop);
        self.receiver.abort();
    }
}

/// An error returned by a [`Socket`] call
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    #[error("{0}")]
    Connect(#[from] ConnectError),
    #[error("{0}")]
    Send(#[from] SendError),
    #[error("{0}")]
    Receive(#[from] ReceiveError),
    #[error("{0}")]
    Close(#[from] CloseError),
    #[error("The remote host did not complete the handshake")]
    Refused,
    #[error("The connection was aborted")]
    Aborted,
    #[error("Another call of the same kind is still waiting")]
    InProgress,
    #[error("The session task has stopped")]
    Stopped,
}
