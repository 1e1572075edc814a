use super::{
    segment::Segment,
    socket::SocketError,
    tcb::{ConnectError, ReceiveError, State, Tcb, TimerCommand, TimerKind},
};
use crate::{
    protocols::utility::Endpoint,
    transport::{Packet, Transport},
};
use futures::StreamExt;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::sync::{mpsc::UnboundedReceiver, oneshot, watch};
use tokio_util::time::{delay_queue::Key, DelayQueue};
use tracing::{debug, trace, warn};

pub(super) type Reply<T> = oneshot::Sender<Result<T, SocketError>>;

/// Everything the session task reacts to besides its own timers
pub(super) enum Instruction {
    /// A segment decoded by the segment receiver
    Incoming(Segment),
    Connect {
        remote: Endpoint,
        reply: Reply<()>,
    },
    Accept {
        reply: Reply<Endpoint>,
    },
    Write {
        data: Vec<u8>,
        reply: Reply<usize>,
    },
    Read {
        max: usize,
        reply: Reply<Vec<u8>>,
    },
    Close {
        reply: Reply<()>,
    },
    Stop,
}

struct PendingWrite {
    /// Stream offset whose acknowledgment completes the write
    target: u64,
    len: usize,
    reply: Reply<usize>,
}

/// The task owning one connection's [`Tcb`]. User calls, arriving segments
/// and expired timers are applied one at a time, after which the session
/// sends what the TCB produced and answers the calls that are now settled.
pub(super) struct TcpSession {
    tcb: Tcb,
    transport: Arc<dyn Transport>,
    timers: DelayQueue<TimerKind>,
    timer_keys: HashMap<TimerKind, Key>,
    state: watch::Sender<State>,
    pending_connect: Option<Reply<()>>,
    pending_accept: Option<Reply<Endpoint>>,
    pending_close: Option<Reply<()>>,
    pending_writes: VecDeque<PendingWrite>,
    pending_reads: VecDeque<(usize, Reply<Vec<u8>>)>,
}

impl TcpSession {
    pub fn new(tcb: Tcb, transport: Arc<dyn Transport>, state: watch::Sender<State>) -> Self {
        Self {
            tcb,
            transport,
            timers: DelayQueue::new(),
            timer_keys: HashMap::new(),
            state,
            pending_connect: None,
            pending_accept: None,
            pending_close: None,
            pending_writes: VecDeque::new(),
            pending_reads: VecDeque::new(),
        }
    }

    pub async fn run(mut self, mut instructions: UnboundedReceiver<Instruction>) {
        loop {
            tokio::select! {
                instruction = instructions.recv() => match instruction {
                    Some(Instruction::Stop) | None => break,
                    Some(instruction) => self.handle_instruction(instruction),
                },
                Some(expired) = self.timers.next(), if !self.timers.is_empty() => {
                    let kind = expired.into_inner();
                    self.timer_keys.remove(&kind);
                    trace!(?kind, "Timer expired");
                    match kind {
                        TimerKind::Retransmit(id) => self.tcb.retransmission_timeout(id),
                        TimerKind::TimeWait => self.tcb.time_wait_timeout(),
                    }
                }
            }
            self.settle().await;
        }
        debug!(state = %self.tcb.state(), "Session stopped");
    }

    fn handle_instruction(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::Incoming(segment) => self.tcb.segment_arrives(segment),

            Instruction::Connect { reply, .. } if waiting(&self.pending_connect) => {
                respond(reply, Err(SocketError::InProgress))
            }
            Instruction::Accept { reply } if waiting(&self.pending_accept) => {
                respond(reply, Err(SocketError::InProgress))
            }
            Instruction::Close { reply } if waiting(&self.pending_close) => {
                respond(reply, Err(SocketError::InProgress))
            }

            Instruction::Connect { remote, reply } => match self.tcb.connect(remote) {
                Ok(()) => self.pending_connect = Some(reply),
                Err(e) => respond(reply, Err(e.into())),
            },

            Instruction::Accept { reply } => match self.tcb.state() {
                State::Closed => match self.tcb.listen() {
                    Ok(()) => self.pending_accept = Some(reply),
                    Err(e) => respond(reply, Err(e.into())),
                },
                State::Listen | State::SynReceived => self.pending_accept = Some(reply),
                state => respond(reply, Err(ConnectError::InvalidState(state).into())),
            },

            Instruction::Write { data, reply } => match self.tcb.send(&data) {
                Ok(target) => self.pending_writes.push_back(PendingWrite {
                    target,
                    len: data.len(),
                    reply,
                }),
                Err(e) => respond(reply, Err(e.into())),
            },

            Instruction::Read { max, reply } => self.pending_reads.push_back((max, reply)),

            Instruction::Close { reply } => match self.tcb.close() {
                Ok(()) => self.pending_close = Some(reply),
                Err(e) => respond(reply, Err(e.into())),
            },

            Instruction::Stop => {}
        }
    }

    /// Carries out what the last step asked for and answers settled calls.
    async fn settle(&mut self) {
        for segment in self.tcb.segments() {
            let packet = Packet {
                source: segment.source,
                destination: segment.destination,
                data: segment.encode(),
            };
            // Lost sends are recovered by retransmission
            if let Err(e) = self.transport.send(packet).await {
                warn!("Failed to send segment: {}", e);
            }
        }

        for command in self.tcb.timers() {
            self.apply_timer(command);
        }

        for state in self.tcb.transitions() {
            match state {
                State::Established => {
                    if let Some(reply) = self.pending_connect.take() {
                        respond(reply, Ok(()));
                    }
                    if let Some(reply) = self.pending_accept.take() {
                        let remote = self.tcb.remote().ok_or(SocketError::Aborted);
                        respond(reply, remote);
                    }
                }
                State::Closed => {
                    if let Some(reply) = self.pending_connect.take() {
                        respond(reply, Err(SocketError::Refused));
                    }
                    if let Some(reply) = self.pending_accept.take() {
                        respond(reply, Err(SocketError::Aborted));
                    }
                }
                _ => {}
            }
            self.state.send_replace(state);
        }

        self.settle_writes();
        self.settle_reads();

        // An aborted connection counts as closed
        if self.tcb.close_complete() {
            if let Some(reply) = self.pending_close.take() {
                respond(reply, Ok(()));
            }
        }
    }

    fn settle_writes(&mut self) {
        let acked = self.tcb.acked_bytes();
        let failed =
            self.tcb.is_aborted() || matches!(self.tcb.state(), State::Closed | State::Listen);
        while let Some(write) = self.pending_writes.front() {
            if acked >= write.target {
                let Some(write) = self.pending_writes.pop_front() else { break };
                respond(write.reply, Ok(write.len));
            } else if failed {
                let Some(write) = self.pending_writes.pop_front() else { break };
                respond(write.reply, Err(SocketError::Aborted));
            } else {
                break;
            }
        }
    }

    fn settle_reads(&mut self) {
        while let Some((max, reply)) = self.pending_reads.front() {
            if reply.is_closed() {
                self.pending_reads.pop_front();
                continue;
            }
            let result = match self.tcb.receive(*max) {
                Err(ReceiveError::WouldBlock) => break,
                result => result,
            };
            if let Some((_, reply)) = self.pending_reads.pop_front() {
                respond(reply, result.map_err(SocketError::from));
            }
        }
    }

    fn apply_timer(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Start(kind, duration) => match self.timer_keys.get(&kind) {
                Some(key) => self.timers.reset(key, duration),
                None => {
                    let key = self.timers.insert(kind, duration);
                    self.timer_keys.insert(kind, key);
                }
            },
            TimerCommand::Cancel(kind) => {
                if let Some(key) = self.timer_keys.remove(&kind) {
                    self.timers.remove(&key);
                }
            }
        }
    }
}

/// Whether a caller is still waiting on the reply
fn waiting<T>(pending: &Option<Reply<T>>) -> bool {
    pending.as_ref().map_or(false, |reply| !reply.is_closed())
}

fn respond<T>(reply: Reply<T>, result: Result<T, SocketError>) {
    if reply.send(result).is_err() {
        trace!("Caller stopped waiting for a reply");
    }
}
