//! The transmission control block: the complete state of one connection and
//! the RFC 793 event processing that acts on it.
//!
//! A [`Tcb`] performs no I/O and keeps no clock. Whatever it wants done is
//! recorded for its owner to collect: segments to put on the wire
//! ([`Tcb::segments`]), timers to start or cancel ([`Tcb::timers`]) and the
//! states it passed through ([`Tcb::transitions`]). Expired timers are fed
//! back through [`Tcb::retransmission_timeout`] and
//! [`Tcb::time_wait_timeout`].

mod modular_cmp;
mod receive_sequence_space;
mod retransmit;
mod send_sequence_space;
mod state;

pub use modular_cmp::{in_window, is_acked};
pub use retransmit::{RetransmitId, TimerCommand, TimerKind};
pub use state::{Event, State};

use super::{segment::Segment, tcp_parsing::TcpHeaderBuilder, TcpConfig};
use crate::protocols::utility::Endpoint;
use receive_sequence_space::ReceiveSequenceSpace;
use retransmit::Retransmissions;
use send_sequence_space::SendSequenceSpace;
use std::{
    collections::VecDeque,
    fmt::{self, Display},
    sync::OnceLock,
    time::Instant,
};
use thiserror::Error as ThisError;
use tracing::{debug, error, trace, warn};

/// Which side of the connection a socket was created for. Only the recovery
/// from a failed handshake depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Picks an initial send sequence number from a monotonic clock, kept below
/// `i32::MAX`.
pub fn initial_sequence_number() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    (start.elapsed().as_nanos() % i32::MAX as u128) as u32
}

#[derive(Debug)]
pub struct Tcb {
    local: Endpoint,
    remote: Option<Endpoint>,
    role: Role,
    state: State,
    snd: SendSequenceSpace,
    rcv: ReceiveSequenceSpace,
    /// Sequence number of our FIN, once sent
    fin_una: Option<u32>,
    /// The remote FIN was received in sequence
    fin_received: bool,
    /// The user closed and a FIN goes out once the transmission queue drains
    close_requested: bool,
    /// The connection died from running out of retransmissions
    aborted: bool,
    /// Octets written by the user but not yet put into segments
    transmit: VecDeque<u8>,
    /// Octets received but not yet read by the user
    process: VecDeque<u8>,
    /// Stream offsets of octets accepted from the user, put into segments and
    /// acknowledged by the remote TCP
    queued: u64,
    sent: u64,
    acked: u64,
    retransmissions: Retransmissions,
    outgoing: Vec<Segment>,
    timers: Vec<TimerCommand>,
    transitions: Vec<State>,
    config: TcpConfig,
}

impl Tcb {
    /// Creates a connection in the CLOSED state bound to `local`.
    pub fn new(local: Endpoint, role: Role, config: TcpConfig) -> Self {
        Self {
            local,
            remote: None,
            role,
            state: State::Closed,
            snd: SendSequenceSpace {
                iss: initial_sequence_number(),
                ..Default::default()
            },
            rcv: ReceiveSequenceSpace::new(config.max_segment_size),
            fin_una: None,
            fin_received: false,
            close_requested: false,
            aborted: false,
            transmit: VecDeque::new(),
            process: VecDeque::new(),
            queued: 0,
            sent: 0,
            acked: 0,
            retransmissions: Retransmissions::default(),
            outgoing: vec![],
            timers: vec![],
            transitions: vec![],
            config,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn remote(&self) -> Option<Endpoint> {
        self.remote
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Stream offset up to which the remote TCP acknowledged our data
    pub fn acked_bytes(&self) -> u64 {
        self.acked
    }

    /// Whether a close issued by the user has gone as far as it will: our FIN
    /// is acknowledged or the connection is gone.
    pub fn close_complete(&self) -> bool {
        matches!(
            self.state,
            State::FinWait2 | State::TimeWait | State::Closed
        )
    }

    /// Takes the segments waiting to be sent
    pub fn segments(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.outgoing)
    }

    /// Takes the pending timer commands
    pub fn timers(&mut self) -> Vec<TimerCommand> {
        std::mem::take(&mut self.timers)
    }

    /// Takes the states entered since the last call, oldest first
    pub fn transitions(&mut self) -> Vec<State> {
        std::mem::take(&mut self.transitions)
    }

    /// Actively opens a connection to `remote` by sending a SYN.
    pub fn connect(&mut self, remote: Endpoint) -> Result<(), ConnectError> {
        if self.state != State::Closed {
            Err(ConnectError::InvalidState(self.state))?
        }
        if self.remote.is_some() {
            Err(ConnectError::ForeignSocketSet)?
        }
        if remote.is_unspecified() {
            Err(ConnectError::Unspecified(remote))?
        }

        self.remote = Some(remote);
        self.snd = SendSequenceSpace::synchronizing(self.snd.iss, 0);
        let syn = self.builder(self.snd.iss).syn();
        self.enqueue_retransmittable(syn, vec![], None);
        self.transition(Event::Connect);
        Ok(())
    }

    /// Passively opens the connection, waiting for a SYN from anyone.
    pub fn listen(&mut self) -> Result<(), ConnectError> {
        if self.state != State::Closed {
            Err(ConnectError::InvalidState(self.state))?
        }
        self.reset_connection();
        self.transition(Event::Listen);
        Ok(())
    }

    /// Queues `data` for sending. Returns the stream offset that must be
    /// acknowledged for all of `data` to have arrived.
    pub fn send(&mut self, data: &[u8]) -> Result<u64, SendError> {
        match self.state {
            State::Closed | State::Listen => Err(SendError::NotConnected)?,
            _ if self.close_requested => Err(SendError::Closing)?,
            State::SynSent | State::SynReceived | State::Established | State::CloseWait => {}
            _ => Err(SendError::Closing)?,
        }
        self.transmit.extend(data);
        self.queued += data.len() as u64;
        self.flush_transmit();
        Ok(self.queued)
    }

    /// Takes up to `max` received octets. An empty result means the remote
    /// TCP closed its side and everything it sent was read.
    pub fn receive(&mut self, max: usize) -> Result<Vec<u8>, ReceiveError> {
        if !self.process.is_empty() {
            let len = max.min(self.process.len());
            return Ok(self.process.drain(..len).collect());
        }
        if self.aborted {
            Err(ReceiveError::Aborted)?
        }
        match self.state {
            _ if self.fin_received => Ok(vec![]),
            State::Closed | State::Listen => Err(ReceiveError::NotConnected),
            _ => Err(ReceiveError::WouldBlock),
        }
    }

    /// Closes our side of the connection.
    pub fn close(&mut self) -> Result<(), CloseError> {
        match self.state {
            State::Closed => Err(CloseError::NotConnected),
            State::Listen | State::SynSent => {
                self.transition(Event::Close);
                Ok(())
            }
            State::SynReceived | State::Established | State::CloseWait => {
                self.close_requested = true;
                self.flush_transmit();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Processes an arriving segment.
    pub fn segment_arrives(&mut self, seg: Segment) {
        if !seg.has_valid_checksum() {
            warn!(header = ?seg.header, "Dropping segment with a bad checksum");
            return;
        }
        if seg.destination_endpoint() != self.local {
            trace!(destination = %seg.destination_endpoint(), "Segment is not for us");
            return;
        }
        if let Some(remote) = self.remote {
            if seg.source_endpoint() != remote {
                trace!(source = %seg.source_endpoint(), "Segment is from a stranger");
                return;
            }
        }
        trace!(header = ?seg.header, len = seg.text.len(), state = %self.state, "Segment arrives");

        match self.state {
            State::Closed => trace!("No connection, dropping segment"),
            State::Listen => self.segment_arrives_listen(seg),
            State::SynSent => self.segment_arrives_syn_sent(seg),
            _ => self.segment_arrives_synchronized(seg),
        }
    }

    /// A retransmission timer ran out.
    pub fn retransmission_timeout(&mut self, id: RetransmitId) {
        let Some(mut entry) = self.retransmissions.remove(id) else {
            trace!(id, "Timer fired for a settled segment");
            return;
        };
        if is_acked(entry.segment.last_seq(), self.snd.una) {
            if let Some(end) = entry.stream_end {
                self.acked = self.acked.max(end);
            }
            return;
        }
        if entry.retries < self.config.max_retransmits {
            entry.retries += 1;
            debug!(
                id,
                seq = entry.segment.header.seq,
                retries = entry.retries,
                "Retransmitting"
            );
            self.outgoing.push(entry.segment.clone());
            self.retransmissions.restore(id, entry);
            self.timers.push(TimerCommand::Start(
                TimerKind::Retransmit(id),
                self.config.retransmit_timeout,
            ));
        } else {
            warn!(id, state = %self.state, "Out of retransmissions");
            self.retransmissions_exhausted();
        }
    }

    /// The TIME-WAIT timer ran out.
    pub fn time_wait_timeout(&mut self) {
        if self.state == State::TimeWait {
            self.transition(Event::TimeWaitTimeout);
        }
    }

    fn segment_arrives_listen(&mut self, seg: Segment) {
        let header = seg.header;
        if header.ctl.rst() {
            trace!("Ignoring RST in LISTEN");
            return;
        }
        if header.ctl.ack() {
            warn!("Unexpected ACK in LISTEN");
            return;
        }
        if !header.ctl.syn() {
            warn!("Expected a SYN in LISTEN");
            return;
        }

        self.remote = Some(seg.source_endpoint());
        self.rcv.irs = header.seq;
        self.rcv.nxt = header.seq.wrapping_add(1);
        self.snd = SendSequenceSpace::synchronizing(self.snd.iss, header.wnd);
        let syn_ack = self.builder(self.snd.iss).syn().ack(self.rcv.nxt);
        self.enqueue_retransmittable(syn_ack, vec![], None);
        self.transition(Event::RcvSyn);
    }

    fn segment_arrives_syn_sent(&mut self, seg: Segment) {
        let header = seg.header;
        if header.ctl.ack()
            && !in_window(
                self.snd.iss.wrapping_add(1),
                header.ack,
                self.snd.nxt.wrapping_add(1),
            )
        {
            warn!(ack = header.ack, "Unacceptable ACK in SYN-SENT");
            return;
        }
        if header.ctl.rst() {
            trace!("Ignoring RST in SYN-SENT");
            return;
        }
        if !header.ctl.syn() {
            warn!("Expected a SYN in SYN-SENT");
            return;
        }

        self.rcv.irs = header.seq;
        self.rcv.nxt = header.seq.wrapping_add(1);
        self.snd.wnd = header.wnd;
        if header.ctl.ack() {
            self.snd.una = header.ack;
            self.purge_acknowledged();
        }

        if is_acked(self.snd.iss, self.snd.una) {
            self.transition(Event::RcvSynAck);
            self.send_ack();
            self.flush_transmit();
        } else {
            // Simultaneous open. The SYN,ACK takes over from our plain SYN.
            for id in self.retransmissions.remove_seq(self.snd.iss) {
                self.timers
                    .push(TimerCommand::Cancel(TimerKind::Retransmit(id)));
            }
            let syn_ack = self.builder(self.snd.iss).syn().ack(self.rcv.nxt);
            self.enqueue_retransmittable(syn_ack, vec![], None);
            self.transition(Event::RcvSyn);
        }
    }

    fn segment_arrives_synchronized(&mut self, mut seg: Segment) {
        // In a simultaneous open the remote SYN,ACK repeats a SYN we already
        // have. Its ACK still counts.
        if self.state == State::SynReceived
            && seg.header.ctl.syn()
            && seg.header.ctl.ack()
            && seg.header.seq == self.rcv.irs
        {
            seg.header.ctl.set_syn(false);
            seg.header.seq = seg.header.seq.wrapping_add(1);
        }
        let header = seg.header;

        // Anything arriving in TIME-WAIT is a retransmitted FIN
        if self.state == State::TimeWait {
            self.timers.push(TimerCommand::Start(
                TimerKind::TimeWait,
                self.config.time_wait,
            ));
        }

        if !self.is_acceptable(&seg) {
            debug!(
                seq = header.seq,
                len = seg.seg_len(),
                rcv_nxt = self.rcv.nxt,
                "Unacceptable segment"
            );
            if !header.ctl.rst() {
                self.send_ack();
            }
            return;
        }
        if header.ctl.rst() {
            warn!("Ignoring RST, resets are not supported");
            return;
        }
        if header.ctl.syn() {
            warn!(state = %self.state, "Unexpected SYN");
            return;
        }
        if !header.ctl.ack() {
            warn!("Dropping segment without ACK");
            return;
        }
        if !self.process_ack(header.ack, header.wnd) {
            return;
        }

        let mut needs_ack = false;
        if !seg.text.is_empty() {
            needs_ack = true;
            if !self.process_text(&seg) {
                self.send_ack();
                return;
            }
        }

        if header.ctl.fin() {
            let fin_seq = header.seq.wrapping_add(seg.text.len() as u32);
            if fin_seq == self.rcv.nxt {
                self.rcv.nxt = self.rcv.nxt.wrapping_add(1);
                self.fin_received = true;
                if self.state.on(Event::RcvFin).is_some() {
                    self.transition(Event::RcvFin);
                }
            } else {
                debug!(fin_seq, rcv_nxt = self.rcv.nxt, "FIN out of sequence");
            }
            needs_ack = true;
        }

        if needs_ack {
            self.send_ack();
        }
    }

    /// Applies the ACK field of an acceptable segment. Returns whether the
    /// rest of the segment should be processed.
    fn process_ack(&mut self, ack: u32, wnd: u16) -> bool {
        let advances = in_window(
            self.snd.una.wrapping_add(1),
            ack,
            self.snd.nxt.wrapping_add(1),
        );

        if self.state == State::SynReceived {
            if !advances {
                warn!(ack, "Unacceptable ACK in SYN-RECEIVED");
                return false;
            }
            self.transition(Event::RcvAckOfSyn);
        }

        if advances {
            self.snd.una = ack;
            self.snd.wnd = wnd;
            self.purge_acknowledged();
        } else if is_acked(self.snd.nxt, ack) {
            warn!(ack, snd_nxt = self.snd.nxt, "ACK for data never sent");
            self.send_ack();
            return false;
        } else {
            trace!(ack, "Duplicate ACK");
        }

        let fin_acked = self
            .fin_una
            .map_or(false, |fin| is_acked(fin, self.snd.una));
        match self.state {
            State::FinWait1 if fin_acked => self.transition(Event::RcvAckOfFin),
            State::Closing | State::LastAck => {
                if fin_acked {
                    self.transition(Event::RcvAckOfFin);
                }
                return false;
            }
            _ => {}
        }

        self.flush_transmit();
        true
    }

    /// Delivers segment text to the processing queue. Returns false when the
    /// segment starts beyond RCV.NXT or did not fit the window, in which case
    /// nothing after the accepted text may be processed.
    fn process_text(&mut self, seg: &Segment) -> bool {
        if !self.state.accepts_text() {
            warn!(state = %self.state, "Ignoring text after the remote FIN");
            return true;
        }
        let seq = seg.header.seq;
        if in_window(self.rcv.nxt.wrapping_add(1), seq, self.rcv.end()) {
            debug!(seq, rcv_nxt = self.rcv.nxt, "Segment out of order, dropping text");
            return false;
        }

        let skip = self.rcv.nxt.wrapping_sub(seq) as usize;
        if skip >= seg.text.len() {
            return true;
        }
        let fresh = &seg.text[skip..];
        let fits = fresh.len().min(self.rcv.wnd as usize);
        self.process.extend(&fresh[..fits]);
        self.rcv.nxt = self.rcv.nxt.wrapping_add(fits as u32);
        trace!(len = fits, rcv_nxt = self.rcv.nxt, "Accepted text");
        fits == fresh.len()
    }

    fn is_acceptable(&self, seg: &Segment) -> bool {
        let (nxt, end) = (self.rcv.nxt, self.rcv.end());
        match (seg.seg_len(), self.rcv.wnd) {
            (0, 0) => seg.header.seq == nxt,
            (0, _) => in_window(nxt, seg.header.seq, end),
            (_, 0) => false,
            _ => in_window(nxt, seg.header.seq, end) || in_window(nxt, seg.last_seq(), end),
        }
    }

    /// Puts queued octets into segments as far as the send window allows and
    /// sends a FIN once everything is out and the user closed.
    fn flush_transmit(&mut self) {
        if !matches!(self.state, State::Established | State::CloseWait) {
            return;
        }
        while !self.transmit.is_empty() {
            let len = self
                .transmit
                .len()
                .min(self.config.max_payload())
                .min(self.snd.usable_window() as usize);
            if len == 0 {
                break;
            }
            let text: Vec<u8> = self.transmit.drain(..len).collect();
            self.sent += len as u64;
            let builder = self.builder(self.snd.nxt).ack(self.rcv.nxt).psh();
            self.snd.nxt = self.snd.nxt.wrapping_add(len as u32);
            self.enqueue_retransmittable(builder, text, Some(self.sent));
        }
        if self.close_requested && self.transmit.is_empty() && self.fin_una.is_none() {
            self.send_fin();
        }
    }

    fn send_fin(&mut self) {
        let fin = self.builder(self.snd.nxt).ack(self.rcv.nxt).fin();
        self.fin_una = Some(self.snd.nxt);
        self.snd.nxt = self.snd.nxt.wrapping_add(1);
        self.enqueue_retransmittable(fin, vec![], None);
        self.transition(Event::Close);
    }

    fn send_ack(&mut self) {
        let ack = self.builder(self.snd.nxt).ack(self.rcv.nxt);
        self.enqueue(ack, vec![]);
    }

    fn builder(&self, seq: u32) -> TcpHeaderBuilder {
        let remote_port = self.remote.map_or(0, |remote| remote.port);
        TcpHeaderBuilder::new(self.local.port, remote_port, seq).wnd(self.rcv.wnd)
    }

    fn enqueue(&mut self, builder: TcpHeaderBuilder, text: Vec<u8>) -> Option<Segment> {
        let Some(remote) = self.remote else {
            error!("Tried to send without a remote endpoint");
            return None;
        };
        let header = match builder.build(
            self.local.address,
            remote.address,
            text.iter().cloned(),
            text.len(),
        ) {
            Ok(header) => header,
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };
        let segment = Segment::new(header, text, self.local.address, remote.address);
        trace!(header = ?segment.header, len = segment.text.len(), "Sending");
        self.outgoing.push(segment.clone());
        Some(segment)
    }

    fn enqueue_retransmittable(
        &mut self,
        builder: TcpHeaderBuilder,
        text: Vec<u8>,
        stream_end: Option<u64>,
    ) {
        if let Some(segment) = self.enqueue(builder, text) {
            let id = self.retransmissions.insert(segment, stream_end);
            self.timers.push(TimerCommand::Start(
                TimerKind::Retransmit(id),
                self.config.retransmit_timeout,
            ));
        }
    }

    fn purge_acknowledged(&mut self) {
        for (id, entry) in self.retransmissions.acknowledge(self.snd.una) {
            self.timers
                .push(TimerCommand::Cancel(TimerKind::Retransmit(id)));
            if let Some(end) = entry.stream_end {
                self.acked = self.acked.max(end);
            }
        }
    }

    fn cancel_retransmissions(&mut self) {
        for id in self.retransmissions.clear() {
            self.timers
                .push(TimerCommand::Cancel(TimerKind::Retransmit(id)));
        }
    }

    fn retransmissions_exhausted(&mut self) {
        match self.state {
            State::SynReceived if self.role == Role::Server && !self.close_requested => {
                self.transition(Event::Relisten);
                self.reset_connection();
            }
            State::SynSent | State::SynReceived => self.transition(Event::Timeout),
            _ => {
                self.aborted = true;
                self.transmit.clear();
                self.transition(Event::Timeout);
            }
        }
    }

    /// Forgets the remote endpoint and everything learned from it.
    fn reset_connection(&mut self) {
        self.cancel_retransmissions();
        self.remote = None;
        self.snd = SendSequenceSpace {
            iss: initial_sequence_number(),
            ..Default::default()
        };
        self.rcv = ReceiveSequenceSpace::new(self.config.max_segment_size);
        self.fin_una = None;
        self.fin_received = false;
        self.close_requested = false;
        self.aborted = false;
        self.transmit.clear();
        self.process.clear();
        // Writes that never got through are abandoned
        self.queued = self.acked;
        self.sent = self.acked;
    }

    fn transition(&mut self, event: Event) {
        let Some(next) = self.state.on(event) else {
            error!(state = %self.state, ?event, "Undefined transition");
            return;
        };
        debug!(from = %self.state, to = %next, ?event, "State change");
        self.state = next;
        self.transitions.push(next);
        match next {
            State::TimeWait => {
                self.cancel_retransmissions();
                self.timers.push(TimerCommand::Start(
                    TimerKind::TimeWait,
                    self.config.time_wait,
                ));
            }
            State::Closed => {
                self.cancel_retransmissions();
                self.timers.push(TimerCommand::Cancel(TimerKind::TimeWait));
            }
            _ => {}
        }
    }
}

/// An error from opening a connection
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    #[error("The connection is in state {0} rather than CLOSED")]
    InvalidState(State),
    #[error("The foreign socket was already set")]
    ForeignSocketSet,
    #[error("Cannot connect to the unspecified endpoint {0}")]
    Unspecified(Endpoint),
}

/// An error from queueing data for sending
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("There is no connection to send on")]
    NotConnected,
    #[error("The connection is closing")]
    Closing,
}

/// An error from taking received data
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("There is no connection to receive on")]
    NotConnected,
    #[error("No data has arrived yet")]
    WouldBlock,
    #[error("The connection was aborted")]
    Aborted,
}

/// An error from closing a connection
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    #[error("There is no connection to close")]
    NotConnected,
}
