use super::{Packet, Transport, TransportError, MAX_IP_PAYLOAD};
use crate::protocols::{ipv4_address::Ipv4Address, tcp::tcp_parsing::TcpHeader};
use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Passed as a rule count to keep a rule in force forever
pub const ALWAYS: usize = usize::MAX;

/// Which way a packet travels through a [`Faulty`] transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// The kind of TCP segment a packet carries, as far as fault rules care
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Syn,
    SynAck,
    /// A segment with nothing but an acknowledgment
    Ack,
    Fin,
    /// A segment carrying text
    Data,
    /// Matches every segment
    Any,
}

impl SegmentKind {
    fn of(data: &[u8]) -> Option<Self> {
        let header = TcpHeader::from_bytes(data).ok()?;
        let kind = if header.ctl.syn() && header.ctl.ack() {
            Self::SynAck
        } else if header.ctl.syn() {
            Self::Syn
        } else if header.ctl.fin() {
            Self::Fin
        } else if data.len() > header.bytes() {
            Self::Data
        } else {
            Self::Ack
        };
        Some(kind)
    }

    fn matches(self, kind: SegmentKind) -> bool {
        self == Self::Any || self == kind
    }
}

/// What happens to a packet a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// The packet disappears
    Drop,
    /// One bit of the packet is flipped, which breaks its checksum
    Corrupt,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    direction: Direction,
    kind: SegmentKind,
    fault: Fault,
    remaining: usize,
}

/// Wraps a transport and damages the traffic passing through it: packets
/// matching a rule are dropped or corrupted, outgoing packets are lost at a
/// random rate and are delivered after a fixed latency.
pub struct Faulty<T> {
    inner: Arc<T>,
    rules: Mutex<Vec<Rule>>,
    latency: Mutex<Duration>,
    loss_rate: Mutex<f64>,
    rng: Mutex<SmallRng>,
}

impl<T: Transport> Faulty<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
            rules: Mutex::new(vec![]),
            latency: Mutex::new(Duration::ZERO),
            loss_rate: Mutex::new(0.0),
            rng: Mutex::new(SmallRng::seed_from_u64(0xBAD5EED)),
        }
    }

    /// Seeds the generator deciding random losses
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap() = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn with_loss_rate(self, rate: f64) -> Self {
        self.set_loss_rate(rate);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Sets the chance of losing each outgoing packet, clamped to `[0, 1]`
    pub fn set_loss_rate(&self, rate: f64) {
        *self.loss_rate.lock().unwrap() = rate.clamp(0.0, 1.0);
    }

    /// Sets the one-way delay for outgoing packets
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Applies `fault` to the next `times` packets of the given kind going in
    /// the given direction. Rules are tried in the order they were added.
    pub fn add_rule(&self, direction: Direction, kind: SegmentKind, fault: Fault, times: usize) {
        self.rules.lock().unwrap().push(Rule {
            direction,
            kind,
            fault,
            remaining: times,
        });
    }

    pub fn drop_outgoing(&self, kind: SegmentKind, times: usize) {
        self.add_rule(Direction::Outgoing, kind, Fault::Drop, times);
    }

    pub fn corrupt_outgoing(&self, kind: SegmentKind, times: usize) {
        self.add_rule(Direction::Outgoing, kind, Fault::Corrupt, times);
    }

    pub fn drop_incoming(&self, kind: SegmentKind, times: usize) {
        self.add_rule(Direction::Incoming, kind, Fault::Drop, times);
    }

    pub fn corrupt_incoming(&self, kind: SegmentKind, times: usize) {
        self.add_rule(Direction::Incoming, kind, Fault::Corrupt, times);
    }

    /// Removes every rule, the loss rate and the latency
    pub fn reset(&self) {
        self.rules.lock().unwrap().clear();
        self.set_loss_rate(0.0);
        self.set_latency(Duration::ZERO);
    }

    fn fault_for(&self, direction: Direction, data: &[u8]) -> Option<Fault> {
        let kind = SegmentKind::of(data)?;
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|rule| {
            rule.remaining > 0 && rule.direction == direction && rule.kind.matches(kind)
        })?;
        if rule.remaining != ALWAYS {
            rule.remaining -= 1;
        }
        debug!(?direction, ?kind, fault = ?rule.fault, "Injecting fault");
        Some(rule.fault)
    }

    fn lose(&self) -> bool {
        let rate = *self.loss_rate.lock().unwrap();
        rate > 0.0 && self.rng.lock().unwrap().gen_bool(rate)
    }
}

/// Flips one bit: the first text octet if there is text, the window field
/// otherwise.
fn corrupt(data: &mut [u8]) {
    let position = match TcpHeader::from_bytes(data) {
        Ok(header) if data.len() > header.bytes() => header.bytes(),
        _ => 14,
    };
    if let Some(octet) = data.get_mut(position) {
        *octet ^= 0x01;
    }
}

#[async_trait]
impl<T: Transport> Transport for Faulty<T> {
    fn local_address(&self) -> Ipv4Address {
        self.inner.local_address()
    }

    async fn send(&self, mut packet: Packet) -> Result<usize, TransportError> {
        let len = packet.data.len();
        if len > MAX_IP_PAYLOAD as usize {
            return Err(TransportError::TooLarge(len));
        }
        match self.fault_for(Direction::Outgoing, &packet.data) {
            Some(Fault::Drop) => return Ok(len),
            Some(Fault::Corrupt) => corrupt(&mut packet.data),
            None => {}
        }
        if self.lose() {
            debug!("Losing outgoing packet");
            return Ok(len);
        }

        let latency = *self.latency.lock().unwrap();
        if latency.is_zero() {
            return self.inner.send(packet).await;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if let Err(e) = inner.send(packet).await {
                warn!("Delayed send failed: {}", e);
            }
        });
        Ok(len)
    }

    async fn receive(&self, timeout: Duration) -> Result<Packet, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let mut packet = self.inner.receive(remaining).await?;
            match self.fault_for(Direction::Incoming, &packet.data) {
                Some(Fault::Drop) => continue,
                Some(Fault::Corrupt) => corrupt(&mut packet.data),
                None => {}
            }
            return Ok(packet);
        }
    }
}
