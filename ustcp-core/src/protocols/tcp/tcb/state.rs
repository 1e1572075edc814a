/// The state of a TCP connection as described in RFC 793 section 3.2. Every
/// change of state goes through [`State::on`], which encodes the diagram
/// below, restricted to the events this implementation knows about. RST is
/// never sent or honoured, so the `rcv RST` edge does not exist.
///
/// ```text
///                             +---------+ ---------\      active OPEN
///                             |  CLOSED |            \    -----------
///                             +---------+<---------\   \   create TCB
///                               |     ^              \   \  snd SYN
///                  passive OPEN |     |   CLOSE        \   \
///                  ------------ |     | ----------       \   \
///                   create TCB  |     | delete TCB         \   \
///                               V     |                      \   \
///           rcv RST (note 1)  +---------+            CLOSE    |    \
///        -------------------->|  LISTEN |          ---------- |     |
///       /                     +---------+          delete TCB |     |
///      /           rcv SYN      |     |     SEND              |     |
///     /           -----------   |     |    -------            |     V
/// +--------+      snd SYN,ACK  /       \   snd SYN          +--------+
/// |        |<-----------------           ------------------>|        |
/// |  SYN   |                    rcv SYN                     |  SYN   |
/// |  RCVD  |<-----------------------------------------------|  SENT  |
/// |        |                  snd SYN,ACK                   |        |
/// |        |------------------           -------------------|        |
/// +--------+   rcv ACK of SYN  \       /  rcv SYN,ACK       +--------+
///    |         --------------   |     |   -----------
///    |                x         |     |     snd ACK
///    |                          V     V
///    |  CLOSE                 +---------+
///    | -------                |  ESTAB  |
///    | snd FIN                +---------+
///    |                 CLOSE    |     |    rcv FIN
///    V                -------   |     |    -------
/// +---------+         snd FIN  /       \   snd ACK         +---------+
/// |  FIN    |<----------------          ------------------>|  CLOSE  |
/// | WAIT-1  |------------------                            |   WAIT  |
/// +---------+          rcv FIN  \                          +---------+
///   | rcv ACK of FIN   -------   |                          CLOSE  |
///   | --------------   snd ACK   |                         ------- |
///   V        x                   V                         snd FIN V
/// +---------+               +---------+                    +---------+
/// |FINWAIT-2|               | CLOSING |                    | LAST-ACK|
/// +---------+               +---------+                    +---------+
///   |              rcv ACK of FIN |                 rcv ACK of FIN |
///   |  rcv FIN     -------------- |    Timeout=2MSL -------------- |
///   |  -------            x       V    ------------        x       V
///    \ snd ACK              +---------+delete TCB          +---------+
///      -------------------->|TIME-WAIT|------------------->| CLOSED  |
///                           +---------+                    +---------+
/// ```
/// Figure 5: TCP Connection State Diagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum State {
    /// No connection exists.
    #[default]
    Closed,
    /// Waiting for a connection request from any remote TCP and port.
    Listen,
    /// Waiting for a matching connection request after having sent a connection
    /// request.
    SynSent,
    /// Waiting for a confirming connection request acknowledgment after having
    /// both received and sent a connection request.
    SynReceived,
    /// An open connection, data received can be delivered to the user. The
    /// normal state for the data transfer phase of the connection.
    Established,
    /// Waiting for a connection termination request from the remote TCP, or an
    /// acknowledgment of the connection termination request previously sent.
    FinWait1,
    /// Waiting for a connection termination request from the remote TCP.
    FinWait2,
    /// Waiting for a connection termination request from the local user.
    CloseWait,
    /// Waiting for a connection termination request acknowledgment from the
    /// remote TCP.
    Closing,
    /// Waiting for an acknowledgment of the connection termination request
    /// previously sent to the remote TCP (which includes an acknowledgment of
    /// its connection termination request).
    LastAck,
    /// Waiting for enough time to pass to be sure the remote TCP received the
    /// acknowledgment of its connection termination request.
    TimeWait,
}

/// Something that moves a connection from one state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// The user actively opened the connection and a SYN was sent
    Connect,
    /// The user passively opened the connection
    Listen,
    /// A SYN without an ACK arrived
    RcvSyn,
    /// A SYN acknowledging our own SYN arrived
    RcvSynAck,
    /// An ACK covering our SYN arrived
    RcvAckOfSyn,
    /// The user closed the connection, and a FIN was sent if one was due
    Close,
    /// The remote FIN arrived in sequence
    RcvFin,
    /// An ACK covering our FIN arrived
    RcvAckOfFin,
    /// The TIME-WAIT timer ran out
    TimeWaitTimeout,
    /// A segment ran out of retransmissions
    Timeout,
    /// A passively opened handshake failed and the listener starts over
    Relisten,
}

impl State {
    /// The state reached by applying `event` in this state, or `None` if the
    /// event is not allowed here.
    pub fn on(self, event: Event) -> Option<State> {
        use Event::*;
        use State::*;
        let next = match (self, event) {
            (Closed, Connect) => SynSent,
            (Closed, Event::Listen) => State::Listen,

            (State::Listen, RcvSyn) => SynReceived,
            (State::Listen, Close) => Closed,

            (SynSent, RcvSynAck) => Established,
            (SynSent, RcvSyn) => SynReceived,
            (SynSent, Close) => Closed,
            (SynSent, Timeout) => Closed,

            (SynReceived, RcvAckOfSyn) => Established,
            (SynReceived, RcvFin) => CloseWait,
            (SynReceived, Relisten) => State::Listen,
            (SynReceived, Timeout) => Closed,

            (Established, Close) => FinWait1,
            (Established, RcvFin) => CloseWait,

            (FinWait1, RcvAckOfFin) => FinWait2,
            (FinWait1, RcvFin) => Closing,

            (FinWait2, RcvFin) => TimeWait,

            (CloseWait, Close) => LastAck,

            (Closing, RcvAckOfFin) => TimeWait,

            (LastAck, RcvAckOfFin) => Closed,

            (TimeWait, TimeWaitTimeout) => Closed,

            (Established | FinWait1 | FinWait2 | CloseWait | Closing | LastAck, Timeout) => Closed,

            _ => return None,
        };
        Some(next)
    }

    /// Whether segment text may be delivered to the user in this state
    pub fn accepts_text(self) -> bool {
        matches!(self, State::Established | State::FinWait1 | State::FinWait2)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::CloseWait => "CLOSE-WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST-ACK",
            State::TimeWait => "TIME-WAIT",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_open_and_close() {
        let path = [
            (Event::Connect, State::SynSent),
            (Event::RcvSynAck, State::Established),
            (Event::Close, State::FinWait1),
            (Event::RcvAckOfFin, State::FinWait2),
            (Event::RcvFin, State::TimeWait),
            (Event::TimeWaitTimeout, State::Closed),
        ];
        let mut state = State::Closed;
        for (event, expected) in path {
            state = state.on(event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn passive_open_and_close() {
        let path = [
            (Event::Listen, State::Listen),
            (Event::RcvSyn, State::SynReceived),
            (Event::RcvAckOfSyn, State::Established),
            (Event::RcvFin, State::CloseWait),
            (Event::Close, State::LastAck),
            (Event::RcvAckOfFin, State::Closed),
        ];
        let mut state = State::Closed;
        for (event, expected) in path {
            state = state.on(event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn simultaneous_close() {
        let state = State::FinWait1.on(Event::RcvFin).unwrap();
        assert_eq!(state, State::Closing);
        assert_eq!(state.on(Event::RcvAckOfFin), Some(State::TimeWait));
    }

    #[test]
    fn handshake_failures() {
        assert_eq!(State::SynSent.on(Event::Timeout), Some(State::Closed));
        assert_eq!(State::SynReceived.on(Event::Relisten), Some(State::Listen));
        assert_eq!(State::Established.on(Event::Timeout), Some(State::Closed));
        assert_eq!(State::TimeWait.on(Event::Timeout), None);
    }

    #[test]
    fn rejects_undefined_transitions() {
        assert_eq!(State::Closed.on(Event::RcvSyn), None);
        assert_eq!(State::Closed.on(Event::Close), None);
        assert_eq!(State::Listen.on(Event::Connect), None);
        assert_eq!(State::Established.on(Event::Connect), None);
        assert_eq!(State::FinWait2.on(Event::Close), None);
        assert_eq!(State::LastAck.on(Event::RcvFin), None);
    }
}
