//      1         2          3          4
// ----------|----------|----------|----------
//        SND.UNA    SND.NXT    SND.UNA
//                             +SND.WND
//
// 1 - old sequence numbers which have been acknowledged
// 2 - sequence numbers of unacknowledged data
// 3 - sequence numbers allowed for new data transmission (send window)
// 4 - future sequence numbers which are not yet allowed
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct SendSequenceSpace {
    /// Oldest unacknowledged sequence number
    pub una: u32,
    /// Next sequence number to be sent
    pub nxt: u32,
    /// The size of the remote TCP's window
    pub wnd: u16,
    /// Initial send sequence number
    pub iss: u32,
}

impl SendSequenceSpace {
    /// The sequence space right after sending a SYN numbered `iss`
    pub fn synchronizing(iss: u32, wnd: u16) -> Self {
        Self {
            una: iss,
            nxt: iss.wrapping_add(1),
            wnd,
            iss,
        }
    }

    /// Octets sent but not yet acknowledged
    pub fn in_flight(&self) -> u32 {
        self.nxt.wrapping_sub(self.una)
    }

    /// Octets that may still be sent before the window is full
    pub fn usable_window(&self) -> u32 {
        (self.wnd as u32).saturating_sub(self.in_flight())
    }
}
