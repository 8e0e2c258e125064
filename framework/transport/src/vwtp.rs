//! C8 VW TP 2.0 Transport: channel-oriented alternative to ISO-TP used
//! by some VW-group modules (spec §4.6).

use std::fmt;

use log::debug;

/// `Closed -> ChannelSetup -> ChannelParams -> Idle -> StartPoll ->
/// Transmit -> Receive -> (Idle|AbortXfer)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    ChannelSetup,
    ChannelParams,
    Idle,
    StartPoll,
    Transmit,
    Receive,
    AbortXfer,
    ChannelClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VwtpError {
    UnexpectedFrame,
    Timeout,
    Aborted,
}

impl fmt::Display for VwtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VwtpError::UnexpectedFrame => write!(f, "vwtp frame not valid for current channel state"),
            VwtpError::Timeout => write!(f, "vwtp keep-alive timed out"),
            VwtpError::Aborted => write!(f, "vwtp channel aborted"),
        }
    }
}

impl std::error::Error for VwtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Per-bus/peer channel parameters, negotiated during
/// `ChannelSetup`/`ChannelParams` and then fixed for the channel's life.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParams {
    pub base_id: u32,
    pub logical_module_id: u16,
    pub tx_id: u32,
    pub rx_id: u32,
    pub block_size: u8,
    pub ack_time_ms: u16,
    pub separation_time_ms: u16,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            base_id: 0,
            logical_module_id: 0,
            tx_id: 0,
            rx_id: 0,
            block_size: 8,
            ack_time_ms: 100,
            separation_time_ms: 10,
        }
    }
}

/// One VWTP 2.0 channel's full state: FSM position, negotiated
/// parameters, 4-bit wraparound TX/RX sequence numbers, and the
/// keep-alive deadline.
pub struct Channel {
    state: ChannelState,
    params: ChannelParams,
    tx_seq: u8,
    rx_seq: u8,
    keep_alive_s: u32,
    last_activity_ms: u64,
}

impl Channel {
    /// `keep_alive_s == 0` disables the inactivity close (spec §4.6).
    pub fn new(keep_alive_s: u32) -> Self {
        Self {
            state: ChannelState::Closed,
            params: ChannelParams::default(),
            tx_seq: 0,
            rx_seq: 0,
            keep_alive_s,
            last_activity_ms: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Update the keep-alive inactivity timeout live, per
    /// `Command::Keepalive`/`PollerSupervisor::keepalive_s`. Takes effect
    /// on the next [`Channel::tick_keepalive`] call.
    pub fn set_keepalive_s(&mut self, s: u32) {
        self.keep_alive_s = s;
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    fn transition(&mut self, state: ChannelState, now_ms: u64) {
        debug!("vwtp channel {:?} -> {:?}", self.state, state);
        self.state = state;
        self.touch(now_ms);
    }

    /// Begin the setup handshake. Valid only from `Closed`.
    pub fn open(&mut self, now_ms: u64) -> Result<(), VwtpError> {
        if self.state != ChannelState::Closed {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.transition(ChannelState::ChannelSetup, now_ms);
        Ok(())
    }

    /// The peer accepted setup; negotiate parameters.
    pub fn on_setup_ack(&mut self, params: ChannelParams, now_ms: u64) -> Result<(), VwtpError> {
        if self.state != ChannelState::ChannelSetup {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.params = params;
        self.transition(ChannelState::ChannelParams, now_ms);
        Ok(())
    }

    /// Parameter negotiation complete; channel is ready for polling.
    pub fn on_params_ack(&mut self, now_ms: u64) -> Result<(), VwtpError> {
        if self.state != ChannelState::ChannelParams {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.transition(ChannelState::Idle, now_ms);
        Ok(())
    }

    pub fn start_poll(&mut self, now_ms: u64) -> Result<(), VwtpError> {
        if self.state != ChannelState::Idle {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.transition(ChannelState::StartPoll, now_ms);
        Ok(())
    }

    /// Transition into sending a request block. Returns the TX sequence
    /// number to stamp onto the outgoing frame, then advances it.
    pub fn begin_transmit(&mut self, now_ms: u64) -> Result<u8, VwtpError> {
        if !matches!(self.state, ChannelState::StartPoll | ChannelState::Idle) {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.transition(ChannelState::Transmit, now_ms);
        let seq = self.tx_seq;
        self.tx_seq = (self.tx_seq + 1) & 0x0F;
        Ok(seq)
    }

    /// Validate an inbound response block's sequence number and move to
    /// `Receive`.
    pub fn begin_receive(&mut self, seq: u8, now_ms: u64) -> Result<(), VwtpError> {
        if self.state != ChannelState::Transmit && self.state != ChannelState::Receive {
            return Err(VwtpError::UnexpectedFrame);
        }
        if seq != self.rx_seq {
            return Err(VwtpError::UnexpectedFrame);
        }
        self.rx_seq = (self.rx_seq + 1) & 0x0F;
        self.transition(ChannelState::Receive, now_ms);
        Ok(())
    }

    /// A request/response round completed; return to `Idle` for the next
    /// poll, or queue another `StartPoll` immediately if the caller wants.
    pub fn finish_round(&mut self, now_ms: u64) {
        self.transition(ChannelState::Idle, now_ms);
    }

    pub fn abort(&mut self, now_ms: u64) {
        self.transition(ChannelState::AbortXfer, now_ms);
    }

    /// Drive the keep-alive timer. Call periodically with the current
    /// time; transitions to `ChannelClose` then `Closed` once inactivity
    /// exceeds `keep_alive_s`. Returns `true` if the channel just closed.
    pub fn tick_keepalive(&mut self, now_ms: u64) -> bool {
        if self.keep_alive_s == 0 || self.state == ChannelState::Closed {
            return false;
        }
        let elapsed_ms = now_ms.saturating_sub(self.last_activity_ms);
        if elapsed_ms >= self.keep_alive_s as u64 * 1000 {
            self.transition(ChannelState::ChannelClose, now_ms);
            self.transition(ChannelState::Closed, now_ms);
            true
        } else {
            false
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn opened(now_ms: u64) -> Channel {
        let mut ch = Channel::new(60);
        ch.open(now_ms).unwrap();
        ch.on_setup_ack(ChannelParams::default(), now_ms).unwrap();
        ch.on_params_ack(now_ms).unwrap();
        ch
    }

    #[test]
    fn happy_path_reaches_idle() {
        let ch = opened(0);
        assert_eq!(ch.state(), ChannelState::Idle);
    }

    #[test]
    fn transmit_then_receive_cycles_sequence_numbers() {
        let mut ch = opened(0);
        ch.start_poll(0).unwrap();
        let tx_seq = ch.begin_transmit(0).unwrap();
        assert_eq!(tx_seq, 0);
        ch.begin_receive(0, 0).unwrap();
        ch.finish_round(0);
        assert_eq!(ch.state(), ChannelState::Idle);

        ch.start_poll(1).unwrap();
        let tx_seq2 = ch.begin_transmit(1).unwrap();
        assert_eq!(tx_seq2, 1);
    }

    #[test]
    fn sequence_wraps_at_four_bits() {
        let mut ch = opened(0);
        ch.start_poll(0).unwrap();
        for expected in 0..16 {
            let seq = ch.begin_transmit(0).unwrap();
            assert_eq!(seq, expected as u8);
            ch.begin_receive(expected as u8, 0).unwrap();
            ch.finish_round(0);
            ch.start_poll(0).unwrap();
        }
        let seq = ch.begin_transmit(0).unwrap();
        assert_eq!(seq, 0);
    }

    #[test]
    fn mismatched_rx_sequence_rejected() {
        let mut ch = opened(0);
        ch.start_poll(0).unwrap();
        ch.begin_transmit(0).unwrap();
        assert_eq!(ch.begin_receive(5, 0).unwrap_err(), VwtpError::UnexpectedFrame);
    }

    #[test]
    fn keepalive_closes_after_inactivity() {
        let mut ch = opened(0);
        assert!(!ch.tick_keepalive(30_000));
        assert!(ch.tick_keepalive(61_000));
        assert!(ch.is_closed());
    }

    #[test]
    fn set_keepalive_s_takes_effect_on_next_tick() {
        let mut ch = opened(0);
        ch.set_keepalive_s(0);
        assert!(!ch.tick_keepalive(1_000_000));
        ch.set_keepalive_s(5);
        assert!(ch.tick_keepalive(6_000));
    }

    #[test]
    fn keepalive_disabled_when_zero() {
        let mut ch = Channel::new(0);
        ch.open(0).unwrap();
        ch.on_setup_ack(ChannelParams::default(), 0).unwrap();
        ch.on_params_ack(0).unwrap();
        assert!(!ch.tick_keepalive(10_000_000));
    }
}
