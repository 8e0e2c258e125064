//! C7 ISO-TP Transport (ISO 15765-2): single/first/consecutive/flow-control
//! framing, fragmentation and reassembly, driven by ticks rather than a
//! coroutine so it fits the same cooperative scheduling model as the
//! polling engine that drives it.

use std::fmt;

/// Addressing variant selected per spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// `IsoTpStd`: 11-bit CAN ID, no address byte in the payload.
    Standard,
    /// `IsoTpExtAddr`: a one-byte target address prefixed inside the
    /// payload; the CAN ID itself carries no addressing information.
    Extended(u8),
}

impl Addressing {
    fn prefix_len(self) -> usize {
        match self {
            Addressing::Standard => 0,
            Addressing::Extended(_) => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Continue,
    Wait,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTpError {
    PayloadTooLarge,
    BadFrame,
    SequenceMismatch,
    Aborted,
    Overflow,
}

impl fmt::Display for IsoTpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsoTpError::PayloadTooLarge => write!(f, "payload exceeds the 4095 byte ISO-TP limit"),
            IsoTpError::BadFrame => write!(f, "malformed ISO-TP frame"),
            IsoTpError::SequenceMismatch => write!(f, "consecutive frame sequence number out of order"),
            IsoTpError::Aborted => write!(f, "peer sent flow control abort"),
            IsoTpError::Overflow => write!(f, "reassembly buffer would exceed announced length"),
        }
    }
}

impl std::error::Error for IsoTpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

pub const MAX_PAYLOAD: usize = 4095;
/// Default minimum separation time this side requests/honours, in
/// milliseconds, per spec §4.5.
pub const DEFAULT_SEPARATION_MS: u32 = 25;

/// Decode an ISO 15765-2 `STmin` byte into microseconds.
/// `0x00..=0x7F` is milliseconds, `0xF1..=0xF9` is 100..900us; anything
/// else is treated as the default (the ISO spec marks it reserved).
pub fn separation_time_from_byte(b: u8) -> u32 {
    match b {
        0x00..=0x7F => b as u32 * 1000,
        0xF1..=0xF9 => (b as u32 - 0xF0) * 100,
        _ => DEFAULT_SEPARATION_MS * 1000,
    }
}

pub fn separation_time_to_byte(us: u32) -> u8 {
    if us >= 1000 {
        (us / 1000).min(0x7F) as u8
    } else {
        let tenths = (us / 100).clamp(1, 9);
        0xF0 + tenths as u8
    }
}

/// One parsed PCI (Protocol Control Information) header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pci {
    Single { payload: Vec<u8> },
    First { total_len: u16, payload: Vec<u8> },
    Consecutive { seq: u8, payload: Vec<u8> },
    FlowControl { status: FlowStatus, block_size: u8, st_byte: u8 },
}

/// Parse one CAN frame's payload (with any addressing prefix already
/// stripped by the caller) into its PCI.
pub fn parse_pci(data: &[u8]) -> Result<Pci, IsoTpError> {
    let first = *data.first().ok_or(IsoTpError::BadFrame)?;
    match first >> 4 {
        0x0 => {
            let len = (first & 0x0F) as usize;
            let payload = data.get(1..1 + len).ok_or(IsoTpError::BadFrame)?.to_vec();
            Ok(Pci::Single { payload })
        }
        0x1 => {
            if data.len() < 2 {
                return Err(IsoTpError::BadFrame);
            }
            let total_len = (((first & 0x0F) as u16) << 8) | data[1] as u16;
            let payload = data.get(2..).ok_or(IsoTpError::BadFrame)?.to_vec();
            Ok(Pci::First { total_len, payload })
        }
        0x2 => {
            let seq = first & 0x0F;
            let payload = data.get(1..).ok_or(IsoTpError::BadFrame)?.to_vec();
            Ok(Pci::Consecutive { seq, payload })
        }
        0x3 => {
            if data.len() < 3 {
                return Err(IsoTpError::BadFrame);
            }
            let status = match first & 0x0F {
                0 => FlowStatus::Continue,
                1 => FlowStatus::Wait,
                2 => FlowStatus::Abort,
                _ => return Err(IsoTpError::BadFrame),
            };
            Ok(Pci::FlowControl { status, block_size: data[1], st_byte: data[2] })
        }
        _ => Err(IsoTpError::BadFrame),
    }
}

fn build_single(addressing: Addressing, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    if let Addressing::Extended(addr) = addressing {
        frame.push(addr);
    }
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame
}

fn build_first(addressing: Addressing, total_len: u16, first_chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    if let Addressing::Extended(addr) = addressing {
        frame.push(addr);
    }
    frame.push(0x10 | ((total_len >> 8) as u8 & 0x0F));
    frame.push((total_len & 0xFF) as u8);
    frame.extend_from_slice(first_chunk);
    frame
}

fn build_consecutive(addressing: Addressing, seq: u8, chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    if let Addressing::Extended(addr) = addressing {
        frame.push(addr);
    }
    frame.push(0x20 | (seq & 0x0F));
    frame.extend_from_slice(chunk);
    frame
}

pub fn build_flow_control(addressing: Addressing, status: FlowStatus, block_size: u8, st_byte: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(3);
    if let Addressing::Extended(addr) = addressing {
        frame.push(addr);
    }
    let fs = match status {
        FlowStatus::Continue => 0,
        FlowStatus::Wait => 1,
        FlowStatus::Abort => 2,
    };
    frame.push(0x30 | fs);
    frame.push(block_size);
    frame.push(st_byte);
    frame
}

/// Result of advancing a [`Sender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStep {
    /// A frame is ready to be transmitted now.
    Frame(Vec<u8>),
    /// Nothing to send yet; wait this many ticks before calling
    /// [`Sender::tick`] again (a separation-time gap between CFs).
    WaitTicks(u16),
    /// Waiting on a flow-control frame from the peer; call
    /// [`Sender::on_flow_control`] when one arrives.
    AwaitingFlowControl,
    /// All frames for this payload have been sent.
    Done,
}

enum SendState {
    Idle,
    AwaitingFlowControl { remaining: Vec<u8> },
    SendingConsecutive { remaining: Vec<u8>, seq: u8, block_remaining: u8, wait_ticks: u16 },
    Done,
    Aborted,
}

/// Drives the outgoing half of an ISO-TP dialog for one request payload.
pub struct Sender {
    addressing: Addressing,
    state: SendState,
    separation_ticks: u16,
}

impl Sender {
    pub fn new(addressing: Addressing) -> Self {
        Self { addressing, state: SendState::Idle, separation_ticks: 1 }
    }

    /// Begin sending `payload`. Returns the first frame to transmit: an
    /// SF for short payloads (after which the sender is [`SendStep::Done`]),
    /// or an FF, after which the caller must wait for flow control.
    pub fn start(&mut self, payload: &[u8]) -> Result<Vec<u8>, IsoTpError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(IsoTpError::PayloadTooLarge);
        }
        let max_sf = 7 - self.addressing.prefix_len();
        if payload.len() <= max_sf {
            self.state = SendState::Done;
            return Ok(build_single(self.addressing, payload));
        }
        let ff_capacity = 6 - self.addressing.prefix_len();
        let (first_chunk, rest) = payload.split_at(ff_capacity);
        self.state = SendState::AwaitingFlowControl { remaining: rest.to_vec() };
        Ok(build_first(self.addressing, payload.len() as u16, first_chunk))
    }

    /// Feed a received flow-control frame. `tick_duration_us` converts the
    /// peer's STmin into a whole number of scheduler ticks (rounded up, at
    /// least 1) so the polling engine's `poll_wait` can honour it.
    pub fn on_flow_control(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        st_byte: u8,
        tick_duration_us: u32,
    ) -> Result<(), IsoTpError> {
        let remaining = match &self.state {
            SendState::AwaitingFlowControl { remaining } => remaining.clone(),
            SendState::SendingConsecutive { remaining, .. } => remaining.clone(),
            _ => return Err(IsoTpError::BadFrame),
        };
        match status {
            FlowStatus::Abort => {
                self.state = SendState::Aborted;
                Err(IsoTpError::Aborted)
            }
            FlowStatus::Wait => Ok(()),
            FlowStatus::Continue => {
                let peer_us = separation_time_from_byte(st_byte).max(DEFAULT_SEPARATION_MS * 1000);
                let ticks = ((peer_us + tick_duration_us - 1) / tick_duration_us.max(1)).max(1) as u16;
                self.separation_ticks = ticks;
                self.state = SendState::SendingConsecutive {
                    remaining,
                    seq: 1,
                    block_remaining: block_size,
                    wait_ticks: 0,
                };
                Ok(())
            }
        }
    }

    /// Advance by one tick. Call after `start` returned an FF and flow
    /// control has been accepted, and repeatedly until [`SendStep::Done`].
    pub fn tick(&mut self) -> SendStep {
        match &mut self.state {
            SendState::Idle | SendState::Done => SendStep::Done,
            SendState::Aborted => SendStep::Done,
            SendState::AwaitingFlowControl { .. } => SendStep::AwaitingFlowControl,
            SendState::SendingConsecutive { remaining, seq, block_remaining, wait_ticks } => {
                if *wait_ticks > 0 {
                    *wait_ticks -= 1;
                    return SendStep::WaitTicks(*wait_ticks);
                }
                let cf_capacity = 7 - self.addressing.prefix_len();
                let take = remaining.len().min(cf_capacity);
                let chunk: Vec<u8> = remaining.drain(..take).collect();
                let frame = build_consecutive(self.addressing, *seq, &chunk);
                *seq = (*seq + 1) & 0x0F;
                if remaining.is_empty() {
                    self.state = SendState::Done;
                    return SendStep::Frame(frame);
                }
                if *block_remaining > 0 {
                    *block_remaining -= 1;
                    if *block_remaining == 0 {
                        // Block exhausted: wait for another FC before continuing.
                        self.state = SendState::AwaitingFlowControl { remaining: std::mem::take(remaining) };
                        return SendStep::Frame(frame);
                    }
                }
                *wait_ticks = self.separation_ticks;
                SendStep::Frame(frame)
            }
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, SendState::Done | SendState::Aborted)
    }
}

/// Result of feeding one frame to a [`Receiver`].
///
/// One [`RecvStep::Frame`] is produced per ISO-TP frame received (SF, FF,
/// each CF), never a single event for the fully reassembled payload —
/// per spec §8's "ISO-TP conservation" property and the requirement that
/// a multi-frame response call the poll series' `on_packet` once per
/// frame, not once for the whole message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvStep {
    /// This frame's slice of the payload is ready to deliver. `ml_frame`
    /// numbers the frames of this payload from 0 (SF/FF); `offset` is
    /// where `chunk` starts in the logical reassembled buffer; `remain`
    /// is the bytes still to come after `chunk` (0 on the last frame).
    /// `flow_control`, when present, is the FC frame that must be sent
    /// back to the peer alongside delivering this chunk (set only on an
    /// FF).
    Frame { ml_frame: u16, chunk: Vec<u8>, offset: usize, remain: usize, flow_control: Option<Vec<u8>> },
    /// A flow-control frame from the peer, answering a multi-frame
    /// request this side sent; route to that request's [`Sender`] via
    /// [`Sender::on_flow_control`].
    FlowControl { status: FlowStatus, block_size: u8, st_byte: u8 },
}

enum RecvState {
    Idle,
    Reassembling { delivered: usize, expected: usize, next_seq: u8, ml_frame: u16 },
}

/// Drives the incoming half of an ISO-TP dialog (reassembly of a
/// response, or of a request this node receives).
pub struct Receiver {
    addressing: Addressing,
    state: RecvState,
    separation_ms: u8,
}

impl Receiver {
    pub fn new(addressing: Addressing) -> Self {
        Self { addressing, state: RecvState::Idle, separation_ms: DEFAULT_SEPARATION_MS as u8 }
    }

    /// Set the minimum CF separation time this side requests in its flow
    /// control replies (§4.5), live-tunable via
    /// `Command::ResponseSep`/`PollerSupervisor::response_sep_ms`.
    pub fn set_separation_ms(&mut self, ms: u8) {
        self.separation_ms = ms;
    }

    pub fn on_frame(&mut self, data: &[u8]) -> Result<RecvStep, IsoTpError> {
        let prefix = self.addressing.prefix_len();
        let data = data.get(prefix..).ok_or(IsoTpError::BadFrame)?;
        let pci = parse_pci(data)?;
        match pci {
            Pci::Single { payload } => {
                self.state = RecvState::Idle;
                Ok(RecvStep::Frame { ml_frame: 0, chunk: payload, offset: 0, remain: 0, flow_control: None })
            }
            Pci::First { total_len, payload } => {
                let expected = (total_len as usize).min(MAX_PAYLOAD);
                let delivered = payload.len().min(expected);
                let chunk = payload[..delivered].to_vec();
                let remain = expected.saturating_sub(delivered);
                self.state = RecvState::Reassembling { delivered, expected, next_seq: 1, ml_frame: 0 };
                let fc = build_flow_control(self.addressing, FlowStatus::Continue, 0, separation_time_to_byte(self.separation_ms as u32 * 1000));
                Ok(RecvStep::Frame { ml_frame: 0, chunk, offset: 0, remain, flow_control: Some(fc) })
            }
            Pci::Consecutive { seq, payload } => match &mut self.state {
                RecvState::Reassembling { delivered, expected, next_seq, ml_frame } => {
                    if seq != *next_seq {
                        self.state = RecvState::Idle;
                        return Err(IsoTpError::SequenceMismatch);
                    }
                    if *delivered + payload.len() > *expected + 8 {
                        self.state = RecvState::Idle;
                        return Err(IsoTpError::Overflow);
                    }
                    let offset = *delivered;
                    let remaining_capacity = expected.saturating_sub(*delivered);
                    let take = payload.len().min(remaining_capacity);
                    let chunk = payload[..take].to_vec();
                    *delivered += take;
                    *next_seq = (*next_seq + 1) & 0x0F;
                    *ml_frame += 1;
                    let frame_no = *ml_frame;
                    let remain = expected.saturating_sub(*delivered);
                    if remain == 0 {
                        self.state = RecvState::Idle;
                    }
                    Ok(RecvStep::Frame { ml_frame: frame_no, chunk, offset, remain, flow_control: None })
                }
                RecvState::Idle => Err(IsoTpError::BadFrame),
            },
            Pci::FlowControl { status, block_size, st_byte } => {
                Ok(RecvStep::FlowControl { status, block_size, st_byte })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_frame_round_trip() {
        let mut sender = Sender::new(Addressing::Standard);
        let frame = sender.start(&[0x22, 0xF1, 0x90]).unwrap();
        assert!(sender.is_done());
        let mut receiver = Receiver::new(Addressing::Standard);
        match receiver.on_frame(&frame).unwrap() {
            RecvStep::Frame { ml_frame, chunk, offset, remain, flow_control } => {
                assert_eq!(ml_frame, 0);
                assert_eq!(chunk, vec![0x22, 0xF1, 0x90]);
                assert_eq!(offset, 0);
                assert_eq!(remain, 0);
                assert_eq!(flow_control, None);
            }
            _ => panic!("expected frame"),
        }
    }

    #[test]
    fn multi_frame_reassembles_in_order() {
        let payload: Vec<u8> = (0u8..20).collect();
        let mut sender = Sender::new(Addressing::Standard);
        let ff = sender.start(&payload).unwrap();
        let mut receiver = Receiver::new(Addressing::Standard);
        let (first_chunk, fc_frame) = match receiver.on_frame(&ff).unwrap() {
            RecvStep::Frame { ml_frame, offset, remain, flow_control, chunk } => {
                assert_eq!(ml_frame, 0);
                assert_eq!(offset, 0);
                assert!(remain > 0);
                (chunk, flow_control.expect("FF carries a flow-control reply"))
            }
            _ => panic!("expected FF frame"),
        };
        let fc = match parse_pci(&fc_frame).unwrap() {
            Pci::FlowControl { status, block_size, st_byte } => (status, block_size, st_byte),
            _ => panic!(),
        };
        sender.on_flow_control(fc.0, fc.1, fc.2, 1000).unwrap();

        let mut reassembled = first_chunk;
        let mut frame_count = 1;
        loop {
            match sender.tick() {
                SendStep::Frame(cf) => {
                    match receiver.on_frame(&cf).unwrap() {
                        RecvStep::Frame { chunk, remain, .. } => {
                            reassembled.extend_from_slice(&chunk);
                            frame_count += 1;
                            if remain == 0 {
                                break;
                            }
                        }
                        RecvStep::FlowControl { .. } => panic!("unexpected FC while reassembling"),
                    }
                }
                SendStep::WaitTicks(_) => continue,
                SendStep::Done | SendStep::AwaitingFlowControl => break,
            }
        }
        assert_eq!(reassembled, payload);
        assert!(frame_count > 1, "multi-frame payload must be delivered across more than one on_frame call");
    }

    #[test]
    fn multi_frame_delivers_exactly_one_frame_event_per_can_frame() {
        // 10-byte payload: FF carries 6 bytes, one CF carries the remaining 4.
        let payload: Vec<u8> = (1u8..=10).collect();
        let mut sender = Sender::new(Addressing::Standard);
        let ff = sender.start(&payload).unwrap();
        let mut receiver = Receiver::new(Addressing::Standard);

        let ff_step = receiver.on_frame(&ff).unwrap();
        let (ff_chunk, ff_remain, fc_frame) = match ff_step {
            RecvStep::Frame { ml_frame: 0, chunk, offset: 0, remain, flow_control: Some(fc) } => (chunk, remain, fc),
            other => panic!("unexpected first step: {other:?}"),
        };
        assert_eq!(ff_chunk, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ff_remain, 4);

        let fc = match parse_pci(&fc_frame).unwrap() {
            Pci::FlowControl { status, block_size, st_byte } => (status, block_size, st_byte),
            _ => panic!(),
        };
        sender.on_flow_control(fc.0, fc.1, fc.2, 1000).unwrap();

        let cf = match sender.tick() {
            SendStep::Frame(cf) => cf,
            other => panic!("expected a CF: {other:?}"),
        };
        let cf_step = receiver.on_frame(&cf).unwrap();
        match cf_step {
            RecvStep::Frame { ml_frame: 1, chunk, offset: 6, remain: 0, flow_control: None } => {
                assert_eq!(chunk, vec![7, 8, 9, 10]);
            }
            other => panic!("unexpected second step: {other:?}"),
        }
        assert!(matches!(sender.tick(), SendStep::Done));
    }

    #[test]
    fn out_of_order_consecutive_frame_is_rejected() {
        let payload: Vec<u8> = (0u8..20).collect();
        let mut sender = Sender::new(Addressing::Standard);
        let ff = sender.start(&payload).unwrap();
        let mut receiver = Receiver::new(Addressing::Standard);
        receiver.on_frame(&ff).unwrap();
        let bad_cf = build_consecutive(Addressing::Standard, 5, &[0, 1, 2]);
        assert_eq!(receiver.on_frame(&bad_cf).unwrap_err(), IsoTpError::SequenceMismatch);
    }

    #[test]
    fn flow_control_abort_fails_the_send() {
        let payload: Vec<u8> = (0u8..20).collect();
        let mut sender = Sender::new(Addressing::Standard);
        sender.start(&payload).unwrap();
        let err = sender.on_flow_control(FlowStatus::Abort, 0, 0, 1000).unwrap_err();
        assert_eq!(err, IsoTpError::Aborted);
        assert!(sender.is_done());
    }

    #[test]
    fn flow_control_reply_honours_a_configured_separation_time() {
        let mut receiver = Receiver::new(Addressing::Standard);
        receiver.set_separation_ms(50);
        let payload: Vec<u8> = (0u8..20).collect();
        let mut sender = Sender::new(Addressing::Standard);
        let ff = sender.start(&payload).unwrap();
        match receiver.on_frame(&ff).unwrap() {
            RecvStep::Frame { flow_control: Some(fc), .. } => match parse_pci(&fc).unwrap() {
                Pci::FlowControl { st_byte, .. } => assert_eq!(st_byte, 50),
                _ => panic!("expected FC"),
            },
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn separation_time_byte_round_trips_milliseconds() {
        assert_eq!(separation_time_from_byte(separation_time_to_byte(50_000)), 50_000);
        assert_eq!(separation_time_from_byte(0xF5), 500);
    }

    #[test]
    fn extended_addressing_reduces_payload_capacity() {
        let mut sender = Sender::new(Addressing::Extended(0xF1));
        let frame = sender.start(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame[0], 0xF1);
        assert!(sender.is_done());
    }
}
