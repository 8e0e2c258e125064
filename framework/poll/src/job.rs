//! Working state of the request currently in flight on one bus (§3 "Poll
//! Job"). Kept as a plain state record rather than a coroutine frame,
//! per the cooperative-dispatch design note.

use tcan_core::CanId;

use crate::series::Protocol;

#[derive(Debug, Clone)]
pub struct PollJob {
    pub bus: u32,
    pub protocol: Protocol,
    pub request_type: u16,
    pub pid: u16,
    pub tx_id: CanId,
    pub rx_id_low: CanId,
    pub rx_id_high: CanId,
    pub rx_id_received: Option<CanId>,
    pub ml_frame: u16,
    pub ml_offset: usize,
    pub ml_remain: usize,
    pub ticker: u32,
    pub raw_frame_view: Vec<u8>,
}

impl PollJob {
    pub fn idle(bus: u32) -> Self {
        Self {
            bus,
            protocol: Protocol::IsoTpStd,
            request_type: 0,
            pid: 0,
            tx_id: CanId::standard(0),
            rx_id_low: CanId::standard(0),
            rx_id_high: CanId::standard(0),
            rx_id_received: None,
            ml_frame: 0,
            ml_offset: 0,
            ml_remain: 0,
            ticker: 0,
            raw_frame_view: Vec::new(),
        }
    }

    pub fn rx_id_matches(&self, id: CanId) -> bool {
        id.raw() >= self.rx_id_low.raw() && id.raw() <= self.rx_id_high.raw()
    }
}
