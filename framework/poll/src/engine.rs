//! C9 Polling Engine: one per-bus state record advancing the active
//! series per tick, per spec §4.7's five-step algorithm.

use log::{debug, trace, warn};

use tcan_transport::isotp;

use crate::job::PollJob;
use crate::series::{FinishOutcome, NextOutcome, PollEntry, PollSeries, Protocol, SeriesList};

/// Vehicle-driven poll state (§4.7): `0` Off, `1` Awake, `2` Running,
/// `3` Charging.
pub const STATE_OFF: u8 = 0;

/// Sentinel ticker value that never satisfies `ticker % interval == 0`
/// for any `interval > 0` until the next primary tick resolves it to 0.
pub const INIT_TICKER: u32 = u32::MAX;

/// The class of tick event driving one call to [`Engine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    Primary,
    Secondary,
    Successful,
    OnceOff,
}

/// What the engine needs its caller to do with a found entry: build the
/// ISO-TP/VWTP start frame and transmit it. The engine itself holds no
/// reference to a bus port so it stays decoupled from `tcan-net`.
pub enum DispatchRequest {
    /// `sender` is the same [`isotp::Sender`] that built `frame`; the
    /// caller must keep it alive and drive it with incoming flow control
    /// and further ticks until it reports `Done` for any payload that
    /// didn't fit in the single frame.
    IsoTp { frame: Vec<u8>, tx_id: tcan_core::CanId, sender: isotp::Sender },
    Vwtp { tx_id: tcan_core::CanId },
}

pub const MAX_POLL_REPEAT: u32 = 5;

/// Per-bus poll state: ticker, poll_state, the current job, and the
/// series list driving it. One instance per bus.
pub struct Engine {
    pub bus_index: u32,
    pub poll_state: u8,
    pub ticker: u32,
    pub poll_wait: u16,
    pub sequence_cnt: u32,
    pub sequence_max: u32,
    /// Ticks to wait after a request completes successfully, before the
    /// next `Successful` event may dispatch the following entry.
    /// Propagated from [`crate::supervisor::Command::SuccessSep`].
    pub success_wait: u16,
    pub run_finished: bool,
    pub series: SeriesList,
    job: PollJob,
    repeat_count: u32,
}

impl Engine {
    pub fn new(bus_index: u32) -> Self {
        Self {
            bus_index,
            poll_state: STATE_OFF,
            ticker: INIT_TICKER,
            poll_wait: 0,
            sequence_cnt: 0,
            sequence_max: 0,
            success_wait: 0,
            run_finished: false,
            series: SeriesList::new(),
            job: PollJob::idle(bus_index),
            repeat_count: 0,
        }
    }

    /// Vehicle poll-state transition (§4.7 "Any state change"): marks
    /// the run finished, resets the ticker to the sentinel, zeroes the
    /// sequence counter, and drops the in-flight job (blocking entries
    /// are preserved by the series list, which only resets non-blocking
    /// cursors here).
    pub fn on_state_change(&mut self, new_state: u8) {
        debug!("bus {} poll_state {} -> {}", self.bus_index, self.poll_state, new_state);
        self.poll_state = new_state;
        self.run_finished = true;
        self.ticker = INIT_TICKER;
        self.sequence_cnt = 0;
        self.job = PollJob::idle(self.bus_index);
    }

    fn advance_ticker_if_primary(&mut self, event: TickEvent) {
        if event == TickEvent::Primary {
            self.ticker = self.ticker.wrapping_add(1);
            if self.ticker == INIT_TICKER {
                self.ticker = 0;
            }
        }
    }

    /// TX failure fast-path (§4.7): force the wait to zero and notify the
    /// current series immediately instead of waiting out the timeout.
    pub fn on_tx_failure(&mut self) {
        self.poll_wait = 0;
        if let Some(entry) = self.series.current_mut() {
            entry.on_tx_reply(&self.job, false);
        }
    }

    /// One ISO-TP/VWTP frame of the in-flight job's response was
    /// accepted; record its place in the logical reassembly (`ml_frame`,
    /// `ml_offset`, `ml_remain`) on the job and deliver this frame's
    /// chunk to the series. `on_packet` is called once per frame, not
    /// once for the whole reassembled message — a multi-frame response
    /// produces one call per ISO-TP frame, the last with `ml_remain ==
    /// 0`. The wait only clears on that last frame so the next tick
    /// doesn't issue a `Successful` event mid-reassembly.
    pub fn on_response_frame(&mut self, rx_id: tcan_core::CanId, ml_frame: u16, offset: usize, remain: usize, payload: &[u8]) {
        self.job.rx_id_received = Some(rx_id);
        self.job.ml_frame = ml_frame;
        self.job.ml_offset = offset;
        self.job.ml_remain = remain;
        self.poll_wait = if remain == 0 { self.success_wait } else { self.poll_wait.max(2) };
        if let Some(entry) = self.series.current_mut() {
            entry.on_packet(&self.job, payload);
        }
    }

    pub fn on_response_error(&mut self, code: u8) {
        self.poll_wait = 0;
        if let Some(entry) = self.series.current_mut() {
            entry.on_error(&self.job, code);
        }
    }

    /// Advance the engine by one tick event. Returns a dispatch request
    /// when a new entry was found and should be transmitted.
    pub fn tick(&mut self, event: TickEvent) -> Option<DispatchRequest> {
        // Step 1.
        if self.poll_state == STATE_OFF || self.series.is_empty() {
            return None;
        }
        // Step 2.
        if self.poll_wait > 0 {
            self.poll_wait -= 1;
            trace!("bus {} poll_wait {}", self.bus_index, self.poll_wait);
            return None;
        }
        // Step 3.
        if self.run_finished && event == TickEvent::Primary {
            self.advance_ticker_if_primary(event);
            self.run_finished = false;
        }
        // Step 4: loop asking the series list for the next due entry.
        loop {
            match self.series.poll_next(self.bus_index, self.ticker, self.poll_state, MAX_POLL_REPEAT) {
                NextOutcome::Ignore => continue,
                NextOutcome::NotReady => {
                    self.run_finished = true;
                    return None;
                }
                NextOutcome::ReachedEnd => {
                    let has_repeat = self.series.current().map(|s| s.has_repeat()).unwrap_or(false);
                    if has_repeat && self.repeat_count < MAX_POLL_REPEAT {
                        if event == TickEvent::Successful {
                            // Defer the repeat to the next Secondary tick.
                            self.run_finished = true;
                            return None;
                        }
                        self.repeat_count += 1;
                        if let Some(entry) = self.series.current_mut() {
                            entry.reset();
                        }
                        continue;
                    }
                    self.repeat_count = 0;
                    self.run_finished = true;
                    return None;
                }
                NextOutcome::StillAtEnd => {
                    self.run_finished = true;
                    return None;
                }
                NextOutcome::FoundEntry(entry) => {
                    // Step 5 throttling is checked before dispatch so a
                    // throttled tick never issues the request at all.
                    if self.sequence_max > 0 && self.sequence_cnt >= self.sequence_max {
                        return None;
                    }
                    self.job = build_job(self.bus_index, &entry, self.ticker);
                    self.poll_wait = 2;
                    self.sequence_cnt += 1;
                    return Some(build_dispatch(&entry));
                }
            }
        }
    }

    pub fn job(&self) -> &PollJob {
        &self.job
    }
}

fn build_job(bus_index: u32, entry: &PollEntry, ticker: u32) -> PollJob {
    let mut job = PollJob::idle(bus_index);
    job.protocol = entry.protocol;
    job.request_type = entry.request_type;
    job.pid = entry.pid;
    job.tx_id = entry.tx_id;
    job.rx_id_low = entry.rx_id;
    job.rx_id_high = entry.rx_id;
    job.ticker = ticker;
    job.raw_frame_view = entry.payload.clone();
    job
}

fn build_dispatch(entry: &PollEntry) -> DispatchRequest {
    match entry.protocol {
        Protocol::Vwtp20 => DispatchRequest::Vwtp { tx_id: entry.tx_id },
        _ => {
            let addressing = match entry.protocol {
                Protocol::IsoTpExtAddr => isotp::Addressing::Extended(0),
                _ => isotp::Addressing::Standard,
            };
            let mut sender = isotp::Sender::new(addressing);
            let frame = match sender.start(&entry.payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("poll entry payload rejected by isotp sender: {e}");
                    Vec::new()
                }
            };
            DispatchRequest::IsoTp { frame, tx_id: entry.tx_id, sender }
        }
    }
}
