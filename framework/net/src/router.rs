//! C2 Frame Router: single owner of the dispatch queue, fan-out to
//! listeners/callbacks, and the one place bus counters are mutated.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, trace, warn};

use tcan_core::SystemClock;

use crate::device::{Transceiver, TransmitOutcome};
use crate::frame::{BusIndex, Frame, Origin};
use crate::logger::{FrameLogger, LogEvent};
use crate::port::{
    try_enqueue, AutoPowerOffPolicy, BusMode, BusPort, BusSpeed, Counters, DbcAttachment,
    LogStatusKind, PortError, PortState, PowerState, WriteOutcome,
};

/// One entry of the dispatch queue, tagged per §4.2.
pub enum DispatchItem {
    Frame(Frame),
    RxCallback(BusIndex),
    TxCallback(BusIndex, bool),
    LogError(BusIndex, String),
}

type RxCallbackFn = Box<dyn FnMut(&Frame) + Send>;
type TxCallbackFn = Box<dyn FnMut(&Frame, bool) + Send>;

struct ListenerEntry {
    id: u64,
    wants_tx_feedback: bool,
    sender: Sender<Frame>,
}

/// Single owner of the dispatch queue and the bus registry. Construct one
/// per process (the composition root's "singleton", see DESIGN.md).
pub struct FrameRouter {
    buses: Mutex<Vec<PortState>>,
    queue_tx: Sender<DispatchItem>,
    queue_rx: Receiver<DispatchItem>,
    rx_callbacks: Mutex<Vec<(String, RxCallbackFn)>>,
    tx_callbacks: Mutex<Vec<(String, TxCallbackFn)>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener_id: AtomicU64,
    logger: Mutex<Option<Box<dyn FrameLogger>>>,
    rx_overflow: AtomicU32,
    tx_overflow: AtomicU32,
    clock: SystemClock,
}

impl FrameRouter {
    pub fn new(queue_capacity: usize) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(queue_capacity.max(1));
        Self {
            buses: Mutex::new(Vec::new()),
            queue_tx,
            queue_rx,
            rx_callbacks: Mutex::new(Vec::new()),
            tx_callbacks: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            logger: Mutex::new(None),
            rx_overflow: AtomicU32::new(0),
            tx_overflow: AtomicU32::new(0),
            clock: SystemClock,
        }
    }

    /// Register a new bus, created at startup per §3's lifecycle (mode
    /// starts `Off`). Returns the index used everywhere else in this API.
    pub fn add_bus(&self, name: impl Into<String>, transceiver: Box<dyn Transceiver>, tx_queue_capacity: usize) -> BusIndex {
        let mut buses = self.buses.lock().unwrap();
        let idx = buses.len() as BusIndex;
        buses.push(PortState::new(name, transceiver, tx_queue_capacity));
        idx
    }

    pub fn bus_count(&self) -> usize {
        self.buses.lock().unwrap().len()
    }

    /// Borrow a handle for one bus. Returns `None` if the index is out of
    /// range; every method on the handle re-validates anyway since the bus
    /// set cannot shrink but callers may race a stale index.
    pub fn bus(&self, index: BusIndex) -> BusPort<'_> {
        BusPort { index, router: self }
    }

    // ---- bus lifecycle -------------------------------------------------

    pub(crate) fn start_bus(
        &self,
        index: BusIndex,
        mode: BusMode,
        speed: BusSpeed,
        dbc: Option<DbcAttachment>,
    ) -> Result<(), PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        port.status = Counters::default();
        port.last_status_checksum = None;
        if let Some(prev) = port.dbc.take() {
            drop(prev);
        }
        port.dbc = dbc;
        port.transceiver
            .start(mode, speed)
            .map_err(|_| PortError::BusBusy)?;
        port.mode = mode;
        port.speed = Some(speed);
        port.power = PowerState::On;
        port.last_rx_ms = self.clock.now_ms();
        debug!("bus {index} started mode={mode:?} speed={speed:?}kbps", speed = speed.kbps());
        Ok(())
    }

    pub(crate) fn stop_bus(&self, index: BusIndex) -> Result<(), PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        port.dbc = None;
        while port.tx_queue_rx.try_recv().is_ok() {}
        port.transceiver.stop().map_err(|_| PortError::BusBusy)?;
        port.mode = BusMode::Off;
        port.power = PowerState::Off;
        debug!("bus {index} stopped");
        Ok(())
    }

    pub(crate) fn attach_dbc(&self, index: BusIndex, dbc: DbcAttachment) -> Result<(), PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        port.dbc = Some(dbc);
        Ok(())
    }

    pub(crate) fn detach_dbc(&self, index: BusIndex) -> Result<Option<String>, PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        Ok(port.dbc.take().map(|a| a.name))
    }

    pub(crate) fn mode(&self, index: BusIndex) -> Result<BusMode, PortError> {
        let buses = self.buses.lock().unwrap();
        buses.get(index as usize).map(|p| p.mode).ok_or(PortError::BusNotFound)
    }

    pub(crate) fn set_auto_power_off(&self, index: BusIndex, policy: AutoPowerOffPolicy) -> Result<(), PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        port.auto_power_off = policy;
        Ok(())
    }

    pub(crate) fn auto_power_off(&self, index: BusIndex) -> Result<AutoPowerOffPolicy, PortError> {
        let buses = self.buses.lock().unwrap();
        buses.get(index as usize).map(|p| p.auto_power_off).ok_or(PortError::BusNotFound)
    }

    pub(crate) fn status(&self, index: BusIndex) -> Result<Counters, PortError> {
        let buses = self.buses.lock().unwrap();
        buses.get(index as usize).map(|p| p.status).ok_or(PortError::BusNotFound)
    }

    pub(crate) fn clear_status(&self, index: BusIndex) -> Result<(), PortError> {
        let mut buses = self.buses.lock().unwrap();
        let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
        port.status = Counters::default();
        port.last_status_checksum = None;
        Ok(())
    }

    pub(crate) fn log_status(&self, index: BusIndex, kind: LogStatusKind) -> Result<(), PortError> {
        let (name, status, checksum, suppressed) = {
            let mut buses = self.buses.lock().unwrap();
            let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
            let checksum = port.status.checksum();
            let suppressed = kind == LogStatusKind::Error && port.last_status_checksum == Some(checksum);
            port.last_status_checksum = Some(checksum);
            (port.name.clone(), port.status, checksum, suppressed)
        };
        let _ = checksum;
        if suppressed {
            trace!("bus {index} status suppressed (unchanged checksum)");
            return Ok(());
        }
        if let Some(logger) = self.logger.lock().unwrap().as_mut() {
            logger.log_status(index, &name, kind, &status);
        }
        Ok(())
    }

    /// §4.1 watchdog: call roughly every 10s from the composition root's
    /// timer with the vehicle-on signal sampled externally (§6).
    pub fn tick_watchdog(&self, vehicle_on: bool) {
        let now = self.clock.now_ms();
        let mut buses = self.buses.lock().unwrap();
        for (idx, port) in buses.iter_mut().enumerate() {
            if port.power != PowerState::On {
                continue;
            }
            if !vehicle_on {
                // Vehicle off: continuously refresh to suppress false triggers.
                port.last_rx_ms = now;
                continue;
            }
            if now.saturating_sub(port.last_rx_ms) > 60_000 {
                let saved = port.status;
                let mode = port.mode;
                let speed = port.speed;
                let _ = port.transceiver.stop();
                port.mode = BusMode::Off;
                port.power = PowerState::Off;
                if let Some(speed) = speed {
                    if port.transceiver.start(mode, speed).is_ok() {
                        port.mode = mode;
                        port.speed = Some(speed);
                        port.power = PowerState::On;
                    }
                }
                port.status = saved;
                port.status.watchdog_resets = port.status.watchdog_resets.wrapping_add(1);
                port.last_rx_ms = now;
                warn!("bus {idx} watchdog reset (no RX for >60s while vehicle on)");
                let _ = self.queue_tx.try_send(DispatchItem::LogError(
                    idx as BusIndex,
                    "watchdog reset".to_string(),
                ));
            }
        }
    }

    /// Attempt to drain any frames parked in a bus's hardware-busy TX
    /// queue back out to the transceiver. The composition root calls this
    /// periodically (e.g. alongside the poll tick) since nothing else
    /// retries a queued write.
    pub fn drain_tx_queue(&self, index: BusIndex) -> Result<usize, PortError> {
        let mut drained = 0;
        loop {
            let frame = {
                let mut buses = self.buses.lock().unwrap();
                let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
                match port.tx_queue_rx.try_recv() {
                    Ok(f) => f,
                    Err(_) => break,
                }
            };
            self.dispatch_tx_attempt(index, frame)?;
            drained += 1;
        }
        Ok(drained)
    }

    // ---- TX -------------------------------------------------------------

    pub(crate) fn write(&self, index: BusIndex, frame: Frame, max_wait: Duration) -> Result<WriteOutcome, PortError> {
        let attempt = {
            let mut buses = self.buses.lock().unwrap();
            let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
            if port.power != PowerState::On {
                return Err(PortError::BusNotPowered);
            }
            port.transceiver.transmit(&frame)
        };

        match attempt {
            Ok(TransmitOutcome::Sent) => {
                self.accept_tx(index, frame);
                Ok(WriteOutcome::Ok)
            }
            Ok(TransmitOutcome::Busy) => {
                // Clone the channel sender and drop the bus lock before a
                // potentially multi-second blocking send: the mutex must
                // never be held across `max_wait`.
                let tx_queue_tx = {
                    let buses = self.buses.lock().unwrap();
                    let port = buses.get(index as usize).ok_or(PortError::BusNotFound)?;
                    port.tx_queue_tx.clone()
                };
                let queued = tx_queue_tx.send_timeout(frame, max_wait).is_ok();
                if queued {
                    let mut buses = self.buses.lock().unwrap();
                    if let Some(port) = buses.get_mut(index as usize) {
                        port.status.tx_delays = port.status.tx_delays.wrapping_add(1);
                    }
                    // Only a deferred, *actually transmitted* frame counts as
                    // accepted (`dispatch_tx_attempt`'s `Sent` branch below):
                    // queuing it here is not yet a send, so `accept_tx` must
                    // not fire a second time once `drain_tx_queue` succeeds.
                    Ok(WriteOutcome::Queued)
                } else {
                    let mut buses = self.buses.lock().unwrap();
                    if let Some(port) = buses.get_mut(index as usize) {
                        port.status.tx_overflow = port.status.tx_overflow.wrapping_add(1);
                    }
                    Ok(WriteOutcome::Fail)
                }
            }
            Err(_) => {
                // TX failure fast-path (§4.1): forward to TX callbacks
                // immediately so a pending poll request is cancelled
                // rather than waiting out its timeout.
                {
                    let mut buses = self.buses.lock().unwrap();
                    if let Some(port) = buses.get_mut(index as usize) {
                        port.status.tx_errors = port.status.tx_errors.wrapping_add(1);
                    }
                }
                let mut callbacks = self.tx_callbacks.lock().unwrap();
                for (_, cb) in callbacks.iter_mut() {
                    cb(&frame, false);
                }
                Ok(WriteOutcome::Fail)
            }
        }
    }

    fn dispatch_tx_attempt(&self, index: BusIndex, frame: Frame) -> Result<(), PortError> {
        let attempt = {
            let mut buses = self.buses.lock().unwrap();
            let port = buses.get_mut(index as usize).ok_or(PortError::BusNotFound)?;
            port.transceiver.transmit(&frame)
        };
        match attempt {
            Ok(TransmitOutcome::Sent) => {
                self.accept_tx(index, frame);
            }
            Ok(TransmitOutcome::Busy) => {
                let mut buses = self.buses.lock().unwrap();
                if let Some(port) = buses.get_mut(index as usize) {
                    let _ = try_enqueue(&port.tx_queue_tx, frame);
                }
            }
            Err(_) => {
                let mut callbacks = self.tx_callbacks.lock().unwrap();
                for (_, cb) in callbacks.iter_mut() {
                    cb(&frame, false);
                }
            }
        }
        Ok(())
    }

    /// Called exactly once per frame that is actually handed to the
    /// transceiver (immediately from `write`, or later from
    /// `dispatch_tx_attempt` once `drain_tx_queue` gets it out): increments
    /// `packets_tx`, emits a TX log entry and invokes TX callbacks and
    /// listeners through the dispatch queue, per §4.1/§4.2. A frame that
    /// is merely enqueued must not reach this twice.
    fn accept_tx(&self, index: BusIndex, frame: Frame) {
        match self.queue_tx.try_send(DispatchItem::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.tx_overflow.fetch_add(1, Ordering::Relaxed);
                warn!("bus {index} dispatch queue full, dropped TX fan-out frame");
            }
        }
    }

    pub fn deliver_rx(&self, frame: Frame) {
        match self.queue_tx.try_send(DispatchItem::Frame(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.rx_overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn rx_overflow_count(&self) -> u32 {
        self.rx_overflow.load(Ordering::Relaxed)
    }

    pub fn tx_overflow_count(&self) -> u32 {
        self.tx_overflow.load(Ordering::Relaxed)
    }

    // ---- callbacks / listeners -------------------------------------------

    pub fn add_rx_callback(&self, tag: impl Into<String>, cb: impl FnMut(&Frame) + Send + 'static) {
        self.rx_callbacks.lock().unwrap().push((tag.into(), Box::new(cb)));
    }

    pub fn remove_rx_callback(&self, tag: &str) {
        self.rx_callbacks.lock().unwrap().retain(|(t, _)| t != tag);
    }

    /// `cb(frame, tx_ok)`; `tx_ok` is `false` only when the transceiver
    /// reported a failure (§4.1's TX failure fast-path).
    pub fn add_tx_callback(&self, tag: impl Into<String>, cb: impl FnMut(&Frame, bool) + Send + 'static) {
        self.tx_callbacks.lock().unwrap().push((tag.into(), Box::new(cb)));
    }

    pub fn remove_tx_callback(&self, tag: &str) {
        self.tx_callbacks.lock().unwrap().retain(|(t, _)| t != tag);
    }

    /// Register a listener queue. `wants_tx_feedback` selects whether TX
    /// frames are delivered in addition to RX (every listener gets RX).
    pub fn add_listener(&self, wants_tx_feedback: bool, capacity: usize) -> (u64, Receiver<Frame>) {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.listeners.lock().unwrap().push(ListenerEntry { id, wants_tx_feedback, sender: tx });
        (id, rx)
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|l| l.id != id);
    }

    // ---- logger -----------------------------------------------------------

    /// Replace the active logger. The grace period described in §4.2 (stop
    /// -> flush -> delete -> install) collapses here to flushing the old
    /// logger before dropping it, since both happen synchronously on
    /// whichever thread calls this (never the consumer thread concurrently
    /// with a drain, by construction of the single-writer API).
    pub fn set_logger(&self, logger: Option<Box<dyn FrameLogger>>) {
        let mut slot = self.logger.lock().unwrap();
        if let Some(mut old) = slot.take() {
            old.flush();
        }
        *slot = logger;
    }

    // ---- consumer task ----------------------------------------------------

    /// Process every item currently queued, without blocking. Returns how
    /// many were processed. Intended to be called in a loop by the single
    /// consumer task (§5).
    pub fn drain_available(&self) -> usize {
        let mut n = 0;
        while let Ok(item) = self.queue_rx.try_recv() {
            self.process(item);
            n += 1;
        }
        n
    }

    /// Block up to `timeout` for the next item and process it if one
    /// arrived. Returns whether an item was processed.
    pub fn drain_one(&self, timeout: Duration) -> bool {
        match self.queue_rx.recv_timeout(timeout) {
            Ok(item) => {
                self.process(item);
                true
            }
            Err(_) => false,
        }
    }

    fn process(&self, item: DispatchItem) {
        match item {
            DispatchItem::Frame(frame) => self.process_frame(frame),
            DispatchItem::RxCallback(bus) => {
                trace!("bus {bus} rx callback notification (no frame payload)");
            }
            DispatchItem::TxCallback(bus, ok) => {
                trace!("bus {bus} tx callback notification ok={ok}");
            }
            DispatchItem::LogError(bus, text) => {
                if let Some(logger) = self.logger.lock().unwrap().as_mut() {
                    logger.log_text(bus, &text);
                }
            }
        }
    }

    fn process_frame(&self, frame: Frame) {
        match frame.origin {
            Origin::Rx => {
                {
                    let mut buses = self.buses.lock().unwrap();
                    if let Some(port) = buses.get_mut(frame.bus as usize) {
                        port.status.rx_packets = port.status.rx_packets.wrapping_add(1);
                        port.last_rx_ms = self.clock.now_ms();
                    }
                }
                if let Some(logger) = self.logger.lock().unwrap().as_mut() {
                    logger.log_frame(LogEvent::Rx, &frame);
                }
                {
                    let mut callbacks = self.rx_callbacks.lock().unwrap();
                    for (_, cb) in callbacks.iter_mut() {
                        cb(&frame);
                    }
                }
                let listeners = self.listeners.lock().unwrap();
                for l in listeners.iter() {
                    let _ = l.sender.try_send(frame);
                }
            }
            Origin::Tx => {
                {
                    let mut buses = self.buses.lock().unwrap();
                    if let Some(port) = buses.get_mut(frame.bus as usize) {
                        port.status.tx_packets = port.status.tx_packets.wrapping_add(1);
                    }
                }
                if let Some(logger) = self.logger.lock().unwrap().as_mut() {
                    logger.log_frame(LogEvent::Tx, &frame);
                }
                {
                    let mut callbacks = self.tx_callbacks.lock().unwrap();
                    for (_, cb) in callbacks.iter_mut() {
                        cb(&frame, true);
                    }
                }
                let listeners = self.listeners.lock().unwrap();
                for l in listeners.iter().filter(|l| l.wants_tx_feedback) {
                    let _ = l.sender.try_send(frame);
                }
            }
        }
    }
}
