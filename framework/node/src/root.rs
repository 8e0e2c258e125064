//! Composition root wiring C1–C11 together (§4.8, §6). Mirrors the
//! original's `vehicle.cpp`/`can.cpp` glue: one process-wide instance
//! owning the frame router, the dbc store and the poller supervisor,
//! exposing the programmatic surface a CLI/web/scripting host calls
//! into. Wiring a text shell on top of it is explicitly out of scope
//! (spec §6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::warn;

use tcan_core::{CanId, SystemClock};
use tcan_dbc::{DbcFile, DbcStore};
use tcan_net::{
    AutoPowerOffPolicy, BusMode, BusSpeed, Counters, DbcAttachment, Frame, FrameLogger, FrameRouter,
    LogFilter, Origin, PortError, Transceiver, TraceLogger, WriteOutcome,
};
use tcan_poll::{Command, DispatchRequest, PollEntry, PollError, PollSeries, PollSingleHandle, PollerSupervisor, TickEvent};
use tcan_transport::isotp;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::transport::BusTransport;
use crate::vehicle::VehicleSignal;

/// Owns every bus, the dbc store and the poller for one process. Built
/// with [`Arc::new_cyclic`] so its own RX/TX callbacks can hold a `Weak`
/// reference back to it instead of creating a reference cycle through
/// the router they're registered on.
pub struct CanCore {
    config: CoreConfig,
    router: Arc<FrameRouter>,
    dbc_store: Arc<DbcStore>,
    poller: Arc<PollerSupervisor>,
    attached_dbc: Mutex<Vec<Option<String>>>,
    transport: Mutex<Vec<BusTransport>>,
    sinks: Mutex<Vec<Arc<Mutex<dyn VehicleSignal>>>>,
    vehicle_on: AtomicBool,
}

impl CanCore {
    /// Register one bus per `(name, transceiver)` pair up front. Buses
    /// start life in `BusMode::Off`, per §3's lifecycle; call
    /// [`CanCore::bus_start`] to bring one up.
    pub fn new(config: CoreConfig, buses: Vec<(String, Box<dyn Transceiver>)>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let router = Arc::new(FrameRouter::new(config.dispatch_queue_depth));
            let dbc_store = Arc::new(DbcStore::new());
            let poller = Arc::new(PollerSupervisor::new(0, config.stats_capacity));

            let mut attached_dbc = Vec::with_capacity(buses.len());
            let mut transport = Vec::with_capacity(buses.len());
            for (name, transceiver) in buses {
                router.add_bus(name, transceiver, config.tx_queue_depth);
                poller.add_bus();
                attached_dbc.push(None);
                transport.push(BusTransport::new(config.keepalive_s as u32, config.separation_time_ms));
            }

            poller.enqueue(Command::ResponseSep(config.separation_time_ms));
            poller.enqueue(Command::Keepalive(config.keepalive_s));
            poller.drain_commands();

            let core = Self {
                config,
                router: router.clone(),
                dbc_store,
                poller: poller.clone(),
                attached_dbc: Mutex::new(attached_dbc),
                transport: Mutex::new(transport),
                sinks: Mutex::new(Vec::new()),
                vehicle_on: AtomicBool::new(false),
            };

            let rx_weak = weak.clone();
            router.add_rx_callback("tcan-node::rx", move |frame: &Frame| {
                if let Some(core) = rx_weak.upgrade() {
                    core.handle_rx(frame);
                }
            });

            let tx_weak = weak.clone();
            router.add_tx_callback("tcan-node::tx", move |frame: &Frame, ok: bool| {
                if !ok {
                    if let Some(core) = tx_weak.upgrade() {
                        core.poller.on_tx_failure(frame.bus as u32);
                    }
                }
            });

            core
        })
    }

    pub fn bus_count(&self) -> usize {
        self.router.bus_count()
    }

    // ---- §6 "Bus lifecycle" --------------------------------------------

    pub fn bus_start(&self, bus: u32, mode: BusMode, speed: BusSpeed, dbc_name: Option<&str>) -> Result<(), CoreError> {
        let dbc = dbc_name.map(|name| self.lock_attachment(name)).transpose()?;
        self.router.bus(bus as u8).start(mode, speed, dbc)?;
        self.set_attached_name(bus, dbc_name.map(str::to_string));
        Ok(())
    }

    pub fn bus_stop(&self, bus: u32) -> Result<(), CoreError> {
        self.router.bus(bus as u8).stop()?;
        self.set_attached_name(bus, None);
        Ok(())
    }

    pub fn bus_attach_dbc(&self, bus: u32, name: &str) -> Result<(), CoreError> {
        let attachment = self.lock_attachment(name)?;
        self.router.bus(bus as u8).attach_dbc(attachment)?;
        self.set_attached_name(bus, Some(name.to_string()));
        Ok(())
    }

    pub fn bus_detach_dbc(&self, bus: u32) -> Result<Option<String>, CoreError> {
        let name = self.router.bus(bus as u8).detach_dbc()?;
        self.set_attached_name(bus, None);
        Ok(name)
    }

    /// Name of the dbc currently attached to `bus`, if any. `tcan-net`
    /// only exposes this destructively through `detach_dbc`, so the
    /// composition root tracks it alongside the attachment itself.
    pub fn bus_dbc_name(&self, bus: u32) -> Option<String> {
        self.attached_dbc.lock().unwrap().get(bus as usize).cloned().flatten()
    }

    fn lock_attachment(&self, name: &str) -> Result<DbcAttachment, CoreError> {
        self.dbc_store.lock(name)?;
        let store = self.dbc_store.clone();
        let owned = name.to_string();
        let unlock_name = owned.clone();
        Ok(DbcAttachment::new(owned, move || store.unlock(&unlock_name)))
    }

    fn set_attached_name(&self, bus: u32, name: Option<String>) {
        if let Some(slot) = self.attached_dbc.lock().unwrap().get_mut(bus as usize) {
            *slot = name;
        }
    }

    pub fn bus_tx(&self, bus: u32, id: u32, extended: bool, data: &[u8]) -> Result<WriteOutcome, CoreError> {
        let port = self.router.bus(bus as u8);
        if extended {
            Ok(port.write_extended(id, data)?)
        } else {
            Ok(port.write_standard(id as u16, data)?)
        }
    }

    /// Inject a frame as if it had arrived from the transceiver (§6
    /// "rx (simulate)"), exercising the same dispatch-queue path a real
    /// RX interrupt would.
    pub fn bus_rx_simulate(&self, bus: u32, id: u32, extended: bool, data: &[u8]) {
        let can_id = if extended { CanId::extended(id) } else { CanId::standard(id as u16) };
        self.router.deliver_rx(Frame::from_slice(bus as u8, can_id, data, Origin::Rx));
    }

    pub fn bus_status(&self, bus: u32) -> Result<Counters, CoreError> {
        Ok(self.router.bus(bus as u8).status()?)
    }

    pub fn bus_clear_status(&self, bus: u32) -> Result<(), CoreError> {
        Ok(self.router.bus(bus as u8).clear_status()?)
    }

    pub fn bus_mode(&self, bus: u32) -> Result<BusMode, CoreError> {
        Ok(self.router.bus(bus as u8).mode()?)
    }

    pub fn bus_set_auto_power_off(&self, bus: u32, policy: AutoPowerOffPolicy) -> Result<(), CoreError> {
        Ok(self.router.bus(bus as u8).set_auto_power_off(policy)?)
    }

    // ---- §6 "Logging" ----------------------------------------------------

    pub fn log_trace(&self, filter: LogFilter) {
        self.router.set_logger(Some(Box::new(TraceLogger::new(filter))));
    }

    pub fn log_off(&self) {
        self.router.set_logger(None);
    }

    pub fn log_crtd(&self, path: &std::path::Path, filter: LogFilter) -> std::io::Result<()> {
        let logger = tcan_net::CrtdLogger::create(path, filter)?;
        self.router.set_logger(Some(Box::new(logger) as Box<dyn FrameLogger>));
        Ok(())
    }

    // ---- §6 "DBC management" ---------------------------------------------

    pub fn dbc_list(&self) -> Vec<String> {
        self.dbc_store.list()
    }

    pub fn dbc_load(&self, name: &str, text: &str, path: Option<&std::path::Path>) -> Result<Arc<DbcFile>, CoreError> {
        Ok(self.dbc_store.load(name, text, path)?)
    }

    pub fn dbc_unload(&self, name: &str) -> Result<(), CoreError> {
        Ok(self.dbc_store.unload(name)?)
    }

    pub fn dbc_replace(&self, name: &str, text: &str, path: Option<&std::path::Path>) -> Result<Arc<DbcFile>, CoreError> {
        Ok(self.dbc_store.replace(name, text, path)?)
    }

    pub fn dbc_show(&self, name: &str) -> Option<Arc<DbcFile>> {
        self.dbc_store.get(name)
    }

    /// A human-readable listing of every message and signal, for the
    /// `dbc dump` surface. Not a DBC-syntax serialiser (§9 open
    /// question, resolved in DESIGN.md): round-tripping back to DBC text
    /// byte-for-byte is out of scope here.
    pub fn dbc_dump(&self, name: &str) -> Option<String> {
        let file = self.dbc_store.get(name)?;
        let mut out = format!("; {} (version {})\n", file.name, file.version);
        for comment in &file.comments {
            out.push_str(&format!("; {}\n", comment.text));
        }
        for msg in &file.messages {
            out.push_str(&format!("BO_ {} {}: {}\n", msg.id, msg.name, msg.byte_size));
            for signal in &msg.signals {
                out.push_str(&format!(
                    " SG_ {} : {}|{}@{:?} ({},{}) [{}|{}] \"{}\"\n",
                    signal.name,
                    signal.start_bit,
                    signal.bit_len,
                    signal.byte_order,
                    signal.factor,
                    signal.offset,
                    signal.min,
                    signal.max,
                    signal.unit
                ));
            }
        }
        Some(out)
    }

    pub fn dbc_save(&self, name: &str, path: &std::path::Path) -> std::io::Result<()> {
        let text = self.dbc_dump(name).ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "dbc not loaded"))?;
        std::fs::write(path, text)
    }

    pub fn dbc_select(&self, bus: u32, name: &str) -> Result<(), CoreError> {
        self.bus_attach_dbc(bus, name)
    }

    pub fn dbc_deselect(&self, bus: u32) -> Result<Option<String>, CoreError> {
        self.bus_detach_dbc(bus)
    }

    // ---- §6 "Poller" -------------------------------------------------------

    pub fn poller_pause(&self) {
        self.poller.enqueue(Command::Pause);
    }

    pub fn poller_resume(&self) {
        self.poller.enqueue(Command::Resume);
    }

    pub fn poller_set_state(&self, state: u8) {
        self.poller.set_state(state);
    }

    pub fn poller_throttle(&self, sequence_max: u8) {
        self.poller.enqueue(Command::Throttle(sequence_max));
    }

    pub fn poller_response_sep(&self, ms: u8) {
        self.poller.enqueue(Command::ResponseSep(ms));
    }

    pub fn poller_keepalive(&self, s: u16) {
        self.poller.enqueue(Command::Keepalive(s));
    }

    pub fn poller_reset_timer(&self, mode: u8) {
        self.poller.enqueue(Command::ResetTimer(mode));
    }

    pub fn poller_set_filter(&self, records: &[tcan_net::FilterRecord]) {
        self.poller.set_filter(records);
    }

    pub fn poller_clear_filter(&self) {
        self.poller.clear_filter();
    }

    pub fn poller_stat_average(&self, key: tcan_poll::StatsKey) -> Option<u32> {
        self.poller.stat_average(key)
    }

    pub fn poller_stat_peak(&self, key: tcan_poll::StatsKey) -> Option<u32> {
        self.poller.stat_peak(key)
    }

    pub fn add_series(&self, bus: u32, name: &str, series: Box<dyn PollSeries>, blocking: bool) -> Result<(), CoreError> {
        Ok(self.poller.add_series(bus, name, series, blocking)?)
    }

    pub fn remove_series(&self, bus: u32, name: &str) -> Result<(), CoreError> {
        self.poller.remove_series(bus, name).map_err(|_| CoreError::BusNotFound(bus))
    }

    pub fn clear_series(&self, bus: u32) {
        self.poller.clear_series(bus);
    }

    /// Priority single request (§4.7 `poll_single`). Never call this
    /// from the task driving [`CanCore::pump`] — see
    /// [`tcan_poll::PollerSupervisor::begin_single`]'s deadlock warning.
    pub fn poll_single(&self, bus: u32, entry: PollEntry, timeout: Duration) -> Result<Vec<u8>, PollError> {
        let mut handle: PollSingleHandle<'_> = self.poller.begin_single(bus, entry)?;
        if let Some(dispatch) = handle.dispatch() {
            self.dispatch(bus, dispatch);
        }
        handle.wait(timeout)
    }

    pub fn register_signal_sink(&self, sink: Arc<Mutex<dyn VehicleSignal>>) {
        self.sinks.lock().unwrap().push(sink);
    }

    pub fn set_vehicle_on(&self, on: bool) {
        self.vehicle_on.store(on, Ordering::SeqCst);
    }

    /// §4.1 watchdog; the embedding binary calls this roughly every 10s.
    pub fn tick_watchdog(&self) {
        self.router.tick_watchdog(self.vehicle_on.load(Ordering::SeqCst));
    }

    pub fn tick_ms(&self) -> u32 {
        self.poller.tick_ms()
    }

    /// Drain whatever RX frames the router has queued without advancing
    /// the poller's tick, so a caller blocked in [`CanCore::poll_single`]
    /// on another thread can observe a simulated response.
    pub fn drain_rx(&self) -> usize {
        self.router.drain_available()
    }

    // ---- driving loop (§5) -------------------------------------------------

    /// Drain the dispatch queue, apply queued poller commands, advance
    /// every bus's engine by one `event`, and transmit anything the
    /// engines dispatched. Call from the single consumer task at
    /// [`CanCore::tick_ms`] cadence (plus on every completed response,
    /// per §4.7's `Successful` event).
    pub fn pump(&self, event: TickEvent) {
        self.router.drain_available();
        self.poller.drain_commands();
        self.apply_transport_params();
        for (bus, request) in self.poller.tick_all(event) {
            self.dispatch(bus, request);
        }
        for bus in 0..self.router.bus_count() as u8 {
            let _ = self.router.drain_tx_queue(bus);
        }
        self.drive_isotp_senders();
    }

    /// Push the supervisor's live separation-time/keepalive parameters
    /// into every bus's transport state (§4.8's `ResponseSep`/`Keepalive`
    /// commands) ahead of this tick's dispatch, so a command queued
    /// between ticks is visible to the transport layer before it's used.
    fn apply_transport_params(&self) {
        let response_sep_ms = self.poller.response_sep_ms();
        let keepalive_s = self.poller.keepalive_s();
        let mut transport = self.transport.lock().unwrap();
        for state in transport.iter_mut() {
            state.apply_params(response_sep_ms, keepalive_s);
        }
    }

    fn dispatch(&self, bus: u32, request: DispatchRequest) {
        if let Some(job) = self.poller.job(bus) {
            let mut transport = self.transport.lock().unwrap();
            if let Some(state) = transport.get_mut(bus as usize) {
                state.begin_job(job.protocol);
            }
        }
        let outcome = match request {
            DispatchRequest::IsoTp { frame, tx_id, sender } => {
                {
                    let mut transport = self.transport.lock().unwrap();
                    if let Some(state) = transport.get_mut(bus as usize) {
                        state.set_isotp_sender(sender);
                    }
                }
                self.router.bus(bus as u8).write(Frame::from_slice(bus as u8, tx_id, &frame, Origin::Tx), Duration::ZERO)
            }
            DispatchRequest::Vwtp { tx_id } => self.dispatch_vwtp_start(bus, tx_id),
        };
        match outcome {
            Ok(WriteOutcome::Fail) => self.poller.on_tx_failure(bus),
            Ok(_) => {}
            Err(e) => warn!("bus {bus} poll dispatch failed: {e}"),
        }
    }

    /// Advance every bus's in-flight ISO-TP sender (§4.5 TX path): sends
    /// the next queued consecutive frame once its separation-time wait
    /// has elapsed, and drops the sender once it reports `Done`. Flow
    /// control itself is fed in as it arrives, from `handle_flow_control`.
    fn drive_isotp_senders(&self) {
        for bus in 0..self.router.bus_count() as u8 {
            let step = {
                let mut transport = self.transport.lock().unwrap();
                let Some(state) = transport.get_mut(bus as usize) else { continue };
                let Some(sender) = state.isotp_sender_mut() else { continue };
                sender.tick()
            };
            match step {
                isotp::SendStep::Frame(frame) => {
                    if let Some(job) = self.poller.job(bus as u32) {
                        let _ = self.router.bus(bus).write(Frame::from_slice(bus, job.tx_id, &frame, Origin::Tx), Duration::ZERO);
                    }
                }
                isotp::SendStep::Done => {
                    let mut transport = self.transport.lock().unwrap();
                    if let Some(state) = transport.get_mut(bus as usize) {
                        state.clear_isotp_sender();
                    }
                }
                isotp::SendStep::WaitTicks(_) | isotp::SendStep::AwaitingFlowControl => {}
            }
        }
    }

    /// Feed a received flow-control frame (answering our own multi-frame
    /// request) to that bus's in-flight sender and push out the first
    /// consecutive frame it unblocks, if any; the rest are driven by
    /// `drive_isotp_senders` on subsequent ticks.
    fn handle_flow_control(&self, bus: u32, status: isotp::FlowStatus, block_size: u8, st_byte: u8) {
        let Some(job) = self.poller.job(bus) else { return };
        let tick_us = self.tick_ms().saturating_mul(1000).max(1);
        let step = {
            let mut transport = self.transport.lock().unwrap();
            let Some(state) = transport.get_mut(bus as usize) else { return };
            let Some(sender) = state.isotp_sender_mut() else { return };
            if sender.on_flow_control(status, block_size, st_byte, tick_us).is_err() {
                return;
            }
            sender.tick()
        };
        match step {
            isotp::SendStep::Frame(frame) => {
                let _ = self.router.bus(bus as u8).write(Frame::from_slice(bus as u8, job.tx_id, &frame, Origin::Tx), Duration::ZERO);
            }
            isotp::SendStep::Done => {
                let mut transport = self.transport.lock().unwrap();
                if let Some(state) = transport.get_mut(bus as usize) {
                    state.clear_isotp_sender();
                }
            }
            isotp::SendStep::WaitTicks(_) | isotp::SendStep::AwaitingFlowControl => {}
        }
    }

    fn dispatch_vwtp_start(&self, bus: u32, tx_id: CanId) -> Result<WriteOutcome, PortError> {
        let now = SystemClock.now_ms();
        {
            let mut transport = self.transport.lock().unwrap();
            if let Some(state) = transport.get_mut(bus as usize) {
                let channel = state.vwtp();
                if channel.is_closed() {
                    let _ = channel.open(now);
                    let _ = channel.on_setup_ack(Default::default(), now);
                    let _ = channel.on_params_ack(now);
                }
                let _ = channel.start_poll(now);
                let _ = channel.begin_transmit(now);
            }
        }
        self.router.bus(bus as u8).write(Frame::from_slice(bus as u8, tx_id, &[], Origin::Tx), Duration::ZERO)
    }

    fn handle_rx(&self, frame: &Frame) {
        let bus = frame.bus as u32;
        if let Some(job) = self.poller.job(bus) {
            if !job.raw_frame_view.is_empty() && job.rx_id_matches(frame.id) {
                self.feed_poll_response(bus, frame.id, frame.payload());
                return;
            }
        }
        self.decode_unsolicited(bus, frame);
    }

    fn feed_poll_response(&self, bus: u32, rx_id: CanId, payload: &[u8]) {
        let protocol = self.poller.job(bus).map(|j| j.protocol);
        if protocol == Some(tcan_poll::Protocol::Vwtp20) {
            self.feed_vwtp_response(bus, rx_id, payload);
            return;
        }
        let step = {
            let mut transport = self.transport.lock().unwrap();
            let Some(state) = transport.get_mut(bus as usize) else { return };
            state.on_isotp_frame(payload)
        };
        match step {
            Ok(isotp::RecvStep::Frame { ml_frame, chunk, offset, remain, flow_control }) => {
                if let Some(fc) = flow_control {
                    if let Some(job) = self.poller.job(bus) {
                        let _ = self.router.bus(bus as u8).write(Frame::from_slice(bus as u8, job.tx_id, &fc, Origin::Tx), Duration::ZERO);
                    }
                }
                self.poller.deliver_response_frame(bus, rx_id, ml_frame, offset, remain, &chunk);
            }
            Ok(isotp::RecvStep::FlowControl { status, block_size, st_byte }) => {
                self.handle_flow_control(bus, status, block_size, st_byte);
            }
            Err(e) => warn!("bus {bus} isotp reassembly error: {e}"),
        }
    }

    fn feed_vwtp_response(&self, bus: u32, rx_id: CanId, payload: &[u8]) {
        let now = SystemClock.now_ms();
        let delivered = {
            let mut transport = self.transport.lock().unwrap();
            let Some(state) = transport.get_mut(bus as usize) else { return };
            let seq = payload.first().copied().unwrap_or(0) & 0x0F;
            let channel = state.vwtp();
            if channel.begin_receive(seq, now).is_err() {
                return;
            }
            channel.finish_round(now);
            payload.get(1..).unwrap_or(&[]).to_vec()
        };
        self.poller.deliver_response_frame(bus, rx_id, 0, 0, 0, &delivered);
    }

    fn decode_unsolicited(&self, bus: u32, frame: &Frame) {
        let Some(name) = self.bus_dbc_name(bus) else { return };
        let Some(file) = self.dbc_store.get(&name) else { return };
        let Some(decoded) = file.decode_frame(frame.id.raw(), frame.payload()) else { return };
        if decoded.is_empty() {
            return;
        }
        let sinks = self.sinks.lock().unwrap();
        for sink in sinks.iter() {
            sink.lock().unwrap().on_signals(bus, frame.id.raw(), &decoded);
        }
    }

    /// Shutdown sequence (§4.8): clear every bus's series list, enqueue
    /// the shutdown command, then power down buses whose policy asks
    /// for it given the last known vehicle-on state.
    pub fn shutdown(&self) {
        self.poller.shutdown();
        let vehicle_on = self.vehicle_on.load(Ordering::SeqCst);
        for bus in 0..self.router.bus_count() as u8 {
            let policy = self.router.bus(bus).auto_power_off().unwrap_or_default();
            let power_down = match policy {
                AutoPowerOffPolicy::Never => false,
                AutoPowerOffPolicy::OnSystemShutdown => true,
                AutoPowerOffPolicy::OnVehicleOff => !vehicle_on,
            };
            if power_down {
                let _ = self.router.bus(bus).stop();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tcan_net::{TransceiverError, TransmitOutcome};

    /// A transceiver double local to this crate's tests: `tcan-net`'s own
    /// mock lives behind `#[cfg(test)] pub(crate)` and is not reachable
    /// from here.
    struct StubTransceiver;

    impl Transceiver for StubTransceiver {
        fn power_on(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn power_off(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn start(&mut self, _mode: BusMode, _speed: BusSpeed) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }
        fn transmit(&mut self, _frame: &Frame) -> Result<TransmitOutcome, TransceiverError> {
            Ok(TransmitOutcome::Sent)
        }
    }

    fn core_with_one_bus() -> Arc<CanCore> {
        CanCore::new(CoreConfig::default(), vec![("bus0".into(), Box::new(StubTransceiver))])
    }

    #[test]
    fn bus_starts_and_writes() {
        let core = core_with_one_bus();
        core.bus_start(0, BusMode::Active, BusSpeed::Kbps500, None).unwrap();
        let outcome = core.bus_tx(0, 0x123, false, &[1, 2, 3]).unwrap();
        assert_eq!(outcome, WriteOutcome::Ok);
    }

    #[test]
    fn attaching_unknown_dbc_fails() {
        let core = core_with_one_bus();
        core.bus_start(0, BusMode::Active, BusSpeed::Kbps500, None).unwrap();
        assert!(core.bus_attach_dbc(0, "nope").is_err());
    }

    #[test]
    fn attach_then_detach_round_trips_the_name() {
        let core = core_with_one_bus();
        core.bus_start(0, BusMode::Active, BusSpeed::Kbps500, None).unwrap();
        core.dbc_load("a", "VERSION \"1\"\nBU_: A\n", None).unwrap();
        core.bus_attach_dbc(0, "a").unwrap();
        assert_eq!(core.bus_dbc_name(0), Some("a".to_string()));
        assert_eq!(core.bus_detach_dbc(0).unwrap(), Some("a".to_string()));
        assert_eq!(core.bus_dbc_name(0), None);
    }

    #[test]
    fn shutdown_powers_down_buses_marked_on_system_shutdown() {
        let core = core_with_one_bus();
        core.bus_start(0, BusMode::Active, BusSpeed::Kbps500, None).unwrap();
        core.bus_set_auto_power_off(0, AutoPowerOffPolicy::OnSystemShutdown).unwrap();
        core.shutdown();
        assert_eq!(core.bus_mode(0).unwrap(), BusMode::Off);
    }
}
