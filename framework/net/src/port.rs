//! C1 Bus Port: one physical CAN bus, its mode/speed/power, TX queue,
//! status counters and watchdog.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use tcan_core::CanId;

use crate::device::Transceiver;
use crate::frame::{BusIndex, Frame, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusMode {
    Off,
    Listen,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

/// Who is allowed to power this bus down on shutdown (§4.8, supplemented
/// feature — see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoPowerOffPolicy {
    #[default]
    Never,
    OnSystemShutdown,
    OnVehicleOff,
}

/// One of the five bitrates the CLI surface accepts (§6); `baud=0` in the
/// CLI means "use the DBC's bit timing" and is resolved by the caller
/// before a [`BusSpeed`] is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSpeed {
    Kbps100,
    Kbps125,
    Kbps250,
    Kbps500,
    Mbps1,
}

impl BusSpeed {
    pub const fn kbps(self) -> u32 {
        match self {
            BusSpeed::Kbps100 => 100,
            BusSpeed::Kbps125 => 125,
            BusSpeed::Kbps250 => 250,
            BusSpeed::Kbps500 => 500,
            BusSpeed::Mbps1 => 1000,
        }
    }

    pub const fn from_kbps(kbps: u32) -> Option<Self> {
        match kbps {
            100 => Some(BusSpeed::Kbps100),
            125 => Some(BusSpeed::Kbps125),
            250 => Some(BusSpeed::Kbps250),
            500 => Some(BusSpeed::Kbps500),
            1000 => Some(BusSpeed::Mbps1),
            _ => None,
        }
    }
}

/// Plain counters, updated only on the router's consumer task (§5 shared
/// resource policy). Never decrement except through [`Counters::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub interrupts: u32,
    pub rx_packets: u32,
    pub tx_packets: u32,
    pub rx_errors: u32,
    pub tx_errors: u32,
    pub rx_overflow: u32,
    pub tx_overflow: u32,
    pub tx_delays: u32,
    pub watchdog_resets: u32,
    pub error_flags: u32,
}

impl Counters {
    /// Wrapping sum of every integer field, used to suppress repeated
    /// `log_status(Error)` emissions when nothing actually changed.
    pub fn checksum(&self) -> u32 {
        self.interrupts
            .wrapping_add(self.rx_packets)
            .wrapping_add(self.tx_packets)
            .wrapping_add(self.rx_errors)
            .wrapping_add(self.tx_errors)
            .wrapping_add(self.rx_overflow)
            .wrapping_add(self.tx_overflow)
            .wrapping_add(self.tx_delays)
            .wrapping_add(self.watchdog_resets)
            .wrapping_add(self.error_flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    Queued,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortError {
    BusNotFound,
    BusNotPowered,
    BusBusy,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::BusNotFound => write!(f, "bus not found"),
            PortError::BusNotPowered => write!(f, "bus not powered"),
            PortError::BusBusy => write!(f, "bus busy"),
        }
    }
}

impl std::error::Error for PortError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Severity passed to `log_status`, forwarded to the Frame Logger (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatusKind {
    Info,
    Error,
}

/// A reference the DBC store hands a bus port when it locks a file for it.
/// Dropping/detaching runs `on_detach` exactly once to release the lock,
/// keeping `tcan-net` decoupled from `tcan-dbc` while still honouring the
/// "attach increments, detach decrements" lifecycle from §4.1.
pub struct DbcAttachment {
    pub name: String,
    on_detach: Option<Box<dyn FnOnce() + Send>>,
}

impl DbcAttachment {
    pub fn new(name: impl Into<String>, on_detach: impl FnOnce() + Send + 'static) -> Self {
        Self { name: name.into(), on_detach: Some(Box::new(on_detach)) }
    }
}

impl Drop for DbcAttachment {
    fn drop(&mut self) {
        if let Some(f) = self.on_detach.take() {
            f();
        }
    }
}

impl fmt::Debug for DbcAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbcAttachment").field("name", &self.name).finish()
    }
}

/// Internal, router-owned state for one bus. Public API is exposed only
/// through [`crate::router::FrameRouter::bus`] handles.
pub(crate) struct PortState {
    pub name: String,
    pub mode: BusMode,
    pub speed: Option<BusSpeed>,
    pub power: PowerState,
    pub auto_power_off: AutoPowerOffPolicy,
    pub dbc: Option<DbcAttachment>,
    pub status: Counters,
    pub last_status_checksum: Option<u32>,
    pub last_rx_ms: u64,
    pub transceiver: Box<dyn Transceiver>,
    pub tx_queue_tx: Sender<Frame>,
    pub tx_queue_rx: Receiver<Frame>,
}

impl PortState {
    pub(crate) fn new(name: impl Into<String>, transceiver: Box<dyn Transceiver>, tx_queue_cap: usize) -> Self {
        let (tx_queue_tx, tx_queue_rx) = crossbeam_channel::bounded(tx_queue_cap.max(1));
        Self {
            name: name.into(),
            mode: BusMode::Off,
            speed: None,
            power: PowerState::Off,
            auto_power_off: AutoPowerOffPolicy::default(),
            dbc: None,
            status: Counters::default(),
            last_status_checksum: None,
            last_rx_ms: 0,
            transceiver,
            tx_queue_tx,
            tx_queue_rx,
        }
    }
}

/// Public handle to one bus, obtained from the owning [`FrameRouter`].
///
/// Mirrors §4.1's operation list; every mutating call is forwarded to the
/// router's consumer task through the dispatch queue or executed under the
/// router's per-bus mutex, matching the "counters updated only on the
/// consumer task" policy from §5.
pub struct BusPort<'r> {
    pub(crate) index: BusIndex,
    pub(crate) router: &'r crate::router::FrameRouter,
}

impl<'r> BusPort<'r> {
    pub fn index(&self) -> BusIndex {
        self.index
    }

    pub fn start(&self, mode: BusMode, speed: BusSpeed, dbc: Option<DbcAttachment>) -> Result<(), PortError> {
        self.router.start_bus(self.index, mode, speed, dbc)
    }

    pub fn stop(&self) -> Result<(), PortError> {
        self.router.stop_bus(self.index)
    }

    pub fn attach_dbc(&self, dbc: DbcAttachment) -> Result<(), PortError> {
        self.router.attach_dbc(self.index, dbc)
    }

    pub fn detach_dbc(&self) -> Result<Option<String>, PortError> {
        self.router.detach_dbc(self.index)
    }

    pub fn write(&self, frame: Frame, max_wait: Duration) -> Result<WriteOutcome, PortError> {
        self.router.write(self.index, frame, max_wait)
    }

    pub fn write_standard(&self, id: u16, data: &[u8]) -> Result<WriteOutcome, PortError> {
        assert!(id <= 0x7FF, "standard id out of range: {id:#x}");
        assert!(data.len() <= 8, "payload too long for a CAN frame: {} bytes", data.len());
        let frame = Frame::from_slice(self.index, CanId::standard(id), data, Origin::Tx);
        self.write(frame, Duration::ZERO)
    }

    pub fn write_extended(&self, id: u32, data: &[u8]) -> Result<WriteOutcome, PortError> {
        assert!(id <= 0x1FFF_FFFF, "extended id out of range: {id:#x}");
        assert!(data.len() <= 8, "payload too long for a CAN frame: {} bytes", data.len());
        let frame = Frame::from_slice(self.index, CanId::extended(id), data, Origin::Tx);
        self.write(frame, Duration::ZERO)
    }

    pub fn clear_status(&self) -> Result<(), PortError> {
        self.router.clear_status(self.index)
    }

    pub fn log_status(&self, kind: LogStatusKind) -> Result<(), PortError> {
        self.router.log_status(self.index, kind)
    }

    pub fn status(&self) -> Result<Counters, PortError> {
        self.router.status(self.index)
    }

    pub fn mode(&self) -> Result<BusMode, PortError> {
        self.router.mode(self.index)
    }

    pub fn set_auto_power_off(&self, policy: AutoPowerOffPolicy) -> Result<(), PortError> {
        self.router.set_auto_power_off(self.index, policy)
    }

    pub fn auto_power_off(&self) -> Result<AutoPowerOffPolicy, PortError> {
        self.router.auto_power_off(self.index)
    }
}

/// Enqueue helper used by the TX queue drain path: never blocks the
/// producer; on full it reports overflow to the caller so the
/// `tx_overflow` counter can be bumped.
pub(crate) fn try_enqueue(sender: &Sender<Frame>, frame: Frame) -> Result<(), ()> {
    match sender.try_send(frame) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => Err(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_changes_with_any_field() {
        let mut c = Counters::default();
        let base = c.checksum();
        c.rx_packets += 1;
        assert_ne!(base, c.checksum());
    }

    #[test]
    fn speed_roundtrips_kbps() {
        for s in [BusSpeed::Kbps100, BusSpeed::Kbps125, BusSpeed::Kbps250, BusSpeed::Kbps500, BusSpeed::Mbps1] {
            assert_eq!(BusSpeed::from_kbps(s.kbps()), Some(s));
        }
    }
}
