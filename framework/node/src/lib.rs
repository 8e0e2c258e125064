//! Composition root crate: wires C1-C11 (frame plane, dbc codec, polling
//! engine) into one [`CanCore`], exposing the programmatic surface a
//! CLI/web/scripting host would call into (spec §6). Building that host
//! is explicitly out of scope here.

pub mod config;
pub mod error;
pub mod root;
pub mod transport;
pub mod vehicle;

pub use config::CoreConfig;
pub use error::CoreError;
pub use root::CanCore;
pub use vehicle::{forwarding_series, VehicleSignal};

pub use tcan_core::{CanId, FrameFormat, Number};
pub use tcan_dbc::{DbcFile, DecodedSignal, Message, Signal};
pub use tcan_net::{AutoPowerOffPolicy, BusMode, BusSpeed, Counters, FilterRecord, LogFilter, Transceiver, WriteOutcome};
pub use tcan_poll::{PollEntry, PollError, Protocol, StatsKey, TickEvent};
