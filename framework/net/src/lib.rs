//! The CAN frame plane: C1 Bus Port, C2 Frame Router, C3 Frame Logger.
//!
//! A single [`router::FrameRouter`] owns the dispatch queue and the bus
//! registry; [`port::BusPort`] handles borrowed from it are the public
//! surface a CLI/web/scripting host (out of scope here) would drive.

pub mod device;
pub mod frame;
pub mod logger;
pub mod port;
pub mod router;

pub use device::{Transceiver, TransceiverError, TransmitOutcome};
pub use frame::{BusIndex, Frame, Origin};
pub use logger::{CrtdLogger, FilterRecord, FrameLogger, LogEvent, LogFilter, TraceLogger, CANLOG_MAX_FILTERS};
pub use port::{
    AutoPowerOffPolicy, BusMode, BusPort, BusSpeed, Counters, DbcAttachment, LogStatusKind, PortError,
    PowerState, WriteOutcome,
};
pub use router::{DispatchItem, FrameRouter};
