//! §6 upward interface: decoded signal values (un-polled DBC traffic) and
//! scheduled poll results are both handed to whatever sits above this
//! crate through the same narrow trait, mirroring how the original
//! source forwards both paths into `vehicle.cpp`'s metric table.

use std::sync::{Arc, Mutex};

use tcan_dbc::DecodedSignal;
use tcan_poll::{PollEntry, PollSeries};

/// Implemented by the layer above this crate (a metric table, a
/// scripting host, a CLI) that wants decoded CAN values.
pub trait VehicleSignal: Send {
    /// An un-polled frame's signals, decoded against the bus's attached
    /// DBC (spec §2's "C2 -> C5/C6" path).
    fn on_signals(&mut self, bus: u32, message_id: u32, signals: &[DecodedSignal]);

    /// A scheduled poll entry completed successfully; `data` is the
    /// reassembled response payload past the echoed identifier.
    fn on_poll_result(&mut self, bus: u32, pid: u16, data: &[u8]) {
        let _ = (bus, pid, data);
    }

    /// A scheduled poll entry failed; `nrc == 0` means it timed out
    /// rather than receiving a negative response.
    fn on_poll_error(&mut self, bus: u32, pid: u16, nrc: u8) {
        let _ = (bus, pid, nrc);
    }
}

/// Build a [`PollSeries`] that forwards its one request's outcome to
/// `sink` instead of a bespoke closure pair, so callers adding a
/// schedule entry for the vehicle layer don't have to hand-write the
/// [`tcan_poll::PacketSeries`] callbacks themselves.
pub fn forwarding_series(bus: u32, entry: PollEntry, sink: Arc<Mutex<dyn VehicleSignal>>) -> Box<dyn PollSeries> {
    let pid = entry.pid;
    let sink_ok = sink.clone();
    let sink_err = sink;
    Box::new(tcan_poll::PacketSeries::new(
        entry,
        Box::new(move |data: &[u8]| {
            sink_ok.lock().unwrap().on_poll_result(bus, pid, data);
        }),
        Box::new(move |nrc: u8| {
            sink_err.lock().unwrap().on_poll_error(bus, pid, nrc);
        }),
    ))
}
