//! C3 Frame Logger: a pluggable sink for frames, status transitions and
//! free text, filterable by bus x id range.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use log::{debug, trace};

use crate::frame::{BusIndex, Frame, Origin};
use crate::port::{Counters, LogStatusKind};

/// Maximum number of filter records a logger accepts, mirroring
/// `CANLOG_MAX_FILTERS` from the original source.
pub const CANLOG_MAX_FILTERS: usize = 3;

/// One `[bus:]id[-id]` filter record. `bus == None` means "any bus".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterRecord {
    pub bus: Option<BusIndex>,
    pub id_lo: u32,
    pub id_hi: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParseError;

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filter syntax, expected [bus:]id[-id]")
    }
}

impl FilterRecord {
    /// Parse the CLI's `[bus:]id[-id]` syntax. `id_lo > id_hi` is
    /// normalised by swapping, per §4.3.
    pub fn parse(s: &str) -> Result<Self, FilterParseError> {
        let (bus_part, id_part) = match s.split_once(':') {
            Some((b, rest)) => (Some(b), rest),
            None => (None, s),
        };
        let bus = match bus_part {
            Some(b) => Some(b.parse::<BusIndex>().map_err(|_| FilterParseError)?),
            None => None,
        };
        let (lo_str, hi_str) = match id_part.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (id_part, id_part),
        };
        let mut lo = u32::from_str_radix(lo_str.trim_start_matches("0x"), 16)
            .or_else(|_| lo_str.parse::<u32>())
            .map_err(|_| FilterParseError)?;
        let mut hi = u32::from_str_radix(hi_str.trim_start_matches("0x"), 16)
            .or_else(|_| hi_str.parse::<u32>())
            .map_err(|_| FilterParseError)?;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        Ok(Self { bus, id_lo: lo, id_hi: hi })
    }

    fn matches(&self, bus: BusIndex, id: u32) -> bool {
        let bus_ok = match self.bus {
            None => true,
            Some(b) => b == bus,
        };
        bus_ok && id >= self.id_lo && id <= self.id_hi
    }
}

/// Array of up to [`CANLOG_MAX_FILTERS`] records. An empty set passes
/// every frame (§3).
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    records: Vec<FilterRecord>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: FilterRecord) -> Result<(), FilterParseError> {
        if self.records.len() >= CANLOG_MAX_FILTERS {
            return Err(FilterParseError);
        }
        // Idempotent: `(clear; add X; add X)` equals `(clear; add X)`.
        if !self.records.contains(&record) {
            self.records.push(record);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn accepts(&self, bus: BusIndex, id: u32) -> bool {
        self.records.is_empty() || self.records.iter().any(|r| r.matches(bus, id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    Rx,
    Tx,
}

impl From<Origin> for LogEvent {
    fn from(o: Origin) -> Self {
        match o {
            Origin::Rx => LogEvent::Rx,
            Origin::Tx => LogEvent::Tx,
        }
    }
}

/// Implemented by every logger kind the router can hold active. Exactly
/// one logger is active at a time (§4.2).
pub trait FrameLogger: Send {
    fn log_frame(&mut self, event: LogEvent, frame: &Frame);
    fn log_status(&mut self, bus: BusIndex, name: &str, kind: LogStatusKind, status: &Counters);
    fn log_text(&mut self, bus: BusIndex, text: &str);
    fn flush(&mut self);
}

/// Emits to the in-process `log` crate at debug/verbose levels, filtered
/// by an optional [`LogFilter`].
pub struct TraceLogger {
    filter: LogFilter,
}

impl TraceLogger {
    pub fn new(filter: LogFilter) -> Self {
        Self { filter }
    }
}

impl FrameLogger for TraceLogger {
    fn log_frame(&mut self, event: LogEvent, frame: &Frame) {
        if !self.filter.accepts(frame.bus, frame.id.raw()) {
            return;
        }
        trace!(
            "{:?} bus={} id={} dlc={} data={:02X?}",
            event,
            frame.bus,
            frame.id,
            frame.dlc,
            frame.payload()
        );
    }

    fn log_status(&mut self, bus: BusIndex, name: &str, kind: LogStatusKind, status: &Counters) {
        debug!("bus {bus} ({name}) status {kind:?}: {status:?}");
    }

    fn log_text(&mut self, bus: BusIndex, text: &str) {
        debug!("bus {bus}: {text}");
    }

    fn flush(&mut self) {}
}

/// CRTD text capture file: `timestamp direction bus id length data...`.
pub struct CrtdLogger {
    filter: LogFilter,
    file: File,
    clock: tcan_core::SystemClock,
}

impl CrtdLogger {
    pub fn create(path: &std::path::Path, filter: LogFilter) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { filter, file, clock: tcan_core::SystemClock })
    }

    fn direction_char(event: LogEvent) -> char {
        match event {
            LogEvent::Rx => 'R',
            LogEvent::Tx => 'T',
        }
    }
}

impl FrameLogger for CrtdLogger {
    fn log_frame(&mut self, event: LogEvent, frame: &Frame) {
        if !self.filter.accepts(frame.bus, frame.id.raw()) {
            return;
        }
        let ts = self.clock.now_ms();
        let mut line = format!(
            "{} {} {} {:X} {}",
            ts,
            Self::direction_char(event),
            frame.bus,
            frame.id.raw(),
            frame.dlc
        );
        for b in frame.payload() {
            line.push_str(&format!(" {b:02X}"));
        }
        line.push('\n');
        let _ = self.file.write_all(line.as_bytes());
    }

    fn log_status(&mut self, bus: BusIndex, name: &str, kind: LogStatusKind, status: &Counters) {
        let ts = self.clock.now_ms();
        let _ = writeln!(self.file, "{ts} S {bus} {name} {kind:?} {status:?}");
    }

    fn log_text(&mut self, bus: BusIndex, text: &str) {
        let ts = self.clock.now_ms();
        let _ = writeln!(self.file, "{ts} X {bus} {text}");
    }

    fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tcan_core::CanId;

    #[test]
    fn empty_filter_passes_all() {
        let f = LogFilter::new();
        assert!(f.accepts(0, 0x7E8));
    }

    #[test]
    fn filter_matches_bus_and_range() {
        let mut f = LogFilter::new();
        f.add(FilterRecord { bus: Some(1), id_lo: 0x700, id_hi: 0x7FF }).unwrap();
        assert!(f.accepts(1, 0x7E8));
        assert!(!f.accepts(0, 0x7E8));
        assert!(!f.accepts(1, 0x100));
    }

    #[test]
    fn parse_normalises_swapped_range() {
        let r = FilterRecord::parse("1:7FF-700").unwrap();
        assert_eq!(r.id_lo, 0x700);
        assert_eq!(r.id_hi, 0x7FF);
        assert_eq!(r.bus, Some(1));
    }

    #[test]
    fn parse_without_bus_matches_any() {
        let r = FilterRecord::parse("7E0-7EF").unwrap();
        assert_eq!(r.bus, None);
        assert!(r.matches(0, 0x7E5));
        assert!(r.matches(2, 0x7E5));
    }

    #[test]
    fn add_is_idempotent() {
        let mut f = LogFilter::new();
        let r = FilterRecord::parse("100").unwrap();
        f.add(r).unwrap();
        f.add(r).unwrap();
        assert_eq!(f.records.len(), 1);
    }

    #[test]
    fn crtd_logger_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.crtd");
        let mut logger = CrtdLogger::create(&path, LogFilter::new()).unwrap();
        let frame = Frame::from_slice(0, CanId::standard(0x123), &[1, 2], Origin::Rx);
        logger.log_frame(LogEvent::Rx, &frame);
        logger.flush();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("R 0 123 2 01 02"));
    }
}
