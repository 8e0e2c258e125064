//! Downward interface to a physical transceiver (§6 "Downward (to
//! drivers)"). Everything below this trait is out of scope for the core:
//! it assumes an underlying transceiver that can TX/RX 11/29-bit frames and
//! signal completion.

use std::fmt;

use crate::frame::Frame;
use crate::port::{BusMode, BusSpeed};

/// Outcome of a single `transmit` call on the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    Sent,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverError(pub String);

impl fmt::Display for TransceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transceiver error: {}", self.0)
    }
}

impl std::error::Error for TransceiverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// The driver-facing surface a [`crate::port::BusPort`] drives.
///
/// Implementations run on their own driver thread/ISR and must never call
/// back into the core directly; they only ever enqueue into the router's
/// dispatch queue through the [`crate::router::RouterHandle`] they are
/// constructed with.
pub trait Transceiver: Send {
    fn power_on(&mut self) -> Result<(), TransceiverError>;
    fn power_off(&mut self) -> Result<(), TransceiverError>;
    fn start(&mut self, mode: BusMode, speed: BusSpeed) -> Result<(), TransceiverError>;
    fn stop(&mut self) -> Result<(), TransceiverError>;
    fn transmit(&mut self, frame: &Frame) -> Result<TransmitOutcome, TransceiverError>;
}

#[cfg(feature = "socketcan")]
pub mod socketcan_device {
    use super::*;
    use socketcan::{CanFrame, EmbeddedFrame, ExtendedId, Frame as SckFrame, Socket, SocketOptions, StandardId};
    use tcan_core::CanId;

    /// A [`Transceiver`] backed by a Linux SocketCAN interface, the one
    /// concrete driver this workspace ships (the rest are test doubles).
    pub struct SocketCanTransceiver {
        iface: String,
        socket: Option<socketcan::CanSocket>,
    }

    impl SocketCanTransceiver {
        pub fn new(iface: impl Into<String>) -> Self {
            Self { iface: iface.into(), socket: None }
        }

        /// Non-blocking poll for one received frame, to be called from the
        /// owning driver loop and pushed onward via `RouterHandle::deliver_rx`.
        pub fn try_receive(&self, bus: crate::frame::BusIndex) -> Option<Frame> {
            let socket = self.socket.as_ref()?;
            match socket.read_frame() {
                Ok(CanFrame::Data(f)) => {
                    let id = match f.id() {
                        embedded_can::Id::Standard(id) => CanId::standard(id.as_raw()),
                        embedded_can::Id::Extended(id) => CanId::extended(id.as_raw()),
                    };
                    Some(Frame::from_slice(bus, id, f.data(), crate::frame::Origin::Rx))
                }
                _ => None,
            }
        }
    }

    impl Transceiver for SocketCanTransceiver {
        fn power_on(&mut self) -> Result<(), TransceiverError> {
            Ok(())
        }

        fn power_off(&mut self) -> Result<(), TransceiverError> {
            self.socket = None;
            Ok(())
        }

        fn start(&mut self, _mode: BusMode, _speed: BusSpeed) -> Result<(), TransceiverError> {
            let socket = socketcan::CanSocket::open(&self.iface)
                .map_err(|e| TransceiverError(format!("open {}: {e}", self.iface)))?;
            socket
                .set_nonblocking(true)
                .map_err(|e| TransceiverError(format!("nonblocking: {e}")))?;
            self.socket = Some(socket);
            Ok(())
        }

        fn stop(&mut self) -> Result<(), TransceiverError> {
            self.socket = None;
            Ok(())
        }

        fn transmit(&mut self, frame: &Frame) -> Result<TransmitOutcome, TransceiverError> {
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(|| TransceiverError("bus not started".into()))?;
            let id: embedded_can::Id = match frame.id {
                CanId::Standard(id) => StandardId::new(id)
                    .map(embedded_can::Id::Standard)
                    .ok_or_else(|| TransceiverError("bad standard id".into()))?,
                CanId::Extended(id) => ExtendedId::new(id)
                    .map(embedded_can::Id::Extended)
                    .ok_or_else(|| TransceiverError("bad extended id".into()))?,
            };
            let sck_frame = CanFrame::new(id, frame.payload())
                .ok_or_else(|| TransceiverError("bad frame".into()))?;
            match socket.write_frame(&sck_frame) {
                Ok(()) => Ok(TransmitOutcome::Sent),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(TransmitOutcome::Busy),
                Err(e) => Err(TransceiverError(format!("write: {e}"))),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_device {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockInner {
        sent: VecDeque<Frame>,
        fail_next_transmit: bool,
        fail_next_start: bool,
        busy_next_transmit: bool,
        started: bool,
        powered: bool,
    }

    /// A clonable handle onto a [`MockTransceiver`]'s shared state, used by
    /// tests to arrange failures/busy responses and inspect what was sent
    /// without downcasting the trait object held by the router.
    #[derive(Clone, Default)]
    pub struct MockHandle(Arc<Mutex<MockInner>>);

    impl MockHandle {
        pub fn set_fail_next_transmit(&self) {
            self.0.lock().unwrap().fail_next_transmit = true;
        }

        pub fn set_busy_next_transmit(&self) {
            self.0.lock().unwrap().busy_next_transmit = true;
        }

        pub fn sent(&self) -> Vec<Frame> {
            self.0.lock().unwrap().sent.iter().cloned().collect()
        }
    }

    /// An in-memory transceiver double used across this workspace's unit
    /// tests: records every accepted TX frame and can be told to fail the
    /// next `transmit`/`start` call through its paired [`MockHandle`].
    pub struct MockTransceiver(MockHandle);

    impl MockTransceiver {
        pub fn new() -> (Self, MockHandle) {
            let handle = MockHandle::default();
            (Self(handle.clone()), handle)
        }
    }

    impl Transceiver for MockTransceiver {
        fn power_on(&mut self) -> Result<(), TransceiverError> {
            self.0.lock().unwrap().powered = true;
            Ok(())
        }

        fn power_off(&mut self) -> Result<(), TransceiverError> {
            self.0.lock().unwrap().powered = false;
            Ok(())
        }

        fn start(&mut self, _mode: BusMode, _speed: BusSpeed) -> Result<(), TransceiverError> {
            let mut inner = self.0.lock().unwrap();
            if inner.fail_next_start {
                inner.fail_next_start = false;
                return Err(TransceiverError("mock start failure".into()));
            }
            inner.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), TransceiverError> {
            self.0.lock().unwrap().started = false;
            Ok(())
        }

        fn transmit(&mut self, frame: &Frame) -> Result<TransmitOutcome, TransceiverError> {
            let mut inner = self.0.lock().unwrap();
            if inner.fail_next_transmit {
                inner.fail_next_transmit = false;
                return Err(TransceiverError("mock transmit failure".into()));
            }
            if inner.busy_next_transmit {
                inner.busy_next_transmit = false;
                return Ok(TransmitOutcome::Busy);
            }
            inner.sent.push_back(*frame);
            Ok(TransmitOutcome::Sent)
        }
    }
}
