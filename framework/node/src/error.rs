//! Composition-root error taxonomy (§7): wraps the leaf crates' own
//! error enums rather than flattening them, so a caller can still match
//! on the originating subsystem.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Bus(tcan_net::PortError),
    Dbc(tcan_dbc::StoreError),
    Poll(tcan_poll::PollError),
    IsoTp(tcan_transport::IsoTpError),
    Vwtp(tcan_transport::VwtpError),
    /// No bus is registered at that index.
    BusNotFound(u32),
    /// No dbc with that name is currently attached to the bus.
    NoDbcAttached(u32),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Bus(e) => write!(f, "{e}"),
            CoreError::Dbc(e) => write!(f, "{e}"),
            CoreError::Poll(e) => write!(f, "{e}"),
            CoreError::IsoTp(e) => write!(f, "{e}"),
            CoreError::Vwtp(e) => write!(f, "{e}"),
            CoreError::BusNotFound(bus) => write!(f, "bus {bus} not found"),
            CoreError::NoDbcAttached(bus) => write!(f, "no dbc attached to bus {bus}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<tcan_net::PortError> for CoreError {
    fn from(e: tcan_net::PortError) -> Self {
        CoreError::Bus(e)
    }
}

impl From<tcan_dbc::StoreError> for CoreError {
    fn from(e: tcan_dbc::StoreError) -> Self {
        CoreError::Dbc(e)
    }
}

impl From<tcan_poll::PollError> for CoreError {
    fn from(e: tcan_poll::PollError) -> Self {
        CoreError::Poll(e)
    }
}

impl From<tcan_transport::IsoTpError> for CoreError {
    fn from(e: tcan_transport::IsoTpError) -> Self {
        CoreError::IsoTp(e)
    }
}

impl From<tcan_transport::VwtpError> for CoreError {
    fn from(e: tcan_transport::VwtpError) -> Self {
        CoreError::Vwtp(e)
    }
}
