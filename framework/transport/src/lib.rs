//! Multi-frame transports dispatched by the polling engine: C7 ISO-TP,
//! C8 VW TP 2.0.

pub mod isotp;
pub mod uds;
pub mod vwtp;

pub use isotp::{Addressing, IsoTpError, Pci, RecvStep, Receiver, SendStep, Sender};
pub use uds::{classify_response, echo_bytes, echo_len, UdsResponse, NRC_RESPONSE_PENDING};
pub use vwtp::{Channel, ChannelParams, ChannelState, VwtpError};
