//! The single wire-level value every bus port, the router and the logger
//! pass around: one CAN frame tagged with the bus it arrived on or is bound
//! for, and whether it is inbound or outbound.

use tcan_core::CanId;

/// Index of a physical bus within the composition root's bus array.
pub type BusIndex = u8;

/// Direction a [`Frame`] travelled, carried alongside it for logging and
/// listener filtering (only listeners that asked for TX feedback see it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Rx,
    Tx,
}

/// One CAN frame: an arbitration id, up to 8 payload bytes and the DLC that
/// says how many of them are meaningful.
///
/// `dlc > 8` cannot be constructed through [`Frame::new`]; callers that need
/// that invariant enforced at the API boundary (`write_standard`,
/// `write_extended`) panic instead, matching the source's assumption that an
/// over-length write is a programmer error, not a runtime condition.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub bus: BusIndex,
    pub id: CanId,
    pub dlc: u8,
    pub data: [u8; 8],
    pub origin: Origin,
}

impl Frame {
    pub fn new(bus: BusIndex, id: CanId, dlc: u8, data: [u8; 8], origin: Origin) -> Self {
        assert!(dlc <= 8, "CAN DLC must be <= 8, got {dlc}");
        Self { bus, id, dlc, data, origin }
    }

    pub fn from_slice(bus: BusIndex, id: CanId, payload: &[u8], origin: Origin) -> Self {
        assert!(payload.len() <= 8, "CAN payload must be <= 8 bytes, got {}", payload.len());
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Self { bus, id, dlc: payload.len() as u8, data, origin }
    }

    /// The meaningful payload bytes, i.e. `data[..dlc]`. Bytes at or beyond
    /// `dlc` are padding and carry no meaning.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// Identity equality ignores padding bytes beyond `dlc`, per the data model.
impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.bus == other.bus
            && self.id == other.id
            && self.dlc == other.dlc
            && self.payload() == other.payload()
    }
}

impl Eq for Frame {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_ignores_padding() {
        let a = Frame::new(0, CanId::standard(0x123), 2, [1, 2, 9, 9, 9, 9, 9, 9], Origin::Rx);
        let b = Frame::new(0, CanId::standard(0x123), 2, [1, 2, 0, 0, 0, 0, 0, 0], Origin::Rx);
        assert_eq!(a, b);
    }

    #[test]
    fn payload_slices_to_dlc() {
        let f = Frame::from_slice(0, CanId::standard(0x1), &[0xAA, 0xBB, 0xCC], Origin::Tx);
        assert_eq!(f.payload(), &[0xAA, 0xBB, 0xCC]);
        assert_eq!(f.dlc, 3);
    }

    #[test]
    #[should_panic]
    fn new_panics_on_oversize_dlc() {
        let _ = Frame::new(0, CanId::standard(0x1), 9, [0; 8], Origin::Tx);
    }
}
