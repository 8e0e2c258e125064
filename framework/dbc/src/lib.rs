//! The DBC codec: C4 DBC Store, C5 DBC Model, C6 Signal Codec.

pub mod codec;
pub mod model;
pub mod parser;
pub mod store;

pub use codec::{extract_bits, insert_bits};
pub use model::{
    BitTiming, ByteOrder, Comment, DbcFile, DecodedSignal, Message, MuxInfo, MuxKind, Node, Signal,
    SignalIndex, SwitchRange, ValueTable, ValueTableRef, ValueType,
};
pub use store::{DbcStore, StoreError};
