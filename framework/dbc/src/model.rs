//! C5 DBC Model: the in-memory entities of one parsed DBC file.

use std::collections::BTreeMap;

use tcan_core::Number;

/// Stable index of a signal within its owning [`Message`]. Multiplexor
/// signals reference their source by this index rather than by an owning
/// pointer, which is how this port avoids the cross-owning cycle the
/// original `dbcMessage`/`dbcSignal` pair has (see DESIGN.md).
pub type SignalIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// A signal's role in a message's multiplexing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuxKind {
    #[default]
    None,
    MuxSource,
    Muxed,
    Both,
}

/// Inclusive range of multiplexor-source raw values a `Muxed` signal is
/// valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchRange {
    pub lo: u32,
    pub hi: u32,
}

impl SwitchRange {
    pub fn single(v: u32) -> Self {
        Self { lo: v, hi: v }
    }

    pub fn contains(&self, v: u32) -> bool {
        v >= self.lo && v <= self.hi
    }
}

#[derive(Debug, Clone, Default)]
pub struct MuxInfo {
    pub kind: MuxKind,
    pub switch_ranges: Vec<SwitchRange>,
}

/// A `u32 -> string` mapping, possibly shared at DBC scope (`VAL_TABLE_`)
/// or embedded directly in a signal (`VAL_`).
#[derive(Debug, Clone, Default)]
pub struct ValueTable {
    pub name: Option<String>,
    pub entries: BTreeMap<u32, String>,
}

impl ValueTable {
    pub fn label(&self, raw: u32) -> Option<&str> {
        self.entries.get(&raw).map(String::as_str)
    }
}

/// A signal's value table: either embedded (`VAL_` directly on the
/// signal) or a reference to a DBC-scoped `VAL_TABLE_` the signal shares
/// with other signals.
#[derive(Debug, Clone)]
pub enum ValueTableRef {
    Embedded(ValueTable),
    Named(String),
}

#[derive(Debug, Clone)]
pub struct Signal {
    pub name: String,
    pub start_bit: u16,
    pub bit_len: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    pub factor: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub unit: String,
    pub receivers: Vec<String>,
    pub value_table: Option<ValueTableRef>,
    pub mux: MuxInfo,
    pub comment: Option<String>,
}

impl Signal {
    /// Look up this signal's value-table label for a raw value, resolving
    /// an embedded table directly or a named one through the owning DBC
    /// file's shared table.
    pub fn label<'a>(&'a self, raw: u32, file: &'a DbcFile) -> Option<&'a str> {
        match self.value_table.as_ref()? {
            ValueTableRef::Embedded(vt) => vt.label(raw),
            ValueTableRef::Named(name) => file.value_tables.get(name)?.label(raw),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Comment {
    pub node: Option<String>,
    pub message: Option<String>,
    pub signal: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: u32,
    pub is_extended: bool,
    pub name: String,
    pub byte_size: u8,
    pub transmitter: Option<String>,
    pub signals: Vec<Signal>,
    /// Index of the `MuxSource`/`Both` signal gating this message's
    /// `Muxed` signals, if any. A message has at most one.
    pub multiplexor: Option<SignalIndex>,
    pub comment: Option<String>,
}

impl Message {
    pub fn signal_by_name(&self, name: &str) -> Option<(SignalIndex, &Signal)> {
        self.signals.iter().enumerate().find(|(_, s)| s.name == name)
    }

    /// Whether a `Muxed` signal should be emitted given the multiplexor's
    /// current raw value. Non-`Muxed` signals (`None`/`MuxSource`/`Both`)
    /// are always active.
    pub fn signal_active(&self, idx: SignalIndex, mux_raw: Option<u32>) -> bool {
        let Some(signal) = self.signals.get(idx) else { return false };
        match signal.mux.kind {
            MuxKind::None | MuxKind::MuxSource | MuxKind::Both => true,
            MuxKind::Muxed => match mux_raw {
                Some(v) => signal.mux.switch_ranges.iter().any(|r| r.contains(v)),
                None => false,
            },
        }
    }

    /// Decode every currently-active signal in `data` (the multiplexor
    /// gating from [`Message::signal_active`] applied), resolving value
    /// table labels against `file`. This is the un-polled RX path from
    /// spec §2's data-flow diagram ("C2 -> C5/C6 for un-polled frames
    /// with an attached DBC").
    pub fn decode(&self, data: &[u8], file: &DbcFile) -> Vec<DecodedSignal> {
        let mux_raw = self.multiplexor.map(|idx| self.signals[idx].raw_number(data).as_u32().unwrap_or(0));
        self.signals
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.signal_active(*idx, mux_raw))
            .map(|(_, signal)| DecodedSignal {
                name: signal.name.clone(),
                value: signal.decode(data),
                unit: signal.unit.clone(),
                label: signal.label(signal.raw_number(data).as_u32().unwrap_or(0), file).map(str::to_string),
            })
            .collect()
    }
}

/// One signal's decoded value, as handed to an RX listener that has a
/// DBC attached to the bus the frame arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSignal {
    pub name: String,
    pub value: Number,
    pub unit: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BitTiming {
    pub baudrate: u32,
    pub btr1: u32,
    pub btr2: u32,
}

/// One loaded DBC file's full set of entities (§3 Data Model).
#[derive(Debug, Clone)]
pub struct DbcFile {
    pub name: String,
    pub path: Option<std::path::PathBuf>,
    pub version: String,
    pub new_symbols: Vec<String>,
    pub bit_timing: Option<BitTiming>,
    pub nodes: Vec<Node>,
    pub value_tables: BTreeMap<String, ValueTable>,
    pub messages: Vec<Message>,
    /// Free-standing `CM_ "text";` comments, scoped to the file as a
    /// whole rather than to a node/message/signal (§3 Data Model).
    pub comments: Vec<Comment>,
    /// Set when any line failed to parse; the file is still usable, just
    /// incomplete (§4.4 "parsing continues").
    pub partial: bool,
}

impl DbcFile {
    pub fn message_by_id(&self, id: u32) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_by_name(&self, name: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// Decode `data` against whichever message defines `id`, or `None`
    /// if this DBC has no such message.
    pub fn decode_frame(&self, id: u32, data: &[u8]) -> Option<Vec<DecodedSignal>> {
        Some(self.message_by_id(id)?.decode(data, self))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: 0x100,
            is_extended: false,
            name: "M".into(),
            byte_size: 8,
            transmitter: None,
            signals: vec![
                Signal {
                    name: "Mux".into(),
                    start_bit: 0,
                    bit_len: 8,
                    byte_order: ByteOrder::LittleEndian,
                    value_type: ValueType::Unsigned,
                    factor: 1.0,
                    offset: 0.0,
                    min: 0.0,
                    max: 255.0,
                    unit: String::new(),
                    receivers: vec![],
                    value_table: None,
                    mux: MuxInfo { kind: MuxKind::MuxSource, switch_ranges: vec![] },
                    comment: None,
                },
                Signal {
                    name: "Muxed1".into(),
                    start_bit: 8,
                    bit_len: 8,
                    byte_order: ByteOrder::LittleEndian,
                    value_type: ValueType::Unsigned,
                    factor: 1.0,
                    offset: 0.0,
                    min: 0.0,
                    max: 255.0,
                    unit: String::new(),
                    receivers: vec![],
                    value_table: None,
                    mux: MuxInfo { kind: MuxKind::Muxed, switch_ranges: vec![SwitchRange::single(1)] },
                    comment: None,
                },
            ],
            multiplexor: Some(0),
            comment: None,
        }
    }

    #[test]
    fn muxed_signal_gated_by_source_value() {
        let msg = sample_message();
        assert!(!msg.signal_active(1, Some(0)));
        assert!(msg.signal_active(1, Some(1)));
        assert!(msg.signal_active(0, Some(0)));
    }

    #[test]
    fn value_table_resolves_named_and_embedded() {
        let mut file = DbcFile {
            name: "f".into(),
            path: None,
            version: String::new(),
            new_symbols: vec![],
            bit_timing: None,
            nodes: vec![],
            value_tables: BTreeMap::new(),
            messages: vec![],
            comments: vec![],
            partial: false,
        };
        file.value_tables.insert(
            "Shared".into(),
            ValueTable { name: Some("Shared".into()), entries: BTreeMap::from([(1, "On".into())]) },
        );
        let mut sig = sample_message().signals.remove(0);
        sig.value_table = Some(ValueTableRef::Named("Shared".into()));
        assert_eq!(sig.label(1, &file), Some("On"));
        assert_eq!(sig.label(2, &file), None);
    }

    #[test]
    fn decode_frame_skips_inactive_muxed_signals() {
        let file = DbcFile {
            name: "f".into(),
            path: None,
            version: String::new(),
            new_symbols: vec![],
            bit_timing: None,
            nodes: vec![],
            value_tables: BTreeMap::new(),
            messages: vec![sample_message()],
            comments: vec![],
            partial: false,
        };
        let data = [0u8, 1, 0, 0, 0, 0, 0, 0];
        let decoded = file.decode_frame(0x100, &data).unwrap();
        assert_eq!(decoded.len(), 1, "Muxed1 requires Mux == 1, not 0");
        assert_eq!(decoded[0].name, "Mux");

        let data_active = [1u8, 7, 0, 0, 0, 0, 0, 0];
        let decoded_active = file.decode_frame(0x100, &data_active).unwrap();
        assert_eq!(decoded_active.len(), 2);
        assert!(decoded_active.iter().any(|s| s.name == "Muxed1" && s.value == Number::Real(7.0)));
    }

    #[test]
    fn decode_frame_none_for_unknown_id() {
        let file = DbcFile {
            name: "f".into(),
            path: None,
            version: String::new(),
            new_symbols: vec![],
            bit_timing: None,
            nodes: vec![],
            value_tables: BTreeMap::new(),
            messages: vec![],
            comments: vec![],
            partial: false,
        };
        assert!(file.decode_frame(0x999, &[0; 8]).is_none());
    }
}
