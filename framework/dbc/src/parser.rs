//! C4/C5 DBC text parser. Tolerant by design: a line that fails to parse
//! is logged and skipped, marking the file `partial` rather than
//! aborting the whole load (§4.4).

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::warn;

use crate::model::{
    BitTiming, ByteOrder, Comment, DbcFile, Message, MuxInfo, MuxKind, Node, Signal, SwitchRange,
    ValueTable, ValueTableRef, ValueType,
};

/// Split a DBC line into whitespace-separated tokens, keeping
/// double-quoted strings (which may contain spaces) as single tokens
/// with their quotes stripped.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    let mut current = String::new();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                if !in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ',' | ';' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ':' | '@' | '(' | ')' | '[' | ']' | '|' | '+' | '-' if !in_quotes && !current.is_empty() && current.chars().next().unwrap().is_ascii_digit() => {
                // Keep signal layout tokens like `7|8@0+` glued together;
                // these delimiters are handled by the SG_ parser itself.
                current.push(c);
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_quotes(s: &str) -> String {
    s.trim_matches('"').to_string()
}

/// Parses `7|8@0+` (start_bit|bit_len@byte_order sign) into its parts.
fn parse_layout(tok: &str) -> Option<(u16, u16, ByteOrder, ValueType)> {
    let (bits, rest) = tok.split_once('@')?;
    let (start, len) = bits.split_once('|')?;
    let start: u16 = start.parse().ok()?;
    let len: u16 = len.parse().ok()?;
    let mut chars = rest.chars();
    let order_ch = chars.next()?;
    let sign_ch = chars.next()?;
    let order = match order_ch {
        '0' => ByteOrder::BigEndian,
        '1' => ByteOrder::LittleEndian,
        _ => return None,
    };
    let value_type = match sign_ch {
        '+' => ValueType::Unsigned,
        '-' => ValueType::Signed,
        _ => return None,
    };
    Some((start, len, order, value_type))
}

/// Parses `(factor,offset)`.
fn parse_scale(tok: &str) -> Option<(f64, f64)> {
    let inner = tok.trim_start_matches('(').trim_end_matches(')');
    let (f, o) = inner.split_once(',')?;
    Some((f.parse().ok()?, o.parse().ok()?))
}

/// Parses `[min|max]`.
fn parse_range(tok: &str) -> Option<(f64, f64)> {
    let inner = tok.trim_start_matches('[').trim_end_matches(']');
    let (lo, hi) = inner.split_once('|')?;
    Some((lo.parse().ok()?, hi.parse().ok()?))
}

struct Parser {
    file: DbcFile,
    pending_comments: Vec<Comment>,
}

/// Parse a whole DBC file's text. Always returns a [`DbcFile`]; malformed
/// lines are skipped with a `warn!` and set `partial = true`.
pub fn parse(name: &str, path: Option<PathBuf>, text: &str) -> DbcFile {
    let mut p = Parser {
        file: DbcFile {
            name: name.to_string(),
            path,
            version: String::new(),
            new_symbols: vec![],
            bit_timing: None,
            nodes: vec![],
            value_tables: BTreeMap::new(),
            messages: vec![],
            comments: vec![],
            partial: false,
        },
        pending_comments: vec![],
    };

    let mut lines = text.lines().peekable();
    while let Some(raw_line) = lines.next() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(reason) = p.dispatch(line) {
            warn!("dbc {}: skipping unparsable line ({}): {}", name, reason, line);
            p.file.partial = true;
        }
    }
    p.file.comments = p.pending_comments;
    p.file
}

impl Parser {
    fn dispatch(&mut self, line: &str) -> Result<(), &'static str> {
        if line.starts_with("VERSION") {
            return self.parse_version(line);
        }
        if line.starts_with("NS_") {
            return Ok(()); // symbol table block header; its body lines are indented keywords we ignore
        }
        if line.starts_with("BS_:") {
            return self.parse_bit_timing(line);
        }
        if line.starts_with("BU_:") {
            return self.parse_nodes(line);
        }
        if line.starts_with("VAL_TABLE_") {
            return self.parse_val_table(line);
        }
        if line.starts_with("BO_ ") {
            return self.parse_message(line);
        }
        if line.starts_with("SG_ ") {
            return self.parse_signal(line);
        }
        if line.starts_with("CM_ ") {
            return self.parse_comment(line);
        }
        if line.starts_with("VAL_ ") {
            return self.parse_val(line);
        }
        if line.starts_with("BA_DEF_") || line.starts_with("BA_ ") || line.starts_with("BA_DEF_DEF_") {
            return Ok(()); // attribute definitions: out of scope (§ Non-goals)
        }
        if line.starts_with("SIG_GROUP_") {
            return Ok(()); // signal groups: out of scope (§ Non-goals)
        }
        if line.starts_with("SIG_VALTYPE_") || line.starts_with("BO_TX_BU_") || line.starts_with("EV_") {
            return Ok(());
        }
        Err("unrecognised keyword")
    }

    fn parse_version(&mut self, line: &str) -> Result<(), &'static str> {
        let rest = line.trim_start_matches("VERSION").trim();
        self.file.version = strip_quotes(rest);
        Ok(())
    }

    fn parse_bit_timing(&mut self, line: &str) -> Result<(), &'static str> {
        let rest = line.trim_start_matches("BS_:").trim();
        if rest.is_empty() {
            return Ok(());
        }
        let tokens = tokenize(rest);
        if tokens.len() < 3 {
            return Err("malformed BS_");
        }
        let baudrate = tokens[0].parse().map_err(|_| "bad baudrate")?;
        let btr1 = tokens[1].parse().map_err(|_| "bad btr1")?;
        let btr2 = tokens[2].parse().map_err(|_| "bad btr2")?;
        self.file.bit_timing = Some(BitTiming { baudrate, btr1, btr2 });
        Ok(())
    }

    fn parse_nodes(&mut self, line: &str) -> Result<(), &'static str> {
        let rest = line.trim_start_matches("BU_:").trim();
        self.file.nodes = rest
            .split_whitespace()
            .map(|n| Node { name: n.to_string(), comment: None })
            .collect();
        Ok(())
    }

    fn parse_val_table(&mut self, line: &str) -> Result<(), &'static str> {
        let tokens = tokenize(line);
        if tokens.len() < 2 {
            return Err("malformed VAL_TABLE_");
        }
        let name = tokens[1].clone();
        let mut entries = BTreeMap::new();
        let mut i = 2;
        while i + 1 < tokens.len() {
            let raw: u32 = tokens[i].parse().map_err(|_| "bad value table entry")?;
            entries.insert(raw, tokens[i + 1].clone());
            i += 2;
        }
        self.file.value_tables.insert(name.clone(), ValueTable { name: Some(name), entries });
        Ok(())
    }

    fn parse_message(&mut self, line: &str) -> Result<(), &'static str> {
        let tokens = tokenize(line);
        // BO_ <id> <name>: <size> <transmitter>
        if tokens.len() < 5 {
            return Err("malformed BO_");
        }
        let raw_id: u32 = tokens[1].parse().map_err(|_| "bad message id")?;
        let is_extended = raw_id & 0x8000_0000 != 0;
        let id = raw_id & 0x1FFF_FFFF;
        let name = tokens[2].trim_end_matches(':').to_string();
        let byte_size: u8 = tokens[3].parse().map_err(|_| "bad message size")?;
        let transmitter = if tokens[4] == "Vector__XXX" { None } else { Some(tokens[4].clone()) };
        self.file.messages.push(Message {
            id,
            is_extended,
            name,
            byte_size,
            transmitter,
            signals: vec![],
            multiplexor: None,
            comment: None,
        });
        Ok(())
    }

    fn parse_signal(&mut self, line: &str) -> Result<(), &'static str> {
        let tokens = tokenize(line);
        // SG_ <name> [M|m<n>] : <start>|<len>@<order><sign> (<f>,<o>) [<lo>|<hi>] "<unit>" <receivers...>
        if tokens.len() < 5 {
            return Err("malformed SG_");
        }
        let msg = self.file.messages.last_mut().ok_or("SG_ before any BO_")?;
        let mut idx = 1;
        let mut mux = MuxInfo::default();
        if tokens[idx] == "M" {
            mux.kind = MuxKind::MuxSource;
            idx += 1;
        } else if let Some(stripped) = tokens[idx].strip_prefix('m') {
            if let Ok(v) = stripped.parse::<u32>() {
                mux.kind = MuxKind::Muxed;
                mux.switch_ranges.push(SwitchRange::single(v));
                idx += 1;
            }
        }
        let name = tokens[idx].clone();
        idx += 1;
        let (start_bit, bit_len, byte_order, value_type) = parse_layout(&tokens[idx]).ok_or("bad signal layout")?;
        idx += 1;
        let (factor, offset) = parse_scale(&tokens[idx]).ok_or("bad signal scale")?;
        idx += 1;
        let (min, max) = tokens.get(idx).and_then(|t| parse_range(t)).unwrap_or((0.0, 0.0));
        if tokens.get(idx).map(|t| t.starts_with('[')).unwrap_or(false) {
            idx += 1;
        }
        let unit = tokens.get(idx).cloned().unwrap_or_default();
        if !unit.is_empty() {
            idx += 1;
        }
        let receivers = tokens[idx..]
            .iter()
            .filter(|t| t.as_str() != "Vector__XXX")
            .cloned()
            .collect();

        let signal_idx = msg.signals.len();
        if mux.kind == MuxKind::MuxSource {
            msg.multiplexor = Some(signal_idx);
        }
        msg.signals.push(Signal {
            name,
            start_bit,
            bit_len,
            byte_order,
            value_type,
            factor,
            offset,
            min,
            max,
            unit,
            receivers,
            value_table: None,
            mux,
            comment: None,
        });
        Ok(())
    }

    fn parse_comment(&mut self, line: &str) -> Result<(), &'static str> {
        let tokens = tokenize(line);
        if tokens.len() < 2 {
            return Err("malformed CM_");
        }
        match tokens[1].as_str() {
            "BU_" if tokens.len() >= 4 => {
                let name = &tokens[2];
                let text = tokens[3].clone();
                if let Some(node) = self.file.nodes.iter_mut().find(|n| &n.name == name) {
                    node.comment = Some(text);
                }
                Ok(())
            }
            "BO_" if tokens.len() >= 4 => {
                let id: u32 = tokens[2].parse().map_err(|_| "bad CM_ BO_ id")?;
                let text = tokens[3].clone();
                if let Some(msg) = self.file.messages.iter_mut().find(|m| m.id == id) {
                    msg.comment = Some(text);
                }
                Ok(())
            }
            "SG_" if tokens.len() >= 5 => {
                let id: u32 = tokens[2].parse().map_err(|_| "bad CM_ SG_ id")?;
                let sig_name = &tokens[3];
                let text = tokens[4].clone();
                if let Some(msg) = self.file.messages.iter_mut().find(|m| m.id == id) {
                    if let Some(sig) = msg.signals.iter_mut().find(|s| &s.name == sig_name) {
                        sig.comment = Some(text);
                    }
                }
                Ok(())
            }
            _ if tokens.len() >= 2 => {
                // Free-standing CM_ "text"; scoped to the file as a whole.
                self.pending_comments.push(Comment { node: None, message: None, signal: None, text: tokens[1].clone() });
                Ok(())
            }
            _ => Err("malformed CM_"),
        }
    }

    fn parse_val(&mut self, line: &str) -> Result<(), &'static str> {
        let tokens = tokenize(line);
        if tokens.len() < 2 {
            return Err("malformed VAL_");
        }
        // VAL_ <id> <signal> <raw> "<label>" ... ;  (global VAL_TABLE_ assignment has no signal name and numeric pairs only)
        let id: u32 = match tokens[1].parse() {
            Ok(v) => v,
            Err(_) => return Err("bad VAL_ id"),
        };
        if tokens.len() < 3 {
            return Err("malformed VAL_");
        }
        let sig_name = &tokens[2];
        let msg = self.file.messages.iter_mut().find(|m| m.id == id).ok_or("VAL_ references unknown message")?;
        let sig = msg.signals.iter_mut().find(|s| &s.name == sig_name).ok_or("VAL_ references unknown signal")?;
        let mut entries = BTreeMap::new();
        let mut i = 3;
        while i + 1 < tokens.len() {
            let raw: u32 = tokens[i].parse().map_err(|_| "bad VAL_ entry")?;
            entries.insert(raw, tokens[i + 1].clone());
            i += 2;
        }
        sig.value_table = Some(ValueTableRef::Embedded(ValueTable { name: None, entries }));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"
VERSION "1.0"

NS_ :
    NS_DESC_
    CM_

BS_: 500000,1,2

BU_: ECU Gateway

VAL_TABLE_ OnOff 1 "On" 0 "Off" ;

BO_ 256 EngineStatus: 8 ECU
 SG_ Mux M : 0|8@1+ (1,0) [0|255] "" Gateway
 SG_ Rpm m0 : 8|16@1+ (0.25,0) [0|16000] "rpm" Gateway
 SG_ CoolantTemp : 24|8@1- (1,-40) [-40|215] "degC" Gateway

CM_ BO_ 256 "Primary engine message.";
CM_ SG_ 256 Rpm "Engine speed.";

VAL_ 256 Mux 0 "Idle" 1 "Running" ;
"#;

    #[test]
    fn parses_full_sample_without_errors() {
        let file = parse("sample", None, SAMPLE);
        assert!(!file.partial, "sample should parse cleanly");
        assert_eq!(file.version, "1.0");
        assert_eq!(file.bit_timing.unwrap().baudrate, 500000);
        assert_eq!(file.nodes.len(), 2);
        assert!(file.value_tables.contains_key("OnOff"));

        let msg = file.message_by_id(256).unwrap();
        assert_eq!(msg.name, "EngineStatus");
        assert_eq!(msg.signals.len(), 3);
        assert_eq!(msg.comment.as_deref(), Some("Primary engine message."));
        assert_eq!(msg.multiplexor, Some(0));

        let (_, rpm) = msg.signal_by_name("Rpm").unwrap();
        assert_eq!(rpm.factor, 0.25);
        assert_eq!(rpm.comment.as_deref(), Some("Engine speed."));

        let (_, mux) = msg.signal_by_name("Mux").unwrap();
        assert!(matches!(mux.value_table, Some(ValueTableRef::Embedded(_))));
    }

    #[test]
    fn unknown_keyword_marks_file_partial_but_keeps_going() {
        let text = "VERSION \"x\"\nBOGUS_KEYWORD foo\nBU_: A\n";
        let file = parse("p", None, text);
        assert!(file.partial);
        assert_eq!(file.nodes.len(), 1);
    }

    #[test]
    fn file_scoped_comment_is_collected() {
        let text = "VERSION \"1\"\nBU_: A\nCM_ \"Exported from the gateway build.\";\n";
        let file = parse("p", None, text);
        assert_eq!(file.comments.len(), 1);
        assert_eq!(file.comments[0].text, "Exported from the gateway build.");
        assert!(file.comments[0].node.is_none());
    }

    #[test]
    fn negative_offset_parses_in_scale() {
        let file = parse("sample", None, SAMPLE);
        let msg = file.message_by_id(256).unwrap();
        let (_, temp) = msg.signal_by_name("CoolantTemp").unwrap();
        assert_eq!(temp.offset, -40.0);
        assert_eq!(temp.value_type, ValueType::Signed);
    }
}
