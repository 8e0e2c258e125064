//! C6 Signal Codec: bit extraction/insertion for one signal, big/little
//! endian, signed/unsigned, factor/offset scaling.

use log::warn;

use tcan_core::Number;

use crate::model::{ByteOrder, Signal, ValueType};

/// Translate a DBC Motorola `start_bit` (the MSB's position, numbered
/// per-byte from 7 down to 0) into the position of that same bit counted
/// MSB-first across the whole buffer. From there extraction/insertion
/// walks forward exactly like a big-endian bit field.
fn motorola_msb_position(start_bit: u16) -> u32 {
    let byte = (start_bit / 8) as u32;
    let bit_in_byte = (start_bit % 8) as u32;
    byte * 8 + (7 - bit_in_byte)
}

/// Extract `bit_len` bits from `data` starting at `start_bit`, per the
/// signal's byte order. Out-of-range byte positions are treated as zero
/// rather than panicking, so a short/malformed frame degrades instead of
/// crashing the caller.
pub fn extract_bits(data: &[u8], start_bit: u16, bit_len: u16, order: ByteOrder) -> u64 {
    let mut raw: u64 = 0;
    match order {
        ByteOrder::LittleEndian => {
            for i in 0..bit_len as u32 {
                let pos = start_bit as u32 + i;
                let byte = (pos / 8) as usize;
                let bit = pos % 8;
                let bitval = data.get(byte).map(|b| (b >> bit) & 1).unwrap_or(0);
                raw |= (bitval as u64) << i;
            }
        }
        ByteOrder::BigEndian => {
            let msb_pos = motorola_msb_position(start_bit);
            for i in 0..bit_len as u32 {
                let pos = msb_pos + i;
                let byte = (pos / 8) as usize;
                let bit = 7 - (pos % 8);
                let bitval = data.get(byte).map(|b| (b >> bit) & 1).unwrap_or(0);
                raw = (raw << 1) | bitval as u64;
            }
        }
    }
    raw
}

/// Inverse of [`extract_bits`]: write `raw`'s low `bit_len` bits into
/// `data` at `start_bit` per the signal's byte order. Positions beyond
/// `data`'s length are silently skipped.
pub fn insert_bits(data: &mut [u8], start_bit: u16, bit_len: u16, order: ByteOrder, raw: u64) {
    match order {
        ByteOrder::LittleEndian => {
            for i in 0..bit_len as u32 {
                let pos = start_bit as u32 + i;
                let byte = (pos / 8) as usize;
                let bit = pos % 8;
                if let Some(slot) = data.get_mut(byte) {
                    let bitval = ((raw >> i) & 1) as u8;
                    *slot = (*slot & !(1 << bit)) | (bitval << bit);
                }
            }
        }
        ByteOrder::BigEndian => {
            let msb_pos = motorola_msb_position(start_bit);
            for i in 0..bit_len as u32 {
                let pos = msb_pos + i;
                let byte = (pos / 8) as usize;
                let bit = 7 - (pos % 8);
                if let Some(slot) = data.get_mut(byte) {
                    // Bit i=0 is the most significant bit of raw's
                    // bit_len-wide field.
                    let shift = bit_len as u32 - 1 - i;
                    let bitval = ((raw >> shift) & 1) as u8;
                    *slot = (*slot & !(1 << bit)) | (bitval << bit);
                }
            }
        }
    }
}

fn sign_extend(raw: u64, bit_len: u16) -> i64 {
    if bit_len == 0 || bit_len >= 64 {
        return raw as i64;
    }
    let shift = 64 - bit_len as u32;
    ((raw << shift) as i64) >> shift
}

impl Signal {
    /// Raw bit-field value, unsigned and un-scaled.
    pub fn extract_raw(&self, data: &[u8]) -> u64 {
        extract_bits(data, self.start_bit, self.bit_len, self.byte_order)
    }

    /// Raw value as a [`Number`], sign-extended for `Signed` signals.
    /// Values wider than 32 bits saturate rather than wrap, since
    /// [`Number`] stores `i32`/`u32` — wide raw fields are rare in
    /// automotive DBCs (see DESIGN.md).
    pub fn raw_number(&self, data: &[u8]) -> Number {
        let raw = self.extract_raw(data);
        match self.value_type {
            ValueType::Unsigned => Number::Unsigned(raw.min(u32::MAX as u64) as u32),
            ValueType::Signed => {
                let signed = sign_extend(raw, self.bit_len);
                Number::Signed(signed.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
            }
        }
    }

    /// Physical value = `raw * factor + offset`.
    pub fn physical(&self, data: &[u8]) -> f64 {
        let raw = self.extract_raw(data);
        let raw_f = match self.value_type {
            ValueType::Unsigned => raw as f64,
            ValueType::Signed => sign_extend(raw, self.bit_len) as f64,
        };
        raw_f * self.factor + self.offset
    }

    pub fn decode(&self, data: &[u8]) -> Number {
        Number::Real(self.physical(data))
    }

    /// Largest raw magnitude representable in `bit_len` bits for this
    /// signal's sign.
    fn raw_bounds(&self) -> (i128, i128) {
        let n = self.bit_len.min(63) as u32;
        match self.value_type {
            ValueType::Unsigned => (0, (1i128 << n) - 1),
            ValueType::Signed => (-(1i128 << (n.saturating_sub(1))), (1i128 << n.saturating_sub(1)) - 1),
        }
    }

    /// `raw = round((phys - offset) / factor)`, clamped to the bit
    /// field's width. Returns the raw value and whether clamping
    /// occurred (callers should log a warning on `true`, per §4.4).
    pub fn encode(&self, phys: f64) -> (u64, bool) {
        if self.factor == 0.0 {
            warn!("signal {} has factor == 0, refusing to encode", self.name);
            return (0, true);
        }
        let unclamped = ((phys - self.offset) / self.factor).round();
        let (lo, hi) = self.raw_bounds();
        let unclamped_i = unclamped as i128;
        let clamped = unclamped_i.clamp(lo, hi);
        let did_clamp = clamped != unclamped_i;
        if did_clamp {
            warn!(
                "signal {} encode clamped {} to [{}, {}]",
                self.name, unclamped, lo, hi
            );
        }
        let raw_bits = (clamped as i64) as u64 & mask_for(self.bit_len);
        (raw_bits, did_clamp)
    }

    pub fn insert(&self, data: &mut [u8], raw: u64) {
        insert_bits(data, self.start_bit, self.bit_len, self.byte_order, raw);
    }

    /// Convenience: encode a physical value directly into a frame buffer.
    pub fn encode_into(&self, data: &mut [u8], phys: f64) -> bool {
        let (raw, clamped) = self.encode(phys);
        self.insert(data, raw);
        clamped
    }

    /// `quantize(v)`: decode(encode(v)), i.e. the physical value after a
    /// round-trip through this signal's bit-field resolution. Used by the
    /// DBC round-trip invariant in spec §8.
    pub fn quantize(&self, phys: f64) -> f64 {
        let (raw, _) = self.encode(phys);
        let raw_f = match self.value_type {
            ValueType::Unsigned => raw as f64,
            ValueType::Signed => sign_extend(raw, self.bit_len) as f64,
        };
        raw_f * self.factor + self.offset
    }
}

fn mask_for(bit_len: u16) -> u64 {
    if bit_len >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_len) - 1
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{MuxInfo, MuxKind};

    fn signal(start_bit: u16, bit_len: u16, order: ByteOrder, value_type: ValueType, factor: f64, offset: f64) -> Signal {
        Signal {
            name: "S".into(),
            start_bit,
            bit_len,
            byte_order: order,
            value_type,
            factor,
            offset,
            min: 0.0,
            max: 0.0,
            unit: String::new(),
            receivers: vec![],
            value_table: None,
            mux: MuxInfo { kind: MuxKind::None, switch_ranges: vec![] },
            comment: None,
        }
    }

    #[test]
    fn little_endian_extraction_matches_known_value() {
        // OBD PID 0x0C (engine RPM), A=0x1A, B=0xF8 -> ((A*256)+B)/4
        let data = [0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x00, 0x00, 0x00];
        let sig = signal(24, 16, ByteOrder::LittleEndian, ValueType::Unsigned, 0.25, 0.0);
        assert_eq!(sig.extract_raw(&data), 0xF81A);
        assert_eq!(sig.physical(&data), 0xF81Au64 as f64 * 0.25);
    }

    #[test]
    fn big_endian_roundtrip_single_byte() {
        let sig = signal(7, 8, ByteOrder::BigEndian, ValueType::Unsigned, 1.0, 0.0);
        let mut data = [0u8; 8];
        sig.insert(&mut data, 0xAB);
        assert_eq!(data[0], 0xAB);
        assert_eq!(sig.extract_raw(&data), 0xAB);
    }

    #[test]
    fn big_endian_spans_byte_boundary() {
        // Motorola 16-bit signal starting at bit 7 of byte 0 (MSB-first)
        // spans byte0..byte1, matching the canonical DBC sawtooth layout.
        let sig = signal(7, 16, ByteOrder::BigEndian, ValueType::Unsigned, 1.0, 0.0);
        let mut data = [0u8; 8];
        sig.insert(&mut data, 0x1234);
        assert_eq!(sig.extract_raw(&data), 0x1234);
        assert_eq!(data[0], 0x12);
        assert_eq!(data[1], 0x34);
    }

    #[test]
    fn signed_value_sign_extends() {
        let sig = signal(0, 8, ByteOrder::LittleEndian, ValueType::Signed, 1.0, 0.0);
        let mut data = [0u8; 8];
        sig.insert(&mut data, 0xFF); // -1 in 8-bit two's complement
        assert_eq!(sig.physical(&data), -1.0);
    }

    #[test]
    fn encode_clamps_out_of_range() {
        let sig = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned, 1.0, 0.0);
        let (raw, clamped) = sig.encode(1000.0);
        assert_eq!(raw, 255);
        assert!(clamped);
    }

    #[test]
    fn decode_encode_roundtrip_quantizes() {
        let sig = signal(0, 8, ByteOrder::LittleEndian, ValueType::Unsigned, 0.5, -10.0);
        let v = 20.0;
        let quantized = sig.quantize(v);
        let mut data = [0u8; 8];
        sig.encode_into(&mut data, v);
        assert_eq!(sig.physical(&data), quantized);
    }
}
