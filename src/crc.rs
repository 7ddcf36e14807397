//! CRC-24 for Mode S messages.
//!
//! Generator polynomial 0xFFF409 over GF(2), degree 24. Messages with an
//! explicit ICAO address (DF 11/17/18) have a residual of zero when valid;
//! messages with an implicit address (DF 0/4/5/16/20/21) have a residual
//! equal to the transmitting aircraft's ICAO address.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Degree-24 generator used by every Mode S CRC.
pub const POLY: u32 = 0xFFF409;

/// Per-bit contribution table, one entry per bit position 0..112.
/// Entry `j` is the CRC contribution of a set bit at position `j` in a
/// 112-bit message; the last 24 entries (the CRC field itself) are zero.
/// This is the reference/slow path — `crc24` below uses a 256-entry byte
/// table built from this at first use.
fn bit_table() -> &'static [u32; 112] {
    static TABLE: OnceLock<[u32; 112]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; 112];
        for (j, entry) in table.iter_mut().enumerate().take(88) {
            // Remainder of a 112-bit message with a single set bit at
            // position j (MSB-first) against POLY, degree 24.
            let mut reg: u32 = 0;
            for bit in 0..112 {
                let in_bit = if bit == j { 1u32 } else { 0u32 };
                let top = (reg >> 23) & 1;
                reg = ((reg << 1) | in_bit) & 0x00FF_FFFF;
                if top == 1 {
                    reg ^= POLY;
                }
            }
            *entry = reg;
        }
        table
    })
}

/// 256-entry-per-byte-position table built from [`bit_table`], used for the
/// byte-at-a-time production path the spec requires: one indexed load and
/// XOR per input byte rather than one compare-and-XOR per bit.
fn byte_table() -> &'static [[u32; 256]; 14] {
    static TABLE: OnceLock<[[u32; 256]; 14]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let bits = bit_table();
        let mut table = [[0u32; 256]; 14];
        for byte_idx in 0..14 {
            for value in 0u32..256 {
                let mut crc = 0u32;
                for bit in 0..8 {
                    if (value >> (7 - bit)) & 1 != 0 {
                        crc ^= bits[byte_idx * 8 + bit];
                    }
                }
                table[byte_idx][value as usize] = crc;
            }
        }
        table
    })
}

/// Raw bit-by-bit CRC, used only to build the syndrome tables and as the
/// reference implementation checked against `crc24` in tests. Not the
/// production path.
pub fn crc24_bit_by_bit(msg: &[u8]) -> u32 {
    let bits = msg.len() * 8;
    let mut crc = 0u32;
    for j in 0..bits {
        let byte = j / 8;
        let bit = j % 8;
        let mask = 1u8 << (7 - bit);
        if msg[byte] & mask != 0 {
            crc ^= bit_table()[j + (112 - bits)];
        }
    }
    crc
}

/// Byte-at-a-time Mode S CRC over the whole message (including its trailing
/// 3-byte CRC field): zero for a valid explicit-address message, equal to
/// the ICAO address for a valid implicit-address message.
///
/// Every bit position contributes independently (the code is linear with a
/// zero initial state), so this is a plain XOR-accumulation over one
/// 256-entry table lookup per byte — no running shift register involved.
pub fn crc24(msg: &[u8]) -> u32 {
    let table = byte_table();
    let offset = 14 - msg.len();
    let mut crc = 0u32;
    for (i, &byte) in msg.iter().enumerate() {
        crc ^= table[offset + i][byte as usize];
    }
    crc
}

/// Flip bit `pos` (0 = MSB of byte 0) in `msg` in place.
fn flip_bit(msg: &mut [u8], pos: usize) {
    msg[pos / 8] ^= 1 << (7 - (pos % 8));
}

/// Syndrome -> set of bit positions whose simultaneous flip produces that
/// syndrome, built once per message length (56 or 112 bits). Single-bit
/// patterns are enumerated before double-bit patterns so singles win any
/// collision, per spec.
pub fn build_syndrome_table(bits: usize) -> &'static HashMap<u32, Vec<usize>> {
    static TABLE_56: OnceLock<HashMap<u32, Vec<usize>>> = OnceLock::new();
    static TABLE_112: OnceLock<HashMap<u32, Vec<usize>>> = OnceLock::new();
    let cell = if bits == 56 { &TABLE_56 } else { &TABLE_112 };
    cell.get_or_init(|| {
        let mut table = HashMap::new();
        let bit_tab = bit_table();
        let offset = 112 - bits;

        for j in 0..bits {
            let syndrome = bit_tab[offset + j];
            table.entry(syndrome).or_insert_with(|| vec![j]);
        }
        for j in 0..bits {
            for i in (j + 1)..bits {
                let syndrome = bit_tab[offset + j] ^ bit_tab[offset + i];
                table.entry(syndrome).or_insert_with(|| vec![j, i]);
            }
        }
        table
    })
}

/// Attempt to correct a message whose `crc24` is nonzero, per spec:
/// refuses to touch bits 0..4 (the DF field) and verifies the fix restores
/// a zero residual before accepting it. Only meaningful for DF 17/18
/// (explicit-address ADS-B) — callers must not apply this to implicit-
/// address replies.
pub fn try_fix(msg: &[u8]) -> Option<Vec<u8>> {
    let bits = msg.len() * 8;
    let syndrome = crc24(msg);
    if syndrome == 0 {
        return Some(msg.to_vec());
    }
    let table = build_syndrome_table(bits);
    let positions = table.get(&syndrome)?;
    if positions.iter().any(|&p| p < 5) {
        return None;
    }
    let mut fixed = msg.to_vec();
    for &p in positions {
        flip_bit(&mut fixed, p);
    }
    if crc24(&fixed) == 0 {
        Some(fixed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF17_GOOD: [u8; 14] = [
        0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3, 0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98,
    ];

    #[test]
    fn table_matches_bit_by_bit() {
        assert_eq!(crc24(&DF17_GOOD), crc24_bit_by_bit(&DF17_GOOD));

        let mut msg = DF17_GOOD;
        msg[10] ^= 0x40;
        assert_eq!(crc24(&msg), crc24_bit_by_bit(&msg));
    }

    #[test]
    fn valid_df17_has_zero_residual() {
        assert_eq!(crc24(&DF17_GOOD), 0);
    }

    #[test]
    fn single_bit_error_recovered() {
        let mut broken = DF17_GOOD;
        flip_bit(&mut broken, 90);
        let fixed = try_fix(&broken).expect("should recover");
        assert_eq!(fixed, DF17_GOOD);
    }

    #[test]
    fn df_field_bits_never_touched() {
        let mut broken = DF17_GOOD;
        flip_bit(&mut broken, 2);
        // Corrupting a DF bit must never be silently "fixed" by flipping
        // something else back to a zero residual that hides the damage.
        if let Some(fixed) = try_fix(&broken) {
            assert_eq!(fixed, broken, "try_fix must refuse, not touch DF bits");
        }
    }

    #[test]
    fn three_bit_mutation_is_refused_or_fails_recheck() {
        let mut broken = DF17_GOOD;
        flip_bit(&mut broken, 20);
        flip_bit(&mut broken, 50);
        flip_bit(&mut broken, 80);
        if let Some(fixed) = try_fix(&broken) {
            assert_eq!(crc24(&fixed), 0);
        }
    }

    #[test]
    fn syndrome_table_singles_win_collisions() {
        let table = build_syndrome_table(112);
        for positions in table.values() {
            assert!(positions.len() <= 2);
        }
    }
}
