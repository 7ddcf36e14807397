//! Message decoder: turns a validated [`crate::validator::ModeFrame`] into a
//! tagged [`DecodedMessage`], routed by Type Code (DF 17/18) or DF alone for
//! the short-form replies.
//!
//! One arm per message family (identification, altitude, position, velocity,
//! squawk) rather than a single struct carrying every field whether or not
//! it applies. Gillham/Gray-code altitude decode follows the documented
//! digit-wise algorithm directly. Comm-B (BDS) decoding is out of scope and
//! has no counterpart below.

/// Identification character set, index 0..63. `#` marks reserved/padding
/// positions and decodes to a space.
const IDENT_ALPHABET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

fn ident_char(idx: usize) -> char {
    let c = IDENT_ALPHABET[idx & 0x3F] as char;
    if c == '#' { ' ' } else { c }
}

/// A decoded Mode S / ADS-B payload, tagged by kind rather than carried as
/// one struct with every field present-or-not.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum DecodedMessage {
    Identification {
        callsign: String,
    },
    Position {
        odd: bool,
        altitude_ft: Option<i32>,
        cpr_lat: u32,
        cpr_lon: u32,
    },
    Velocity {
        speed_kt: Option<f64>,
        heading_deg: Option<f64>,
        vertical_rate_fpm: Option<i32>,
        speed_type: Option<&'static str>,
    },
    Altitude {
        altitude_ft: Option<i32>,
    },
    Squawk {
        squawk: String,
    },
}

/// Gray-to-binary conversion for an arbitrary-width reflected Gray code.
fn gray_to_binary(code: u32) -> u32 {
    let mut g = code;
    let mut mask = g >> 1;
    while mask != 0 {
        g ^= mask;
        mask >>= 1;
    }
    g
}

/// Decode a Gillham (Gray-code) 100-ft-mode altitude from its nine
/// component bits. Returns `None` for an invalid C-group or an altitude
/// outside the representable range.
fn decode_gillham(c1: u8, a1: u8, c2: u8, a2: u8, c4: u8, a4: u8, b1: u8, b2: u8, b4: u8) -> Option<i32> {
    let a = (a4 as u32) * 4 + (a2 as u32) * 2 + a1 as u32;
    let b = (b4 as u32) * 4 + (b2 as u32) * 2 + b1 as u32;
    let c = (c4 as u32) * 4 + (c2 as u32) * 2 + c1 as u32;

    let c_bin = gray_to_binary(c);
    if !(1..=5).contains(&c_bin) {
        return None;
    }

    let ab_gray = (a << 3) | b;
    let ab_bin = gray_to_binary(ab_gray);

    let altitude = 500 * ab_bin as i32 + 100 * c_bin as i32 - 1200;
    if (-1200..=126750).contains(&altitude) {
        Some(altitude)
    } else {
        None
    }
}

/// Remove `skip` bit positions (0 = LSB) from a `width`-bit field and
/// reassemble the remaining bits MSB-first.
fn strip_bits(field: u32, width: usize, skip: &[usize]) -> u32 {
    let mut n = 0u32;
    for pos in (0..width).rev() {
        if skip.contains(&pos) {
            continue;
        }
        n = (n << 1) | ((field >> pos) & 1);
    }
    n
}

/// 13-bit AC altitude field (DF 0/4/16/20), from bytes 2..3: bottom 5 bits
/// of byte 2, all of byte 3.
fn decode_ac13(raw: &[u8]) -> Option<i32> {
    let field = (((raw[2] & 0x1F) as u32) << 8) | raw[3] as u32;
    if field == 0 {
        return None;
    }
    let m_bit = (field >> 6) & 1 != 0;
    let q_bit = (field >> 4) & 1 != 0;

    if m_bit {
        // Metric mode is unsupported.
        return None;
    }

    if q_bit {
        let n = strip_bits(field, 13, &[6, 4]);
        Some(n as i32 * 25 - 1000)
    } else {
        // Bit 12 (MSB) down to bit 0: C1 A1 C2 A2 C4 A4 (M) B1 (Q) B2 D2 B4 D4.
        // D2/D4 are not consulted here -- the 500-ft counter only uses A and B.
        let c1 = ((field >> 12) & 1) as u8;
        let a1 = ((field >> 11) & 1) as u8;
        let c2 = ((field >> 10) & 1) as u8;
        let a2 = ((field >> 9) & 1) as u8;
        let c4 = ((field >> 8) & 1) as u8;
        let a4 = ((field >> 7) & 1) as u8;
        let b1 = ((field >> 5) & 1) as u8;
        let b2 = ((field >> 3) & 1) as u8;
        let b4 = ((field >> 1) & 1) as u8;
        decode_gillham(c1, a1, c2, a2, c4, a4, b1, b2, b4)
    }
}

/// 12-bit AC altitude field (DF17/18 airborne position), bytes 5..6.
fn decode_ac12(raw: &[u8]) -> Option<i32> {
    let field = ((raw[5] as u32) << 4) | ((raw[6] as u32) >> 4);
    if field == 0 {
        return None;
    }
    let q_bit = (field >> 4) & 1 != 0;

    if q_bit {
        let n = ((field >> 5) << 4) | (field & 0x0F);
        Some(n as i32 * 25 - 1000)
    } else {
        // Bit 11 (MSB) down to bit 0: C1 A1 C2 A2 C4 A4 B1 (Q) B2 D2 B4 D4.
        // D2/D4 are not consulted here -- the 500-ft counter only uses A and B.
        let c1 = ((field >> 11) & 1) as u8;
        let a1 = ((field >> 10) & 1) as u8;
        let c2 = ((field >> 9) & 1) as u8;
        let a2 = ((field >> 8) & 1) as u8;
        let c4 = ((field >> 7) & 1) as u8;
        let a4 = ((field >> 6) & 1) as u8;
        let b1 = ((field >> 5) & 1) as u8;
        let b2 = ((field >> 3) & 1) as u8;
        let b4 = ((field >> 1) & 1) as u8;
        decode_gillham(c1, a1, c2, a2, c4, a4, b1, b2, b4)
    }
}

fn decode_identification(raw: &[u8]) -> DecodedMessage {
    let idx = [
        (raw[5] >> 2) as usize,
        (((raw[5] & 0x03) << 4) | (raw[6] >> 4)) as usize,
        (((raw[6] & 0x0F) << 2) | (raw[7] >> 6)) as usize,
        (raw[7] & 0x3F) as usize,
        (raw[8] >> 2) as usize,
        (((raw[8] & 0x03) << 4) | (raw[9] >> 4)) as usize,
        (((raw[9] & 0x0F) << 2) | (raw[10] >> 6)) as usize,
        (raw[10] & 0x3F) as usize,
    ];
    let callsign: String = idx.iter().map(|&i| ident_char(i)).collect();
    DecodedMessage::Identification { callsign }
}

fn decode_position(raw: &[u8]) -> DecodedMessage {
    let odd = (raw[6] & 0x04) != 0;
    let altitude_ft = decode_ac12(raw);
    let cpr_lat = (((raw[6] & 0x03) as u32) << 15) | ((raw[7] as u32) << 7) | ((raw[8] >> 1) as u32);
    let cpr_lon = (((raw[8] & 0x01) as u32) << 16) | ((raw[9] as u32) << 8) | (raw[10] as u32);
    DecodedMessage::Position {
        odd,
        altitude_ft,
        cpr_lat,
        cpr_lon,
    }
}

fn decode_velocity(raw: &[u8], subtype: u8) -> DecodedMessage {
    // Bytes 8 and 9 encode the 9-bit vertical rate identically across
    // subtypes 1-4: byte8 = [value_low3][vr_source][vr_sign][vr_top3],
    // byte9 = [vr_bottom6][reserved2].
    let vr_sign = (raw[8] & 0x08) != 0;
    let vr_raw = (((raw[8] & 0x07) as i32) << 6) | (((raw[9] & 0xFC) >> 2) as i32);
    let vertical_rate_fpm = if vr_raw == 0 {
        None
    } else {
        let magnitude = (vr_raw - 1) * 64;
        Some(if vr_sign { -magnitude } else { magnitude })
    };

    if subtype == 1 || subtype == 2 {
        let ew_dir = (raw[5] & 0x04) != 0;
        let ew_raw = (((raw[5] & 0x03) as i32) << 8) | (raw[6] as i32);
        let ns_dir = (raw[7] & 0x80) != 0;
        let ns_raw = (((raw[7] & 0x7F) as i32) << 3) | (((raw[8] & 0xE0) >> 5) as i32);

        let vx = if ew_raw == 0 { None } else { Some(ew_raw - 1) };
        let vy = if ns_raw == 0 { None } else { Some(ns_raw - 1) };

        let (speed_kt, heading_deg) = match (vx, vy) {
            (Some(vx), Some(vy)) => {
                let vx_signed = if ew_dir { -(vx as f64) } else { vx as f64 };
                let vy_signed = if ns_dir { -(vy as f64) } else { vy as f64 };
                let speed = (vx_signed * vx_signed + vy_signed * vy_signed).sqrt();
                let mut heading = vx_signed.atan2(vy_signed).to_degrees();
                if heading < 0.0 {
                    heading += 360.0;
                }
                (Some(speed), Some(heading))
            }
            _ => (None, None),
        };

        DecodedMessage::Velocity {
            speed_kt,
            heading_deg,
            vertical_rate_fpm,
            speed_type: None,
        }
    } else {
        // Subtype 3/4: airspeed. Heading is a 10-bit field (2 bits of byte5
        // + all of byte6) scaled by 360/1024; the top bit of byte7 selects
        // IAS (0) vs TAS (1) for the 10-bit airspeed value spanning the
        // rest of byte7 and the top 3 bits of byte8.
        let heading_valid = (raw[5] & 0x04) != 0;
        let heading_raw = (((raw[5] & 0x03) as u32) << 8) | (raw[6] as u32);
        let heading_deg = if heading_valid {
            Some(heading_raw as f64 * 360.0 / 1024.0)
        } else {
            None
        };

        let is_tas = (raw[7] & 0x80) != 0;
        let airspeed_raw = (((raw[7] & 0x7F) as i32) << 3) | (((raw[8] & 0xE0) >> 5) as i32);
        let speed_kt = if airspeed_raw == 0 {
            None
        } else {
            Some((airspeed_raw - 1) as f64)
        };

        DecodedMessage::Velocity {
            speed_kt,
            heading_deg,
            vertical_rate_fpm,
            speed_type: Some(if is_tas { "TAS" } else { "IAS" }),
        }
    }
}

fn decode_squawk(raw: &[u8]) -> DecodedMessage {
    let a = ((raw[3] & 0x80) >> 5) | (raw[2] & 0x02) | ((raw[2] & 0x08) >> 3);
    let b = ((raw[3] & 0x02) << 1) | ((raw[3] & 0x08) >> 2) | ((raw[3] & 0x20) >> 5);
    let c = ((raw[2] & 0x01) << 2) | ((raw[2] & 0x04) >> 1) | ((raw[2] & 0x10) >> 4);
    let d = ((raw[3] & 0x01) << 2) | ((raw[3] & 0x04) >> 1) | ((raw[3] & 0x10) >> 4);
    DecodedMessage::Squawk {
        squawk: format!("{a}{b}{c}{d}"),
    }
}

/// Route a validated frame by DF (and, for DF17/18, by ME Type Code) to the
/// matching decode routine. Returns `None` for DFs that carry no payload
/// this crate decodes (e.g. DF11 all-call replies, which carry only the
/// ICAO address already captured by the validator) or a TC this crate
/// treats as out of scope (per §4.4, only TC 1-8/9-22/19 are defined).
pub fn decode(frame: &crate::validator::ModeFrame) -> Option<DecodedMessage> {
    match frame.df {
        17 | 18 => {
            let tc = frame.type_code()?;
            match tc {
                1..=4 => Some(decode_identification(&frame.raw)),
                5..=8 | 9..=18 | 20..=22 => Some(decode_position(&frame.raw)),
                19 => {
                    let subtype = frame.raw[4] & 0x07;
                    if (1..=4).contains(&subtype) {
                        Some(decode_velocity(&frame.raw, subtype))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        0 | 4 | 16 | 20 => Some(DecodedMessage::Altitude {
            altitude_ft: decode_ac13(&frame.raw),
        }),
        5 | 21 => Some(decode_squawk(&frame.raw)),
        _ => None,
    }
}
