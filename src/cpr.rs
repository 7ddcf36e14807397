//! Compact Position Reporting: the even/odd zone geometry ADS-B uses to
//! pack a lat/lon pair into 2×17 bits without transmitting a full-precision
//! position.
//!
//! All geometry here is double precision; CPR's zone boundaries are narrow
//! enough that single precision introduces visible error near them.

const NZ: f64 = 15.0;
const MAX: f64 = 131_072.0; // 2^17

/// One parity's worth of CPR-encoded position as received over the air.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CprFrame {
    pub lat_cpr: u32,
    pub lon_cpr: u32,
    pub timestamp: f64,
}

/// Even-latitude zone size (360 / (4*NZ)).
fn dlat_even() -> f64 {
    360.0 / (4.0 * NZ)
}

/// Odd-latitude zone size (360 / (4*NZ - 1)).
fn dlat_odd() -> f64 {
    360.0 / (4.0 * NZ - 1.0)
}

/// Non-negative modulo: `x - y*floor(x/y)`. Rust's `%` keeps the sign of
/// the dividend, which is wrong for the wraparound arithmetic CPR relies on.
fn modulo(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

/// Number of longitude zones at `lat`, via the analytic formula rather than
/// a precomputed lookup ladder — this is a quantified property
/// (`NL(lat) == NL(-lat)`, `NL(0) == 59`, `NL(±87) == 1`, monotonic), so the
/// closed form is the thing under test, not an optimization of it.
pub fn nl(lat: f64) -> i64 {
    let lat = lat.abs();
    if lat >= 87.0 {
        return 1;
    }
    let numerator = 1.0 - (1.0 - (std::f64::consts::PI / (2.0 * NZ)).cos());
    let denom = (std::f64::consts::PI * lat / 180.0).cos().powi(2);
    let inner = 1.0 - numerator / denom;
    let n = (2.0 * std::f64::consts::PI / inner.acos()).floor() as i64;
    n.max(1)
}

fn n_lon(nl_val: i64, odd: bool) -> i64 {
    (nl_val - if odd { 1 } else { 0 }).max(1)
}

/// Result of a successful CPR decode, rounded to 6 decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

fn round6(x: f64) -> f64 {
    (x * 1_000_000.0).round() / 1_000_000.0
}

fn normalize_lon(lon: f64) -> f64 {
    let mut lon = lon;
    if lon >= 180.0 {
        lon -= 360.0;
    }
    lon
}

/// Global (even/odd pair) decode. `|even.timestamp - odd.timestamp| <= 10s`
/// is a precondition the tracker enforces before calling this; this function
/// does not itself look at the timestamps beyond using them to choose the
/// more recent frame as the basis for longitude.
///
/// Returns `None` if the pair straddles an NL zone boundary — the correct
/// response to that ambiguity is to discard the pair, not guess.
pub fn global_decode(even: CprFrame, odd: CprFrame) -> Option<Position> {
    let lat_e_x = even.lat_cpr as f64 / MAX;
    let lat_o_x = odd.lat_cpr as f64 / MAX;
    let lon_e_x = even.lon_cpr as f64 / MAX;
    let lon_o_x = odd.lon_cpr as f64 / MAX;

    let j = (59.0 * lat_e_x - 60.0 * lat_o_x + 0.5).floor();

    let mut lat_even = dlat_even() * (modulo(j, 60.0) + lat_e_x);
    let mut lat_odd = dlat_odd() * (modulo(j, 59.0) + lat_o_x);
    if lat_even >= 270.0 {
        lat_even -= 360.0;
    }
    if lat_odd >= 270.0 {
        lat_odd -= 360.0;
    }

    let nl_even = nl(lat_even);
    let nl_odd = nl(lat_odd);
    if nl_even != nl_odd {
        return None;
    }

    let newer_is_odd = odd.timestamp >= even.timestamp;
    let (lat, lon_x, odd_parity) = if newer_is_odd {
        (lat_odd, lon_o_x, true)
    } else {
        (lat_even, lon_e_x, false)
    };

    let m = (lon_e_x * (nl_even - 1) as f64 - lon_o_x * nl_even as f64 + 0.5).floor();
    let n_lon_val = n_lon(nl_even, odd_parity);
    let dlon = 360.0 / n_lon_val as f64;
    let lon = dlon * (modulo(m, n_lon_val as f64) + lon_x);

    Some(Position {
        lat: round6(lat),
        lon: round6(normalize_lon(lon)),
    })
}

/// Local (reference-relative) decode: resolves a single CPR frame against a
/// known-nearby reference position (receiver location or the aircraft's
/// last fix). Valid only when the reference is within ~180 nmi of the true
/// position — callers are responsible for that precondition.
pub fn local_decode(frame: CprFrame, odd: bool, ref_lat: f64, ref_lon: f64) -> Position {
    let lat_cpr_x = frame.lat_cpr as f64 / MAX;
    let lon_cpr_x = frame.lon_cpr as f64 / MAX;

    let dlat = if odd { dlat_odd() } else { dlat_even() };
    let j = (ref_lat / dlat).floor() + (modulo(ref_lat, dlat) / dlat - lat_cpr_x + 0.5).floor();
    let lat = dlat * (j + lat_cpr_x);

    let nl_val = nl(lat);
    let n_lon_val = n_lon(nl_val, odd);
    let dlon = 360.0 / n_lon_val as f64;
    let m = (ref_lon / dlon).floor() + (modulo(ref_lon, dlon) / dlon - lon_cpr_x + 0.5).floor();
    let lon = dlon * (m + lon_cpr_x);

    Position {
        lat: round6(lat),
        lon: round6(normalize_lon(lon)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// A hardcoded latitude-breakpoint ladder, kept only as a cross-check
    /// oracle against the analytic formula — both were derived from the
    /// same source, so agreement is itself a regression test and this is
    /// never the production path.
    fn nl_lookup_oracle(lat: f64) -> i64 {
        let lat = lat.abs();
        let table: &[(f64, i64)] = &[
            (10.47047130, 59),
            (14.82817437, 58),
            (18.18626357, 57),
            (21.02939493, 56),
            (23.54504487, 55),
            (25.82924707, 54),
            (27.93898710, 53),
            (29.91135686, 52),
            (31.77209708, 51),
            (33.53993436, 50),
            (35.22899598, 49),
            (36.85025108, 48),
            (38.41241892, 47),
            (39.92256684, 46),
            (41.38651832, 45),
            (42.80914012, 44),
            (44.19454951, 43),
            (45.54626723, 42),
            (46.86733252, 41),
            (48.16039128, 40),
            (49.42776439, 39),
            (50.67150166, 38),
            (51.89342469, 37),
            (53.09516153, 36),
            (54.27817472, 35),
            (55.44378444, 34),
            (56.59318756, 33),
            (57.72747354, 32),
            (58.84763776, 31),
            (59.95459277, 30),
            (61.04917774, 29),
            (62.13216659, 28),
            (63.20427479, 27),
            (64.26616523, 26),
            (65.31845310, 25),
            (66.36171008, 24),
            (67.39646774, 23),
            (68.42322022, 22),
            (69.44242631, 21),
            (70.45451075, 20),
            (71.45986473, 19),
            (72.45884545, 18),
            (73.45177442, 17),
            (74.43893416, 16),
            (75.42056257, 15),
            (76.39684391, 14),
            (77.36789461, 13),
            (78.33374083, 12),
            (79.29428225, 11),
            (80.24923213, 10),
            (81.19801349, 9),
            (82.13956981, 8),
            (83.07199445, 7),
            (83.99173563, 6),
            (84.89166191, 5),
            (85.75541621, 4),
            (86.53536998, 3),
            (87.00000000, 2),
        ];
        for &(bound, n) in table {
            if lat < bound {
                return n;
            }
        }
        1
    }

    #[test]
    fn nl_matches_lookup_oracle_across_latitudes() {
        let mut lat = -89.9;
        while lat <= 89.9 {
            assert_eq!(nl(lat), nl_lookup_oracle(lat), "mismatch at lat={lat}");
            lat += 0.37;
        }
    }

    #[test]
    fn nl_symmetric_and_fixed_points() {
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-87.0), 1);
        assert_eq!(nl(45.0), nl(-45.0));
    }

    #[test]
    fn nl_monotonic_from_equator_to_pole() {
        let mut prev = nl(0.0);
        let mut lat = 0.5;
        while lat < 90.0 {
            let cur = nl(lat);
            assert!(cur <= prev, "NL must not increase with |lat|");
            prev = cur;
            lat += 0.5;
        }
    }

    #[test]
    fn global_decode_resolves_a_straightforward_pair() {
        // Classic example pair from the published CPR worked example
        // (even lat=92095, lon=39846; odd lat=88385, lon=125818).
        let even = CprFrame {
            lat_cpr: 92095,
            lon_cpr: 39846,
            timestamp: 0.0,
        };
        let odd = CprFrame {
            lat_cpr: 88385,
            lon_cpr: 125818,
            timestamp: 1.0,
        };
        let pos = global_decode(even, odd).expect("should resolve");
        assert_abs_diff_eq!(pos.lat, 52.257202, epsilon = 1e-3);
        assert_abs_diff_eq!(pos.lon, 3.919373, epsilon = 1e-3);
    }

    #[test]
    fn local_decode_recovers_nearby_position() {
        let even = CprFrame {
            lat_cpr: 92095,
            lon_cpr: 39846,
            timestamp: 0.0,
        };
        let odd = CprFrame {
            lat_cpr: 88385,
            lon_cpr: 125818,
            timestamp: 1.0,
        };
        let truth = global_decode(even, odd).unwrap();

        let local = local_decode(even, false, truth.lat, truth.lon);
        assert_abs_diff_eq!(local.lat, truth.lat, epsilon = 1e-3);
        assert_abs_diff_eq!(local.lon, truth.lon, epsilon = 1e-3);
    }

    #[test]
    fn modulo_matches_non_negative_convention() {
        assert_abs_diff_eq!(modulo(5.0, 3.0), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(modulo(-1.0, 3.0), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(modulo(-5.0, 3.0), 1.0, epsilon = 1e-9);
    }
}
