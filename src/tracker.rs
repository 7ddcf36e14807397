//! Per-aircraft state machine: message ingestion, CPR pair buffering,
//! position/velocity/identity updates, and stale eviction.
//!
//! A flat `HashMap<u32, Aircraft>` keyed by ICAO address, updated in place
//! on each ingested frame, enriched with ICAO-block lookups
//! ([`crate::icao_db`]), bounded position/heading history
//! ([`crate::history::Ring`]), message/position/event counters, and
//! ingest-side position downsampling before a position reaches a
//! persistence sink.

use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::cpr::{self, CprFrame};
use crate::decoder::DecodedMessage;
use crate::history::Ring;
use crate::icao_db;
use crate::validator::ModeFrame;

#[derive(Debug, Clone, Copy)]
struct CprBuffer {
    lat_cpr: u32,
    lon_cpr: u32,
    timestamp: f64,
}

/// One aircraft's accumulated state, keyed by its 24-bit ICAO address.
#[derive(Debug, Clone)]
pub struct Aircraft {
    pub icao: u32,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub country: Option<&'static str>,
    pub registration: Option<String>,
    pub is_military: bool,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub speed_kt: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,

    even_cpr: Option<CprBuffer>,
    odd_cpr: Option<CprBuffer>,

    pub position_history: Ring<(f64, f64, f64)>, // (timestamp, lat, lon)
    pub heading_history: Ring<(f64, f64)>,        // (timestamp, heading_deg)

    pub first_seen: f64,
    pub last_seen: f64,
    pub message_count: u64,

    last_forwarded_position: Option<f64>,
}

impl Aircraft {
    fn new(icao: u32, timestamp: f64, ring_size: usize) -> Self {
        Self {
            icao,
            callsign: None,
            squawk: None,
            country: icao_db::country(icao),
            registration: icao_db::n_number(icao),
            is_military: icao_db::is_military(icao, None),
            lat: None,
            lon: None,
            altitude_ft: None,
            speed_kt: None,
            heading_deg: None,
            vertical_rate_fpm: None,
            even_cpr: None,
            odd_cpr: None,
            position_history: Ring::new(ring_size),
            heading_history: Ring::new(ring_size),
            first_seen: timestamp,
            last_seen: timestamp,
            message_count: 0,
            last_forwarded_position: None,
        }
    }

    pub fn hex(&self) -> String {
        format!("{:06X}", self.icao)
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    /// A serializable, read-only snapshot of this aircraft's current state,
    /// for a collaborator (dashboard, exporter) per spec.md §6. Omits the
    /// CPR buffering internals and history rings, which are this crate's
    /// own bookkeeping rather than external interface.
    pub fn snapshot(&self) -> AircraftSnapshot {
        AircraftSnapshot {
            icao: self.icao,
            callsign: self.callsign.clone(),
            squawk: self.squawk.clone(),
            country: self.country,
            registration: self.registration.clone(),
            is_military: self.is_military,
            lat: self.lat,
            lon: self.lon,
            altitude_ft: self.altitude_ft,
            speed_kt: self.speed_kt,
            heading_deg: self.heading_deg,
            vertical_rate_fpm: self.vertical_rate_fpm,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            message_count: self.message_count,
        }
    }
}

/// Read-only, serializable view of an aircraft's current tracked state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AircraftSnapshot {
    pub icao: u32,
    pub callsign: Option<String>,
    pub squawk: Option<String>,
    pub country: Option<&'static str>,
    pub registration: Option<String>,
    pub is_military: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub speed_kt: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_fpm: Option<i32>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub message_count: u64,
}

/// A resolved position ready for the persistence sink, after the
/// min-position-interval downsampling gate.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PositionUpdate {
    pub icao: u32,
    pub lat: f64,
    pub lon: f64,
    pub altitude_ft: Option<i32>,
    pub timestamp: f64,
}

/// What a single `update()` call produced.
#[derive(Debug, Clone, Default)]
pub struct UpdateOutcome {
    pub message: Option<DecodedMessage>,
    pub position_forwarded: Option<PositionUpdate>,
}

pub struct AircraftTracker {
    aircraft: HashMap<u32, Aircraft>,
    config: PipelineConfig,
    pub total_frames: u64,
    pub valid_frames: u64,
    pub position_decodes: u64,
}

impl AircraftTracker {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            aircraft: HashMap::new(),
            config,
            total_frames: 0,
            valid_frames: 0,
            position_decodes: 0,
        }
    }

    pub fn get(&self, icao: u32) -> Option<&Aircraft> {
        self.aircraft.get(&icao)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aircraft> {
        self.aircraft.values()
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    fn get_or_create(&mut self, icao: u32, timestamp: f64) -> &mut Aircraft {
        let ring_size = self.config.history_ring_size;
        self.aircraft
            .entry(icao)
            .or_insert_with(|| Aircraft::new(icao, timestamp, ring_size))
    }

    /// Ingest one validated frame, updating or creating the aircraft it
    /// describes and resolving a position when a CPR pair completes.
    pub fn update(&mut self, frame: &ModeFrame) -> UpdateOutcome {
        self.total_frames += 1;

        let Some(message) = crate::decoder::decode(frame) else {
            return UpdateOutcome::default();
        };
        self.valid_frames += 1;

        let receiver_ref = self
            .config
            .receiver_lat
            .zip(self.config.receiver_lon);

        let aircraft = self.get_or_create(frame.icao, frame.timestamp);
        aircraft.last_seen = frame.timestamp;
        aircraft.message_count += 1;

        let mut outcome = UpdateOutcome {
            message: Some(message.clone()),
            position_forwarded: None,
        };

        match &message {
            DecodedMessage::Identification { callsign } => {
                let trimmed = callsign.trim().to_string();
                aircraft.is_military =
                    aircraft.is_military || icao_db::is_military(aircraft.icao, Some(&trimmed));
                aircraft.callsign = Some(trimmed);
            }
            DecodedMessage::Position {
                odd,
                altitude_ft,
                cpr_lat,
                cpr_lon,
            } => {
                if altitude_ft.is_some() {
                    aircraft.altitude_ft = *altitude_ft;
                }
                let buf = CprBuffer {
                    lat_cpr: *cpr_lat,
                    lon_cpr: *cpr_lon,
                    timestamp: frame.timestamp,
                };
                if *odd {
                    aircraft.odd_cpr = Some(buf);
                } else {
                    aircraft.even_cpr = Some(buf);
                }

                let mut resolved = None;
                if let (Some(e), Some(o)) = (aircraft.even_cpr, aircraft.odd_cpr) {
                    if (e.timestamp - o.timestamp).abs() <= 10.0 {
                        resolved = cpr::global_decode(
                            CprFrame {
                                lat_cpr: e.lat_cpr,
                                lon_cpr: e.lon_cpr,
                                timestamp: e.timestamp,
                            },
                            CprFrame {
                                lat_cpr: o.lat_cpr,
                                lon_cpr: o.lon_cpr,
                                timestamp: o.timestamp,
                            },
                        );
                    }
                }
                if resolved.is_none() {
                    let reference = aircraft.lat.zip(aircraft.lon).or(receiver_ref);
                    if let Some((ref_lat, ref_lon)) = reference {
                        let latest = if *odd { aircraft.odd_cpr } else { aircraft.even_cpr };
                        if let Some(buf) = latest {
                            resolved = Some(cpr::local_decode(
                                CprFrame {
                                    lat_cpr: buf.lat_cpr,
                                    lon_cpr: buf.lon_cpr,
                                    timestamp: buf.timestamp,
                                },
                                *odd,
                                ref_lat,
                                ref_lon,
                            ));
                        }
                    }
                }

                if let Some(pos) = resolved {
                    aircraft.lat = Some(pos.lat);
                    aircraft.lon = Some(pos.lon);
                    aircraft
                        .position_history
                        .push((frame.timestamp, pos.lat, pos.lon));
                    self.position_decodes += 1;

                    let interval = self.config.min_position_interval_secs;
                    let should_forward = match aircraft.last_forwarded_position {
                        Some(t) if interval > 0.0 => (frame.timestamp - t) >= interval,
                        _ => true,
                    };
                    if should_forward {
                        aircraft.last_forwarded_position = Some(frame.timestamp);
                        outcome.position_forwarded = Some(PositionUpdate {
                            icao: aircraft.icao,
                            lat: pos.lat,
                            lon: pos.lon,
                            altitude_ft: aircraft.altitude_ft,
                            timestamp: frame.timestamp,
                        });
                    }
                }
            }
            DecodedMessage::Velocity {
                speed_kt,
                heading_deg,
                vertical_rate_fpm,
                ..
            } => {
                if let Some(s) = speed_kt {
                    aircraft.speed_kt = Some(*s);
                }
                if let Some(h) = heading_deg {
                    aircraft.heading_deg = Some(*h);
                    aircraft.heading_history.push((frame.timestamp, *h));
                }
                if let Some(vr) = vertical_rate_fpm {
                    aircraft.vertical_rate_fpm = Some(*vr);
                }
            }
            DecodedMessage::Altitude { altitude_ft } => {
                if altitude_ft.is_some() {
                    aircraft.altitude_ft = *altitude_ft;
                }
            }
            DecodedMessage::Squawk { squawk } => {
                aircraft.squawk = Some(squawk.clone());
            }
        }

        outcome
    }

    /// Remove aircraft whose last message is older than the configured
    /// stale timeout, returning the ICAOs removed (a filter engine should
    /// clear its de-dup state for each).
    pub fn prune_stale_icaos(&mut self, now: f64) -> Vec<u32> {
        let timeout = self.config.stale_timeout_secs;
        let stale: Vec<u32> = self
            .aircraft
            .iter()
            .filter(|(_, a)| a.age(now) > timeout)
            .map(|(&icao, _)| icao)
            .collect();
        for icao in &stale {
            self.aircraft.remove(icao);
        }
        stale
    }

    /// Convenience wrapper returning just the number of aircraft removed.
    pub fn prune_stale(&mut self, now: f64) -> usize {
        self.prune_stale_icaos(now).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::IcaoCache;

    fn frame(hex: &str, timestamp: f64) -> ModeFrame {
        let mut cache = IcaoCache::default();
        crate::validator::parse_frame(hex, timestamp, None, &mut cache, false).unwrap()
    }

    #[test]
    fn identification_sets_trimmed_callsign() {
        let mut tracker = AircraftTracker::new(PipelineConfig::default());
        let f = frame("8D4840D6202CC371C32CE0576098", 0.0);
        let outcome = tracker.update(&f);
        assert!(outcome.message.is_some());
        let ac = tracker.get(f.icao).unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("KLM1023"));
    }

    #[test]
    fn matched_even_odd_pair_resolves_position() {
        let mut tracker = AircraftTracker::new(PipelineConfig::default());
        let even = frame("8D40621D58C382D690C8AC2863A7", 1.0);
        let odd = frame("8D40621D58C386435CC412692AD6", 0.5);
        assert_eq!(even.icao, odd.icao);

        tracker.update(&odd);
        let outcome = tracker.update(&even);

        let ac = tracker.get(even.icao).unwrap();
        assert!(ac.has_position());
        assert!((ac.lat.unwrap() - 52.2572).abs() < 0.1);
        assert!((ac.lon.unwrap() - 3.9194).abs() < 0.1);
        assert!(outcome.position_forwarded.is_some());
    }

    #[test]
    fn total_and_valid_frame_counters_track_decode_success() {
        let mut tracker = AircraftTracker::new(PipelineConfig::default());
        // DF11 all-call carries no decodable payload -> valid_frames stays 0.
        let mut raw = [0u8; 7];
        raw[0] = 11 << 3;
        let hex: String = raw.iter().map(|b| format!("{b:02X}")).collect();
        let f = frame(&hex, 0.0);
        tracker.update(&f);
        assert_eq!(tracker.total_frames, 1);
        assert_eq!(tracker.valid_frames, 0);
    }

    #[test]
    fn prune_stale_evicts_aircraft_past_timeout() {
        let mut config = PipelineConfig::default();
        config.stale_timeout_secs = 60.0;
        let mut tracker = AircraftTracker::new(config);
        let f = frame("8D4840D6202CC371C32CE0576098", 0.0);
        tracker.update(&f);
        assert_eq!(tracker.len(), 1);

        let removed = tracker.prune_stale_icaos(30.0);
        assert!(removed.is_empty());
        assert_eq!(tracker.len(), 1);

        let removed = tracker.prune_stale_icaos(120.0);
        assert_eq!(removed, vec![f.icao]);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn min_position_interval_downsamples_forwarded_positions() {
        let mut config = PipelineConfig::default();
        config.min_position_interval_secs = 5.0;
        let mut tracker = AircraftTracker::new(config);
        let odd = frame("8D40621D58C386435CC412692AD6", 0.5);
        let even = frame("8D40621D58C382D690C8AC2863A7", 1.0);
        tracker.update(&odd);
        let first = tracker.update(&even);
        assert!(first.position_forwarded.is_some());

        // A second even frame one second later resolves via local decode
        // (previous position now known) but should be downsampled away.
        let even2 = frame("8D40621D58C382D690C8AC2863A7", 2.0);
        let second = tracker.update(&even2);
        assert!(second.position_forwarded.is_none());
    }

    #[test]
    fn snapshot_serializes_tracked_state() {
        let mut tracker = AircraftTracker::new(PipelineConfig::default());
        let f = frame("8D4840D6202CC371C32CE0576098", 0.0);
        tracker.update(&f);
        let ac = tracker.get(f.icao).unwrap();

        let json = serde_json::to_value(ac.snapshot()).unwrap();
        assert_eq!(json["icao"], f.icao);
        assert_eq!(json["callsign"], "KLM1023");
    }
}
