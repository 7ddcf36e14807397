//! Rule-based event engine: per-aircraft alerts (military, emergency squawk,
//! rapid descent, low altitude, geofence entry, circling) plus pairwise
//! proximity detection, each with its own de-dup gate so a sustained
//! condition emits once instead of once per frame.
//!
//! Each check has its own `(icao, EventKind)` de-dup entry in a `HashSet`,
//! cleared when the aircraft is evicted, so a condition that stays true for
//! many consecutive frames only ever produces one event.

use std::collections::HashSet;

use crate::config::PipelineConfig;
use crate::tracker::Aircraft;

const EARTH_RADIUS_NM: f64 = 3440.065;

const EMERGENCY_SQUAWKS: &[(&str, &str)] = &[
    ("7500", "Hijack"),
    ("7600", "Radio failure"),
    ("7700", "Emergency"),
];

/// Named geographic circle a tracked aircraft can enter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Geofence {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_nm: f64,
    pub description: String,
}

/// The condition an [`Event`] reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EventKind {
    Military,
    Emergency,
    RapidDescent,
    LowAltitude,
    Geofence(String),
    Circling,
    /// Carries the other ICAO of the pair so distinct pairs involving the
    /// same aircraft dedup independently.
    Proximity(u32),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Event {
    pub icao: u32,
    pub kind: EventKind,
    pub description: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub timestamp: f64,
}

impl Event {
    /// Short machine-readable tag for `kind`, used by [`Event::to_notification_json`].
    pub fn event_type(&self) -> String {
        match &self.kind {
            EventKind::Military => "military".to_string(),
            EventKind::Emergency => "emergency".to_string(),
            EventKind::RapidDescent => "rapid_descent".to_string(),
            EventKind::LowAltitude => "low_altitude".to_string(),
            EventKind::Geofence(name) => format!("geofence:{name}"),
            EventKind::Circling => "circling".to_string(),
            EventKind::Proximity(other) => format!("proximity:{other:06X}"),
        }
    }

    /// Best-effort JSON payload: `{icao, event_type, description, lat, lon,
    /// altitude_ft, timestamp}`. Collaborators posting to a webhook or
    /// message bus can serialize this directly rather than hand-rolling the
    /// shape.
    pub fn to_notification_json(&self) -> serde_json::Value {
        serde_json::json!({
            "icao": format!("{:06X}", self.icao),
            "event_type": self.event_type(),
            "description": self.description,
            "lat": self.lat,
            "lon": self.lon,
            "altitude_ft": self.altitude_ft,
            "timestamp": self.timestamp,
        })
    }
}

fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

fn normalize_angle_deg(mut deg: f64) -> f64 {
    while deg > 180.0 {
        deg -= 360.0;
    }
    while deg < -180.0 {
        deg += 360.0;
    }
    deg
}

pub struct FilterEngine {
    geofences: Vec<Geofence>,
    low_altitude_ft: i32,
    rapid_descent_fpm: i32,
    proximity_nm: f64,
    proximity_ft: i32,
    circling_window_secs: f64,
    circling_threshold_deg: f64,
    emitted: HashSet<(u32, EventKind)>,
}

impl FilterEngine {
    pub fn new(geofences: Vec<Geofence>, config: &PipelineConfig) -> Self {
        Self {
            geofences,
            low_altitude_ft: config.low_altitude_ft,
            rapid_descent_fpm: config.rapid_descent_fpm,
            proximity_nm: config.proximity_nm,
            proximity_ft: config.proximity_ft,
            circling_window_secs: config.circling_window_secs,
            circling_threshold_deg: config.circling_threshold_deg,
            emitted: HashSet::new(),
        }
    }

    /// Drop all de-dup state for an aircraft, e.g. after the tracker evicts it.
    pub fn clear(&mut self, icao: u32) {
        self.emitted.retain(|(e_icao, _)| *e_icao != icao);
    }

    fn emit(&mut self, key: (u32, EventKind), event: Event) -> Option<Event> {
        if self.emitted.insert(key) {
            Some(event)
        } else {
            None
        }
    }

    /// Run every per-aircraft check against one aircraft's current state.
    pub fn check(&mut self, aircraft: &Aircraft, now: f64) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.check_military(aircraft, now));
        events.extend(self.check_emergency(aircraft, now));
        events.extend(self.check_rapid_descent(aircraft, now));
        events.extend(self.check_low_altitude(aircraft, now));
        events.extend(self.check_geofences(aircraft, now));
        events.extend(self.check_circling(aircraft, now));
        events
    }

    fn check_military(&mut self, aircraft: &Aircraft, now: f64) -> Option<Event> {
        if !aircraft.is_military {
            return None;
        }
        self.emit(
            (aircraft.icao, EventKind::Military),
            Event {
                icao: aircraft.icao,
                kind: EventKind::Military,
                description: "Military aircraft detected".to_string(),
                lat: aircraft.lat,
                lon: aircraft.lon,
                altitude_ft: aircraft.altitude_ft,
                timestamp: now,
            },
        )
    }

    fn check_emergency(&mut self, aircraft: &Aircraft, now: f64) -> Option<Event> {
        let squawk = aircraft.squawk.as_deref()?;
        let (_, label) = EMERGENCY_SQUAWKS.iter().find(|(code, _)| *code == squawk)?;
        self.emit(
            (aircraft.icao, EventKind::Emergency),
            Event {
                icao: aircraft.icao,
                kind: EventKind::Emergency,
                description: format!("Emergency squawk {squawk}: {label}"),
                lat: aircraft.lat,
                lon: aircraft.lon,
                altitude_ft: aircraft.altitude_ft,
                timestamp: now,
            },
        )
    }

    fn check_rapid_descent(&mut self, aircraft: &Aircraft, now: f64) -> Option<Event> {
        let vr = aircraft.vertical_rate_fpm?;
        if vr >= self.rapid_descent_fpm {
            return None;
        }
        self.emit(
            (aircraft.icao, EventKind::RapidDescent),
            Event {
                icao: aircraft.icao,
                kind: EventKind::RapidDescent,
                description: format!("Rapid descent: {vr} fpm"),
                lat: aircraft.lat,
                lon: aircraft.lon,
                altitude_ft: aircraft.altitude_ft,
                timestamp: now,
            },
        )
    }

    fn check_low_altitude(&mut self, aircraft: &Aircraft, now: f64) -> Option<Event> {
        let alt = aircraft.altitude_ft?;
        if !(alt > 0 && alt < self.low_altitude_ft) {
            return None;
        }
        self.emit(
            (aircraft.icao, EventKind::LowAltitude),
            Event {
                icao: aircraft.icao,
                kind: EventKind::LowAltitude,
                description: format!("Low altitude: {alt} ft"),
                lat: aircraft.lat,
                lon: aircraft.lon,
                altitude_ft: aircraft.altitude_ft,
                timestamp: now,
            },
        )
    }

    fn check_geofences(&mut self, aircraft: &Aircraft, now: f64) -> Vec<Event> {
        let (Some(lat), Some(lon)) = (aircraft.lat, aircraft.lon) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        for fence in &self.geofences {
            let dist = haversine_nm(lat, lon, fence.lat, fence.lon);
            if dist > fence.radius_nm {
                continue;
            }
            let key = (aircraft.icao, EventKind::Geofence(fence.name.clone()));
            if let Some(event) = self.emit(
                key,
                Event {
                    icao: aircraft.icao,
                    kind: EventKind::Geofence(fence.name.clone()),
                    description: format!("Entered geofence {}: {}", fence.name, fence.description),
                    lat: Some(lat),
                    lon: Some(lon),
                    altitude_ft: aircraft.altitude_ft,
                    timestamp: now,
                },
            ) {
                events.push(event);
            }
        }
        events
    }

    fn check_circling(&mut self, aircraft: &Aircraft, now: f64) -> Option<Event> {
        if aircraft.heading_history.len() < 4 {
            return None;
        }
        let window: Vec<(f64, f64)> = aircraft
            .heading_history
            .iter()
            .copied()
            .filter(|(t, _)| now - t <= self.circling_window_secs)
            .collect();
        if window.len() < 4 {
            return None;
        }
        let total_change: f64 = window
            .windows(2)
            .map(|pair| normalize_angle_deg(pair[1].1 - pair[0].1).abs())
            .sum();
        if total_change < self.circling_threshold_deg {
            return None;
        }
        self.emit(
            (aircraft.icao, EventKind::Circling),
            Event {
                icao: aircraft.icao,
                kind: EventKind::Circling,
                description: format!("Circling: {total_change:.0} deg cumulative heading change"),
                lat: aircraft.lat,
                lon: aircraft.lon,
                altitude_ft: aircraft.altitude_ft,
                timestamp: now,
            },
        )
    }

    /// Pairwise proximity check across all currently tracked aircraft.
    pub fn check_proximity(&mut self, aircraft: &[&Aircraft], now: f64) -> Vec<Event> {
        let mut events = Vec::new();
        for i in 0..aircraft.len() {
            for j in (i + 1)..aircraft.len() {
                let a = aircraft[i];
                let b = aircraft[j];
                let (Some(a_lat), Some(a_lon)) = (a.lat, a.lon) else {
                    continue;
                };
                let (Some(b_lat), Some(b_lon)) = (b.lat, b.lon) else {
                    continue;
                };
                let horizontal = haversine_nm(a_lat, a_lon, b_lat, b_lon);
                if horizontal > self.proximity_nm {
                    continue;
                }
                // Vertical separation only gates the pair when both altitudes
                // are known; a missing altitude must not suppress an
                // otherwise-valid horizontal proximity event.
                let vertical = match (a.altitude_ft, b.altitude_ft) {
                    (Some(a_alt), Some(b_alt)) => {
                        let v = (a_alt - b_alt).unsigned_abs() as i32;
                        if v > self.proximity_ft {
                            continue;
                        }
                        Some(v)
                    }
                    _ => None,
                };
                let (lo, hi) = if a.icao <= b.icao {
                    (a.icao, b.icao)
                } else {
                    (b.icao, a.icao)
                };
                // Keyed on the sorted pair so (a, b) and (b, a) dedup together.
                if self.emitted.insert((lo, EventKind::Proximity(hi))) {
                    let description = match vertical {
                        Some(v) => format!("Proximity with {hi:06X}: {horizontal:.1} nm, {v} ft"),
                        None => format!(
                            "Proximity with {hi:06X}: {horizontal:.1} nm, altitude unknown"
                        ),
                    };
                    events.push(Event {
                        icao: lo,
                        kind: EventKind::Proximity(hi),
                        description,
                        lat: Some(a_lat),
                        lon: Some(a_lon),
                        altitude_ft: a.altitude_ft,
                        timestamp: now,
                    });
                }
            }
        }
        events
    }
}
