//! Signal-to-state pipeline for 1090 MHz Mode S / ADS-B.
//!
//! Wires the crate's modules into one ingest path: raw IQ or hex frames in,
//! validated [`validator::ModeFrame`]s through [`validator::parse_frame`],
//! decoded [`decoder::DecodedMessage`]s through [`tracker::AircraftTracker`],
//! resolved aircraft state, and [`filters::Event`]s out. CLI argument
//! parsing, network servers, and capture-device glue are left to
//! collaborators; this crate only covers the signal-to-state path.

pub mod config;
pub mod cpr;
pub mod crc;
pub mod decoder;
pub mod demodulator;
pub mod filters;
pub mod history;
pub mod icao_db;
pub mod magnitude;
pub mod tracker;
pub mod validator;

pub use config::PipelineConfig;
pub use decoder::DecodedMessage;
pub use filters::{Event, EventKind, FilterEngine, Geofence};
pub use tracker::{Aircraft, AircraftSnapshot, AircraftTracker, PositionUpdate, UpdateOutcome};
pub use validator::{IcaoCache, ModeFrame, ValidationError};

/// Error a sink adapter reports back to the pipeline. Never propagated past
/// the call site — the pipeline logs it at `warn!` and continues.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Sink a collaborator implements to persist resolved aircraft positions.
/// Called once per forwarded position update, already downsampled per
/// [`PipelineConfig::min_position_interval_secs`]. A returned `Err` is
/// logged and dropped; it never aborts the frame that triggered it.
pub trait PersistenceSink: Send {
    fn record_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError>;
}

/// Sink a collaborator implements to receive filter-engine events as they
/// fire (dashboards, alerting, logging fan-out). A returned `Err` is logged
/// and dropped, same as [`PersistenceSink`].
pub trait NotificationSink: Send {
    fn notify(&mut self, event: &Event) -> Result<(), SinkError>;
}

/// Ties demodulation, validation, decoding, tracking, and filtering into a
/// single ingest surface. Owns no I/O: callers push raw IQ bytes or raw hex
/// frames in and optionally attach sinks to receive positions and events.
pub struct Pipeline {
    config: PipelineConfig,
    demod: demodulator::DemodulatorState,
    icao_cache: validator::IcaoCache,
    tracker: tracker::AircraftTracker,
    filters: filters::FilterEngine,
    persistence: Option<Box<dyn PersistenceSink>>,
    notifications: Option<Box<dyn NotificationSink>>,
}

/// What one ingested frame produced, after validation, decode, tracking, and
/// filtering.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub frame: Option<ModeFrame>,
    pub message: Option<DecodedMessage>,
    pub events: Vec<Event>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, geofences: Vec<Geofence>) -> Self {
        let demod = demodulator::DemodulatorState::from_config(&config);
        let icao_cache = validator::IcaoCache::new(config.icao_cache_ttl_secs);
        let tracker = tracker::AircraftTracker::new(config.clone());
        let filters = filters::FilterEngine::new(geofences, &config);
        Self {
            config,
            demod,
            icao_cache,
            tracker,
            filters,
            persistence: None,
            notifications: None,
        }
    }

    pub fn with_persistence(mut self, sink: Box<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn with_notifications(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    pub fn tracker(&self) -> &tracker::AircraftTracker {
        &self.tracker
    }

    /// Demodulate one chunk of interleaved IQ bytes, then validate and
    /// ingest every candidate frame recovered. Chunks must overlap by at
    /// least [`demodulator::DETECTION_WINDOW`] samples between calls.
    pub fn ingest_iq(&mut self, iq: &[u8], base_time: f64, source: &str) -> Vec<IngestOutcome> {
        let raw_frames = self.demod.feed(iq, base_time, source);
        raw_frames
            .into_iter()
            .map(|raw| self.ingest_hex(&raw.hex, raw.timestamp, raw.signal_level))
            .collect()
    }

    /// Drain every [`demodulator::RawFrame`] currently buffered on `rx` and
    /// ingest each one. A capture collaborator demodulates (or reads hex) on
    /// its own thread and pushes `RawFrame`s across a `crossbeam_channel`;
    /// this pipeline drains whatever has arrived without blocking.
    pub fn ingest_from_channel(
        &mut self,
        rx: &crossbeam_channel::Receiver<demodulator::RawFrame>,
    ) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            outcomes.push(self.ingest_hex(&raw.hex, raw.timestamp, raw.signal_level));
        }
        outcomes
    }

    /// Validate, decode, track, and filter a single hex-encoded frame.
    pub fn ingest_hex(
        &mut self,
        hex: &str,
        timestamp: f64,
        signal_level: Option<f64>,
    ) -> IngestOutcome {
        let validate_icao = true;
        let frame = match validator::parse_frame(
            hex,
            timestamp,
            signal_level,
            &mut self.icao_cache,
            validate_icao,
        ) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%hex, %err, "frame rejected");
                return IngestOutcome::default();
            }
        };

        let outcome = self.tracker.update(&frame);

        if let (Some(update), Some(sink)) = (&outcome.position_forwarded, &mut self.persistence) {
            if let Err(err) = sink.record_position(update) {
                tracing::warn!(icao = format!("{:06X}", frame.icao), %err, "persistence sink dropped a position");
            }
        }

        let mut events = Vec::new();
        if let Some(aircraft) = self.tracker.get(frame.icao) {
            events = self.filters.check(aircraft, timestamp);
        }
        if let Some(sink) = &mut self.notifications {
            for event in &events {
                if let Err(err) = sink.notify(event) {
                    tracing::warn!(%err, "notification sink dropped an event");
                }
            }
        }

        IngestOutcome {
            frame: Some(frame),
            message: outcome.message,
            events,
        }
    }

    /// Pairwise proximity sweep across every currently tracked aircraft with
    /// a known position. Run this periodically, not per-frame.
    pub fn check_proximity(&mut self, now: f64) -> Vec<Event> {
        let snapshot: Vec<&Aircraft> = self.tracker.iter().collect();
        let events = self.filters.check_proximity(&snapshot, now);
        if let Some(sink) = &mut self.notifications {
            for event in &events {
                if let Err(err) = sink.notify(event) {
                    tracing::warn!(%err, "notification sink dropped a proximity event");
                }
            }
        }
        events
    }

    /// Evict aircraft past the configured stale timeout, clearing their
    /// filter-engine de-dup state too.
    pub fn prune_stale(&mut self, now: f64) -> usize {
        let removed = self.tracker.prune_stale_icaos(now);
        for icao in &removed {
            self.filters.clear(*icao);
        }
        let cache_pruned = self.icao_cache.prune(now);
        if !removed.is_empty() || cache_pruned > 0 {
            tracing::info!(
                aircraft_removed = removed.len(),
                icao_cache_pruned = cache_pruned,
                "prune_stale"
            );
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSinks {
        positions: Vec<PositionUpdate>,
        events: Vec<Event>,
    }

    impl PersistenceSink for std::sync::Arc<parking_lot::Mutex<RecordingSinks>> {
        fn record_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
            self.lock().positions.push(update.clone());
            Ok(())
        }
    }

    impl NotificationSink for std::sync::Arc<parking_lot::Mutex<RecordingSinks>> {
        fn notify(&mut self, event: &Event) -> Result<(), SinkError> {
            self.lock().events.push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn ingest_hex_decodes_identification_frame() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new());
        let outcome = pipeline.ingest_hex("8D4840D6202CC371C32CE0576098", 0.0, None);
        assert!(outcome.frame.is_some());
        match outcome.message {
            Some(DecodedMessage::Identification { callsign }) => {
                assert_eq!(callsign.trim(), "KLM1023");
            }
            other => panic!("expected identification message, got {other:?}"),
        }
    }

    #[test]
    fn ingest_hex_rejects_garbage() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new());
        let outcome = pipeline.ingest_hex("not-hex", 0.0, None);
        assert!(outcome.frame.is_none());
        assert!(outcome.message.is_none());
    }

    #[test]
    fn ingest_from_channel_drains_a_capture_threads_raw_frames() {
        let (tx, rx) = crossbeam_channel::bounded(8);
        tx.send(demodulator::RawFrame {
            hex: "8D4840D6202CC371C32CE0576098".to_string(),
            timestamp: 0.0,
            signal_level: None,
            source: "test".to_string(),
        })
        .unwrap();

        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new());
        let outcomes = pipeline.ingest_from_channel(&rx);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].message.is_some());
        assert!(pipeline.ingest_from_channel(&rx).is_empty());
    }

    #[test]
    fn position_forwarding_reaches_persistence_sink() {
        let recorder = std::sync::Arc::new(parking_lot::Mutex::new(RecordingSinks {
            positions: Vec::new(),
            events: Vec::new(),
        }));
        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new())
            .with_persistence(Box::new(recorder.clone()));

        pipeline.ingest_hex("8D40621D58C386435CC412692AD6", 0.5, None);
        pipeline.ingest_hex("8D40621D58C382D690C8AC2863A7", 1.0, None);

        assert_eq!(recorder.lock().positions.len(), 1);
    }

    #[test]
    fn prune_stale_clears_filter_dedup_state() {
        let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new());
        let outcome = pipeline.ingest_hex("8D4840D6202CC371C32CE0576098", 0.0, None);
        let icao = outcome.frame.unwrap().icao;
        assert_eq!(pipeline.tracker().len(), 1);

        let removed = pipeline.prune_stale(1000.0);
        assert_eq!(removed, 1);
        assert_eq!(pipeline.tracker().len(), 0);
        assert!(pipeline.tracker().get(icao).is_none());
    }
}
