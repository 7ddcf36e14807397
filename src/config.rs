//! Pipeline configuration.
//!
//! Every tunable is a plain value on one struct; loading it from a config
//! file or CLI arguments is left to the collaborator embedding this crate.
//! Each field's default matches the behavior documented alongside it.

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Receiver reference position, used for local CPR decode fallback and
    /// as the origin collaborators may use for distance/bearing display.
    pub receiver_lat: Option<f64>,
    pub receiver_lon: Option<f64>,

    /// Seconds of silence after which a tracked aircraft is evictable.
    pub stale_timeout_secs: f64,
    /// Seconds an ICAO cache entry remains valid after its last registration.
    pub icao_cache_ttl_secs: f64,

    /// Noise-floor EMA smoothing factor.
    pub noise_floor_alpha: f64,
    /// Absolute floor below which the adaptive threshold never drops.
    pub absolute_minimum_level: f64,
    /// Minimum pulse-average / gap-average ratio for a valid preamble.
    pub preamble_ratio: f64,
    /// SNR gate factors: `signal_factor * pulse_avg >= noise_factor * gap_avg`.
    pub snr_signal_factor: f64,
    pub snr_noise_factor: f64,
    /// Relative high/low sample delta below which a bit is "uncertain".
    pub bit_delta_threshold: f64,
    /// Maximum fraction of uncertain bits tolerated before a frame is dropped.
    pub max_uncertain_ratio: f64,

    /// Vertical rate (fpm, negative = descending) that triggers a rapid
    /// descent event.
    pub rapid_descent_fpm: i32,
    /// Altitude (ft) below which (and above 0, "on ground") a low-altitude
    /// event fires.
    pub low_altitude_ft: i32,
    /// Pairwise proximity thresholds.
    pub proximity_nm: f64,
    pub proximity_ft: i32,
    /// Circling detection window and cumulative-heading threshold.
    pub circling_window_secs: f64,
    pub circling_threshold_deg: f64,

    /// Capacity of the per-aircraft position/heading history rings.
    pub history_ring_size: usize,

    /// Minimum seconds between positions forwarded to the persistence sink
    /// for the same aircraft. 0 disables downsampling.
    pub min_position_interval_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receiver_lat: None,
            receiver_lon: None,
            stale_timeout_secs: 60.0,
            icao_cache_ttl_secs: 60.0,
            noise_floor_alpha: 0.05,
            absolute_minimum_level: 0.0,
            preamble_ratio: 2.0,
            snr_signal_factor: 2.0,
            snr_noise_factor: 3.0,
            bit_delta_threshold: 0.15,
            max_uncertain_ratio: 0.20,
            rapid_descent_fpm: -5000,
            low_altitude_ft: 500,
            proximity_nm: 5.0,
            proximity_ft: 1000,
            circling_window_secs: 300.0,
            circling_threshold_deg: 360.0,
            history_ring_size: 120,
            min_position_interval_secs: 0.0,
        }
    }
}
