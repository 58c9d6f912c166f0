//! Environment-driven configuration. Every knob has a default that works
//! for local development against the simulator.

use std::path::PathBuf;

/// Knobs for the director control loop.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Directory of track path JSON files (default data/tracks)
    pub track_dir: PathBuf,
    /// Camera switch cadence (default 500 ms)
    pub switch_interval_ms: u64,
    /// Hunt cadence (default 5 s)
    pub hunt_interval_secs: u64,
    /// Minimum gap between two actual switches (default 5000 ms)
    pub cooldown_ms: u64,
    /// Delay between race start and the pole-sitter pin (default 5 s)
    pub start_settle_secs: u64,
    /// Chance of the in-car camera on any given cut (default 0.1)
    pub driver_cam_probability: f64,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            track_dir: std::env::var("PITWALL_TRACK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/tracks")),
            switch_interval_ms: std::env::var("PITWALL_SWITCH_INTERVAL_MS")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(500),
            hunt_interval_secs: std::env::var("PITWALL_HUNT_INTERVAL_SECS")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            cooldown_ms: std::env::var("PITWALL_COOLDOWN_MS")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(5000),
            start_settle_secs: std::env::var("PITWALL_START_SETTLE_SECS")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            driver_cam_probability: std::env::var("PITWALL_DRIVER_CAM_PROBABILITY")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(0.1),
        }
    }
}

/// Process-level wiring: ports and peer addresses.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// UDP port the telemetry hub listens on (default 29998)
    pub telemetry_port: u16,
    /// Where camera commands are sent (default 127.0.0.1:29997)
    pub camera_addr: String,
    /// HTTP status port (default 3210)
    pub status_port: u16,
    pub director: DirectorConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            telemetry_port: std::env::var("PITWALL_TELEMETRY_PORT")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(29998),
            camera_addr: std::env::var("PITWALL_CAMERA_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:29997".to_string()),
            status_port: std::env::var("PITWALL_STATUS_PORT")
                .ok().and_then(|v| v.parse().ok()).unwrap_or(3210),
            director: DirectorConfig::default(),
        }
    }
}
